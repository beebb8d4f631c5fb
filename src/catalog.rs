//! SQLite catalog of volumes, content-addressed image files, photos and folders
//!
//! Every reconciliation step runs inside a [`CatalogTx`] obtained from
//! [`Catalog::transaction`]. The handle is passed explicitly to each catalog
//! call; dropping it without [`CatalogTx::commit`] rolls the step back.

use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row, Transaction};
use std::cell::Cell;
use std::path::{Path, PathBuf};

use crate::models::{
    FileLocation, FileStamp, Folder, FolderId, ImageFile, ImageFileId, ImageInfo, LocatedFile,
    LocationId, Photo, PhotoId, Volume, VolumeId,
};

/// Name of the folder at the top of the hierarchy
pub const ROOT_FOLDER_NAME: &str = "Top";

/// Catalog database
pub struct Catalog {
    conn: Connection,
    db_path: Option<PathBuf>,
    /// Rows changed by committed mutations since the catalog was opened
    mutations: Cell<u64>,
}

impl Catalog {
    /// Open or create a catalog
    pub fn open(path: &Path) -> SqliteResult<Self> {
        let conn = Connection::open(path)?;
        let catalog = Self {
            conn,
            db_path: Some(path.to_path_buf()),
            mutations: Cell::new(0),
        };
        catalog.init_schema()?;
        Ok(catalog)
    }

    /// Open in-memory catalog (for testing)
    pub fn open_memory() -> SqliteResult<Self> {
        let conn = Connection::open_in_memory()?;
        let catalog = Self {
            conn,
            db_path: None,
            mutations: Cell::new(0),
        };
        catalog.init_schema()?;
        Ok(catalog)
    }

    fn init_schema(&self) -> SqliteResult<()> {
        self.conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS folders (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                parent_id INTEGER REFERENCES folders(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                UNIQUE(parent_id, name)
            );
            CREATE INDEX IF NOT EXISTS idx_folders_parent ON folders(parent_id);

            CREATE TABLE IF NOT EXISTS volumes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                base_path TEXT NOT NULL,
                folder_id INTEGER REFERENCES folders(id) ON DELETE SET NULL
            );

            CREATE TABLE IF NOT EXISTS image_files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                hash TEXT NOT NULL UNIQUE,
                width INTEGER NOT NULL,
                height INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS file_locations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                image_file_id INTEGER NOT NULL REFERENCES image_files(id) ON DELETE CASCADE,
                volume_id INTEGER NOT NULL REFERENCES volumes(id) ON DELETE CASCADE,
                path TEXT NOT NULL,
                mtime_ms INTEGER NOT NULL,
                size INTEGER NOT NULL,
                UNIQUE(volume_id, path)
            );
            CREATE INDEX IF NOT EXISTS idx_file_locations_image ON file_locations(image_file_id);

            CREATE TABLE IF NOT EXISTS photos (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                original_file_id INTEGER NOT NULL UNIQUE REFERENCES image_files(id),
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS photo_copies (
                photo_id INTEGER NOT NULL REFERENCES photos(id) ON DELETE CASCADE,
                image_file_id INTEGER NOT NULL REFERENCES image_files(id) ON DELETE CASCADE,
                max_width INTEGER NOT NULL,
                max_height INTEGER NOT NULL,
                PRIMARY KEY (photo_id, image_file_id)
            );
            CREATE INDEX IF NOT EXISTS idx_photo_copies_file ON photo_copies(image_file_id);

            CREATE TABLE IF NOT EXISTS folder_photos (
                folder_id INTEGER NOT NULL REFERENCES folders(id) ON DELETE CASCADE,
                photo_id INTEGER NOT NULL REFERENCES photos(id) ON DELETE CASCADE,
                PRIMARY KEY (folder_id, photo_id)
            );
            CREATE INDEX IF NOT EXISTS idx_folder_photos_photo ON folder_photos(photo_id);
            ",
        )?;
        Ok(())
    }

    /// Path of the database file, `None` for in-memory catalogs
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Begin a reconciliation step
    pub fn transaction(&self) -> SqliteResult<CatalogTx<'_>> {
        Ok(CatalogTx {
            tx: self.conn.unchecked_transaction()?,
            committed: &self.mutations,
            pending: Cell::new(0),
        })
    }

    /// Rows changed by committed mutations since the catalog was opened
    pub fn mutation_count(&self) -> u64 {
        self.mutations.get()
    }

    fn bump(&self, rows: usize) {
        self.mutations.set(self.mutations.get() + rows as u64);
    }

    /// Register a volume, or update the base path of an existing one
    pub fn register_volume(&self, name: &str, base_path: &Path) -> SqliteResult<Volume> {
        let base = base_path.to_string_lossy().to_string();
        let changed = self.conn.execute(
            "INSERT INTO volumes (name, base_path) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET base_path = excluded.base_path
             WHERE base_path != excluded.base_path",
            params![name, base],
        )?;
        self.bump(changed);
        self.volume(name)?
            .ok_or(rusqlite::Error::QueryReturnedNoRows)
    }

    /// Look up a volume by name
    pub fn volume(&self, name: &str) -> SqliteResult<Option<Volume>> {
        self.conn
            .query_row(
                "SELECT id, name, base_path, folder_id FROM volumes WHERE name = ?1",
                [name],
                volume_from_row,
            )
            .optional()
    }

    /// All registered volumes, ordered by name
    pub fn list_volumes(&self) -> SqliteResult<Vec<Volume>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, base_path, folder_id FROM volumes ORDER BY name")?;
        let rows = stmt.query_map([], volume_from_row)?;
        rows.collect()
    }

    /// The folder at the top of the hierarchy, created on first use
    pub fn root_folder(&self) -> SqliteResult<Folder> {
        let existing = self
            .conn
            .query_row(
                "SELECT id, parent_id, name FROM folders WHERE parent_id IS NULL ORDER BY id LIMIT 1",
                [],
                folder_from_row,
            )
            .optional()?;
        if let Some(folder) = existing {
            return Ok(folder);
        }

        self.conn.execute(
            "INSERT INTO folders (parent_id, name) VALUES (NULL, ?1)",
            [ROOT_FOLDER_NAME],
        )?;
        self.bump(1);
        Ok(Folder {
            id: FolderId(self.conn.last_insert_rowid()),
            parent: None,
            name: ROOT_FOLDER_NAME.to_string(),
        })
    }

    /// Resolve the top-level folder mirroring the volume root.
    ///
    /// Creates it under the root folder (named after the volume) if the volume
    /// has none yet, and records it on the volume.
    pub fn volume_folder(&self, volume: &mut Volume, max_name_len: usize) -> SqliteResult<Folder> {
        if let Some(id) = volume.folder {
            if let Some(folder) = self.folder(id)? {
                return Ok(folder);
            }
        }

        let root = self.root_folder()?;
        let name: String = volume.name.chars().take(max_name_len).collect();
        let tx = self.transaction()?;
        let (folder, _) = tx.find_or_create_subfolder(root.id, &name)?;
        let changed = tx.tx.execute(
            "UPDATE volumes SET folder_id = ?1 WHERE id = ?2",
            params![folder.id.0, volume.id.0],
        )?;
        tx.pending.set(tx.pending.get() + changed as u64);
        tx.commit()?;

        volume.folder = Some(folder.id);
        Ok(folder)
    }

    pub fn folder(&self, id: FolderId) -> SqliteResult<Option<Folder>> {
        self.conn
            .query_row(
                "SELECT id, parent_id, name FROM folders WHERE id = ?1",
                [id.0],
                folder_from_row,
            )
            .optional()
    }

    /// Direct children of a folder, ordered by name
    pub fn subfolders(&self, parent: FolderId) -> SqliteResult<Vec<Folder>> {
        query_subfolders(&self.conn, parent)
    }

    /// Photos linked to a folder
    pub fn folder_photos(&self, folder: FolderId) -> SqliteResult<Vec<PhotoId>> {
        query_folder_photos(&self.conn, folder)
    }

    pub fn find_file_by_hash(&self, hash: &str) -> SqliteResult<Option<ImageFile>> {
        query_file_by_hash(&self.conn, hash)
    }

    /// All locations of an image file
    pub fn locations_of(&self, image_file: ImageFileId) -> SqliteResult<Vec<FileLocation>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, image_file_id, volume_id, path, mtime_ms, size
             FROM file_locations WHERE image_file_id = ?1 ORDER BY volume_id, path",
        )?;
        let rows = stmt.query_map([image_file.0], location_from_row)?;
        rows.collect()
    }

    pub fn photos_for_image_file(&self, image_file: ImageFileId) -> SqliteResult<Vec<PhotoId>> {
        query_photos_for_image_file(&self.conn, image_file)
    }

    /// Photos owning whatever is recorded at (volume, path), without touching the file
    pub fn photos_at_location(&self, volume: VolumeId, path: &str) -> SqliteResult<Vec<PhotoId>> {
        let image_file: Option<i64> = self
            .conn
            .query_row(
                "SELECT image_file_id FROM file_locations WHERE volume_id = ?1 AND path = ?2",
                params![volume.0, path],
                |row| row.get(0),
            )
            .optional()?;
        match image_file {
            Some(id) => query_photos_for_image_file(&self.conn, ImageFileId(id)),
            None => Ok(Vec::new()),
        }
    }

    /// Derived copies (previews) of a photo
    pub fn photo_copies(&self, photo: PhotoId) -> SqliteResult<Vec<ImageFileId>> {
        let mut stmt = self.conn.prepare(
            "SELECT image_file_id FROM photo_copies WHERE photo_id = ?1 ORDER BY image_file_id",
        )?;
        let rows = stmt.query_map([photo.0], |row| Ok(ImageFileId(row.get(0)?)))?;
        rows.collect()
    }

    pub fn image_file_count(&self) -> SqliteResult<u64> {
        self.count("SELECT COUNT(*) FROM image_files")
    }

    pub fn photo_count(&self) -> SqliteResult<u64> {
        self.count("SELECT COUNT(*) FROM photos")
    }

    pub fn folder_count(&self) -> SqliteResult<u64> {
        self.count("SELECT COUNT(*) FROM folders")
    }

    fn count(&self, sql: &str) -> SqliteResult<u64> {
        let count: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("db_path", &self.db_path)
            .field("mutations", &self.mutations.get())
            .finish()
    }
}

/// Explicit session handle for one reconciliation step
pub struct CatalogTx<'c> {
    tx: Transaction<'c>,
    committed: &'c Cell<u64>,
    pending: Cell<u64>,
}

impl<'c> CatalogTx<'c> {
    /// Commit the step and account its mutations to the catalog
    pub fn commit(self) -> SqliteResult<()> {
        let pending = self.pending.get();
        self.tx.commit()?;
        self.committed.set(self.committed.get() + pending);
        Ok(())
    }

    fn mutated(&self, rows: usize) {
        self.pending.set(self.pending.get() + rows as u64);
    }

    /// Image file currently recorded at (volume, path)
    pub fn find_file_at_location(
        &self,
        volume: VolumeId,
        path: &str,
    ) -> SqliteResult<Option<LocatedFile>> {
        self.tx
            .query_row(
                "SELECT l.id, l.image_file_id, l.volume_id, l.path, l.mtime_ms, l.size,
                        f.id, f.hash, f.width, f.height
                 FROM file_locations l JOIN image_files f ON f.id = l.image_file_id
                 WHERE l.volume_id = ?1 AND l.path = ?2",
                params![volume.0, path],
                |row| {
                    Ok(LocatedFile {
                        location: location_from_row(row)?,
                        image_file: ImageFile {
                            id: ImageFileId(row.get(6)?),
                            hash: row.get(7)?,
                            width: row.get(8)?,
                            height: row.get(9)?,
                        },
                    })
                },
            )
            .optional()
    }

    pub fn find_file_by_hash(&self, hash: &str) -> SqliteResult<Option<ImageFile>> {
        query_file_by_hash(&self.tx, hash)
    }

    /// Register new content
    pub fn create_image_file(&self, hash: &str, info: ImageInfo) -> SqliteResult<ImageFile> {
        let now = chrono::Utc::now().timestamp();
        let changed = self.tx.execute(
            "INSERT INTO image_files (hash, width, height, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![hash, info.width, info.height, now],
        )?;
        self.mutated(changed);
        Ok(ImageFile {
            id: ImageFileId(self.tx.last_insert_rowid()),
            hash: hash.to_string(),
            width: info.width,
            height: info.height,
        })
    }

    pub fn add_location(
        &self,
        image_file: ImageFileId,
        volume: VolumeId,
        path: &str,
        stamp: FileStamp,
    ) -> SqliteResult<FileLocation> {
        let changed = self.tx.execute(
            "INSERT INTO file_locations (image_file_id, volume_id, path, mtime_ms, size)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![image_file.0, volume.0, path, stamp.mtime_ms, stamp.size as i64],
        )?;
        self.mutated(changed);
        Ok(FileLocation {
            id: LocationId(self.tx.last_insert_rowid()),
            image_file,
            volume,
            path: path.to_string(),
            mtime_ms: stamp.mtime_ms,
            size: stamp.size,
        })
    }

    pub fn remove_location(&self, location: LocationId) -> SqliteResult<()> {
        let changed = self
            .tx
            .execute("DELETE FROM file_locations WHERE id = ?1", [location.0])?;
        self.mutated(changed);
        Ok(())
    }

    /// Locations directly inside the directory `prefix` (`""` is the volume root)
    pub fn locations_in(&self, volume: VolumeId, prefix: &str) -> SqliteResult<Vec<FileLocation>> {
        let mut stmt = self.tx.prepare_cached(
            "SELECT id, image_file_id, volume_id, path, mtime_ms, size
             FROM file_locations
             WHERE volume_id = ?1 AND substr(path, 1, length(?2)) = ?2
               AND instr(substr(path, length(?2) + 1), '/') = 0
             ORDER BY path",
        )?;
        let rows = stmt.query_map(params![volume.0, prefix], location_from_row)?;
        rows.collect()
    }

    /// Names of the subdirectories of `prefix` that still hold locations
    pub fn location_subdirs(&self, volume: VolumeId, prefix: &str) -> SqliteResult<Vec<String>> {
        let mut stmt = self.tx.prepare_cached(
            "SELECT DISTINCT substr(rest, 1, instr(rest, '/') - 1) FROM (
                 SELECT substr(path, length(?2) + 1) AS rest FROM file_locations
                 WHERE volume_id = ?1 AND substr(path, 1, length(?2)) = ?2
             )
             WHERE instr(rest, '/') > 0
             ORDER BY 1",
        )?;
        let rows = stmt.query_map(params![volume.0, prefix], |row| row.get(0))?;
        rows.collect()
    }

    /// Forget every location below the directory `prefix`; returns the count
    pub fn remove_locations_under(&self, volume: VolumeId, prefix: &str) -> SqliteResult<u64> {
        let changed = self.tx.execute(
            "DELETE FROM file_locations
             WHERE volume_id = ?1 AND substr(path, 1, length(?2)) = ?2",
            params![volume.0, prefix],
        )?;
        self.mutated(changed);
        Ok(changed as u64)
    }

    /// Record new size/mtime for a location whose content is unchanged
    pub fn refresh_location(&self, location: LocationId, stamp: FileStamp) -> SqliteResult<()> {
        let changed = self.tx.execute(
            "UPDATE file_locations SET mtime_ms = ?1, size = ?2 WHERE id = ?3",
            params![stamp.mtime_ms, stamp.size as i64, location.0],
        )?;
        self.mutated(changed);
        Ok(())
    }

    /// Photos that own the image file as original or as a derived copy
    pub fn photos_for_image_file(&self, image_file: ImageFileId) -> SqliteResult<Vec<PhotoId>> {
        query_photos_for_image_file(&self.tx, image_file)
    }

    pub fn create_photo(&self, original: ImageFileId) -> SqliteResult<Photo> {
        let now = chrono::Utc::now().timestamp();
        let changed = self.tx.execute(
            "INSERT INTO photos (original_file_id, created_at) VALUES (?1, ?2)",
            params![original.0, now],
        )?;
        self.mutated(changed);
        Ok(Photo {
            id: PhotoId(self.tx.last_insert_rowid()),
            original,
        })
    }

    /// Attach a derived copy (e.g. a preview) to a photo
    pub fn add_photo_copy(
        &self,
        photo: PhotoId,
        image_file: ImageFileId,
        max_width: u32,
        max_height: u32,
    ) -> SqliteResult<()> {
        let changed = self.tx.execute(
            "INSERT OR IGNORE INTO photo_copies (photo_id, image_file_id, max_width, max_height)
             VALUES (?1, ?2, ?3, ?4)",
            params![photo.0, image_file.0, max_width, max_height],
        )?;
        self.mutated(changed);
        Ok(())
    }

    /// Child folder with the given name, created if missing.
    /// The flag is true if the folder was created.
    pub fn find_or_create_subfolder(
        &self,
        parent: FolderId,
        name: &str,
    ) -> SqliteResult<(Folder, bool)> {
        let existing = self
            .tx
            .query_row(
                "SELECT id, parent_id, name FROM folders WHERE parent_id = ?1 AND name = ?2",
                params![parent.0, name],
                folder_from_row,
            )
            .optional()?;
        if let Some(folder) = existing {
            return Ok((folder, false));
        }

        let changed = self.tx.execute(
            "INSERT INTO folders (parent_id, name) VALUES (?1, ?2)",
            params![parent.0, name],
        )?;
        self.mutated(changed);
        Ok((
            Folder {
                id: FolderId(self.tx.last_insert_rowid()),
                parent: Some(parent),
                name: name.to_string(),
            },
            true,
        ))
    }

    pub fn subfolders(&self, parent: FolderId) -> SqliteResult<Vec<Folder>> {
        query_subfolders(&self.tx, parent)
    }

    /// Delete a folder with its whole subtree and photo links
    pub fn delete_folder(&self, folder: FolderId) -> SqliteResult<()> {
        let changed = self
            .tx
            .execute("DELETE FROM folders WHERE id = ?1", [folder.0])?;
        self.mutated(changed);
        Ok(())
    }

    pub fn folder_photos(&self, folder: FolderId) -> SqliteResult<Vec<PhotoId>> {
        query_folder_photos(&self.tx, folder)
    }

    pub fn add_photo_to_folder(&self, folder: FolderId, photo: PhotoId) -> SqliteResult<()> {
        let changed = self.tx.execute(
            "INSERT OR IGNORE INTO folder_photos (folder_id, photo_id) VALUES (?1, ?2)",
            params![folder.0, photo.0],
        )?;
        self.mutated(changed);
        Ok(())
    }

    pub fn remove_photo_from_folder(&self, folder: FolderId, photo: PhotoId) -> SqliteResult<()> {
        let changed = self.tx.execute(
            "DELETE FROM folder_photos WHERE folder_id = ?1 AND photo_id = ?2",
            params![folder.0, photo.0],
        )?;
        self.mutated(changed);
        Ok(())
    }
}

fn query_file_by_hash(conn: &Connection, hash: &str) -> SqliteResult<Option<ImageFile>> {
    conn.query_row(
        "SELECT id, hash, width, height FROM image_files WHERE hash = ?1",
        [hash],
        |row| {
            Ok(ImageFile {
                id: ImageFileId(row.get(0)?),
                hash: row.get(1)?,
                width: row.get(2)?,
                height: row.get(3)?,
            })
        },
    )
    .optional()
}

fn query_photos_for_image_file(
    conn: &Connection,
    image_file: ImageFileId,
) -> SqliteResult<Vec<PhotoId>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM photos WHERE original_file_id = ?1
         UNION
         SELECT photo_id FROM photo_copies WHERE image_file_id = ?1
         ORDER BY 1",
    )?;
    let rows = stmt.query_map([image_file.0], |row| Ok(PhotoId(row.get(0)?)))?;
    rows.collect()
}

fn query_subfolders(conn: &Connection, parent: FolderId) -> SqliteResult<Vec<Folder>> {
    let mut stmt =
        conn.prepare("SELECT id, parent_id, name FROM folders WHERE parent_id = ?1 ORDER BY name")?;
    let rows = stmt.query_map([parent.0], folder_from_row)?;
    rows.collect()
}

fn query_folder_photos(conn: &Connection, folder: FolderId) -> SqliteResult<Vec<PhotoId>> {
    let mut stmt =
        conn.prepare("SELECT photo_id FROM folder_photos WHERE folder_id = ?1 ORDER BY photo_id")?;
    let rows = stmt.query_map([folder.0], |row| Ok(PhotoId(row.get(0)?)))?;
    rows.collect()
}

fn volume_from_row(row: &Row<'_>) -> SqliteResult<Volume> {
    Ok(Volume {
        id: VolumeId(row.get(0)?),
        name: row.get(1)?,
        base_path: PathBuf::from(row.get::<_, String>(2)?),
        folder: row.get::<_, Option<i64>>(3)?.map(FolderId),
    })
}

fn folder_from_row(row: &Row<'_>) -> SqliteResult<Folder> {
    Ok(Folder {
        id: FolderId(row.get(0)?),
        parent: row.get::<_, Option<i64>>(1)?.map(FolderId),
        name: row.get(2)?,
    })
}

fn location_from_row(row: &Row<'_>) -> SqliteResult<FileLocation> {
    Ok(FileLocation {
        id: LocationId(row.get(0)?),
        image_file: ImageFileId(row.get(1)?),
        volume: VolumeId(row.get(2)?),
        path: row.get(3)?,
        mtime_ms: row.get(4)?,
        size: row.get::<_, i64>(5)? as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAMP: FileStamp = FileStamp {
        size: 42,
        mtime_ms: 1_700_000_000_000,
    };

    fn info() -> ImageInfo {
        ImageInfo {
            width: 4,
            height: 3,
        }
    }

    #[test]
    fn test_register_volume_is_idempotent() {
        let catalog = Catalog::open_memory().unwrap();
        let v1 = catalog.register_volume("ext", Path::new("/mnt/ext")).unwrap();
        let after_first = catalog.mutation_count();
        let v2 = catalog.register_volume("ext", Path::new("/mnt/ext")).unwrap();

        assert_eq!(v1, v2);
        assert_eq!(catalog.mutation_count(), after_first);

        let v3 = catalog.register_volume("ext", Path::new("/media/ext")).unwrap();
        assert_eq!(v3.id, v1.id);
        assert_eq!(v3.base_path, PathBuf::from("/media/ext"));
        assert_eq!(catalog.list_volumes().unwrap().len(), 1);
    }

    #[test]
    fn test_location_lookup_and_removal() {
        let catalog = Catalog::open_memory().unwrap();
        let volume = catalog.register_volume("ext", Path::new("/mnt/ext")).unwrap();

        let tx = catalog.transaction().unwrap();
        let file = tx.create_image_file("abc", info()).unwrap();
        tx.add_location(file.id, volume.id, "sub/a.jpg", STAMP).unwrap();
        tx.commit().unwrap();

        let tx = catalog.transaction().unwrap();
        let found = tx
            .find_file_at_location(volume.id, "sub/a.jpg")
            .unwrap()
            .unwrap();
        assert_eq!(found.image_file, file);
        assert_eq!(found.location.size, 42);
        assert!(tx.find_file_at_location(volume.id, "a.jpg").unwrap().is_none());

        tx.remove_location(found.location.id).unwrap();
        tx.commit().unwrap();
        assert!(catalog.locations_of(file.id).unwrap().is_empty());
    }

    #[test]
    fn test_dropped_transaction_rolls_back_and_is_not_counted() {
        let catalog = Catalog::open_memory().unwrap();
        let before = catalog.mutation_count();
        {
            let tx = catalog.transaction().unwrap();
            tx.create_image_file("abc", info()).unwrap();
        }
        assert_eq!(catalog.mutation_count(), before);
        assert!(catalog.find_file_by_hash("abc").unwrap().is_none());
    }

    #[test]
    fn test_photos_for_image_file_includes_copies() {
        let catalog = Catalog::open_memory().unwrap();
        let tx = catalog.transaction().unwrap();
        let original = tx.create_image_file("orig", info()).unwrap();
        let preview = tx.create_image_file("prev", info()).unwrap();
        let photo = tx.create_photo(original.id).unwrap();
        tx.add_photo_copy(photo.id, preview.id, 100, 100).unwrap();
        tx.commit().unwrap();

        assert_eq!(
            catalog.photos_for_image_file(original.id).unwrap(),
            vec![photo.id]
        );
        assert_eq!(
            catalog.photos_for_image_file(preview.id).unwrap(),
            vec![photo.id]
        );
        assert_eq!(catalog.photo_copies(photo.id).unwrap(), vec![preview.id]);
    }

    #[test]
    fn test_find_or_create_subfolder_reuses_existing() {
        let catalog = Catalog::open_memory().unwrap();
        let root = catalog.root_folder().unwrap();

        let tx = catalog.transaction().unwrap();
        let (a, created) = tx.find_or_create_subfolder(root.id, "2023").unwrap();
        assert!(created);
        let (b, created) = tx.find_or_create_subfolder(root.id, "2023").unwrap();
        assert!(!created);
        assert_eq!(a, b);
        tx.commit().unwrap();

        assert_eq!(catalog.subfolders(root.id).unwrap(), vec![a]);
    }

    #[test]
    fn test_delete_folder_cascades() {
        let catalog = Catalog::open_memory().unwrap();
        let root = catalog.root_folder().unwrap();

        let tx = catalog.transaction().unwrap();
        let (parent, _) = tx.find_or_create_subfolder(root.id, "parent").unwrap();
        let (child, _) = tx.find_or_create_subfolder(parent.id, "child").unwrap();
        let file = tx.create_image_file("abc", info()).unwrap();
        let photo = tx.create_photo(file.id).unwrap();
        tx.add_photo_to_folder(child.id, photo.id).unwrap();
        tx.commit().unwrap();

        let tx = catalog.transaction().unwrap();
        tx.delete_folder(parent.id).unwrap();
        tx.commit().unwrap();

        assert!(catalog.folder(parent.id).unwrap().is_none());
        assert!(catalog.folder(child.id).unwrap().is_none());
        assert!(catalog.folder_photos(child.id).unwrap().is_empty());
        assert_eq!(catalog.folder_count().unwrap(), 1);
        assert_eq!(catalog.photo_count().unwrap(), 1);
    }

    #[test]
    fn test_volume_folder_created_once() {
        let catalog = Catalog::open_memory().unwrap();
        let mut volume = catalog
            .register_volume("holiday-archive", Path::new("/mnt/ext"))
            .unwrap();

        let folder = catalog.volume_folder(&mut volume, 7).unwrap();
        assert_eq!(folder.name, "holiday");
        assert_eq!(volume.folder, Some(folder.id));

        let reloaded = catalog.volume("holiday-archive").unwrap().unwrap();
        assert_eq!(reloaded.folder, Some(folder.id));

        let before = catalog.mutation_count();
        let mut reloaded = reloaded;
        let again = catalog.volume_folder(&mut reloaded, 7).unwrap();
        assert_eq!(again, folder);
        assert_eq!(catalog.mutation_count(), before);
    }

    #[test]
    fn test_folder_photo_links() {
        let catalog = Catalog::open_memory().unwrap();
        let root = catalog.root_folder().unwrap();
        let tx = catalog.transaction().unwrap();
        let file = tx.create_image_file("abc", info()).unwrap();
        let photo = tx.create_photo(file.id).unwrap();
        tx.add_photo_to_folder(root.id, photo.id).unwrap();
        tx.add_photo_to_folder(root.id, photo.id).unwrap();
        assert_eq!(tx.folder_photos(root.id).unwrap(), vec![photo.id]);
        tx.remove_photo_from_folder(root.id, photo.id).unwrap();
        assert!(tx.folder_photos(root.id).unwrap().is_empty());
        tx.commit().unwrap();
    }

    #[test]
    fn test_location_queries_stay_inside_directory() {
        let catalog = Catalog::open_memory().unwrap();
        let volume = catalog.register_volume("ext", Path::new("/mnt/ext")).unwrap();
        let other = catalog.register_volume("other", Path::new("/mnt/other")).unwrap();

        let tx = catalog.transaction().unwrap();
        let file = tx.create_image_file("abc", info()).unwrap();
        for path in ["a.jpg", "sub/b.jpg", "sub/deep/c.jpg", "subway/d.jpg"] {
            tx.add_location(file.id, volume.id, path, STAMP).unwrap();
        }
        tx.add_location(file.id, other.id, "sub/e.jpg", STAMP).unwrap();

        let paths = |prefix: &str| -> Vec<String> {
            tx.locations_in(volume.id, prefix)
                .unwrap()
                .into_iter()
                .map(|l| l.path)
                .collect()
        };
        assert_eq!(paths(""), vec!["a.jpg"]);
        assert_eq!(paths("sub/"), vec!["sub/b.jpg"]);
        assert!(paths("missing/").is_empty());

        assert_eq!(tx.location_subdirs(volume.id, "").unwrap(), vec!["sub", "subway"]);
        assert_eq!(tx.location_subdirs(volume.id, "sub/").unwrap(), vec!["deep"]);

        assert_eq!(tx.remove_locations_under(volume.id, "sub/").unwrap(), 2);
        assert_eq!(tx.location_subdirs(volume.id, "").unwrap(), vec!["subway"]);
        tx.commit().unwrap();
        assert_eq!(catalog.locations_of(file.id).unwrap().len(), 3);
    }

    #[test]
    fn test_photos_at_location_is_read_only() {
        let catalog = Catalog::open_memory().unwrap();
        let volume = catalog.register_volume("ext", Path::new("/mnt/ext")).unwrap();
        let tx = catalog.transaction().unwrap();
        let file = tx.create_image_file("abc", info()).unwrap();
        tx.add_location(file.id, volume.id, "a.jpg", STAMP).unwrap();
        let photo = tx.create_photo(file.id).unwrap();
        tx.commit().unwrap();

        let before = catalog.mutation_count();
        assert_eq!(
            catalog.photos_at_location(volume.id, "a.jpg").unwrap(),
            vec![photo.id]
        );
        assert!(catalog.photos_at_location(volume.id, "b.jpg").unwrap().is_empty());
        assert_eq!(catalog.mutation_count(), before);
    }
}
