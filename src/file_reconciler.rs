//! Decides the fate of a single file and applies it to the catalog
//!
//! Each file is reconciled in its own catalog transaction. The content hash
//! is computed lazily: never for a file whose size and mtime still match its
//! recorded location, because hashing means reading the whole file.

use log::{debug, error, warn};
use std::fs;
use std::path::Path;

use crate::catalog::{Catalog, CatalogTx};
use crate::error::IndexError;
use crate::hasher::ContentHasher;
use crate::imaging::{ImageProbe, PreviewSettings};
use crate::models::{
    catalog_path, FileReconciliation, FileStamp, ImageFile, IndexOutcome, Photo, PhotoId, Volume,
};

/// Reconciles files of one volume against the catalog
pub struct FileReconciler<'a> {
    catalog: &'a Catalog,
    volume: &'a Volume,
    hasher: &'a dyn ContentHasher,
    probe: &'a dyn ImageProbe,
    previews: Option<&'a PreviewSettings>,
    preview_size: (u32, u32),
}

impl<'a> FileReconciler<'a> {
    pub fn new(
        catalog: &'a Catalog,
        volume: &'a Volume,
        hasher: &'a dyn ContentHasher,
        probe: &'a dyn ImageProbe,
    ) -> Self {
        Self {
            catalog,
            volume,
            hasher,
            probe,
            previews: None,
            preview_size: (0, 0),
        }
    }

    /// Create preview copies of new photos on the given volume
    pub fn with_previews(
        mut self,
        previews: Option<&'a PreviewSettings>,
        max_width: u32,
        max_height: u32,
    ) -> Self {
        self.previews = previews;
        self.preview_size = (max_width, max_height);
        self
    }

    /// Reconcile one file. Never fails: errors become `NotImage` or `Skipped`.
    pub fn reconcile(&self, path: &Path) -> FileReconciliation {
        match self.try_reconcile(path) {
            Ok(result) => result,
            Err(e) if e.is_not_an_image() => {
                debug!("Not an image: {}", path.display());
                FileReconciliation::not_image()
            }
            Err(e) => {
                error!(
                    "Abandoning {} on volume {}: {}",
                    path.display(),
                    self.volume.name,
                    e
                );
                FileReconciliation::skipped(self.prior_photos(path))
            }
        }
    }

    /// Photos the path was linked to before this run, so that an abandoned
    /// file does not drop out of its folder
    fn prior_photos(&self, path: &Path) -> Vec<PhotoId> {
        let Ok(relative) = self.relative_path(path) else {
            return Vec::new();
        };
        match self.catalog.photos_at_location(self.volume.id, &relative) {
            Ok(photos) => photos,
            Err(e) => {
                warn!("Cannot look up previous photos of {}: {}", relative, e);
                Vec::new()
            }
        }
    }

    fn try_reconcile(&self, path: &Path) -> Result<FileReconciliation, IndexError> {
        let db = |e: rusqlite::Error| IndexError::catalog_mutation(path.to_path_buf(), e);

        let relative = self.relative_path(path)?;
        let metadata =
            fs::metadata(path).map_err(|e| IndexError::io_error(Some(path.to_path_buf()), e.to_string()))?;
        let stamp = FileStamp::from_metadata(&metadata);

        let tx = self.catalog.transaction().map_err(db)?;
        let mut hash = None;

        if let Some(known) = tx
            .find_file_at_location(self.volume.id, &relative)
            .map_err(db)?
        {
            if stamp.matches(&known.location) {
                return self.finish_known(tx, &known.image_file, path);
            }

            // Same size but a new mtime: only the hash can tell
            if stamp.size == known.location.size {
                let current = self.hasher.hash_file(path)?;
                if current == known.image_file.hash {
                    debug!("Touched but unchanged: {}", relative);
                    tx.refresh_location(known.location.id, stamp).map_err(db)?;
                    return self.finish_known(tx, &known.image_file, path);
                }
                hash = Some(current);
            }

            debug!("Stale location {} (was {})", relative, known.image_file.hash);
            tx.remove_location(known.location.id).map_err(db)?;
        }

        let hash = match hash {
            Some(hash) => hash,
            None => self.hasher.hash_file(path)?,
        };

        if let Some(image_file) = tx.find_file_by_hash(&hash).map_err(db)? {
            tx.add_location(image_file.id, self.volume.id, &relative, stamp)
                .map_err(db)?;
            let (photos, created) = self.owning_photos(&tx, &image_file).map_err(db)?;
            tx.commit().map_err(db)?;
            let outcome = match created {
                Some(photo) => {
                    self.create_preview(path, &photo, &hash);
                    IndexOutcome::NewPhoto
                }
                None => IndexOutcome::NewInstance,
            };
            return Ok(FileReconciliation::indexed(outcome, photos));
        }

        let info = match self.probe.probe(path) {
            Ok(info) => info,
            Err(e) if e.is_not_an_image() => {
                // Keep the removal of a stale location
                tx.commit().map_err(db)?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let image_file = tx.create_image_file(&hash, info).map_err(db)?;
        tx.add_location(image_file.id, self.volume.id, &relative, stamp)
            .map_err(db)?;
        let photo = tx.create_photo(image_file.id).map_err(db)?;
        tx.commit().map_err(db)?;

        self.create_preview(path, &photo, &hash);
        Ok(FileReconciliation::indexed(
            IndexOutcome::NewPhoto,
            vec![photo.id],
        ))
    }

    /// Commit a step for an already known location and report it unchanged,
    /// unless its content had no photo yet.
    fn finish_known(
        &self,
        tx: CatalogTx<'_>,
        image_file: &ImageFile,
        path: &Path,
    ) -> Result<FileReconciliation, IndexError> {
        let db = |e: rusqlite::Error| IndexError::catalog_mutation(path.to_path_buf(), e);
        let (photos, created) = self.owning_photos(&tx, image_file).map_err(db)?;
        tx.commit().map_err(db)?;
        match created {
            Some(photo) => {
                self.create_preview(path, &photo, &image_file.hash);
                Ok(FileReconciliation::indexed(IndexOutcome::NewPhoto, photos))
            }
            None => Ok(FileReconciliation::unchanged(photos)),
        }
    }

    /// Photos owning the image file; creates one if there is none yet
    fn owning_photos(
        &self,
        tx: &CatalogTx<'_>,
        image_file: &ImageFile,
    ) -> rusqlite::Result<(Vec<PhotoId>, Option<Photo>)> {
        let photos = tx.photos_for_image_file(image_file.id)?;
        if !photos.is_empty() {
            return Ok((photos, None));
        }
        let photo = tx.create_photo(image_file.id)?;
        Ok((vec![photo.id], Some(photo)))
    }

    fn relative_path(&self, path: &Path) -> Result<String, IndexError> {
        let relative = path.strip_prefix(&self.volume.base_path).map_err(|_| {
            IndexError::invalid_path(
                path.to_path_buf(),
                format!("not under volume base {}", self.volume.base_path.display()),
            )
        })?;
        Ok(catalog_path(relative))
    }

    fn create_preview(&self, source: &Path, photo: &Photo, hash: &str) {
        let Some(previews) = self.previews else {
            return;
        };
        if let Err(e) = self.try_create_preview(previews, source, photo, hash) {
            warn!("Preview for {} not created: {}", source.display(), e);
        }
    }

    fn try_create_preview(
        &self,
        previews: &PreviewSettings,
        source: &Path,
        photo: &Photo,
        hash: &str,
    ) -> Result<(), IndexError> {
        let (max_width, max_height) = self.preview_size;
        let relative = PreviewSettings::relative_path_for(hash);
        let target = previews.volume.base_path.join(&relative);

        let info = previews
            .maker
            .make_preview(source, &target, max_width, max_height)?;
        let preview_hash = self.hasher.hash_file(&target)?;
        let stamp = FileStamp::from_metadata(&fs::metadata(&target)?);

        let tx = self.catalog.transaction()?;
        let image_file = match tx.find_file_by_hash(&preview_hash)? {
            Some(existing) => existing,
            None => tx.create_image_file(&preview_hash, info)?,
        };
        match tx.find_file_at_location(previews.volume.id, &relative)? {
            Some(known) if known.image_file.id == image_file.id => {
                tx.refresh_location(known.location.id, stamp)?;
            }
            Some(known) => {
                tx.remove_location(known.location.id)?;
                tx.add_location(image_file.id, previews.volume.id, &relative, stamp)?;
            }
            None => {
                tx.add_location(image_file.id, previews.volume.id, &relative, stamp)?;
            }
        }
        tx.add_photo_copy(photo.id, image_file.id, max_width, max_height)?;
        tx.commit()?;

        debug!("Preview {} for photo {}", relative, photo.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IndexErrorKind;
    use crate::hasher::Md5Hasher;
    use crate::models::{FileFate, ImageInfo};
    use std::path::PathBuf;

    /// Treats files starting with "IMG" as images
    struct PrefixProbe;

    impl ImageProbe for PrefixProbe {
        fn probe(&self, path: &Path) -> Result<ImageInfo, IndexError> {
            let bytes = fs::read(path)?;
            if bytes.starts_with(b"IMG") {
                Ok(ImageInfo {
                    width: 1,
                    height: 1,
                })
            } else {
                Err(IndexError::not_an_image(path.to_path_buf(), "no IMG prefix"))
            }
        }
    }

    /// Counts hash calls to verify the lazy hashing policy
    #[derive(Default)]
    struct CountingHasher {
        calls: std::cell::Cell<usize>,
    }

    impl ContentHasher for CountingHasher {
        fn hash_file(&self, path: &Path) -> Result<String, IndexError> {
            self.calls.set(self.calls.get() + 1);
            Md5Hasher.hash_file(path)
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        catalog: Catalog,
        volume: Volume,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let catalog = Catalog::open_memory().unwrap();
            let volume = catalog.register_volume("ext", dir.path()).unwrap();
            Self {
                dir,
                catalog,
                volume,
            }
        }

        fn write(&self, name: &str, bytes: &[u8]) -> PathBuf {
            let path = self.dir.path().join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(&path, bytes).unwrap();
            path
        }

        fn set_mtime(&self, path: &Path, secs: u64) {
            let file = fs::File::options().write(true).open(path).unwrap();
            file.set_modified(std::time::UNIX_EPOCH + std::time::Duration::from_secs(secs))
                .unwrap();
        }

        fn reconcile_with(&self, hasher: &dyn ContentHasher, path: &Path) -> FileReconciliation {
            FileReconciler::new(&self.catalog, &self.volume, hasher, &PrefixProbe).reconcile(path)
        }

        fn reconcile(&self, path: &Path) -> FileReconciliation {
            self.reconcile_with(&Md5Hasher, path)
        }
    }

    #[test]
    fn test_new_content_creates_photo() {
        let fx = Fixture::new();
        let path = fx.write("a.jpg", b"IMG one");

        let result = fx.reconcile(&path);
        assert_eq!(result.outcome(), Some(IndexOutcome::NewPhoto));
        assert_eq!(result.photos.len(), 1);
        assert_eq!(fx.catalog.photo_count().unwrap(), 1);
        assert_eq!(fx.catalog.image_file_count().unwrap(), 1);
    }

    #[test]
    fn test_duplicate_content_is_new_instance() {
        let fx = Fixture::new();
        let a = fx.write("a.jpg", b"IMG same");
        let b = fx.write("sub/b.jpg", b"IMG same");

        let first = fx.reconcile(&a);
        let second = fx.reconcile(&b);
        assert_eq!(second.outcome(), Some(IndexOutcome::NewInstance));
        assert_eq!(first.photos, second.photos);

        let hash = Md5Hasher.hash_file(&a).unwrap();
        let file = fx.catalog.find_file_by_hash(&hash).unwrap().unwrap();
        let paths: Vec<String> = fx
            .catalog
            .locations_of(file.id)
            .unwrap()
            .into_iter()
            .map(|l| l.path)
            .collect();
        assert_eq!(paths, vec!["a.jpg".to_string(), "sub/b.jpg".to_string()]);
    }

    #[test]
    fn test_unchanged_file_is_not_hashed() {
        let fx = Fixture::new();
        let path = fx.write("a.jpg", b"IMG one");
        fx.reconcile(&path);

        let hasher = CountingHasher::default();
        let before = fx.catalog.mutation_count();
        let result = fx.reconcile_with(&hasher, &path);

        assert_eq!(result.fate, FileFate::Unchanged);
        assert_eq!(result.photos.len(), 1);
        assert_eq!(hasher.calls.get(), 0);
        assert_eq!(fx.catalog.mutation_count(), before);
    }

    #[test]
    fn test_touched_file_with_same_hash_is_unchanged() {
        let fx = Fixture::new();
        let path = fx.write("a.jpg", b"IMG one");
        fx.set_mtime(&path, 1_000_000);
        fx.reconcile(&path);
        fx.set_mtime(&path, 2_000_000);

        let hasher = CountingHasher::default();
        let result = fx.reconcile_with(&hasher, &path);
        assert_eq!(result.fate, FileFate::Unchanged);
        assert_eq!(hasher.calls.get(), 1);

        // the refreshed mtime short-circuits the next check
        let result = fx.reconcile_with(&hasher, &path);
        assert_eq!(result.fate, FileFate::Unchanged);
        assert_eq!(hasher.calls.get(), 1);
    }

    #[test]
    fn test_changed_content_replaces_location() {
        let fx = Fixture::new();
        let path = fx.write("a.jpg", b"IMG one");
        let old = fx.reconcile(&path);
        let old_hash = Md5Hasher.hash_file(&path).unwrap();

        fx.write("a.jpg", b"IMG two, longer");
        let new = fx.reconcile(&path);

        assert_eq!(new.outcome(), Some(IndexOutcome::NewPhoto));
        assert_ne!(old.photos, new.photos);
        let old_file = fx.catalog.find_file_by_hash(&old_hash).unwrap().unwrap();
        assert!(fx.catalog.locations_of(old_file.id).unwrap().is_empty());
        assert_eq!(fx.catalog.image_file_count().unwrap(), 2);
    }

    #[test]
    fn test_not_an_image() {
        let fx = Fixture::new();
        let path = fx.write("notes.txt", b"plain text");

        let result = fx.reconcile(&path);
        assert_eq!(result.outcome(), Some(IndexOutcome::NotImage));
        assert!(result.photos.is_empty());
        assert_eq!(fx.catalog.image_file_count().unwrap(), 0);
    }

    #[test]
    fn test_image_replaced_by_non_image_drops_location() {
        let fx = Fixture::new();
        let path = fx.write("a.jpg", b"IMG one");
        fx.reconcile(&path);
        let hash = Md5Hasher.hash_file(&path).unwrap();

        fx.write("a.jpg", b"garbage bytes now");
        let result = fx.reconcile(&path);
        assert_eq!(result.outcome(), Some(IndexOutcome::NotImage));

        let file = fx.catalog.find_file_by_hash(&hash).unwrap().unwrap();
        assert!(fx.catalog.locations_of(file.id).unwrap().is_empty());
    }

    struct FailingHasher;

    impl ContentHasher for FailingHasher {
        fn hash_file(&self, path: &Path) -> Result<String, IndexError> {
            Err(IndexError::hash_error(path.to_path_buf(), "read error"))
        }
    }

    #[test]
    fn test_abandoned_file_keeps_its_photos() {
        let fx = Fixture::new();
        let path = fx.write("a.jpg", b"IMG one");
        fx.set_mtime(&path, 1_000_000);
        let first = fx.reconcile(&path);
        fx.set_mtime(&path, 2_000_000);

        let before = fx.catalog.mutation_count();
        let result = fx.reconcile_with(&FailingHasher, &path);
        assert_eq!(result.fate, FileFate::Skipped);
        assert_eq!(result.photos, first.photos);
        assert_eq!(fx.catalog.mutation_count(), before);
    }

    #[test]
    fn test_abandoned_new_file_has_no_photos() {
        let fx = Fixture::new();
        let path = fx.write("a.jpg", b"IMG one");

        let result = fx.reconcile_with(&FailingHasher, &path);
        assert_eq!(result.fate, FileFate::Skipped);
        assert!(result.photos.is_empty());
        assert_eq!(fx.catalog.image_file_count().unwrap(), 0);
    }

    #[test]
    fn test_path_outside_volume_is_skipped() {
        let fx = Fixture::new();
        let other = tempfile::tempdir().unwrap();
        let path = other.path().join("a.jpg");
        fs::write(&path, b"IMG one").unwrap();

        let result = fx.reconcile(&path);
        assert_eq!(result.fate, FileFate::Skipped);
    }

    #[test]
    fn test_relative_path_error_kind() {
        let fx = Fixture::new();
        let reconciler = FileReconciler::new(&fx.catalog, &fx.volume, &Md5Hasher, &PrefixProbe);
        let err = reconciler
            .relative_path(Path::new("/definitely/elsewhere.jpg"))
            .unwrap_err();
        assert_eq!(err.kind, IndexErrorKind::InvalidPath);
    }
}
