//! Reconciles one directory against the folder that mirrors it
//!
//! A directory is processed as a sequence of units:
//! `Uninitialized → Initializing → N × file → Finalizing → Done`.
//! Initialization lists the directory and snapshots what the catalog knew
//! before; every file unit reconciles one file and tallies the photos it
//! belongs to; finalization applies the photo and subfolder diff in a single
//! transaction and yields one reconciler per subfolder. Subdirectories are
//! never walked from inside a unit.
//!
//! Sibling directories whose names truncate to the same folder name mirror
//! into one folder, so they are reconciled together by a single reconciler:
//! their files share one photo tally and their subdirectories are merged by
//! folder name again one level down.

use log::{debug, error};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::IndexConfig;
use crate::error::IndexError;
use crate::estimator::{ProgressEstimator, ProgressWindow};
use crate::indexer::IndexContext;
use crate::models::{catalog_path, FolderId, PhotoId};

/// Lifecycle of a directory reconciler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirState {
    Uninitialized,
    /// Listing in progress; only observable if listing failed
    Initializing,
    /// Next file to reconcile
    Indexing { next: usize },
    Finalizing,
    Done,
}

/// The unit of work a reconciler will run next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitKind {
    Initialize(PathBuf),
    IndexFile(PathBuf),
    Finalize(PathBuf),
}

/// Result of running one unit
#[derive(Debug)]
pub enum Step {
    /// More units remain in this directory
    Continue,
    /// Finalized; reconcilers for the subdirectories, in name order
    Done(Vec<DirectoryReconciler>),
}

/// Per-photo reference counts for one directory.
///
/// Photos already linked to the folder start at 0; photos first seen during
/// this pass start at 1 and are new links.
#[derive(Debug, Default, Clone)]
pub struct PhotoTally {
    seen: HashMap<PhotoId, (bool, u32)>,
}

impl PhotoTally {
    pub fn from_prior(photos: impl IntoIterator<Item = PhotoId>) -> Self {
        Self {
            seen: photos.into_iter().map(|p| (p, (true, 0))).collect(),
        }
    }

    pub fn record(&mut self, photo: PhotoId) {
        self.seen
            .entry(photo)
            .and_modify(|(_, count)| *count += 1)
            .or_insert((false, 1));
    }

    pub fn count(&self, photo: PhotoId) -> u32 {
        self.seen.get(&photo).map(|(_, c)| *c).unwrap_or(0)
    }

    /// Previously linked photos not seen in this pass
    pub fn removed(&self) -> Vec<PhotoId> {
        let mut photos: Vec<PhotoId> = self
            .seen
            .iter()
            .filter(|(_, (prior, count))| *prior && *count == 0)
            .map(|(p, _)| *p)
            .collect();
        photos.sort();
        photos
    }

    /// Photos seen in this pass that were not linked before
    pub fn added(&self) -> Vec<PhotoId> {
        let mut photos: Vec<PhotoId> = self
            .seen
            .iter()
            .filter(|(_, (prior, _))| !*prior)
            .map(|(p, _)| *p)
            .collect();
        photos.sort();
        photos
    }
}

/// What one directory held when it was listed
#[derive(Debug)]
struct Listing {
    dir: PathBuf,
    files: HashSet<String>,
    subdirs: HashSet<String>,
}

impl Listing {
    fn new(dir: &Path, files: &[PathBuf], subdirs: &[PathBuf]) -> Self {
        Self {
            dir: dir.to_path_buf(),
            files: files.iter().map(|p| entry_name(p)).collect(),
            subdirs: subdirs.iter().map(|p| entry_name(p)).collect(),
        }
    }
}

/// Reconciler for one directory, or for siblings sharing one folder
#[derive(Debug)]
pub struct DirectoryReconciler {
    dir: PathBuf,
    /// Further directories mirrored into the same folder
    merged: Vec<PathBuf>,
    folder: Option<FolderId>,
    window: ProgressWindow,
    state: DirState,
    files: Vec<PathBuf>,
    /// Subdirectories grouped by the folder they mirror into
    subdirs: Vec<Vec<PathBuf>>,
    listings: Vec<Listing>,
    photos: PhotoTally,
    prior_subfolders: BTreeMap<String, FolderId>,
    estimator: ProgressEstimator,
}

impl DirectoryReconciler {
    /// `folder` is `None` when directory→folder mirroring is disabled
    pub fn new(dir: PathBuf, folder: Option<FolderId>, window: ProgressWindow) -> Self {
        Self::merged(dir, Vec::new(), folder, window)
    }

    /// Reconcile `dir` together with `others` as one folder
    pub fn merged(
        dir: PathBuf,
        others: Vec<PathBuf>,
        folder: Option<FolderId>,
        window: ProgressWindow,
    ) -> Self {
        Self {
            dir,
            merged: others,
            folder,
            window,
            state: DirState::Uninitialized,
            files: Vec::new(),
            subdirs: Vec::new(),
            listings: Vec::new(),
            photos: PhotoTally::default(),
            prior_subfolders: BTreeMap::new(),
            estimator: ProgressEstimator::default(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Every directory reconciled by this unit, `dir()` first
    pub fn dirs(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.dir.as_path()).chain(self.merged.iter().map(PathBuf::as_path))
    }

    pub fn folder(&self) -> Option<FolderId> {
        self.folder
    }

    pub fn window(&self) -> ProgressWindow {
        self.window
    }

    pub fn state(&self) -> DirState {
        self.state
    }

    /// Unit that the next call to [`step`](Self::step) runs
    pub fn next_unit(&self) -> Option<UnitKind> {
        match self.state {
            DirState::Uninitialized | DirState::Initializing => {
                Some(UnitKind::Initialize(self.dir.clone()))
            }
            DirState::Indexing { next } => Some(UnitKind::IndexFile(self.files[next].clone())),
            DirState::Finalizing => Some(UnitKind::Finalize(self.dir.clone())),
            DirState::Done => None,
        }
    }

    /// Run the next unit.
    ///
    /// Only directory enumeration errors are returned; they are fatal for the run.
    pub fn step(&mut self, ctx: &mut IndexContext<'_>) -> Result<Step, IndexError> {
        match self.state {
            DirState::Uninitialized | DirState::Initializing => {
                self.initialize(ctx)?;
                Ok(Step::Continue)
            }
            DirState::Indexing { next } => {
                self.index_file(ctx, next);
                Ok(Step::Continue)
            }
            DirState::Finalizing => Ok(Step::Done(self.finalize(ctx))),
            DirState::Done => Ok(Step::Done(Vec::new())),
        }
    }

    fn initialize(&mut self, ctx: &mut IndexContext<'_>) -> Result<(), IndexError> {
        self.state = DirState::Initializing;
        let config = ctx.config();
        let dirs: Vec<PathBuf> = self.dirs().map(Path::to_path_buf).collect();
        let mut files = Vec::new();
        let mut subdirs = Vec::new();
        let mut listings = Vec::with_capacity(dirs.len());
        for dir in &dirs {
            let (dir_files, dir_subdirs) = list_directory(dir, config)?;
            listings.push(Listing::new(dir, &dir_files, &dir_subdirs));
            files.extend(dir_files);
            subdirs.extend(dir_subdirs);
        }
        if !self.merged.is_empty() {
            debug!(
                "{} shares its folder with {} sibling(s)",
                self.dir.display(),
                self.merged.len()
            );
        }

        let subdirs = group_by_folder(subdirs, config);
        debug!(
            "{}: {} files, {} subfolders",
            self.dir.display(),
            files.len(),
            subdirs.len()
        );
        self.estimator = ProgressEstimator::new(files.len(), subdirs.len());
        self.files = files;
        self.subdirs = subdirs;
        self.listings = listings;

        if let Some(folder) = self.folder {
            let catalog = ctx.catalog();
            let snapshot = catalog
                .folder_photos(folder)
                .and_then(|photos| Ok((photos, catalog.subfolders(folder)?)));
            match snapshot {
                Ok((photos, subfolders)) => {
                    self.photos = PhotoTally::from_prior(photos);
                    self.prior_subfolders =
                        subfolders.into_iter().map(|f| (f.name, f.id)).collect();
                }
                Err(e) => {
                    error!(
                        "Cannot read folder {} for {}: {}; not mirroring this subtree",
                        folder,
                        self.dir.display(),
                        e
                    );
                    self.folder = None;
                }
            }
        }

        self.state = if self.files.is_empty() {
            DirState::Finalizing
        } else {
            DirState::Indexing { next: 0 }
        };
        Ok(())
    }

    fn index_file(&mut self, ctx: &mut IndexContext<'_>, index: usize) {
        let path = &self.files[index];
        let result = ctx.reconcile_file(path);
        for photo in &result.photos {
            self.photos.record(*photo);
        }
        ctx.record_file(path, &result);

        let done = index + 1;
        self.state = if done < self.files.len() {
            DirState::Indexing { next: done }
        } else {
            DirState::Finalizing
        };
        ctx.report_progress(self.estimator.percent(self.window, 0, done));
    }

    fn finalize(&mut self, ctx: &mut IndexContext<'_>) -> Vec<DirectoryReconciler> {
        match self.prune_locations(ctx) {
            Ok(removed) => ctx.record_removed_locations(removed),
            Err(e) => error!("Cannot prune locations under {}: {}", self.dir.display(), e),
        }

        let child_folders = match self.folder {
            Some(folder) => match self.apply_folder_diff(ctx, folder) {
                Ok(folders) => folders,
                Err(e) => {
                    error!(
                        "Folder update for {} failed: {}; subdirectories are indexed without folders",
                        self.dir.display(),
                        e
                    );
                    vec![None; self.subdirs.len()]
                }
            },
            None => vec![None; self.subdirs.len()],
        };

        self.state = DirState::Done;
        ctx.report_progress(self.estimator.percent(self.window, 0, self.files.len()));

        let estimator = self.estimator;
        let window = self.window;
        std::mem::take(&mut self.subdirs)
            .into_iter()
            .zip(child_folders)
            .enumerate()
            .filter_map(|(i, (group, folder))| {
                let mut group = group.into_iter();
                let dir = group.next()?;
                Some(DirectoryReconciler::merged(
                    dir,
                    group.collect(),
                    folder,
                    estimator.subdir_window(window, i),
                ))
            })
            .collect()
    }

    /// Forget locations of files that left these directories, and of
    /// everything below subdirectories that disappeared
    fn prune_locations(&self, ctx: &mut IndexContext<'_>) -> Result<u64, IndexError> {
        let volume = ctx.volume();
        let tx = ctx.catalog().transaction()?;
        let mut removed = 0;

        for listing in &self.listings {
            let relative = listing.dir.strip_prefix(&volume.base_path).map_err(|_| {
                IndexError::invalid_path(listing.dir.clone(), "not under the volume base")
            })?;
            let relative = catalog_path(relative);
            let prefix = if relative.is_empty() {
                String::new()
            } else {
                format!("{}/", relative)
            };

            for location in tx.locations_in(volume.id, &prefix)? {
                let Some(name) = location.path.strip_prefix(prefix.as_str()) else {
                    continue;
                };
                if !listing.files.contains(name) {
                    debug!("Location {} is gone", location.path);
                    tx.remove_location(location.id)?;
                    removed += 1;
                }
            }
            for subdir in tx.location_subdirs(volume.id, &prefix)? {
                if !listing.subdirs.contains(&subdir) {
                    let gone = format!("{}{}/", prefix, subdir);
                    let count = tx.remove_locations_under(volume.id, &gone)?;
                    debug!("Directory {} is gone with {} locations", gone, count);
                    removed += count;
                }
            }
        }

        tx.commit()?;
        Ok(removed)
    }

    /// Photo links and subfolders, in one transaction. Returns the folder of
    /// each subdirectory.
    fn apply_folder_diff(
        &self,
        ctx: &mut IndexContext<'_>,
        folder: FolderId,
    ) -> rusqlite::Result<Vec<Option<FolderId>>> {
        let config = ctx.config();
        let tx = ctx.catalog().transaction()?;

        let removed = self.photos.removed();
        let added = self.photos.added();
        for photo in &removed {
            tx.remove_photo_from_folder(folder, *photo)?;
        }
        for photo in &added {
            tx.add_photo_to_folder(folder, *photo)?;
        }

        let mut child_folders = Vec::with_capacity(self.subdirs.len());
        let mut kept = BTreeSet::new();
        let mut created = 0;
        for group in &self.subdirs {
            let name = group
                .first()
                .map(|dir| config.folder_name_for(&entry_name(dir)))
                .unwrap_or_default();
            let id = match self.prior_subfolders.get(&name) {
                Some(id) => *id,
                None => {
                    let (child, was_created) = tx.find_or_create_subfolder(folder, &name)?;
                    if was_created {
                        created += 1;
                    }
                    child.id
                }
            };
            kept.insert(id);
            child_folders.push(Some(id));
        }

        let mut deleted = 0;
        for (name, id) in &self.prior_subfolders {
            if !kept.contains(id) {
                debug!("Deleting folder {} ({}): directory is gone", name, id);
                tx.delete_folder(*id)?;
                deleted += 1;
            }
        }

        tx.commit()?;
        if !removed.is_empty() || !added.is_empty() || created > 0 || deleted > 0 {
            debug!(
                "{}: +{} -{} photos, +{} -{} folders",
                self.dir.display(),
                added.len(),
                removed.len(),
                created,
                deleted
            );
        }
        ctx.record_folders(created, deleted);
        Ok(child_folders)
    }
}

fn entry_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Group subdirectories that mirror into the same folder, keeping name order.
///
/// Without mirroring every subdirectory stands alone.
fn group_by_folder(subdirs: Vec<PathBuf>, config: &IndexConfig) -> Vec<Vec<PathBuf>> {
    if !config.mirror_folders {
        return subdirs.into_iter().map(|dir| vec![dir]).collect();
    }
    let mut groups: Vec<Vec<PathBuf>> = Vec::new();
    let mut by_name: HashMap<String, usize> = HashMap::new();
    for dir in subdirs {
        let name = config.folder_name_for(&entry_name(&dir));
        match by_name.get(&name) {
            Some(&i) => groups[i].push(dir),
            None => {
                by_name.insert(name, groups.len());
                groups.push(vec![dir]);
            }
        }
    }
    groups
}

/// Files and non-ignored subdirectories of `dir`, each sorted by name
pub fn list_directory(
    dir: &Path,
    config: &IndexConfig,
) -> Result<(Vec<PathBuf>, Vec<PathBuf>), IndexError> {
    let mut files = Vec::new();
    let mut subdirs = Vec::new();

    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .sort_by_file_name();

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            IndexError::walk(path, e.to_string())
        })?;
        let name = entry.file_name().to_string_lossy().to_string();

        if entry.file_type().is_dir() {
            if !config.should_ignore_dir(&name) {
                subdirs.push(entry.into_path());
            }
        } else if entry.file_type().is_file() && config.should_index_file(&name) {
            files.push(entry.into_path());
        }
    }

    // A plain file as root yields no entries and no error
    if !dir.is_dir() {
        return Err(IndexError::walk(dir.to_path_buf(), "not a directory"));
    }

    Ok((files, subdirs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VOLUME_MARKER_DIR;
    use crate::error::IndexErrorKind;
    use std::fs;

    #[test]
    fn test_tally_three_way() {
        let mut tally = PhotoTally::from_prior([PhotoId(1), PhotoId(2)]);
        tally.record(PhotoId(2));
        tally.record(PhotoId(3));
        tally.record(PhotoId(3));

        assert_eq!(tally.removed(), vec![PhotoId(1)]);
        assert_eq!(tally.added(), vec![PhotoId(3)]);
        assert_eq!(tally.count(PhotoId(1)), 0);
        assert_eq!(tally.count(PhotoId(2)), 1);
        assert_eq!(tally.count(PhotoId(3)), 2);
    }

    #[test]
    fn test_tally_unchanged_directory_has_no_diff() {
        let mut tally = PhotoTally::from_prior([PhotoId(1), PhotoId(2)]);
        tally.record(PhotoId(1));
        tally.record(PhotoId(2));
        assert!(tally.removed().is_empty());
        assert!(tally.added().is_empty());
    }

    #[test]
    fn test_list_directory_partitions_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.jpg"), b"b").unwrap();
        fs::write(dir.path().join("a.jpg"), b"a").unwrap();
        fs::write(dir.path().join(".DS_Store"), b"x").unwrap();
        fs::create_dir(dir.path().join("zeta")).unwrap();
        fs::create_dir(dir.path().join("alpha")).unwrap();
        fs::create_dir(dir.path().join(VOLUME_MARKER_DIR)).unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join("alpha/nested.jpg"), b"n").unwrap();

        let (files, subdirs) = list_directory(dir.path(), &IndexConfig::default()).unwrap();
        let names = |v: &[PathBuf]| -> Vec<String> {
            v.iter()
                .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
                .collect()
        };
        assert_eq!(names(&files), vec!["a.jpg", "b.jpg"]);
        assert_eq!(names(&subdirs), vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_list_directory_honours_extension_filter() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.jpg"), b"a").unwrap();
        fs::write(dir.path().join("notes.txt"), b"t").unwrap();

        let config = IndexConfig::builder().image_only().build();
        let (files, _) = list_directory(dir.path(), &config).unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_list_missing_directory_is_walk_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = list_directory(&dir.path().join("missing"), &IndexConfig::default()).unwrap_err();
        assert_eq!(err.kind, IndexErrorKind::Walk);
    }

    #[test]
    fn test_group_by_folder_merges_truncated_siblings() {
        let dirs = vec![
            PathBuf::from("/v/abcdefX"),
            PathBuf::from("/v/abcdefY"),
            PathBuf::from("/v/other"),
        ];
        let config = IndexConfig::builder().max_folder_name_len(6).build();
        let groups = group_by_folder(dirs.clone(), &config);
        assert_eq!(
            groups,
            vec![dirs[..2].to_vec(), vec![PathBuf::from("/v/other")]]
        );

        let flat = IndexConfig::builder()
            .max_folder_name_len(6)
            .mirror_folders(false)
            .build();
        assert_eq!(group_by_folder(dirs, &flat).len(), 3);
    }

    #[test]
    fn test_merged_reconciler_lists_every_directory() {
        let rec = DirectoryReconciler::merged(
            PathBuf::from("/v/abcdefX"),
            vec![PathBuf::from("/v/abcdefY")],
            None,
            ProgressWindow::FULL,
        );
        let dirs: Vec<&Path> = rec.dirs().collect();
        assert_eq!(dirs, vec![Path::new("/v/abcdefX"), Path::new("/v/abcdefY")]);
        assert_eq!(rec.dir(), Path::new("/v/abcdefX"));
    }

    #[test]
    fn test_new_reconciler_starts_uninitialized() {
        let rec = DirectoryReconciler::new(PathBuf::from("/v"), None, ProgressWindow::FULL);
        assert_eq!(rec.state(), DirState::Uninitialized);
        assert_eq!(
            rec.next_unit(),
            Some(UnitKind::Initialize(PathBuf::from("/v")))
        );
    }
}
