//! Volume indexing: one session per run, driven either as a recursive walk or
//! as a queue of units
//!
//! Both modes run the same [`DirectoryReconciler`] units in the same order;
//! the recursive walk just consumes them in place while [`UnitQueue`] hands
//! them out one at a time so a scheduler can interleave, pause or cancel.

use chrono::{DateTime, Utc};
use log::{debug, error, info};
use std::path::Path;
use std::time::Instant;

use crate::catalog::Catalog;
use crate::config::IndexConfig;
use crate::dir_reconciler::{DirectoryReconciler, Step, UnitKind};
use crate::error::IndexError;
use crate::estimator::ProgressWindow;
use crate::file_reconciler::FileReconciler;
use crate::hasher::{ContentHasher, Md5Hasher};
use crate::imaging::{DecodingProbe, ImageProbe, PreviewSettings};
use crate::listener::IndexListener;
use crate::models::{FileIndexedEvent, FileReconciliation, FolderId, IndexStats, Volume};

/// In-memory state of one run; discarded when the run ends
#[derive(Debug, Clone)]
pub struct IndexingSession {
    started_at: DateTime<Utc>,
    started: Instant,
    stats: IndexStats,
    percent: f64,
}

impl IndexingSession {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            started: Instant::now(),
            stats: IndexStats::new(),
            percent: 0.0,
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn stats(&self) -> &IndexStats {
        &self.stats
    }

    /// Highest percentage reported so far
    pub fn percent(&self) -> f64 {
        self.percent
    }

    /// Raise the reported percentage. Returns false if `percent` would not
    /// move progress forward.
    fn advance(&mut self, percent: f64) -> bool {
        let percent = percent.clamp(0.0, 100.0);
        if percent > self.percent {
            self.percent = percent;
            true
        } else {
            false
        }
    }

    fn finish(mut self) -> IndexStats {
        self.stats.duration_ms = self.started.elapsed().as_millis() as u64;
        self.stats
    }
}

impl Default for IndexingSession {
    fn default() -> Self {
        Self::new()
    }
}

/// What a directory unit may touch while it runs
pub struct IndexContext<'a> {
    files: FileReconciler<'a>,
    catalog: &'a Catalog,
    volume: &'a Volume,
    config: &'a IndexConfig,
    session: &'a mut IndexingSession,
    listener: &'a mut dyn IndexListener,
}

impl<'a> IndexContext<'a> {
    pub fn config(&self) -> &'a IndexConfig {
        self.config
    }

    pub fn catalog(&self) -> &'a Catalog {
        self.catalog
    }

    pub fn volume(&self) -> &'a Volume {
        self.volume
    }

    pub fn reconcile_file(&self, path: &Path) -> FileReconciliation {
        self.files.reconcile(path)
    }

    /// Count the file and tell the listener about reportable outcomes
    pub fn record_file(&mut self, path: &Path, result: &FileReconciliation) {
        self.session.stats.record(&result.fate);
        if let Some(outcome) = result.outcome() {
            debug!("{}: {}", path.display(), outcome);
            self.listener.on_file_indexed(&FileIndexedEvent {
                path: path.to_path_buf(),
                outcome,
            });
        }
    }

    pub fn record_folders(&mut self, created: u64, deleted: u64) {
        self.session.stats.new_folder_count += created;
        self.session.stats.deleted_folder_count += deleted;
    }

    pub fn record_removed_locations(&mut self, removed: u64) {
        self.session.stats.removed_location_count += removed;
    }

    /// Forward a progress estimate; values that would go backwards are dropped
    pub fn report_progress(&mut self, percent: f64) {
        if self.session.advance(percent) {
            self.listener.on_progress(self.session.percent);
        }
    }
}

/// Depth-first stack of directory reconcilers.
///
/// Every call to [`run_next`](Self::run_next) runs exactly one unit. A
/// directory's subdirectories are pushed only once it has finalized, so its
/// file units always precede its finalization.
#[derive(Debug)]
pub struct UnitQueue {
    stack: Vec<DirectoryReconciler>,
}

impl UnitQueue {
    pub fn new(root: DirectoryReconciler) -> Self {
        Self { stack: vec![root] }
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Unit the next call runs
    pub fn peek(&self) -> Option<UnitKind> {
        self.stack.last().and_then(|rec| rec.next_unit())
    }

    /// Run one unit. Returns the unit that ran, or `None` once exhausted.
    pub fn run_next(&mut self, ctx: &mut IndexContext<'_>) -> Result<Option<UnitKind>, IndexError> {
        let Some(top) = self.stack.last_mut() else {
            return Ok(None);
        };
        let unit = top.next_unit();
        if let Step::Done(children) = top.step(ctx)? {
            let window = top.window();
            self.stack.pop();
            if children.is_empty() {
                // Leaf subtree: its whole window is complete
                ctx.report_progress(window.end);
            }
            self.stack.extend(children.into_iter().rev());
        }
        Ok(unit)
    }
}

/// A run in queue mode, created by [`VolumeIndexer::begin`]
#[derive(Debug)]
pub struct IndexRun {
    queue: UnitQueue,
    session: IndexingSession,
    units_run: u64,
}

impl IndexRun {
    pub fn is_finished(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn units_run(&self) -> u64 {
        self.units_run
    }

    pub fn next_unit(&self) -> Option<UnitKind> {
        self.queue.peek()
    }

    pub fn session(&self) -> &IndexingSession {
        &self.session
    }
}

/// Indexes one volume into the catalog
pub struct VolumeIndexer {
    catalog: Catalog,
    volume: Volume,
    config: IndexConfig,
    hasher: Box<dyn ContentHasher + Send>,
    probe: Box<dyn ImageProbe + Send>,
    previews: Option<PreviewSettings>,
}

impl VolumeIndexer {
    /// Indexer with the MD5 hasher and the decoding image probe
    pub fn new(catalog: Catalog, volume: Volume, config: IndexConfig) -> Self {
        Self {
            catalog,
            volume,
            config,
            hasher: Box::new(Md5Hasher),
            probe: Box::new(DecodingProbe),
            previews: None,
        }
    }

    pub fn with_hasher(mut self, hasher: Box<dyn ContentHasher + Send>) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn with_probe(mut self, probe: Box<dyn ImageProbe + Send>) -> Self {
        self.probe = probe;
        self
    }

    /// Create preview copies of new photos on another volume
    pub fn with_previews(mut self, previews: PreviewSettings) -> Self {
        self.previews = Some(previews);
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn volume(&self) -> &Volume {
        &self.volume
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn into_catalog(self) -> Catalog {
        self.catalog
    }

    /// Index the whole volume synchronously.
    ///
    /// Each file and each directory commits on its own; a fatal error leaves
    /// earlier commits in place and is reported through `on_error` instead of
    /// `on_complete`.
    pub fn run(&mut self, listener: &mut dyn IndexListener) -> Result<IndexStats, IndexError> {
        let mut session = IndexingSession::new();
        let folder = match self.start(listener) {
            Ok(folder) => folder,
            Err(e) => return Err(self.fail(listener, e)),
        };

        let mut root =
            DirectoryReconciler::new(self.volume.base_path.clone(), folder, ProgressWindow::FULL);
        let walked = {
            let mut ctx = self.context(&mut session, listener);
            walk(&mut root, &mut ctx)
        };
        if let Err(e) = walked {
            return Err(self.fail(listener, e));
        }

        Ok(self.complete(session, listener))
    }

    /// Start a run in queue mode. Nothing is indexed until [`step`](Self::step).
    pub fn begin(&mut self, listener: &mut dyn IndexListener) -> Result<IndexRun, IndexError> {
        let folder = match self.start(listener) {
            Ok(folder) => folder,
            Err(e) => return Err(self.fail(listener, e)),
        };
        let root =
            DirectoryReconciler::new(self.volume.base_path.clone(), folder, ProgressWindow::FULL);
        Ok(IndexRun {
            queue: UnitQueue::new(root),
            session: IndexingSession::new(),
            units_run: 0,
        })
    }

    /// Run the next unit of `run`. Returns `None` once every unit has run.
    pub fn step(
        &self,
        run: &mut IndexRun,
        listener: &mut dyn IndexListener,
    ) -> Result<Option<UnitKind>, IndexError> {
        let result = {
            let mut ctx = self.context(&mut run.session, listener);
            run.queue.run_next(&mut ctx)
        };
        match result {
            Ok(Some(unit)) => {
                run.units_run += 1;
                Ok(Some(unit))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(self.fail(listener, e)),
        }
    }

    /// End a queue-mode run: reports 100% and the final statistics
    pub fn finish(&self, run: IndexRun, listener: &mut dyn IndexListener) -> IndexStats {
        if !run.is_finished() {
            debug!(
                "Finishing run on {} with units still queued",
                self.volume.name
            );
        }
        self.complete(run.session, listener)
    }

    /// Abandon a queue-mode run between two units
    pub fn cancel(&self, run: IndexRun, listener: &mut dyn IndexListener) -> IndexStats {
        let stats = run.session.finish();
        info!(
            "Indexing of volume {} cancelled after {} files",
            self.volume.name, stats.files_checked
        );
        listener.on_cancelled(&stats);
        stats
    }

    /// Announce the run and resolve the folder mirroring the volume root
    fn start(&mut self, listener: &mut dyn IndexListener) -> Result<Option<FolderId>, IndexError> {
        info!(
            "Indexing volume {} at {}",
            self.volume.name,
            self.volume.base_path.display()
        );
        listener.on_start(&self.volume);

        if !self.config.mirror_folders {
            return Ok(None);
        }
        let folder = self
            .catalog
            .volume_folder(&mut self.volume, self.config.max_folder_name_len)
            .map_err(|e| {
                IndexError::database_error(format!("cannot resolve volume folder: {}", e))
                    .with_path(self.volume.base_path.clone())
            })?;
        Ok(Some(folder.id))
    }

    fn context<'a>(
        &'a self,
        session: &'a mut IndexingSession,
        listener: &'a mut dyn IndexListener,
    ) -> IndexContext<'a> {
        let files = FileReconciler::new(&self.catalog, &self.volume, &*self.hasher, &*self.probe)
            .with_previews(
                self.previews.as_ref(),
                self.config.preview_max_width,
                self.config.preview_max_height,
            );
        IndexContext {
            files,
            catalog: &self.catalog,
            volume: &self.volume,
            config: &self.config,
            session,
            listener,
        }
    }

    fn complete(&self, session: IndexingSession, listener: &mut dyn IndexListener) -> IndexStats {
        if session.percent() < 100.0 {
            listener.on_progress(100.0);
        }
        let stats = session.finish();
        info!(
            "Indexed volume {}: {} new photos, {} new instances, {} new folders, {} files checked in {}ms",
            self.volume.name,
            stats.new_photo_count,
            stats.new_instance_count,
            stats.new_folder_count,
            stats.files_checked,
            stats.duration_ms
        );
        listener.on_complete(&stats);
        stats
    }

    fn fail(&self, listener: &mut dyn IndexListener, e: IndexError) -> IndexError {
        let base = self.volume.base_path.display();
        error!("Indexing of volume {} at {} failed: {}", self.volume.name, base, e);
        listener.on_error(&format!("{}: {}", base, e.message));
        e
    }
}

impl std::fmt::Debug for VolumeIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeIndexer")
            .field("volume", &self.volume)
            .field("config", &self.config)
            .field("previews", &self.previews)
            .finish_non_exhaustive()
    }
}

/// Run a directory's units, then each subdirectory's, depth first
fn walk(rec: &mut DirectoryReconciler, ctx: &mut IndexContext<'_>) -> Result<(), IndexError> {
    loop {
        if let Step::Done(children) = rec.step(ctx)? {
            if children.is_empty() {
                ctx.report_progress(rec.window().end);
            }
            for mut child in children {
                walk(&mut child, ctx)?;
            }
            return Ok(());
        }
    }
}
