//! Incremental indexer for photo archives on external volumes
//!
//! This library reconciles a directory tree against a SQLite catalog of
//! content-addressed image files, photos and folders. Repeated runs converge:
//! unchanged files are recognised by size and mtime without being read, and
//! an unchanged tree produces no catalog mutations at all.

pub mod catalog;
pub mod config;
pub mod dir_reconciler;
pub mod error;
pub mod estimator;
pub mod file_reconciler;
pub mod hasher;
pub mod imaging;
pub mod indexer;
pub mod listener;
pub mod models;
pub mod progress;
pub mod tasks;

pub use catalog::{Catalog, CatalogTx};
pub use config::IndexConfig;
pub use dir_reconciler::{DirState, DirectoryReconciler, PhotoTally, UnitKind};
pub use error::{IndexError, IndexErrorKind};
pub use estimator::{ProgressEstimator, ProgressWindow};
pub use file_reconciler::FileReconciler;
pub use hasher::{ContentHasher, Md5Hasher};
pub use imaging::{DecodingProbe, ImageProbe, PreviewMaker, PreviewSettings, ThumbnailMaker};
pub use indexer::{IndexRun, IndexingSession, UnitQueue, VolumeIndexer};
pub use listener::{ChannelListener, IndexEvent, IndexListener, NullListener, Tee};
pub use models::{
    FileFate, FileIndexedEvent, FileLocation, Folder, FolderId, ImageFile, IndexOutcome,
    IndexStats, Photo, PhotoId, Volume, VolumeId,
};
pub use progress::JsonLinesReporter;
pub use tasks::{BackgroundTask, IndexingTask, TaskOutcome, TaskReport, TaskRunner, TaskStatus};
