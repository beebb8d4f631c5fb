//! Core data models for the volume indexer

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Row id of a volume
    VolumeId
);
id_type!(
    /// Row id of a content-addressed image file
    ImageFileId
);
id_type!(
    /// Row id of a file location
    LocationId
);
id_type!(
    /// Row id of a photo
    PhotoId
);
id_type!(
    /// Row id of a catalog folder
    FolderId
);

/// An external filesystem root tracked by the archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub id: VolumeId,
    pub name: String,
    pub base_path: PathBuf,
    /// Top-level folder that mirrors the volume root, created on first use
    pub folder: Option<FolderId>,
}

/// Content-addressed record of unique image bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageFile {
    pub id: ImageFileId,
    /// Lowercase hex digest of the file content
    pub hash: String,
    pub width: u32,
    pub height: u32,
}

/// A (volume, path) pointer to an image file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLocation {
    pub id: LocationId,
    pub image_file: ImageFileId,
    pub volume: VolumeId,
    /// Volume-relative path using `/` separators
    pub path: String,
    /// Modification time in milliseconds since the Unix epoch
    pub mtime_ms: i64,
    pub size: u64,
}

/// A location together with the image file it points to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedFile {
    pub image_file: ImageFile,
    pub location: FileLocation,
}

/// Logical image identity owning an original image file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Photo {
    pub id: PhotoId,
    pub original: ImageFileId,
}

/// Node of the catalog folder hierarchy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub id: FolderId,
    pub parent: Option<FolderId>,
    pub name: String,
}

/// Dimensions reported by the image probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
}

/// On-disk state of a file at the moment it was reconciled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    pub size: u64,
    pub mtime_ms: i64,
}

impl FileStamp {
    pub fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        let mtime_ms = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Self {
            size: metadata.len(),
            mtime_ms,
        }
    }

    /// Quick check: size + mtime
    pub fn matches(&self, location: &FileLocation) -> bool {
        self.size == location.size && self.mtime_ms == location.mtime_ms
    }
}

/// Outcome reported to listeners for one file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndexOutcome {
    /// New content: a new image file and photo were created
    NewPhoto,
    /// Known content found at a new location
    NewInstance,
    /// Content could not be registered as an image
    NotImage,
}

impl IndexOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexOutcome::NewPhoto => "NEW_PHOTO",
            IndexOutcome::NewInstance => "NEW_INSTANCE",
            IndexOutcome::NotImage => "NOT_IMAGE",
        }
    }
}

impl std::fmt::Display for IndexOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fate of one file as decided by the file reconciler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileFate {
    /// Location already known and content unchanged
    Unchanged,
    /// Reported outcome (new photo, new instance, not an image)
    Indexed(IndexOutcome),
    /// Reconciliation abandoned for this run (catalog or I/O failure)
    Skipped,
}

/// Result of reconciling one file: its fate plus the photos it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReconciliation {
    pub fate: FileFate,
    pub photos: Vec<PhotoId>,
}

impl FileReconciliation {
    pub fn unchanged(photos: Vec<PhotoId>) -> Self {
        Self {
            fate: FileFate::Unchanged,
            photos,
        }
    }

    pub fn indexed(outcome: IndexOutcome, photos: Vec<PhotoId>) -> Self {
        Self {
            fate: FileFate::Indexed(outcome),
            photos,
        }
    }

    pub fn not_image() -> Self {
        Self::indexed(IndexOutcome::NotImage, Vec::new())
    }

    /// Reconciliation abandoned; `photos` are those the path was linked to before
    pub fn skipped(photos: Vec<PhotoId>) -> Self {
        Self {
            fate: FileFate::Skipped,
            photos,
        }
    }

    pub fn outcome(&self) -> Option<IndexOutcome> {
        match self.fate {
            FileFate::Indexed(outcome) => Some(outcome),
            _ => None,
        }
    }
}

/// Event sent to listeners for every file with a reportable outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIndexedEvent {
    pub path: PathBuf,
    pub outcome: IndexOutcome,
}

/// Statistics of one indexing run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    /// Photos created for previously unknown content
    pub new_photo_count: u64,
    /// Locations attached to already known content
    pub new_instance_count: u64,
    /// Folders created to mirror new directories
    pub new_folder_count: u64,
    /// Files reconciled, including unchanged ones
    pub files_checked: u64,
    /// Files that could not be registered as images
    pub not_image_count: u64,
    /// Files abandoned because of catalog or I/O failures
    pub skipped_count: u64,
    /// Folders deleted because their directory disappeared
    pub deleted_folder_count: u64,
    /// Locations forgotten because their file disappeared
    pub removed_location_count: u64,
    /// Total run duration in milliseconds
    pub duration_ms: u64,
}

impl IndexStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one reconciled file
    pub fn record(&mut self, fate: &FileFate) {
        self.files_checked += 1;
        match fate {
            FileFate::Unchanged => {}
            FileFate::Indexed(IndexOutcome::NewPhoto) => self.new_photo_count += 1,
            FileFate::Indexed(IndexOutcome::NewInstance) => self.new_instance_count += 1,
            FileFate::Indexed(IndexOutcome::NotImage) => self.not_image_count += 1,
            FileFate::Skipped => self.skipped_count += 1,
        }
    }

    /// Whether the run changed anything in the catalog
    pub fn has_changes(&self) -> bool {
        self.new_photo_count > 0
            || self.new_instance_count > 0
            || self.new_folder_count > 0
            || self.deleted_folder_count > 0
            || self.removed_location_count > 0
    }
}

/// Normalize a volume-relative path for catalog storage
pub fn catalog_path(relative: &std::path::Path) -> String {
    relative.to_string_lossy().replace('\\', "/")
}
