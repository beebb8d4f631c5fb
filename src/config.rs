//! Configuration for the volume indexer

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// Directory name marking the root of a volume; never indexed
pub const VOLUME_MARKER_DIR: &str = ".photovault_volume";

/// Default maximum length of a catalog folder name (in characters)
pub const DEFAULT_MAX_FOLDER_NAME_LEN: usize = 30;

/// Default bounding box of preview copies
pub const DEFAULT_PREVIEW_SIZE: u32 = 100;

/// Default interval between progress lines on stderr
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 500;

/// Configuration for an indexing run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Mirror the directory hierarchy as catalog folders
    pub mirror_folders: bool,

    /// Folder names longer than this are truncated
    pub max_folder_name_len: usize,

    /// File extensions to index (whitelist)
    /// If empty, every file is offered to the image probe
    pub extensions: HashSet<String>,

    /// Directory names to ignore
    pub ignore_dirs: HashSet<String>,

    /// Bounding box of preview copies created for new photos
    pub preview_max_width: u32,
    pub preview_max_height: u32,

    /// Whether to print JSON progress lines to stderr
    pub show_progress: bool,

    /// Minimum interval between progress lines
    pub progress_interval_ms: u64,

    /// Catalog database path
    pub db_path: Option<PathBuf>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            mirror_folders: true,
            max_folder_name_len: DEFAULT_MAX_FOLDER_NAME_LEN,
            extensions: HashSet::new(),
            ignore_dirs: Self::default_ignore_dirs(),
            preview_max_width: DEFAULT_PREVIEW_SIZE,
            preview_max_height: DEFAULT_PREVIEW_SIZE,
            show_progress: false,
            progress_interval_ms: DEFAULT_PROGRESS_INTERVAL_MS,
            db_path: None,
        }
    }
}

impl IndexConfig {
    /// Create a config builder
    pub fn builder() -> IndexConfigBuilder {
        IndexConfigBuilder::new()
    }

    /// Common still-image and camera raw extensions
    pub fn default_image_extensions() -> HashSet<String> {
        [
            "jpg", "jpeg", "png", "gif", "webp", "bmp", "tiff", "tif", "nef", "cr2", "cr3", "dng",
            "arw", "orf", "raf", "rw2",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    /// System and trash directories found on removable media
    pub fn default_ignore_dirs() -> HashSet<String> {
        [
            VOLUME_MARKER_DIR,
            "$RECYCLE.BIN",
            "System Volume Information",
            "@eaDir",
            "lost+found",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    /// Empty whitelist accepts everything
    pub fn should_include_extension(&self, ext: &str) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        self.extensions.contains(&ext.to_lowercase())
    }

    /// Check if a file should be offered to the reconciler
    pub fn should_index_file(&self, name: &str) -> bool {
        if name.starts_with('.') {
            return false;
        }
        let ext = std::path::Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        self.should_include_extension(ext)
    }

    /// Check if a directory should be skipped
    pub fn should_ignore_dir(&self, name: &str) -> bool {
        // The volume marker is always excluded, even if removed from ignore_dirs
        if name == VOLUME_MARKER_DIR {
            return true;
        }
        // Hidden directories never get a folder
        if name.starts_with('.') {
            return true;
        }
        self.ignore_dirs.contains(name)
    }

    /// Truncate a directory name to the catalog's folder name limit
    pub fn folder_name_for(&self, dir_name: &str) -> String {
        dir_name.chars().take(self.max_folder_name_len).collect()
    }
}

/// Builder for IndexConfig
#[derive(Debug, Default)]
pub struct IndexConfigBuilder {
    config: IndexConfig,
}

impl IndexConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable directory→folder mirroring
    pub fn mirror_folders(mut self, enabled: bool) -> Self {
        self.config.mirror_folders = enabled;
        self
    }

    pub fn max_folder_name_len(mut self, len: usize) -> Self {
        self.config.max_folder_name_len = len;
        self
    }

    /// Whitelist of extensions, normalised to lowercase without the dot
    pub fn extensions(mut self, extensions: HashSet<String>) -> Self {
        self.config.extensions = extensions
            .into_iter()
            .map(|e| e.trim_start_matches('.').to_lowercase())
            .collect();
        self
    }

    /// Only index common image and camera raw extensions
    pub fn image_only(mut self) -> Self {
        self.config.extensions = IndexConfig::default_image_extensions();
        self
    }

    pub fn add_ignore_dir(mut self, dir: impl Into<String>) -> Self {
        self.config.ignore_dirs.insert(dir.into());
        self
    }

    /// Set the preview bounding box
    pub fn preview_size(mut self, max_width: u32, max_height: u32) -> Self {
        self.config.preview_max_width = max_width;
        self.config.preview_max_height = max_height;
        self
    }

    pub fn show_progress(mut self, enabled: bool) -> Self {
        self.config.show_progress = enabled;
        self
    }

    pub fn progress_interval_ms(mut self, interval: u64) -> Self {
        self.config.progress_interval_ms = interval;
        self
    }

    /// Catalog database file
    pub fn db_path(mut self, path: PathBuf) -> Self {
        self.config.db_path = Some(path);
        self
    }

    /// Build the config
    pub fn build(self) -> IndexConfig {
        self.config
    }
}
