//! Error types for the volume indexer

use std::path::PathBuf;
use thiserror::Error;

/// Error kinds that can occur during indexing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexErrorKind {
    /// File content cannot be registered as an image
    NotAnImage,
    /// A catalog transaction for a single file or directory failed
    CatalogMutation,
    /// Enumerating a directory failed; fatal for the whole run
    Walk,
    /// I/O error during file operations
    Io,
    /// Catalog operation failed outside of a reconciliation step
    Database,
    /// Hash computation failed
    Hash,
    /// Preview copy could not be produced
    Preview,
    /// Path is not under the volume base or cannot be represented
    InvalidPath,
    /// The run was cancelled between two units of work
    Cancelled,
}

/// Represents an error that occurred during indexing
#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message} (path: {path:?})")]
pub struct IndexError {
    /// The kind of error
    pub kind: IndexErrorKind,
    /// The path where the error occurred
    pub path: Option<PathBuf>,
    /// Human-readable error message
    pub message: String,
}

impl IndexError {
    /// Create a new index error
    pub fn new(kind: IndexErrorKind, path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path,
            message: message.into(),
        }
    }

    pub fn not_an_image(path: PathBuf, message: impl Into<String>) -> Self {
        Self::new(IndexErrorKind::NotAnImage, Some(path), message)
    }

    /// Wrap a failed catalog transaction with the path being reconciled
    pub fn catalog_mutation(path: PathBuf, err: rusqlite::Error) -> Self {
        Self::new(IndexErrorKind::CatalogMutation, Some(path), err.to_string())
    }

    pub fn walk(path: PathBuf, message: impl Into<String>) -> Self {
        Self::new(IndexErrorKind::Walk, Some(path), message)
    }

    /// Create an I/O error
    pub fn io_error(path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self::new(IndexErrorKind::Io, path, message)
    }

    /// Create a database error
    pub fn database_error(message: impl Into<String>) -> Self {
        Self::new(IndexErrorKind::Database, None, message)
    }

    /// Create a hash computation error
    pub fn hash_error(path: PathBuf, message: impl Into<String>) -> Self {
        Self::new(IndexErrorKind::Hash, Some(path), message)
    }

    pub fn preview(path: PathBuf, message: impl Into<String>) -> Self {
        Self::new(IndexErrorKind::Preview, Some(path), message)
    }

    pub fn invalid_path(path: PathBuf, message: impl Into<String>) -> Self {
        Self::new(IndexErrorKind::InvalidPath, Some(path), message)
    }

    pub fn cancelled() -> Self {
        Self::new(IndexErrorKind::Cancelled, None, "indexing cancelled")
    }

    /// Attach a path if the error does not carry one yet
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        if self.path.is_none() {
            self.path = Some(path.into());
        }
        self
    }

    pub fn is_not_an_image(&self) -> bool {
        self.kind == IndexErrorKind::NotAnImage
    }
}

impl From<std::io::Error> for IndexError {
    fn from(err: std::io::Error) -> Self {
        Self::new(IndexErrorKind::Io, None, err.to_string())
    }
}

impl From<rusqlite::Error> for IndexError {
    fn from(err: rusqlite::Error) -> Self {
        Self::database_error(err.to_string())
    }
}
