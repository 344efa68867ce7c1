//! Error types shared across the gallery.
//!
//! - [`StoreError`]: a record-store or object-store call failed.
//! - [`IngestError`]: one file of an ingestion batch failed. These are collected per
//!   file and never abort the rest of the batch.
//! - [`GalleryError`]: a whole operation failed (no session, unknown folder,
//!   aborted cascade, ...).

use std::time::Duration;
use thiserror::Error;

use crate::state::data::{FolderId, PhotoId, UserId};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Failure reported by a record store or object store backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record or object not found")]
    NotFound,

    /// Object keys must be relative and must not escape the store root
    #[error("invalid object key `{0}`")]
    InvalidKey(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid base64 payload: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("{0}")]
    Backend(String),
}

/// How the caller should react to a failed file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The file itself is unacceptable; the user should pick another one
    Validation,
    /// Storage or network failed; the same file may succeed later
    Transport,
    /// The batch was cancelled before the file was started
    Cancelled,
}

/// Per-file failure of the ingestion pipeline
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("{file_name}: only image files are accepted (got `{mime_type}`)")]
    InvalidFileType { file_name: String, mime_type: String },

    #[error("{file_name}: file is {size} bytes, the limit is {limit} bytes")]
    FileTooLarge {
        file_name: String,
        size: u64,
        limit: u64,
    },

    #[error("{file_name}: could not process image: {reason}")]
    NormalizationFailure { file_name: String, reason: String },

    /// The file could not be found or read from local disk
    #[error("{file_name}: could not read file: {source}")]
    Unreadable {
        file_name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{file_name}: upload failed: {source}")]
    StorageWriteFailure {
        file_name: String,
        #[source]
        source: StoreError,
    },

    /// The upload or the record insert failed, and removing what the upload
    /// left under `key` failed too
    #[error("{file_name}: {cause}; stored object `{key}` could not be removed ({cleanup_error})")]
    OrphanedObject {
        file_name: String,
        key: String,
        cause: StoreError,
        cleanup_error: StoreError,
    },

    #[error("{file_name}: ingestion was cancelled before this file was processed")]
    Cancelled { file_name: String },
}

impl IngestError {
    pub fn file_name(&self) -> &str {
        match self {
            IngestError::InvalidFileType { file_name, .. }
            | IngestError::FileTooLarge { file_name, .. }
            | IngestError::NormalizationFailure { file_name, .. }
            | IngestError::Unreadable { file_name, .. }
            | IngestError::StorageWriteFailure { file_name, .. }
            | IngestError::OrphanedObject { file_name, .. }
            | IngestError::Cancelled { file_name } => file_name,
        }
    }

    pub fn class(&self) -> FailureClass {
        match self {
            IngestError::InvalidFileType { .. }
            | IngestError::FileTooLarge { .. }
            | IngestError::NormalizationFailure { .. }
            | IngestError::Unreadable { .. } => FailureClass::Validation,
            IngestError::StorageWriteFailure { .. } | IngestError::OrphanedObject { .. } => {
                FailureClass::Transport
            }
            IngestError::Cancelled { .. } => FailureClass::Cancelled,
        }
    }
}

/// A photo that could not be removed while deleting its folder
#[derive(Debug)]
pub struct PhotoCleanupFailure {
    pub photo_id: PhotoId,
    pub name: String,
    pub error: StoreError,
}

/// Failure of a whole gallery operation
#[derive(Debug, Error)]
pub enum GalleryError {
    #[error("authentication required: no active session")]
    AuthenticationRequired,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("no files were supplied")]
    EmptyBatch,

    #[error("name must not be empty")]
    InvalidName,

    #[error("folder {0} not found")]
    FolderNotFound(FolderId),

    #[error("photo {0} not found")]
    PhotoNotFound(PhotoId),

    #[error("user {0} not found")]
    UserNotFound(UserId),

    /// The folder is kept so the delete can be retried
    #[error("folder {folder_id} was kept because {} photo(s) could not be removed", .failures.len())]
    CascadeDeleteFailure {
        folder_id: FolderId,
        failures: Vec<PhotoCleanupFailure>,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, GalleryError>;
