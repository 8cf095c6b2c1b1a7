//! Storage error taxonomy.
//!
//! Backends and the uploader return [`StorageError`] internally.  The
//! public [`crate::handler::S3Handler`] operations never surface it:
//! every variant is logged and mapped to the operation's empty result.

use thiserror::Error;

use crate::upload::UploadState;

/// Errors raised while talking to the storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Network, credential, or service failure talking to storage.
    #[error("storage backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The requested key does not exist.
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// An empty key, bucket, or path was supplied.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The object exceeds what a single-shot upload accepts.
    #[error("object exceeds the single-shot upload limit")]
    EntityTooLarge,

    /// A multipart upload stopped part-way.  `state` records the
    /// session and the parts that made it, so the upload can resume.
    #[error("multipart upload interrupted: {source}")]
    MultipartInterrupted {
        state: UploadState,
        #[source]
        source: Box<StorageError>,
    },
}

impl StorageError {
    /// Short label used for logs and metric tags.
    pub fn kind(&self) -> &'static str {
        match self {
            StorageError::BackendUnavailable(_) => "backend_unavailable",
            StorageError::NotFound { .. } => "not_found",
            StorageError::InvalidInput(_) => "invalid_input",
            StorageError::EntityTooLarge => "entity_too_large",
            StorageError::MultipartInterrupted { .. } => "multipart_interrupted",
        }
    }

    /// Build a [`StorageError::NotFound`] for `bucket`/`key`.
    pub fn not_found(bucket: &str, key: &str) -> Self {
        StorageError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
