use thiserror::Error;

use crate::catalog::CatalogError;

/// Typed download errors enabling retry classification.
///
/// Anything that goes wrong inside a single fetch attempt is transient and
/// retried; the remaining variants describe the final disposition.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Insufficient disk space: need {required} bytes, {available} available")]
    InsufficientSpace { required: u64, available: u64 },

    #[error("Fetch failed: {0}")]
    Fetch(#[from] CatalogError),

    #[error("Download failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("Downloaded content failed validation: {0}")]
    Validation(String),

    #[error("Disk error: {0}")]
    Disk(#[from] std::io::Error),
}

impl DownloadError {
    /// Whether this error is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::Fetch(_) | DownloadError::Disk(_) => true,
            DownloadError::InsufficientSpace { .. }
            | DownloadError::RetriesExhausted { .. }
            | DownloadError::Validation(_) => false,
        }
    }

    /// Short category used in logs and failure records.
    pub fn kind(&self) -> &'static str {
        match self {
            DownloadError::InsufficientSpace { .. } => "resource",
            DownloadError::Fetch(_) | DownloadError::RetriesExhausted { .. } => "transient",
            DownloadError::Validation(_) => "validation",
            DownloadError::Disk(_) => "io",
        }
    }
}
