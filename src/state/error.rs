//! Error types for the state tracking module.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while reading or writing the state files.
#[derive(Error, Debug)]
pub enum StateError {
    #[error("State I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("State file {path} is not valid: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Another writer holds the state lock.
    #[error("Another catalog-ingest instance is using this state directory (lock: {0})")]
    Locked(PathBuf),

    #[error("No backup file found at {0}")]
    NoBackup(PathBuf),

    #[error("No state file found at {0}")]
    NoState(PathBuf),

    /// Mutating call on a manager opened with [`StateManager::open_read_only`].
    ///
    /// [`StateManager::open_read_only`]: super::StateManager::open_read_only
    #[error("State manager was opened read-only")]
    ReadOnly,
}

impl StateError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
