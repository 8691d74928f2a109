//! Error types for telemetry and escalation stores.

use std::path::PathBuf;

use thiserror::Error;

/// A specialized `Result` type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur when reading or appending to a store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backing storage exists but cannot be decoded, or is unreadable.
    ///
    /// Detector agents treat this as "no new data this cycle".
    #[error("Store {store} is corrupt: {reason}")]
    Corrupt {
        /// Store name (usually the backing file).
        store: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Writing the backing file failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The cross-process write lock could not be acquired in time.
    #[error("Write lock {path} is held by another writer")]
    Contended { path: PathBuf },

    /// Encoding a record or alert failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn corrupt(store: impl Into<String>, reason: impl ToString) -> Self {
        StoreError::Corrupt {
            store: store.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this is a [`StoreError::Corrupt`] condition.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, StoreError::Corrupt { .. })
    }

    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Io { .. } | StoreError::Contended { .. })
    }
}
