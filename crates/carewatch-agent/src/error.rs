//! Error types for the ingest side and the daemon.

use std::path::PathBuf;

use carewatch_core::ConfigError;
use carewatch_detect::DetectError;
use carewatch_store::StoreError;
use thiserror::Error;

/// A specialized `Result` type for agent operations.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Why a device line was discarded.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Boot banners, debug prints and partial lines.
    #[error("Line is not a JSON object")]
    NotJson,

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Some accelerometer axes were present but not all three.
    #[error("Incomplete motion reading: missing `{0}`")]
    MissingField(&'static str),

    /// Valid JSON that carries no reading the pipeline understands.
    #[error("Line carries no motion, pulse or vitals reading")]
    NoReading,
}

/// Errors surfaced by the daemon and its units.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Detector stopped: {0}")]
    Detect(#[from] DetectError),

    /// Opening or reading a device source failed.
    #[error("Device source {source_name} failed: {error}")]
    Device {
        source_name: String,
        #[source]
        error: std::io::Error,
    },

    #[error("Data directory {path} is not usable: {error}")]
    DataDir {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },

    /// A unit's task panicked or was cancelled.
    #[error("Task join failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
