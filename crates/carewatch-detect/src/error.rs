//! Detector error types.

use carewatch_store::StoreError;
use thiserror::Error;

/// Conditions that stop a detector agent.
///
/// Per-cycle store failures are absorbed by the agent; only failures that
/// persist past the configured limit surface here.
#[derive(Debug, Error)]
pub enum DetectError {
    /// A store kept failing for more consecutive cycles than allowed.
    #[error("{store} store unavailable after {failures} consecutive failed cycles: {source}")]
    StoreUnavailable {
        store: String,
        failures: u32,
        #[source]
        source: StoreError,
    },
}
