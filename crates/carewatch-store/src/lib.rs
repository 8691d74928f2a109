//! Telemetry and escalation stores.
//!
//! - [`TelemetryLog`]: append-only, sequence-numbered, capacity-bounded log
//!   of conditioned records, read incrementally through a
//!   [`Cursor`](carewatch_core::Cursor). One writer, many readers.
//! - [`EscalationSink`]: shared alert log with many writers. Appends are
//!   serialized so no alert is lost.
//!
//! Both come in an in-memory flavour and a JSON file flavour that keeps the
//! `fall_events.json` / `vitals_stream.json` / `escalation.json` layout.

pub mod error;
pub mod escalation;
mod file;
pub mod telemetry;

pub use error::{StoreError, StoreResult};
pub use escalation::{
    append_with_retry, AlertBatch, EscalationMarker, EscalationSink, JsonFileEscalationStore,
    MemoryEscalationStore,
};
pub use telemetry::{
    JsonFileTelemetryStore, LogStats, MemoryTelemetryStore, ReadBatch, TelemetryLog,
    DEFAULT_CAPACITY,
};
