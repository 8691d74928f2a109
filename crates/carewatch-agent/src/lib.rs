//! Device ingest, poll scheduling and the `carewatch` daemon.
//!
//! ```text
//! DeviceSource ──lines──▶ ConditionerUnit ──▶ telemetry logs
//!                                                  │
//!                       Scheduler ──▶ DetectorAgent (fall, vitals)
//!                                                  │
//!                                                  ▼
//!                                          escalation sink
//! ```
//!
//! The device source reads on one task and hands lines to the conditioner on
//! the blocking pool; each detector agent runs on its own scheduled task.
//! Units only share the stores.

pub mod conditioner;
pub mod error;
pub mod ingest;
pub mod pipeline;
pub mod scheduler;
pub mod simulator;
pub mod source;

pub use conditioner::{ConditionerUnit, Ingested, SharedConditioner};
pub use error::{AgentError, ParseError, Result};
pub use ingest::{parse_device_line, IngestStats, DEFAULT_MOTION_DEVICE, DEFAULT_PULSE_DEVICE};
pub use pipeline::{Pipeline, Stores};
pub use scheduler::{PollUnit, Scheduler, UnitExit, UnitOutcome};
pub use simulator::Simulator;
pub use source::DeviceSource;
