//! Anomaly detectors for conditioned telemetry.
//!
//! - [`FallDetector`]: impact / free-fall / sudden-spike patterns on motion
//!   records, with a per-device cooldown.
//! - [`VitalsDetector`]: safe-range checks on vital readings, edge-triggered
//!   per device and parameter.
//!
//! Both implement [`RecordClassifier`] and are driven by a
//! [`DetectorAgent`], which owns the read cursor and delivers alerts to the
//! escalation sink. Detectors never talk to each other.

pub mod agent;
pub mod error;
pub mod fall;
pub mod vitals;

pub use agent::{AgentPolicy, CycleReport, DetectorAgent, RecordClassifier};
pub use carewatch_core::SafeRange;
pub use error::DetectError;
pub use fall::{FallDetector, FallPattern, FallState};
pub use vitals::{VitalsDetector, VitalsFinding};
