//! Signal conditioning for wearable telemetry.
//!
//! Two independent stages, both pure (no I/O):
//!
//! 1. **Motion** ([`MotionConditioner`]): a 5-sample moving average per
//!    accelerometer axis suppresses sensor noise; the magnitude and an
//!    [`carewatch_core::Activity`] tag are derived from the smoothed axes.
//! 2. **Pulse** ([`BeatDetector`]): hysteresis peak detection on the raw
//!    pulse waveform, emitting one BPM value per counting window.
//!
//! # Example
//!
//! ```
//! use carewatch_signal::{ActivityThresholds, BeatDetector, MotionConditioner};
//!
//! let mut motion = MotionConditioner::new(5, ActivityThresholds::default());
//! let fields = motion.condition(0.02, -0.01, 0.99);
//! assert!(!fields.fall_detected);
//!
//! let mut pulse = BeatDetector::new(550.0, 480.0, 10_000);
//! assert_eq!(pulse.process(0, 512.0), None);
//! ```

pub mod motion;
pub mod moving_average;
pub mod pulse;

pub use motion::{classify_activity, ActivityThresholds, MotionConditioner};
pub use moving_average::MovingAverage;
pub use pulse::BeatDetector;
