//! Accelerometer conditioning.
//!
//! Smooths each axis with a [`MovingAverage`], derives the magnitude from the
//! smoothed axes and tags the result with an [`Activity`]. Device-computed
//! magnitudes are never trusted; the host recomputes them from raw axes.

use carewatch_core::{Activity, FallDetectorConfig, MotionFields, Severity};

use crate::moving_average::MovingAverage;

/// Allowed distance from 1 g for a still (inactive) wearer.
const STILLNESS_BAND_G: f64 = 0.05;

/// Distance from 1 g beyond which the wearer counts as walking.
const WALKING_BAND_G: f64 = 0.2;

/// Magnitude bounds used to tag activity, in g.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActivityThresholds {
    pub impact_g: f64,
    pub free_fall_g: f64,
    pub fall_g: f64,
}

impl Default for ActivityThresholds {
    fn default() -> Self {
        Self::from(&FallDetectorConfig::default())
    }
}

impl From<&FallDetectorConfig> for ActivityThresholds {
    fn from(cfg: &FallDetectorConfig) -> Self {
        Self {
            impact_g: cfg.impact_threshold_g,
            free_fall_g: cfg.free_fall_threshold_g,
            fall_g: cfg.fall_threshold_g,
        }
    }
}

/// Tag a smoothed reading with the activity it most likely represents.
pub fn classify_activity(
    x: f64,
    y: f64,
    z: f64,
    magnitude: f64,
    thresholds: &ActivityThresholds,
) -> Activity {
    let deviation = (magnitude - 1.0).abs();
    if magnitude > thresholds.impact_g {
        Activity::FallImpact
    } else if [x, y, z].iter().all(|a| a.abs() < thresholds.free_fall_g) {
        Activity::FallDrop
    } else if deviation < STILLNESS_BAND_G {
        Activity::Inactive
    } else if deviation > WALKING_BAND_G {
        Activity::Walking
    } else {
        Activity::Normal
    }
}

/// Per-device accelerometer conditioner.
#[derive(Debug, Clone)]
pub struct MotionConditioner {
    x: MovingAverage,
    y: MovingAverage,
    z: MovingAverage,
    thresholds: ActivityThresholds,
}

impl MotionConditioner {
    /// Create a conditioner with a `window`-sample moving average per axis.
    #[must_use]
    pub fn new(window: usize, thresholds: ActivityThresholds) -> Self {
        Self {
            x: MovingAverage::new(window),
            y: MovingAverage::new(window),
            z: MovingAverage::new(window),
            thresholds,
        }
    }

    /// Feed one raw tri-axial sample (in g) and return the conditioned fields.
    pub fn condition(&mut self, x: f64, y: f64, z: f64) -> MotionFields {
        let sx = self.x.push(x);
        let sy = self.y.push(y);
        let sz = self.z.push(z);
        let magnitude = (sx * sx + sy * sy + sz * sz).sqrt();

        let activity = classify_activity(sx, sy, sz, magnitude, &self.thresholds);
        let alert_level = activity.is_fall().then(|| {
            if magnitude > self.thresholds.fall_g {
                Severity::High
            } else {
                Severity::Medium
            }
        });

        MotionFields {
            x: sx,
            y: sy,
            z: sz,
            magnitude,
            activity,
            fall_detected: activity.is_fall(),
            alert_level,
        }
    }

    pub fn reset(&mut self) {
        self.x.reset();
        self.y.reset();
        self.z.reset();
    }
}
