//! Pipeline configuration.
//!
//! [`PipelineConfig`] gathers every tunable constant of the pipeline:
//! conditioning windows, detector thresholds, store locations and poll
//! periods. It round-trips through JSON so a deployment can pin its values
//! in a file, and every section falls back to its documented default when
//! omitted.
//!
//! ```rust
//! use carewatch_core::PipelineConfig;
//!
//! let cfg = PipelineConfig::default();
//! cfg.validate().expect("defaults are valid");
//! assert_eq!(cfg.store.telemetry_capacity, 1000);
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::VitalParameter;

// ---------------------------------------------------------------------------
// PipelineConfig
// ---------------------------------------------------------------------------

/// Complete configuration for one pipeline process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub conditioner: ConditionerConfig,
    pub fall: FallDetectorConfig,
    pub vitals: VitalsDetectorConfig,
    pub store: StoreConfig,
    pub scheduler: SchedulerConfig,
    pub source: SourceConfig,
}

impl PipelineConfig {
    /// Load and validate a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::FileRead`] if the file cannot be read and
    /// [`ConfigError::InvalidValue`] if it is malformed or fails validation.
    pub fn from_json(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: PipelineConfig = serde_json::from_str(&contents)
            .map_err(|e| ConfigError::invalid_value("(file)", e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Write this configuration as pretty-printed JSON.
    pub fn to_json(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::FileRead {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::invalid_value("(serialization)", e.to_string()))?;
        std::fs::write(path, json).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::InvalidValue`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.conditioner.validate()?;
        self.fall.validate()?;
        self.vitals.validate()?;
        self.store.validate()?;
        self.scheduler.validate()?;
        self.source.validate()
    }
}

// ---------------------------------------------------------------------------
// Conditioner
// ---------------------------------------------------------------------------

/// Signal conditioning parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditionerConfig {
    /// Moving-average window per accelerometer axis. Default: **5**.
    pub smoothing_window: usize,
    /// Raw pulse level that starts a beat. Default: **550**.
    pub pulse_threshold_high: f64,
    /// Raw pulse level that ends a beat. Default: **480**.
    pub pulse_threshold_low: f64,
    /// Beat-counting window in device milliseconds. Default: **10 000**.
    pub bpm_window_ms: u64,
}

impl Default for ConditionerConfig {
    fn default() -> Self {
        Self {
            smoothing_window: 5,
            pulse_threshold_high: 550.0,
            pulse_threshold_low: 480.0,
            bpm_window_ms: 10_000,
        }
    }
}

impl ConditionerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.smoothing_window == 0 {
            return Err(ConfigError::invalid_value(
                "conditioner.smoothing_window",
                "must be at least 1",
            ));
        }
        if self.pulse_threshold_low >= self.pulse_threshold_high {
            return Err(ConfigError::invalid_value(
                "conditioner.pulse_threshold_low",
                format!(
                    "must be below pulse_threshold_high ({} >= {})",
                    self.pulse_threshold_low, self.pulse_threshold_high
                ),
            ));
        }
        if self.bpm_window_ms == 0 {
            return Err(ConfigError::invalid_value(
                "conditioner.bpm_window_ms",
                "must be non-zero",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fall detector
// ---------------------------------------------------------------------------

/// Fall pattern thresholds, all in g.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallDetectorConfig {
    /// Magnitude above which a record is an impact. Default: **3.0**.
    pub impact_threshold_g: f64,
    /// Per-axis bound below which all three axes indicate free fall. Default: **0.3**.
    pub free_fall_threshold_g: f64,
    /// Magnitude above which a sudden change counts as a fall. Default: **2.5**.
    pub fall_threshold_g: f64,
    /// Minimum change from the previous magnitude for a sudden spike. Default: **1.5**.
    pub sudden_delta_g: f64,
    /// Wall-clock suppression window after an alert. Default: **5000**.
    pub cooldown_ms: u64,
}

impl Default for FallDetectorConfig {
    fn default() -> Self {
        Self {
            impact_threshold_g: 3.0,
            free_fall_threshold_g: 0.3,
            fall_threshold_g: 2.5,
            sudden_delta_g: 1.5,
            cooldown_ms: 5_000,
        }
    }
}

impl FallDetectorConfig {
    /// Cooldown as a wall-clock span, compared against `observed_at`.
    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(i64::try_from(self.cooldown_ms).unwrap_or(i64::MAX))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.free_fall_threshold_g <= 0.0 {
            return Err(ConfigError::invalid_value(
                "fall.free_fall_threshold_g",
                "must be positive",
            ));
        }
        if self.fall_threshold_g > self.impact_threshold_g {
            return Err(ConfigError::invalid_value(
                "fall.fall_threshold_g",
                "must not exceed impact_threshold_g",
            ));
        }
        if self.sudden_delta_g <= 0.0 {
            return Err(ConfigError::invalid_value(
                "fall.sudden_delta_g",
                "must be positive",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Vitals detector
// ---------------------------------------------------------------------------

/// Inclusive safe range for one vital parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SafeRange {
    pub low: f64,
    pub high: f64,
}

impl SafeRange {
    pub const fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    /// Whether `value` lies within `[low, high]`.
    pub fn contains(&self, value: f64) -> bool {
        (self.low..=self.high).contains(&value)
    }

    /// Distance outside the range as a fraction of the violated bound.
    ///
    /// Zero for in-range values. A heart rate of 130 against 60-100 gives
    /// `0.3`; a SpO2 of 85 against 94-100 gives roughly `0.096`.
    pub fn fraction_outside(&self, value: f64) -> f64 {
        if value > self.high {
            (value - self.high) / self.high.abs().max(f64::EPSILON)
        } else if value < self.low {
            (self.low - value) / self.low.abs().max(f64::EPSILON)
        } else {
            0.0
        }
    }
}

/// Safe ranges and severity policy for the vitals detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VitalsDetectorConfig {
    pub heart_rate: SafeRange,
    pub spo2: SafeRange,
    pub temperature: SafeRange,
    pub systolic_bp: SafeRange,
    pub diastolic_bp: SafeRange,
    /// Fraction outside a range above which an alert is HIGH. Default: **0.2**.
    pub high_severity_fraction: f64,
}

impl Default for VitalsDetectorConfig {
    fn default() -> Self {
        Self {
            heart_rate: SafeRange::new(60.0, 100.0),
            spo2: SafeRange::new(94.0, 100.0),
            temperature: SafeRange::new(36.0, 37.5),
            systolic_bp: SafeRange::new(90.0, 120.0),
            diastolic_bp: SafeRange::new(60.0, 80.0),
            high_severity_fraction: 0.2,
        }
    }
}

impl VitalsDetectorConfig {
    /// Safe range configured for `parameter`.
    pub fn range(&self, parameter: VitalParameter) -> SafeRange {
        match parameter {
            VitalParameter::HeartRate => self.heart_rate,
            VitalParameter::Spo2 => self.spo2,
            VitalParameter::Temperature => self.temperature,
            VitalParameter::SystolicBp => self.systolic_bp,
            VitalParameter::DiastolicBp => self.diastolic_bp,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for parameter in VitalParameter::ALL {
            let range = self.range(parameter);
            if range.low > range.high {
                return Err(ConfigError::invalid_value(
                    format!("vitals.{parameter}"),
                    format!("low bound {} exceeds high bound {}", range.low, range.high),
                ));
            }
        }
        if self.high_severity_fraction < 0.0 {
            return Err(ConfigError::invalid_value(
                "vitals.high_severity_fraction",
                "must not be negative",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Stores
// ---------------------------------------------------------------------------

/// Where and how telemetry and alerts are kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory for JSON store files. `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
    /// Records retained per telemetry store. Default: **1000**.
    pub telemetry_capacity: usize,
    pub fall_events_file: String,
    pub vitals_stream_file: String,
    pub escalation_file: String,
    /// Attempts per escalation append before the alert is left pending. Default: **3**.
    pub append_retries: u32,
    pub append_retry_backoff_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            telemetry_capacity: 1000,
            fall_events_file: "fall_events.json".to_string(),
            vitals_stream_file: "vitals_stream.json".to_string(),
            escalation_file: "escalation.json".to_string(),
            append_retries: 3,
            append_retry_backoff_ms: 50,
        }
    }
}

impl StoreConfig {
    pub fn append_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.append_retry_backoff_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.telemetry_capacity == 0 {
            return Err(ConfigError::invalid_value(
                "store.telemetry_capacity",
                "must be at least 1",
            ));
        }
        if self.append_retries == 0 {
            return Err(ConfigError::invalid_value(
                "store.append_retries",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Poll periods and failure policy for detector units.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Fall detector poll period. Default: **2000**.
    pub fall_interval_ms: u64,
    /// Vitals detector poll period. Default: **2000**.
    pub vitals_interval_ms: u64,
    /// Consecutive corrupt reads after which a unit gives up on its store. Default: **5**.
    pub max_consecutive_store_failures: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            fall_interval_ms: 2_000,
            vitals_interval_ms: 2_000,
            max_consecutive_store_failures: 5,
        }
    }
}

impl SchedulerConfig {
    pub fn fall_interval(&self) -> Duration {
        Duration::from_millis(self.fall_interval_ms)
    }

    pub fn vitals_interval(&self) -> Duration {
        Duration::from_millis(self.vitals_interval_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.fall_interval_ms == 0 || self.vitals_interval_ms == 0 {
            return Err(ConfigError::invalid_value(
                "scheduler.*_interval_ms",
                "poll periods must be non-zero",
            ));
        }
        if self.max_consecutive_store_failures == 0 {
            return Err(ConfigError::invalid_value(
                "scheduler.max_consecutive_store_failures",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Device source
// ---------------------------------------------------------------------------

/// Reconnect policy and simulator pacing for the device source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// First reconnect delay after a disconnect. Default: **500**.
    pub reconnect_initial_ms: u64,
    /// Upper bound for the doubling reconnect delay. Default: **30 000**.
    pub reconnect_max_ms: u64,
    /// Interval between simulated device lines. Default: **50** (20 Hz).
    pub simulator_tick_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            reconnect_initial_ms: 500,
            reconnect_max_ms: 30_000,
            simulator_tick_ms: 50,
        }
    }
}

impl SourceConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.reconnect_initial_ms == 0 || self.reconnect_initial_ms > self.reconnect_max_ms {
            return Err(ConfigError::invalid_value(
                "source.reconnect_initial_ms",
                "must be non-zero and not exceed reconnect_max_ms",
            ));
        }
        if self.simulator_tick_ms == 0 {
            return Err(ConfigError::invalid_value(
                "source.simulator_tick_ms",
                "must be non-zero",
            ));
        }
        Ok(())
    }
}
