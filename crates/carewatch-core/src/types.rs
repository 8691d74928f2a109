//! Telemetry and alert domain types.
//!
//! Raw device readings enter the pipeline as [`SensorSample`]s, leave the
//! conditioner as [`TelemetryRecord`]s and, when a detector decides they are
//! anomalous, end up as [`Alert`]s in the escalation store.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Position of a record within one telemetry store.
pub type Sequence = u64;

// ---------------------------------------------------------------------------
// Raw samples
// ---------------------------------------------------------------------------

/// Kind of telemetry a sample or store carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    /// Tri-axial accelerometer reading.
    Motion,
    /// Analog pulse-sensor reading.
    Pulse,
    /// Directly measured vital signs.
    Vitals,
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorKind::Motion => write!(f, "motion"),
            SensorKind::Pulse => write!(f, "pulse"),
            SensorKind::Vitals => write!(f, "vitals"),
        }
    }
}

/// Values carried by a raw sample.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleValue {
    /// Acceleration per axis, in g.
    Motion { x: f64, y: f64, z: f64 },
    /// Raw ADC value from the pulse sensor.
    Pulse { raw: f64 },
    /// Vital readings reported as-is by the device.
    Vitals(VitalsFields),
}

/// One raw reading as delivered by the device driver.
///
/// Samples are ephemeral: the conditioner consumes them immediately.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorSample {
    /// Identifier of the producing device.
    pub device_id: String,
    /// Monotonic device timestamp in milliseconds.
    pub captured_at: u64,
    /// Reading payload.
    pub value: SampleValue,
}

impl SensorSample {
    /// Kind of this sample, derived from its payload.
    pub fn kind(&self) -> SensorKind {
        match self.value {
            SampleValue::Motion { .. } => SensorKind::Motion,
            SampleValue::Pulse { .. } => SensorKind::Pulse,
            SampleValue::Vitals(_) => SensorKind::Vitals,
        }
    }
}

// ---------------------------------------------------------------------------
// Conditioned records
// ---------------------------------------------------------------------------

/// Activity tag attached to every conditioned motion record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Activity {
    Normal,
    Walking,
    Inactive,
    FallDrop,
    FallImpact,
}

impl Activity {
    /// Whether this tag marks one of the fall phases.
    pub fn is_fall(&self) -> bool {
        matches!(self, Activity::FallDrop | Activity::FallImpact)
    }
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Activity::Normal => "NORMAL",
            Activity::Walking => "WALKING",
            Activity::Inactive => "INACTIVE",
            Activity::FallDrop => "FALL_DROP",
            Activity::FallImpact => "FALL_IMPACT",
        };
        f.write_str(label)
    }
}

/// Conditioned accelerometer values (the `fall_events` store schema).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionFields {
    /// Smoothed x acceleration (g).
    pub x: f64,
    /// Smoothed y acceleration (g).
    pub y: f64,
    /// Smoothed z acceleration (g).
    pub z: f64,
    /// Euclidean norm of the smoothed axes (g).
    pub magnitude: f64,
    pub activity: Activity,
    pub fall_detected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_level: Option<Severity>,
}

/// Named vital sign with a safe range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VitalParameter {
    HeartRate,
    Spo2,
    Temperature,
    SystolicBp,
    DiastolicBp,
}

impl VitalParameter {
    /// Every parameter, in the order detectors evaluate them.
    pub const ALL: [VitalParameter; 5] = [
        VitalParameter::HeartRate,
        VitalParameter::Spo2,
        VitalParameter::Temperature,
        VitalParameter::SystolicBp,
        VitalParameter::DiastolicBp,
    ];

    /// Field name used in store files and alert messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            VitalParameter::HeartRate => "heart_rate",
            VitalParameter::Spo2 => "spo2",
            VitalParameter::Temperature => "temperature",
            VitalParameter::SystolicBp => "systolic_bp",
            VitalParameter::DiastolicBp => "diastolic_bp",
        }
    }
}

impl fmt::Display for VitalParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Vital readings (the `vitals_stream` store schema).
///
/// Every field is optional: a pulse-derived record only carries
/// `heart_rate`, a bedside monitor line may carry all five.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VitalsFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heart_rate: Option<f64>,
    #[serde(
        default,
        alias = "oxygen_saturation",
        skip_serializing_if = "Option::is_none"
    )]
    pub spo2: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, alias = "bp_systolic", skip_serializing_if = "Option::is_none")]
    pub systolic_bp: Option<f64>,
    #[serde(default, alias = "bp_diastolic", skip_serializing_if = "Option::is_none")]
    pub diastolic_bp: Option<f64>,
}

impl VitalsFields {
    /// Record holding only a heart rate.
    pub fn heart_rate(bpm: f64) -> Self {
        Self {
            heart_rate: Some(bpm),
            ..Self::default()
        }
    }

    /// Value of `parameter`, if present.
    pub fn get(&self, parameter: VitalParameter) -> Option<f64> {
        match parameter {
            VitalParameter::HeartRate => self.heart_rate,
            VitalParameter::Spo2 => self.spo2,
            VitalParameter::Temperature => self.temperature,
            VitalParameter::SystolicBp => self.systolic_bp,
            VitalParameter::DiastolicBp => self.diastolic_bp,
        }
    }

    /// Present readings in [`VitalParameter::ALL`] order.
    pub fn readings(&self) -> impl Iterator<Item = (VitalParameter, f64)> + '_ {
        VitalParameter::ALL
            .iter()
            .filter_map(move |p| self.get(*p).map(|v| (*p, v)))
    }

    /// True when no reading is present.
    pub fn is_empty(&self) -> bool {
        self.readings().next().is_none()
    }
}

/// Unsequenced record handed to a telemetry store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord<T> {
    pub device_id: String,
    pub fields: T,
}

impl<T> NewRecord<T> {
    pub fn new(device_id: impl Into<String>, fields: T) -> Self {
        Self {
            device_id: device_id.into(),
            fields,
        }
    }
}

/// Durable, ordered unit stored in a telemetry store.
///
/// `sequence` and `observed_at` are assigned by the store on append.
/// `observed_at` is the host wall clock, not the device timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord<T> {
    pub sequence: Sequence,
    #[serde(rename = "timestamp")]
    pub observed_at: DateTime<Utc>,
    pub device_id: String,
    #[serde(flatten)]
    pub fields: T,
}

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

/// Highest sequence a detector has finished processing in one store.
///
/// A cursor only moves forward. [`Cursor::START`] sits before the first
/// record any store can hand out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cursor(Sequence);

impl Cursor {
    /// Position before the first record.
    pub const START: Cursor = Cursor(0);

    pub fn at(sequence: Sequence) -> Self {
        Self(sequence)
    }

    /// Last processed sequence (0 if nothing was processed).
    pub fn position(&self) -> Sequence {
        self.0
    }

    /// Move to `sequence` if it is ahead of the current position.
    ///
    /// Returns whether the cursor moved.
    pub fn advance_to(&mut self, sequence: Sequence) -> bool {
        if sequence > self.0 {
            self.0 = sequence;
            true
        } else {
            false
        }
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

/// Alert severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
        }
    }
}

/// Which detector family raised an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Fall,
    #[serde(alias = "health")]
    Vitals,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertKind::Fall => write!(f, "fall"),
            AlertKind::Vitals => write!(f, "vitals"),
        }
    }
}

/// An escalated anomaly. Immutable once appended to the escalation store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub parameter: String,
    pub value: f64,
    pub message: String,
    #[serde(rename = "time")]
    pub raised_at: DateTime<Utc>,
    pub severity: Severity,
}

impl Alert {
    /// Fall alert for a record whose magnitude matched `pattern`.
    pub fn fall(
        magnitude: f64,
        pattern: &str,
        severity: Severity,
        raised_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: AlertKind::Fall,
            parameter: "magnitude".to_string(),
            value: magnitude,
            message: format!("Fall detected! Magnitude: {magnitude:.2}g, Activity: {pattern}"),
            raised_at,
            severity,
        }
    }

    /// Vitals alert for an out-of-range reading.
    pub fn vitals(
        parameter: VitalParameter,
        value: f64,
        severity: Severity,
        raised_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: AlertKind::Vitals,
            parameter: parameter.as_str().to_string(),
            value,
            message: format!("Abnormal {parameter}: {value}"),
            raised_at,
            severity,
        }
    }
}
