//! Fall pattern detection over conditioned motion records.
//!
//! Each device stream runs its own two-state machine:
//!
//! ```text
//!            pattern matched
//!   Idle ───────────────────────▶ Alerting
//!    ▲                               │
//!    └──────── cooldown elapsed ─────┘
//! ```
//!
//! Patterns are checked in a fixed order and the first match wins:
//!
//! 1. **Impact**: `m > impact_threshold_g`
//! 2. **Free-fall**: every axis below `free_fall_threshold_g` in magnitude
//! 3. **Sudden spike**: `m > fall_threshold_g` and `|m - previous_m| > sudden_delta_g`
//!
//! The cooldown runs on each record's `observed_at` wall-clock time, so two
//! falls far enough apart alert twice even when one poll cycle reads both.

use std::collections::HashMap;
use std::fmt;

use carewatch_core::{Alert, FallDetectorConfig, MotionFields, Severity, TelemetryRecord};
use chrono::{DateTime, Duration, Utc};

use crate::agent::RecordClassifier;

/// Which fall signature a record matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FallPattern {
    Impact,
    FreeFall,
    SuddenSpike,
}

impl FallPattern {
    /// Label used in alert messages.
    pub fn label(&self) -> &'static str {
        match self {
            FallPattern::Impact => "Impact",
            FallPattern::FreeFall => "Free-fall",
            FallPattern::SuddenSpike => "Sudden spike",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            FallPattern::Impact => Severity::High,
            FallPattern::FreeFall | FallPattern::SuddenSpike => Severity::Medium,
        }
    }
}

impl fmt::Display for FallPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// State of one device stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallState {
    Idle,
    /// Cooldown active until the given wall-clock time.
    Alerting { until: DateTime<Utc> },
}

#[derive(Debug, Clone)]
struct StreamState {
    state: FallState,
    previous_magnitude: Option<f64>,
}

impl Default for StreamState {
    fn default() -> Self {
        Self {
            state: FallState::Idle,
            previous_magnitude: None,
        }
    }
}

/// Fall pattern detector keeping one state machine per device.
#[derive(Debug, Clone)]
pub struct FallDetector {
    config: FallDetectorConfig,
    cooldown: Duration,
    streams: HashMap<String, StreamState>,
}

impl FallDetector {
    #[must_use]
    pub fn new(config: FallDetectorConfig) -> Self {
        let cooldown = config.cooldown();
        Self {
            config,
            cooldown,
            streams: HashMap::new(),
        }
    }

    /// Match `fields` against the fall patterns, in priority order.
    ///
    /// `previous_magnitude` is the magnitude of the preceding record of the
    /// same stream; without one the spike pattern cannot match.
    pub fn match_pattern(
        &self,
        fields: &MotionFields,
        previous_magnitude: Option<f64>,
    ) -> Option<FallPattern> {
        let cfg = &self.config;
        let m = fields.magnitude;

        if m > cfg.impact_threshold_g {
            return Some(FallPattern::Impact);
        }
        let t = cfg.free_fall_threshold_g;
        if fields.x.abs() < t && fields.y.abs() < t && fields.z.abs() < t {
            return Some(FallPattern::FreeFall);
        }
        if let Some(prev) = previous_magnitude {
            if m > cfg.fall_threshold_g && (m - prev).abs() > cfg.sudden_delta_g {
                return Some(FallPattern::SuddenSpike);
            }
        }
        None
    }

    /// Feed one record of `device_id`'s stream, observed at `at`.
    ///
    /// Returns the matched pattern when the stream moves from `Idle` to
    /// `Alerting`. Matches during the cooldown are suppressed. The previous
    /// magnitude is updated for every record, suppressed or not.
    pub fn process(
        &mut self,
        device_id: &str,
        fields: &MotionFields,
        at: DateTime<Utc>,
    ) -> Option<FallPattern> {
        let previous = self
            .streams
            .get(device_id)
            .and_then(|s| s.previous_magnitude);
        let matched = self.match_pattern(fields, previous);

        let cooldown = self.cooldown;
        let stream = self.streams.entry(device_id.to_string()).or_default();
        stream.previous_magnitude = Some(fields.magnitude);

        if let FallState::Alerting { until } = stream.state {
            if at >= until {
                stream.state = FallState::Idle;
            }
        }

        match (stream.state, matched) {
            (FallState::Idle, Some(pattern)) => {
                stream.state = FallState::Alerting {
                    until: at.checked_add_signed(cooldown).unwrap_or(DateTime::<Utc>::MAX_UTC),
                };
                Some(pattern)
            }
            (FallState::Alerting { .. }, Some(pattern)) => {
                tracing::debug!(device_id, %pattern, "Fall pattern suppressed by cooldown");
                None
            }
            (_, None) => None,
        }
    }

    /// Current state of `device_id`'s stream (Idle if never seen).
    pub fn state(&self, device_id: &str) -> FallState {
        self.streams
            .get(device_id)
            .map_or(FallState::Idle, |s| s.state)
    }
}

impl RecordClassifier<MotionFields> for FallDetector {
    fn classify(&mut self, record: &TelemetryRecord<MotionFields>) -> Vec<Alert> {
        let Some(pattern) = self.process(&record.device_id, &record.fields, record.observed_at) else {
            return Vec::new();
        };
        tracing::info!(
            sequence = record.sequence,
            device_id = %record.device_id,
            magnitude = record.fields.magnitude,
            %pattern,
            "Fall detected"
        );
        vec![Alert::fall(
            record.fields.magnitude,
            pattern.label(),
            pattern.severity(),
            Utc::now(),
        )]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carewatch_core::Activity;

    const DEVICE: &str = "esp32_fall_sensor_001";

    fn motion(x: f64, y: f64, z: f64) -> MotionFields {
        MotionFields {
            x,
            y,
            z,
            magnitude: (x * x + y * y + z * z).sqrt(),
            activity: Activity::Normal,
            fall_detected: false,
            alert_level: None,
        }
    }

    fn with_magnitude(m: f64, x: f64, y: f64, z: f64) -> MotionFields {
        MotionFields {
            magnitude: m,
            ..motion(x, y, z)
        }
    }

    fn detector() -> FallDetector {
        FallDetector::new(FallDetectorConfig::default())
    }

    #[test]
    fn impact_wins_over_free_fall() {
        let d = detector();
        let fields = with_magnitude(3.2, 0.01, 0.02, 0.01);
        assert_eq!(d.match_pattern(&fields, None), Some(FallPattern::Impact));
    }

    #[test]
    fn free_fall_needs_every_axis_low() {
        let d = detector();
        assert_eq!(
            d.match_pattern(&motion(0.1, -0.2, 0.1), None),
            Some(FallPattern::FreeFall)
        );
        assert_eq!(d.match_pattern(&motion(0.1, -0.2, 0.9), None), None);
    }

    #[test]
    fn sudden_spike_uses_previous_magnitude() {
        let d = detector();
        let spike = motion(1.6, 1.6, 1.2);
        assert!(spike.magnitude > 2.5 && spike.magnitude < 3.0);

        assert_eq!(d.match_pattern(&spike, None), None);
        assert_eq!(d.match_pattern(&spike, Some(1.0)), Some(FallPattern::SuddenSpike));
        assert_eq!(d.match_pattern(&spike, Some(2.2)), None);
    }

    #[test]
    fn free_fall_wins_over_spike() {
        let d = detector();
        // Inconsistent axes and magnitude so that patterns 2 and 3 both hold.
        let fields = with_magnitude(2.8, 0.1, 0.1, 0.1);
        assert_eq!(d.match_pattern(&fields, Some(1.0)), Some(FallPattern::FreeFall));
    }

    #[test]
    fn spike_is_detected_across_process_calls() {
        let mut d = detector();
        let t0 = Utc::now();
        assert_eq!(d.process(DEVICE, &motion(0.0, 0.0, 1.0), t0), None);
        assert_eq!(
            d.process(DEVICE, &motion(1.6, 1.6, 1.2), t0),
            Some(FallPattern::SuddenSpike)
        );
    }

    #[test]
    fn cooldown_suppresses_second_impact() {
        let mut d = detector();
        let t0 = Utc::now();
        let impact = motion(2.5, 2.5, 1.0);

        assert_eq!(d.process(DEVICE, &impact, t0), Some(FallPattern::Impact));
        assert_eq!(d.process(DEVICE, &impact, t0 + Duration::seconds(2)), None);
        assert!(matches!(d.state(DEVICE), FallState::Alerting { .. }));

        assert_eq!(
            d.process(DEVICE, &impact, t0 + Duration::seconds(5)),
            Some(FallPattern::Impact)
        );
    }

    #[test]
    fn cooldown_expires_without_new_matches() {
        let mut d = detector();
        let t0 = Utc::now();
        d.process(DEVICE, &motion(2.5, 2.5, 1.0), t0);
        d.process(DEVICE, &motion(0.0, 0.0, 1.0), t0 + Duration::seconds(6));
        assert_eq!(d.state(DEVICE), FallState::Idle);
    }

    #[test]
    fn previous_magnitude_tracks_records_during_cooldown() {
        let mut d = detector();
        let t0 = Utc::now();
        let spike = motion(1.6, 1.6, 1.2);

        assert_eq!(d.process(DEVICE, &motion(2.5, 2.5, 1.0), t0), Some(FallPattern::Impact));
        assert_eq!(d.process(DEVICE, &motion(0.0, 0.0, 1.0), t0 + Duration::seconds(2)), None);
        // 1 g -> 2.6 g once the cooldown is over.
        assert_eq!(
            d.process(DEVICE, &spike, t0 + Duration::seconds(6)),
            Some(FallPattern::SuddenSpike)
        );
    }

    #[test]
    fn suppressed_spike_still_becomes_previous_magnitude() {
        let mut d = detector();
        let t0 = Utc::now();
        let spike = motion(1.6, 1.6, 1.2);

        d.process(DEVICE, &motion(2.5, 2.5, 1.0), t0);
        d.process(DEVICE, &motion(0.0, 0.0, 1.0), t0 + Duration::seconds(1));
        assert_eq!(d.process(DEVICE, &spike, t0 + Duration::seconds(3)), None);
        // Same magnitude as the suppressed record: no jump, no spike.
        assert_eq!(d.process(DEVICE, &spike, t0 + Duration::seconds(6)), None);
        assert_eq!(d.state(DEVICE), FallState::Idle);
    }

    #[test]
    fn one_batch_with_falls_far_apart_alerts_twice() {
        let mut d = detector();
        let t0 = Utc::now();
        let record = |sequence, fields, offset_ms| TelemetryRecord {
            sequence,
            observed_at: t0 + Duration::milliseconds(offset_ms),
            device_id: DEVICE.to_string(),
            fields,
        };
        let batch = [
            record(1, motion(2.5, 2.5, 1.0), 0),
            record(2, motion(0.0, 0.0, 1.0), 5_200),
            record(3, motion(2.5, 2.5, 1.0), 5_300),
            record(4, motion(2.5, 2.5, 1.0), 6_000),
        ];

        let alerts: Vec<_> = batch.iter().flat_map(|r| d.classify(r)).collect();
        assert_eq!(alerts.len(), 2);
        assert!(alerts.iter().all(|a| a.severity == Severity::High));
    }

    #[test]
    fn streams_are_independent_per_device() {
        let mut d = detector();
        let t0 = Utc::now();
        let impact = motion(2.5, 2.5, 1.0);
        assert!(d.process("wrist-a", &impact, t0).is_some());
        assert!(d.process("wrist-b", &impact, t0).is_some());
        assert_eq!(d.state("never-seen"), FallState::Idle);
    }

    #[test]
    fn classify_builds_fall_alert() {
        let mut d = detector();
        let record = TelemetryRecord {
            sequence: 1,
            observed_at: Utc::now(),
            device_id: DEVICE.to_string(),
            fields: with_magnitude(3.2, 0.01, 0.02, 0.01),
        };
        let alerts = d.classify(&record);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::High);
        assert_eq!(alerts[0].message, "Fall detected! Magnitude: 3.20g, Activity: Impact");
    }
}
