//! Vital sign threshold detection.
//!
//! Each reading is compared against its [`SafeRange`]. Alerts are
//! edge-triggered per device and parameter: an alert fires when a parameter
//! goes out of range and stays quiet until a later reading of that same
//! parameter is back in range. A record that does not carry a parameter
//! leaves that parameter's state alone.

use std::collections::{HashMap, HashSet};

use carewatch_core::{
    Alert, SafeRange, Severity, TelemetryRecord, VitalParameter, VitalsDetectorConfig,
    VitalsFields,
};
use chrono::Utc;

use crate::agent::RecordClassifier;

/// An out-of-range reading that should be escalated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VitalsFinding {
    pub parameter: VitalParameter,
    pub value: f64,
    pub range: SafeRange,
    pub severity: Severity,
}

/// Threshold detector with per-device duplicate suppression.
#[derive(Debug, Clone)]
pub struct VitalsDetector {
    config: VitalsDetectorConfig,
    /// Parameters whose latest reading was out of range, per device.
    abnormal: HashMap<String, HashSet<VitalParameter>>,
}

impl VitalsDetector {
    #[must_use]
    pub fn new(config: VitalsDetectorConfig) -> Self {
        Self {
            config,
            abnormal: HashMap::new(),
        }
    }

    /// Severity of an out-of-range `value`.
    ///
    /// HIGH when the reading lies further outside the range than
    /// `high_severity_fraction` of the violated bound.
    pub fn severity(&self, range: SafeRange, value: f64) -> Severity {
        severity_for(range, value, self.config.high_severity_fraction)
    }

    /// Evaluate one record of `device_id` and return the new findings.
    pub fn check(&mut self, device_id: &str, fields: &VitalsFields) -> Vec<VitalsFinding> {
        let mut findings = Vec::new();
        let abnormal = self.abnormal.entry(device_id.to_string()).or_default();

        for (parameter, value) in fields.readings() {
            let range = self.config.range(parameter);
            if range.contains(value) {
                if abnormal.remove(&parameter) {
                    tracing::debug!(device_id, %parameter, value, "Vital back in range");
                }
                continue;
            }
            // Already reported for this excursion.
            if !abnormal.insert(parameter) {
                continue;
            }
            findings.push(VitalsFinding {
                parameter,
                value,
                range,
                severity: severity_for(range, value, self.config.high_severity_fraction),
            });
        }
        findings
    }

    /// Whether `parameter` of `device_id` is currently in an alerted excursion.
    pub fn is_abnormal(&self, device_id: &str, parameter: VitalParameter) -> bool {
        self.abnormal
            .get(device_id)
            .map_or(false, |set| set.contains(&parameter))
    }
}

fn severity_for(range: SafeRange, value: f64, high_fraction: f64) -> Severity {
    if range.fraction_outside(value) > high_fraction {
        Severity::High
    } else {
        Severity::Medium
    }
}

impl RecordClassifier<VitalsFields> for VitalsDetector {
    fn classify(&mut self, record: &TelemetryRecord<VitalsFields>) -> Vec<Alert> {
        self.check(&record.device_id, &record.fields)
            .into_iter()
            .map(|finding| {
                tracing::info!(
                    sequence = record.sequence,
                    device_id = %record.device_id,
                    parameter = %finding.parameter,
                    value = finding.value,
                    low = finding.range.low,
                    high = finding.range.high,
                    severity = %finding.severity,
                    "Abnormal vital sign"
                );
                Alert::vitals(finding.parameter, finding.value, finding.severity, Utc::now())
            })
            .collect()
    }
}
