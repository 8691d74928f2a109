//! Device line decoding.
//!
//! Devices print one JSON object per line over their serial link, e.g.
//!
//! ```text
//! {"timestamp":12345,"x":0.123,"y":-0.456,"z":1.234,"magnitude":1.345,
//!  "fall_detected":false,"bpm":72.0,"pulse_raw":510,"device_id":"esp32_fall_sensor_001"}
//! ```
//!
//! One line may carry several readings (accelerometer, pulse waveform,
//! direct vitals); each becomes its own [`SensorSample`]. Values the device
//! computed itself (`magnitude`, `fall_detected`, `bpm`) are ignored: the
//! host conditioner derives them again from the raw readings.

use carewatch_core::{SampleValue, SensorSample, VitalsFields};
use serde::Deserialize;

use crate::error::ParseError;

/// Device id assumed for motion lines that carry none.
pub const DEFAULT_MOTION_DEVICE: &str = "esp32_fall_sensor_001";
/// Device id assumed for pulse and vitals lines that carry none.
pub const DEFAULT_PULSE_DEVICE: &str = "esp32_pulse_001";

#[derive(Debug, Deserialize)]
struct DeviceLine {
    #[serde(default)]
    device_id: Option<String>,
    /// Device milliseconds since boot.
    #[serde(default)]
    timestamp: Option<u64>,
    #[serde(default)]
    x: Option<f64>,
    #[serde(default)]
    y: Option<f64>,
    #[serde(default)]
    z: Option<f64>,
    #[serde(default, alias = "raw")]
    pulse_raw: Option<f64>,
    #[serde(flatten)]
    vitals: VitalsFields,
}

/// Decode one line from a device.
///
/// `received_at_ms` stands in for the device timestamp when the line has
/// none.
///
/// # Errors
///
/// A [`ParseError`] for anything that is not a usable reading. Callers log
/// it and carry on with the next line.
pub fn parse_device_line(line: &str, received_at_ms: u64) -> Result<Vec<SensorSample>, ParseError> {
    let line = line.trim();
    if !line.starts_with('{') {
        return Err(ParseError::NotJson);
    }
    let parsed: DeviceLine = serde_json::from_str(line)?;
    let captured_at = parsed.timestamp.unwrap_or(received_at_ms);

    let motion = match (parsed.x, parsed.y, parsed.z) {
        (Some(x), Some(y), Some(z)) => Some(SampleValue::Motion { x, y, z }),
        (None, None, None) => None,
        (None, _, _) => return Err(ParseError::MissingField("x")),
        (_, None, _) => return Err(ParseError::MissingField("y")),
        (_, _, None) => return Err(ParseError::MissingField("z")),
    };

    let device_id = parsed.device_id.unwrap_or_else(|| {
        if motion.is_some() {
            DEFAULT_MOTION_DEVICE.to_string()
        } else {
            DEFAULT_PULSE_DEVICE.to_string()
        }
    });

    let mut samples = Vec::with_capacity(3);
    let mut push = |value| {
        samples.push(SensorSample {
            device_id: device_id.clone(),
            captured_at,
            value,
        })
    };
    if let Some(value) = motion {
        push(value);
    }
    if let Some(raw) = parsed.pulse_raw {
        push(SampleValue::Pulse { raw });
    }
    if !parsed.vitals.is_empty() {
        push(SampleValue::Vitals(parsed.vitals));
    }

    if samples.is_empty() {
        return Err(ParseError::NoReading);
    }
    Ok(samples)
}

/// Counters kept by the ingest side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Non-empty lines read from the device.
    pub lines_received: u64,
    pub lines_parsed: u64,
    /// Lines dropped as unparseable.
    pub lines_discarded: u64,
    pub motion_records: u64,
    pub vitals_records: u64,
    /// Telemetry appends that failed.
    pub append_errors: u64,
    /// Times the device source was reopened.
    pub reconnects: u64,
}

impl IngestStats {
    /// Fraction of received lines that parsed.
    pub fn parse_rate(&self) -> f64 {
        if self.lines_received > 0 {
            self.lines_parsed as f64 / self.lines_received as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carewatch_core::SensorKind;

    #[test]
    fn combined_line_yields_motion_and_pulse() {
        let line = r#"{"timestamp":12345,"x":0.123,"y":-0.456,"z":1.234,"magnitude":1.345,"fall_detected":false,"bpm":72.0,"pulse_raw":510,"device_id":"esp32_fall_sensor_001"}"#;
        let samples = parse_device_line(line, 0).unwrap();
        let kinds: Vec<_> = samples.iter().map(SensorSample::kind).collect();
        assert_eq!(kinds, vec![SensorKind::Motion, SensorKind::Pulse]);
        assert!(samples.iter().all(|s| s.captured_at == 12345));
        assert_eq!(samples[1].value, SampleValue::Pulse { raw: 510.0 });
    }

    #[test]
    fn defaults_device_ids_by_reading() {
        let motion = parse_device_line(r#"{"x":0,"y":0,"z":1}"#, 7).unwrap();
        assert_eq!(motion[0].device_id, DEFAULT_MOTION_DEVICE);
        assert_eq!(motion[0].captured_at, 7);

        let pulse = parse_device_line(r#"{"bpm":70,"raw":530}"#, 7).unwrap();
        assert_eq!(pulse[0].device_id, DEFAULT_PULSE_DEVICE);
        assert_eq!(pulse[0].value, SampleValue::Pulse { raw: 530.0 });
    }

    #[test]
    fn vitals_line_accepts_legacy_names() {
        let line = r#"{"device_id":"bedside_01","heart_rate":88,"bp_systolic":125,"bp_diastolic":82,"oxygen_saturation":96,"temperature":36.9}"#;
        let samples = parse_device_line(line, 0).unwrap();
        assert_eq!(samples.len(), 1);
        let SampleValue::Vitals(v) = &samples[0].value else {
            panic!("expected vitals, got {:?}", samples[0].value);
        };
        assert_eq!(v.systolic_bp, Some(125.0));
        assert_eq!(v.spo2, Some(96.0));
    }

    #[test]
    fn rejects_non_json_and_garbage() {
        assert!(matches!(parse_device_line("ets Jun  8 2016 00:22:57", 0), Err(ParseError::NotJson)));
        assert!(matches!(parse_device_line("{\"x\":0.1,", 0), Err(ParseError::Json(_))));
        assert!(matches!(parse_device_line("", 0), Err(ParseError::NotJson)));
    }

    #[test]
    fn rejects_partial_axes_and_empty_objects() {
        assert!(matches!(
            parse_device_line(r#"{"x":0.1,"z":1.0}"#, 0),
            Err(ParseError::MissingField("y"))
        ));
        assert!(matches!(
            parse_device_line(r#"{"device_id":"d","fall_detected":true}"#, 0),
            Err(ParseError::NoReading)
        ));
    }

    #[test]
    fn parse_rate_of_empty_stats_is_zero() {
        assert_eq!(IngestStats::default().parse_rate(), 0.0);
    }
}
