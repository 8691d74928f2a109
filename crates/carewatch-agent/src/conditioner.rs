//! The conditioner unit: raw samples in, telemetry records out.
//!
//! Keeps one [`MotionConditioner`] and one [`BeatDetector`] per device so
//! interleaved devices never share filter state. Motion samples produce one
//! motion record each; pulse samples produce a vitals record (heart rate
//! only) once per BPM window; direct vitals readings are stored as-is.

use std::collections::HashMap;
use std::sync::Arc;

use carewatch_core::{
    ConditionerConfig, FallDetectorConfig, MotionFields, NewRecord, SampleValue, SensorSample,
    VitalsFields,
};
use carewatch_signal::{ActivityThresholds, BeatDetector, MotionConditioner};
use carewatch_store::TelemetryLog;
use parking_lot::Mutex;

use crate::ingest::{parse_device_line, IngestStats};

/// What an ingested sample turned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingested {
    MotionRecord,
    VitalsRecord,
    /// Absorbed by a filter (pulse sample inside an open window).
    Buffered,
    /// A record was produced but the store rejected it.
    Dropped,
}

/// A conditioner handed between the source task and the blocking pool.
pub type SharedConditioner = Arc<Mutex<ConditionerUnit>>;

/// Conditions raw samples and appends the results to the telemetry logs.
pub struct ConditionerUnit {
    config: ConditionerConfig,
    thresholds: ActivityThresholds,
    motion_log: Arc<dyn TelemetryLog<MotionFields>>,
    vitals_log: Arc<dyn TelemetryLog<VitalsFields>>,
    motion: HashMap<String, MotionConditioner>,
    pulse: HashMap<String, BeatDetector>,
    stats: IngestStats,
}

impl ConditionerUnit {
    pub fn new(
        config: ConditionerConfig,
        fall: &FallDetectorConfig,
        motion_log: Arc<dyn TelemetryLog<MotionFields>>,
        vitals_log: Arc<dyn TelemetryLog<VitalsFields>>,
    ) -> Self {
        Self {
            config,
            thresholds: ActivityThresholds::from(fall),
            motion_log,
            vitals_log,
            motion: HashMap::new(),
            pulse: HashMap::new(),
            stats: IngestStats::default(),
        }
    }

    /// Decode and condition one device line.
    ///
    /// Unparseable lines are counted and logged at debug level. Returns how
    /// many records were appended.
    pub fn ingest_line(&mut self, line: &str, received_at_ms: u64) -> usize {
        if line.trim().is_empty() {
            return 0;
        }
        self.stats.lines_received += 1;

        let samples = match parse_device_line(line, received_at_ms) {
            Ok(samples) => samples,
            Err(e) => {
                self.stats.lines_discarded += 1;
                tracing::debug!(error = %e, line = %truncate(line, 120), "Discarding device line");
                return 0;
            }
        };
        self.stats.lines_parsed += 1;

        samples
            .into_iter()
            .map(|sample| self.ingest(sample))
            .filter(|outcome| matches!(outcome, Ingested::MotionRecord | Ingested::VitalsRecord))
            .count()
    }

    /// Condition one sample and append whatever record it yields.
    pub fn ingest(&mut self, sample: SensorSample) -> Ingested {
        let SensorSample {
            device_id,
            captured_at,
            value,
        } = sample;

        match value {
            SampleValue::Motion { x, y, z } => {
                let window = self.config.smoothing_window;
                let thresholds = self.thresholds;
                let fields = self
                    .motion
                    .entry(device_id.clone())
                    .or_insert_with(|| MotionConditioner::new(window, thresholds))
                    .condition(x, y, z);
                if fields.fall_detected {
                    tracing::info!(
                        device_id = %device_id,
                        magnitude = fields.magnitude,
                        activity = %fields.activity,
                        "Fall-phase motion conditioned"
                    );
                }
                self.append_motion(NewRecord::new(device_id, fields))
            }
            SampleValue::Pulse { raw } => {
                let config = &self.config;
                let bpm = self
                    .pulse
                    .entry(device_id.clone())
                    .or_insert_with(|| BeatDetector::from_config(config))
                    .process(captured_at, raw);
                match bpm {
                    Some(bpm) => {
                        tracing::debug!(device_id = %device_id, bpm, "BPM window closed");
                        self.append_vitals(NewRecord::new(device_id, VitalsFields::heart_rate(bpm)))
                    }
                    None => Ingested::Buffered,
                }
            }
            SampleValue::Vitals(fields) => self.append_vitals(NewRecord::new(device_id, fields)),
        }
    }

    fn append_motion(&mut self, record: NewRecord<MotionFields>) -> Ingested {
        match self.motion_log.append(record) {
            Ok(_) => {
                self.stats.motion_records += 1;
                Ingested::MotionRecord
            }
            Err(e) => {
                self.stats.append_errors += 1;
                tracing::warn!(store = self.motion_log.name(), error = %e, "Motion append failed");
                Ingested::Dropped
            }
        }
    }

    fn append_vitals(&mut self, record: NewRecord<VitalsFields>) -> Ingested {
        match self.vitals_log.append(record) {
            Ok(_) => {
                self.stats.vitals_records += 1;
                Ingested::VitalsRecord
            }
            Err(e) => {
                self.stats.append_errors += 1;
                tracing::warn!(store = self.vitals_log.name(), error = %e, "Vitals append failed");
                Ingested::Dropped
            }
        }
    }

    /// Forget the filter state of every device (after a reconnect the
    /// device may have rebooted).
    pub fn reset_filters(&mut self) {
        self.motion.clear();
        self.pulse.clear();
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    pub(crate) fn record_reconnect(&mut self) {
        self.stats.reconnects += 1;
    }

    #[must_use]
    pub fn into_shared(self) -> SharedConditioner {
        Arc::new(Mutex::new(self))
    }
}

fn truncate(line: &str, max: usize) -> &str {
    match line.char_indices().nth(max) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carewatch_core::{Activity, Cursor};
    use carewatch_store::MemoryTelemetryStore;

    struct Fixture {
        unit: ConditionerUnit,
        motion: Arc<MemoryTelemetryStore<MotionFields>>,
        vitals: Arc<MemoryTelemetryStore<VitalsFields>>,
    }

    fn fixture() -> Fixture {
        let motion = Arc::new(MemoryTelemetryStore::new("fall_events", 1000));
        let vitals = Arc::new(MemoryTelemetryStore::new("vitals_stream", 1000));
        let unit = ConditionerUnit::new(
            ConditionerConfig::default(),
            &FallDetectorConfig::default(),
            motion.clone(),
            vitals.clone(),
        );
        Fixture {
            unit,
            motion,
            vitals,
        }
    }

    #[test]
    fn motion_lines_become_smoothed_records() {
        let mut f = fixture();
        for _ in 0..5 {
            assert_eq!(f.unit.ingest_line(r#"{"x":0.0,"y":0.0,"z":1.0}"#, 0), 1);
        }
        let batch = f.motion.read_since(Cursor::START).unwrap();
        assert_eq!(batch.len(), 5);
        let last = &batch.records[4];
        assert_eq!(last.device_id, "esp32_fall_sensor_001");
        assert_eq!(last.fields.activity, Activity::Inactive);
    }

    #[test]
    fn pulse_samples_yield_one_heart_rate_per_window() {
        let mut f = fixture();
        for beat in 0..12u64 {
            let t = beat * 800;
            f.unit.ingest_line(&format!(r#"{{"timestamp":{t},"raw":620}}"#), 0);
            f.unit.ingest_line(&format!(r#"{{"timestamp":{},"raw":420}}"#, t + 400), 0);
        }
        assert!(f.vitals.read_since(Cursor::START).unwrap().is_empty());

        assert_eq!(f.unit.ingest_line(r#"{"timestamp":10000,"raw":420}"#, 0), 1);
        let batch = f.vitals.read_since(Cursor::START).unwrap();
        assert_eq!(batch.records[0].fields.heart_rate, Some(72.0));
        assert_eq!(batch.records[0].device_id, "esp32_pulse_001");
    }

    #[test]
    fn devices_keep_separate_filters() {
        let mut f = fixture();
        for _ in 0..5 {
            f.unit.ingest_line(r#"{"device_id":"a","x":0.0,"y":0.0,"z":1.0}"#, 0);
        }
        f.unit.ingest_line(r#"{"device_id":"b","x":0.05,"y":0.05,"z":0.05}"#, 0);

        let batch = f.motion.read_since(Cursor::at(5)).unwrap();
        assert_eq!(batch.records[0].device_id, "b");
        assert_eq!(batch.records[0].fields.activity, Activity::FallDrop);
    }

    #[test]
    fn bad_lines_are_counted_and_skipped() {
        let mut f = fixture();
        assert_eq!(f.unit.ingest_line("rst:0x1 (POWERON_RESET)", 0), 0);
        assert_eq!(f.unit.ingest_line("{\"x\":", 0), 0);
        assert_eq!(f.unit.ingest_line("   ", 0), 0);
        assert_eq!(f.unit.ingest_line(r#"{"heart_rate":72}"#, 0), 1);

        let stats = f.unit.stats();
        assert_eq!(stats.lines_received, 3);
        assert_eq!(stats.lines_discarded, 2);
        assert_eq!(stats.vitals_records, 1);
    }
}
