//! Detector agents: a classifier bound to a telemetry log, a cursor and the
//! escalation sink.
//!
//! One cycle:
//!
//! 1. Read every record after the cursor.
//! 2. Classify each record in sequence order; queue its alerts in the
//!    outbox and advance the cursor past it.
//! 3. Deliver the outbox to the escalation sink, oldest first.
//!
//! Alerts that cannot be delivered stay queued and are retried on the next
//! cycle, so a record's alerts are never lost once its sequence has been
//! passed. A contended or briefly failing sink is retried indefinitely; only
//! a corrupt store counts toward the failure limit. A corrupt log is treated
//! as "nothing new" for that cycle.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use carewatch_core::{Alert, Cursor, StoreConfig, TelemetryRecord};
use carewatch_store::{append_with_retry, EscalationSink, StoreError, TelemetryLog};

use crate::error::DetectError;

/// Decides which alerts a single record raises.
///
/// Implementations keep whatever per-stream state they need; the agent
/// feeds records strictly in sequence order and never concurrently.
pub trait RecordClassifier<T>: Send {
    fn classify(&mut self, record: &TelemetryRecord<T>) -> Vec<Alert>;
}

/// Outcome of one detector cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Records read and classified.
    pub records: usize,
    /// Alerts produced by this cycle's records.
    pub alerts_raised: usize,
    /// Alerts written to the escalation sink (including earlier leftovers).
    pub alerts_delivered: usize,
    /// Alerts still waiting for delivery.
    pub alerts_pending: usize,
    /// Records the cursor missed because the log truncated them.
    pub truncated: u64,
    /// The telemetry log could not be read this cycle.
    pub read_failed: bool,
}

/// Failure thresholds and retry policy of an agent.
#[derive(Debug, Clone, Copy)]
pub struct AgentPolicy {
    /// Consecutive cycles a store may stay corrupt before the agent gives up.
    pub max_consecutive_failures: u32,
    pub append_retries: u32,
    pub append_retry_backoff: Duration,
}

impl Default for AgentPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 5,
            append_retries: 3,
            append_retry_backoff: Duration::from_millis(50),
        }
    }
}

impl AgentPolicy {
    pub fn from_config(store: &StoreConfig, max_consecutive_failures: u32) -> Self {
        Self {
            max_consecutive_failures,
            append_retries: store.append_retries,
            append_retry_backoff: store.append_retry_backoff(),
        }
    }
}

/// A classifier polled over one telemetry log.
pub struct DetectorAgent<T, C> {
    name: String,
    log: Arc<dyn TelemetryLog<T>>,
    sink: Arc<dyn EscalationSink>,
    classifier: C,
    policy: AgentPolicy,
    cursor: Cursor,
    outbox: VecDeque<Alert>,
    read_failures: u32,
    delivery_failures: u32,
}

impl<T, C> DetectorAgent<T, C>
where
    C: RecordClassifier<T>,
{
    pub fn new(
        name: impl Into<String>,
        log: Arc<dyn TelemetryLog<T>>,
        sink: Arc<dyn EscalationSink>,
        classifier: C,
        policy: AgentPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            log,
            sink,
            classifier,
            policy,
            cursor: Cursor::START,
            outbox: VecDeque::new(),
            read_failures: 0,
            delivery_failures: 0,
        }
    }

    /// Start from `cursor` instead of the beginning of the log.
    #[must_use]
    pub fn with_cursor(mut self, cursor: Cursor) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn pending_alerts(&self) -> usize {
        self.outbox.len()
    }

    pub fn classifier(&self) -> &C {
        &self.classifier
    }

    /// Run one poll cycle.
    ///
    /// # Errors
    ///
    /// [`DetectError::StoreUnavailable`] once the telemetry log has failed,
    /// or the escalation sink has been corrupt, for more consecutive cycles
    /// than the policy allows.
    pub fn run_cycle(&mut self) -> Result<CycleReport, DetectError> {
        let mut report = CycleReport::default();
        let mut read_error = None;

        match self.log.read_since(self.cursor) {
            Ok(batch) => {
                self.read_failures = 0;
                if batch.truncated > 0 {
                    tracing::warn!(
                        agent = %self.name,
                        cursor = %self.cursor,
                        missed = batch.truncated,
                        "Records truncated before they were read"
                    );
                }
                report.truncated = batch.truncated;
                report.records = batch.records.len();

                for record in &batch.records {
                    let alerts = self.classifier.classify(record);
                    report.alerts_raised += alerts.len();
                    self.outbox.extend(alerts);
                    self.cursor.advance_to(record.sequence);
                }
            }
            Err(e) => {
                report.read_failed = true;
                self.read_failures += 1;
                tracing::warn!(
                    agent = %self.name,
                    store = self.log.name(),
                    failures = self.read_failures,
                    error = %e,
                    "Telemetry read failed, skipping this cycle"
                );
                if self.read_failures > self.policy.max_consecutive_failures {
                    read_error = Some(e);
                }
            }
        }

        // Earlier alerts still get their chance before a read failure ends the unit.
        let (delivered, failure) = self.flush();
        report.alerts_delivered = delivered;
        report.alerts_pending = self.outbox.len();

        match failure {
            None => self.delivery_failures = 0,
            Some(e) if e.is_corrupt() => {
                self.delivery_failures += 1;
                tracing::warn!(
                    agent = %self.name,
                    pending = self.outbox.len(),
                    failures = self.delivery_failures,
                    error = %e,
                    "Escalation store corrupt, alerts kept for the next cycle"
                );
                if self.delivery_failures > self.policy.max_consecutive_failures {
                    return Err(DetectError::StoreUnavailable {
                        store: "escalation".to_string(),
                        failures: self.delivery_failures,
                        source: e,
                    });
                }
            }
            Some(e) => {
                self.delivery_failures = 0;
                tracing::warn!(
                    agent = %self.name,
                    pending = self.outbox.len(),
                    error = %e,
                    "Escalation append failed, alerts kept for the next cycle"
                );
            }
        }

        if let Some(e) = read_error {
            tracing::error!(
                agent = %self.name,
                store = self.log.name(),
                undelivered = self.outbox.len(),
                "Telemetry log stayed unreadable, stopping agent"
            );
            return Err(DetectError::StoreUnavailable {
                store: self.log.name().to_string(),
                failures: self.read_failures,
                source: e,
            });
        }

        tracing::debug!(
            agent = %self.name,
            cursor = %self.cursor,
            records = report.records,
            raised = report.alerts_raised,
            delivered = report.alerts_delivered,
            pending = report.alerts_pending,
            "Detector cycle complete"
        );
        Ok(report)
    }

    /// Deliver queued alerts in order until one fails.
    fn flush(&mut self) -> (usize, Option<StoreError>) {
        let mut delivered = 0;
        while let Some(alert) = self.outbox.front() {
            if let Err(e) = append_with_retry(
                self.sink.as_ref(),
                alert,
                self.policy.append_retries,
                self.policy.append_retry_backoff,
            ) {
                return (delivered, Some(e));
            }
            tracing::info!(
                agent = %self.name,
                kind = %alert.kind,
                parameter = %alert.parameter,
                severity = %alert.severity,
                "Alert escalated"
            );
            self.outbox.pop_front();
            delivered += 1;
        }
        (delivered, None)
    }
}

impl<T, C> std::fmt::Debug for DetectorAgent<T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectorAgent")
            .field("name", &self.name)
            .field("cursor", &self.cursor)
            .field("pending", &self.outbox.len())
            .field("read_failures", &self.read_failures)
            .field("delivery_failures", &self.delivery_failures)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VitalsDetector;
    use carewatch_core::{NewRecord, VitalsDetectorConfig, VitalsFields};
    use carewatch_store::{
        LogStats, MemoryEscalationStore, MemoryTelemetryStore, ReadBatch, StoreResult,
    };
    use parking_lot::Mutex;

    fn policy() -> AgentPolicy {
        AgentPolicy {
            max_consecutive_failures: 2,
            append_retries: 1,
            append_retry_backoff: Duration::ZERO,
        }
    }

    fn vitals_agent(
        log: Arc<MemoryTelemetryStore<VitalsFields>>,
        sink: Arc<dyn EscalationSink>,
    ) -> DetectorAgent<VitalsFields, VitalsDetector> {
        DetectorAgent::new(
            "vitals",
            log,
            sink,
            VitalsDetector::new(VitalsDetectorConfig::default()),
            policy(),
        )
    }

    #[test]
    fn cycle_classifies_new_records_once() {
        let log = Arc::new(MemoryTelemetryStore::new("vitals", 100));
        let sink = Arc::new(MemoryEscalationStore::new());
        let mut agent = vitals_agent(Arc::clone(&log), sink.clone());

        for bpm in [72.0, 130.0] {
            log.append(NewRecord::new("d", VitalsFields::heart_rate(bpm))).unwrap();
        }
        let report = agent.run_cycle().unwrap();
        assert_eq!(report.records, 2);
        assert_eq!(report.alerts_delivered, 1);
        assert_eq!(agent.cursor(), Cursor::at(2));

        let report = agent.run_cycle().unwrap();
        assert_eq!(report.records, 0);
        assert_eq!(sink.len().unwrap(), 1);
    }

    /// Sink that fails until switched on.
    #[derive(Default)]
    struct FlakySink {
        inner: MemoryEscalationStore,
        up: Mutex<bool>,
    }

    impl EscalationSink for FlakySink {
        fn append(&self, alert: Alert) -> StoreResult<()> {
            if *self.up.lock() {
                self.inner.append(alert)
            } else {
                Err(StoreError::Contended {
                    path: "escalation.json.lock".into(),
                })
            }
        }

        fn read_all(&self) -> StoreResult<Vec<Alert>> {
            self.inner.read_all()
        }
    }

    #[test]
    fn undelivered_alerts_survive_until_sink_recovers() {
        let log = Arc::new(MemoryTelemetryStore::new("vitals", 100));
        let sink = Arc::new(FlakySink::default());
        let mut agent = vitals_agent(Arc::clone(&log), sink.clone());

        log.append(NewRecord::new("d", VitalsFields::heart_rate(130.0))).unwrap();
        let report = agent.run_cycle().unwrap();
        assert_eq!(report.alerts_raised, 1);
        assert_eq!(report.alerts_pending, 1);
        assert_eq!(agent.cursor(), Cursor::at(1));

        *sink.up.lock() = true;
        let report = agent.run_cycle().unwrap();
        assert_eq!(report.alerts_delivered, 1);
        assert_eq!(report.alerts_pending, 0);
        assert_eq!(sink.len().unwrap(), 1);
    }

    #[test]
    fn contended_sink_never_stops_agent() {
        let log = Arc::new(MemoryTelemetryStore::new("vitals", 100));
        let sink = Arc::new(FlakySink::default());
        let mut agent = vitals_agent(Arc::clone(&log), sink.clone());
        log.append(NewRecord::new("d", VitalsFields::heart_rate(130.0))).unwrap();

        // Far past the failure limit of 2.
        for _ in 0..10 {
            let report = agent.run_cycle().unwrap();
            assert_eq!(report.alerts_pending, 1);
        }

        *sink.up.lock() = true;
        let report = agent.run_cycle().unwrap();
        assert_eq!(report.alerts_delivered, 1);
        assert_eq!(sink.len().unwrap(), 1);
    }

    /// Sink whose backing file cannot be decoded.
    struct CorruptSink;

    impl EscalationSink for CorruptSink {
        fn append(&self, _: Alert) -> StoreResult<()> {
            Err(StoreError::Corrupt {
                store: "escalation.json".into(),
                reason: "EOF while parsing a list".into(),
            })
        }

        fn read_all(&self) -> StoreResult<Vec<Alert>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn corrupt_sink_stops_agent_after_limit() {
        let log = Arc::new(MemoryTelemetryStore::new("vitals", 100));
        let mut agent = vitals_agent(Arc::clone(&log), Arc::new(CorruptSink));
        log.append(NewRecord::new("d", VitalsFields::heart_rate(130.0))).unwrap();

        assert!(agent.run_cycle().is_ok());
        assert!(agent.run_cycle().is_ok());
        let err = agent.run_cycle().unwrap_err();
        assert!(matches!(err, DetectError::StoreUnavailable { ref store, .. } if store == "escalation"));
    }

    /// Memory log that can be switched to failing reads.
    struct BreakableLog {
        inner: MemoryTelemetryStore<VitalsFields>,
        broken: Mutex<bool>,
    }

    impl TelemetryLog<VitalsFields> for BreakableLog {
        fn append(&self, record: NewRecord<VitalsFields>) -> StoreResult<TelemetryRecord<VitalsFields>> {
            self.inner.append(record)
        }

        fn read_since(&self, cursor: Cursor) -> StoreResult<ReadBatch<VitalsFields>> {
            if *self.broken.lock() {
                return Err(StoreError::Corrupt {
                    store: "vitals_stream.json".into(),
                    reason: "trailing characters".into(),
                });
            }
            self.inner.read_since(cursor)
        }

        fn stats(&self) -> StoreResult<LogStats> {
            self.inner.stats()
        }

        fn name(&self) -> &str {
            "vitals_stream.json"
        }
    }

    #[test]
    fn pending_alerts_are_flushed_before_read_failure_stops_agent() {
        let log = Arc::new(BreakableLog {
            inner: MemoryTelemetryStore::new("vitals", 100),
            broken: Mutex::new(false),
        });
        let sink = Arc::new(FlakySink::default());
        let mut agent = DetectorAgent::new(
            "vitals",
            log.clone(),
            sink.clone(),
            VitalsDetector::new(VitalsDetectorConfig::default()),
            policy(),
        );

        log.append(NewRecord::new("d", VitalsFields::heart_rate(130.0))).unwrap();
        assert_eq!(agent.run_cycle().unwrap().alerts_pending, 1);

        *log.broken.lock() = true;
        assert!(agent.run_cycle().unwrap().read_failed);
        assert!(agent.run_cycle().unwrap().read_failed);

        *sink.up.lock() = true;
        assert!(agent.run_cycle().is_err());
        assert_eq!(sink.len().unwrap(), 1);
        assert_eq!(agent.pending_alerts(), 0);
    }

    /// Log whose reads always fail.
    struct CorruptLog;

    impl TelemetryLog<VitalsFields> for CorruptLog {
        fn append(&self, _: NewRecord<VitalsFields>) -> StoreResult<TelemetryRecord<VitalsFields>> {
            unreachable!("not written in this test")
        }

        fn read_since(&self, _: Cursor) -> StoreResult<ReadBatch<VitalsFields>> {
            Err(StoreError::Corrupt {
                store: "vitals_stream.json".into(),
                reason: "expected value at line 1 column 1".into(),
            })
        }

        fn stats(&self) -> StoreResult<LogStats> {
            Ok(LogStats::default())
        }

        fn name(&self) -> &str {
            "vitals_stream.json"
        }
    }

    #[test]
    fn corrupt_log_is_skipped_until_limit() {
        let mut agent = DetectorAgent::new(
            "vitals",
            Arc::new(CorruptLog),
            Arc::new(MemoryEscalationStore::new()),
            VitalsDetector::new(VitalsDetectorConfig::default()),
            policy(),
        );

        for _ in 0..2 {
            let report = agent.run_cycle().unwrap();
            assert!(report.read_failed);
            assert_eq!(report.records, 0);
        }
        assert!(agent.run_cycle().is_err());
        assert_eq!(agent.cursor(), Cursor::START);
    }
}
