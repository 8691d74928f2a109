//! Shared, append-only alert log.
//!
//! Every detector agent appends here; an external consumer reads. Appends
//! from concurrent writers are serialized so none is lost, and an append
//! never rewrites or drops alerts that are already stored.

use std::path::{Path, PathBuf};
use std::time::Duration;

use carewatch_core::Alert;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::file::{self, WriteLock};

/// Number of alerts a reader has already consumed.
///
/// Alerts are never removed by this crate, so the count doubles as a
/// position. If the store shrinks below the marker (the file was rotated
/// externally) reading restarts from the beginning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct EscalationMarker(usize);

impl EscalationMarker {
    pub const START: EscalationMarker = EscalationMarker(0);

    pub fn consumed(&self) -> usize {
        self.0
    }
}

/// Alerts read after a marker, plus the marker to pass next time.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertBatch {
    pub alerts: Vec<Alert>,
    pub next: EscalationMarker,
}

fn batch_after(mut all: Vec<Alert>, marker: EscalationMarker) -> AlertBatch {
    let total = all.len();
    let start = if marker.0 > total { 0 } else { marker.0 };
    AlertBatch {
        alerts: all.split_off(start),
        next: EscalationMarker(total),
    }
}

/// Destination for alerts.
pub trait EscalationSink: Send + Sync {
    /// Durably add `alert` after every alert already stored.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Corrupt`] if the existing log cannot be decoded; the
    ///   log is left untouched.
    /// - [`StoreError::Contended`] / [`StoreError::Io`] on transient failures;
    ///   the caller may retry.
    fn append(&self, alert: Alert) -> StoreResult<()>;

    /// Every stored alert, oldest first.
    fn read_all(&self) -> StoreResult<Vec<Alert>>;

    /// Alerts appended after `marker`.
    fn read_since(&self, marker: EscalationMarker) -> StoreResult<AlertBatch> {
        Ok(batch_after(self.read_all()?, marker))
    }

    fn len(&self) -> StoreResult<usize> {
        Ok(self.read_all()?.len())
    }

    fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }
}

/// Escalation store held in process memory.
#[derive(Debug, Default)]
pub struct MemoryEscalationStore {
    alerts: RwLock<Vec<Alert>>,
}

impl MemoryEscalationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl EscalationSink for MemoryEscalationStore {
    fn append(&self, alert: Alert) -> StoreResult<()> {
        self.alerts.write().push(alert);
        Ok(())
    }

    fn read_all(&self) -> StoreResult<Vec<Alert>> {
        Ok(self.alerts.read().clone())
    }

    fn read_since(&self, marker: EscalationMarker) -> StoreResult<AlertBatch> {
        let alerts = self.alerts.read();
        let total = alerts.len();
        let start = if marker.0 > total { 0 } else { marker.0 };
        Ok(AlertBatch {
            alerts: alerts[start..].to_vec(),
            next: EscalationMarker(total),
        })
    }

    fn len(&self) -> StoreResult<usize> {
        Ok(self.alerts.read().len())
    }
}

/// On-disk document: `{"alerts": [...]}`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct AlertDocument {
    #[serde(default)]
    alerts: Vec<Alert>,
}

#[derive(Debug, Serialize)]
struct AlertDocumentRef<'a> {
    alerts: &'a [Alert],
}

/// Escalation store persisted as `{"alerts": [...]}`.
///
/// An append is a read-modify-write of the whole document. Appends within
/// this process are serialized by a mutex; appends from other processes by
/// a `<file>.lock` file. The document is replaced by an atomic rename, so
/// readers never need the lock.
#[derive(Debug)]
pub struct JsonFileEscalationStore {
    path: PathBuf,
    lock_attempts: u32,
    lock_backoff: Duration,
    append_guard: Mutex<()>,
}

impl JsonFileEscalationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_attempts: 20,
            lock_backoff: Duration::from_millis(10),
            append_guard: Mutex::new(()),
        }
    }

    /// Tune how long an append waits for another process's lock.
    #[must_use]
    pub fn with_lock_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.lock_attempts = attempts.max(1);
        self.lock_backoff = backoff;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> StoreResult<Vec<Alert>> {
        Ok(file::read_json::<AlertDocument>(&self.path)?
            .unwrap_or_default()
            .alerts)
    }
}

impl EscalationSink for JsonFileEscalationStore {
    fn append(&self, alert: Alert) -> StoreResult<()> {
        let _local = self.append_guard.lock();
        let _lock = WriteLock::acquire(&self.path, self.lock_attempts, self.lock_backoff)?;

        let mut alerts = self.load().map_err(|e| {
            if e.is_corrupt() {
                tracing::error!(
                    path = %self.path.display(),
                    error = %e,
                    "Escalation log is corrupt, refusing to overwrite it"
                );
            }
            e
        })?;
        alerts.push(alert);
        file::write_json_atomic(&self.path, &AlertDocumentRef { alerts: &alerts })
    }

    fn read_all(&self) -> StoreResult<Vec<Alert>> {
        self.load()
    }
}

/// Append with a bounded number of retries on transient failures.
///
/// Returns the last error if every attempt failed. Corrupt stores are not
/// retried.
pub fn append_with_retry(
    sink: &dyn EscalationSink,
    alert: &Alert,
    attempts: u32,
    backoff: Duration,
) -> StoreResult<()> {
    let attempts = attempts.max(1);
    let mut last_err = None;
    for attempt in 1..=attempts {
        match sink.append(alert.clone()) {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() && attempt < attempts => {
                tracing::debug!(attempt, error = %e, "Escalation append failed, retrying");
                last_err = Some(e);
                std::thread::sleep(backoff);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| StoreError::corrupt("escalation", "no append attempt was made")))
}
