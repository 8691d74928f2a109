//! Append-only, capacity-bounded telemetry log.
//!
//! One log exists per telemetry kind. The conditioner is the only writer;
//! detector agents read incrementally, each with its own
//! [`Cursor`](carewatch_core::Cursor).
//!
//! Sequence numbers start at 1, increase by one per append and are never
//! reused. When the log outgrows its capacity the oldest records are
//! dropped without renumbering, so a lagging cursor simply resumes at the
//! oldest retained record; [`ReadBatch::truncated`] says how many it missed.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use carewatch_core::{Cursor, NewRecord, Sequence, TelemetryRecord};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{StoreError, StoreResult};
use crate::file;

/// Default number of records retained per log.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Records returned by [`TelemetryLog::read_since`].
#[derive(Debug, Clone, PartialEq)]
pub struct ReadBatch<T> {
    /// New records in ascending sequence order.
    pub records: Vec<TelemetryRecord<T>>,
    /// Records after the cursor that were truncated before being read.
    pub truncated: u64,
}

impl<T> ReadBatch<T> {
    fn empty() -> Self {
        Self {
            records: Vec::new(),
            truncated: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Sequence of the newest record in the batch.
    pub fn last_sequence(&self) -> Option<Sequence> {
        self.records.last().map(|r| r.sequence)
    }
}

/// Occupancy of a telemetry log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogStats {
    pub len: usize,
    pub oldest_sequence: Option<Sequence>,
    pub latest_sequence: Option<Sequence>,
}

/// Append-only record log read through cursors.
pub trait TelemetryLog<T>: Send + Sync {
    /// Assign the next sequence and the current wall-clock time to `record`,
    /// store it, then drop the oldest records beyond capacity.
    fn append(&self, record: NewRecord<T>) -> StoreResult<TelemetryRecord<T>>;

    /// Every retained record with `sequence > cursor`, oldest first.
    ///
    /// Returns an empty batch when nothing is new.
    ///
    /// # Errors
    ///
    /// [`StoreError::Corrupt`] when the backing storage cannot be read.
    fn read_since(&self, cursor: Cursor) -> StoreResult<ReadBatch<T>>;

    fn stats(&self) -> StoreResult<LogStats>;

    /// Short name for log messages.
    fn name(&self) -> &str;
}

/// Collect the records after `cursor` from an ascending record sequence.
fn batch_since<'a, T, I>(records: I, cursor: Cursor) -> ReadBatch<T>
where
    T: Clone + 'a,
    I: IntoIterator<Item = &'a TelemetryRecord<T>>,
{
    let mut batch = ReadBatch::empty();
    for record in records {
        if record.sequence <= cursor.position() {
            continue;
        }
        if batch.records.is_empty() {
            batch.truncated = record.sequence - cursor.position() - 1;
        }
        batch.records.push(record.clone());
    }
    batch
}

fn stats_of<'a, T, I>(mut records: I) -> LogStats
where
    T: 'a,
    I: DoubleEndedIterator<Item = &'a TelemetryRecord<T>> + ExactSizeIterator,
{
    let len = records.len();
    let oldest_sequence = records.next().map(|r| r.sequence);
    let latest_sequence = records.next_back().map(|r| r.sequence).or(oldest_sequence);
    LogStats {
        len,
        oldest_sequence,
        latest_sequence,
    }
}

// ---------------------------------------------------------------------------
// In-memory log
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct MemoryLog<T> {
    records: VecDeque<TelemetryRecord<T>>,
    next_sequence: Sequence,
}

/// Telemetry log held in process memory.
///
/// Readers share a read lock; an append holds the write lock only for the
/// push and the truncation.
#[derive(Debug)]
pub struct MemoryTelemetryStore<T> {
    name: String,
    capacity: usize,
    inner: RwLock<MemoryLog<T>>,
}

impl<T> MemoryTelemetryStore<T> {
    /// Create an empty log retaining at most `capacity` records.
    #[must_use]
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            capacity: capacity.max(1),
            inner: RwLock::new(MemoryLog {
                records: VecDeque::with_capacity(capacity.clamp(1, 4096)),
                next_sequence: 1,
            }),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> TelemetryLog<T> for MemoryTelemetryStore<T>
where
    T: Clone + Send + Sync,
{
    fn append(&self, record: NewRecord<T>) -> StoreResult<TelemetryRecord<T>> {
        let mut log = self.inner.write();
        let stored = TelemetryRecord {
            sequence: log.next_sequence,
            observed_at: Utc::now(),
            device_id: record.device_id,
            fields: record.fields,
        };
        log.next_sequence += 1;
        log.records.push_back(stored.clone());
        while log.records.len() > self.capacity {
            log.records.pop_front();
        }
        Ok(stored)
    }

    fn read_since(&self, cursor: Cursor) -> StoreResult<ReadBatch<T>> {
        let log = self.inner.read();
        let start = log.records.partition_point(|r| r.sequence <= cursor.position());
        Ok(batch_since(log.records.range(start..), cursor))
    }

    fn stats(&self) -> StoreResult<LogStats> {
        Ok(stats_of(self.inner.read().records.iter()))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ---------------------------------------------------------------------------
// JSON file log
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct FileWriter<T> {
    records: VecDeque<TelemetryRecord<T>>,
    next_sequence: Sequence,
}

/// Telemetry log persisted as a JSON array (the `fall_events` /
/// `vitals_stream` file schema).
///
/// The single writer keeps a mirror of the retained records and replaces
/// the file atomically on every append. Readers decode the file directly and
/// never take the writer's lock, so other processes can follow the same file.
#[derive(Debug)]
pub struct JsonFileTelemetryStore<T> {
    name: String,
    path: PathBuf,
    capacity: usize,
    writer: Mutex<FileWriter<T>>,
}

impl<T> JsonFileTelemetryStore<T>
where
    T: Clone + Serialize + DeserializeOwned,
{
    /// Open (or create on first append) the log at `path`.
    ///
    /// Existing records are kept and numbering continues after the highest
    /// stored sequence. A corrupt file is moved aside to
    /// `<file>.corrupt-<timestamp>` and the log starts empty.
    pub fn open(path: impl Into<PathBuf>, capacity: usize) -> StoreResult<Self> {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let records: VecDeque<TelemetryRecord<T>> = match load_records(&path) {
            Ok(records) => records.into(),
            Err(e) if e.is_corrupt() => {
                let moved = file::quarantine(&path)?;
                tracing::warn!(
                    store = %name,
                    moved_to = %moved.display(),
                    error = %e,
                    "Telemetry file was corrupt, starting a fresh log"
                );
                VecDeque::new()
            }
            Err(e) => return Err(e),
        };
        let next_sequence = records.back().map_or(1, |r| r.sequence + 1);

        tracing::debug!(store = %name, retained = records.len(), next_sequence, "Opened telemetry log");

        Ok(Self {
            name,
            path,
            capacity: capacity.max(1),
            writer: Mutex::new(FileWriter {
                records,
                next_sequence,
            }),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Decode the file and check that sequences strictly increase.
fn load_records<T: DeserializeOwned>(path: &Path) -> StoreResult<Vec<TelemetryRecord<T>>> {
    let records: Vec<TelemetryRecord<T>> = file::read_json(path)?.unwrap_or_default();
    if let Some(pair) = records.windows(2).find(|w| w[0].sequence >= w[1].sequence) {
        return Err(StoreError::corrupt(
            path.display().to_string(),
            format!(
                "sequence {} follows {}, expected strictly increasing",
                pair[1].sequence, pair[0].sequence
            ),
        ));
    }
    Ok(records)
}

impl<T> TelemetryLog<T> for JsonFileTelemetryStore<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync,
{
    fn append(&self, record: NewRecord<T>) -> StoreResult<TelemetryRecord<T>> {
        let mut writer = self.writer.lock();
        let stored = TelemetryRecord {
            sequence: writer.next_sequence,
            observed_at: Utc::now(),
            device_id: record.device_id,
            fields: record.fields,
        };

        let dropped = (writer.records.len() + 1).saturating_sub(self.capacity);
        let snapshot: Vec<&TelemetryRecord<T>> = writer
            .records
            .iter()
            .skip(dropped)
            .chain(std::iter::once(&stored))
            .collect();
        // The mirror only changes once the file has been replaced.
        file::write_json_atomic(&self.path, &snapshot)?;

        writer.records.drain(..dropped);
        writer.records.push_back(stored.clone());
        writer.next_sequence += 1;

        if dropped > 0 {
            tracing::debug!(store = %self.name, dropped, "Truncated oldest telemetry records");
        }
        Ok(stored)
    }

    fn read_since(&self, cursor: Cursor) -> StoreResult<ReadBatch<T>> {
        let records = load_records::<T>(&self.path)?;
        Ok(batch_since(records.iter(), cursor))
    }

    fn stats(&self) -> StoreResult<LogStats> {
        let records = load_records::<T>(&self.path)?;
        Ok(stats_of(records.iter()))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
