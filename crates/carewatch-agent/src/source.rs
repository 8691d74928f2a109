//! Device sources feeding the conditioner.
//!
//! A source is read line by line until it ends, fails or shutdown is
//! requested. A dropped link (EOF on a serial device or TCP bridge, or a
//! read error) is followed by a reconnect attempt after an exponential
//! backoff; the process never exits because a device went away. A regular
//! file is a replay: reading it to the end finishes the source.
//!
//! Conditioning runs on the blocking pool: with file-backed stores every
//! append rewrites and syncs a store file.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use carewatch_core::SourceConfig;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

use crate::conditioner::SharedConditioner;
use crate::simulator::Simulator;

/// Where device lines come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSource {
    /// A serial device node, FIFO or replay file.
    Path(PathBuf),
    /// `host:port` of a serial-to-TCP bridge.
    Tcp(String),
    /// The built-in [`Simulator`].
    Simulator,
}

impl std::fmt::Display for DeviceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceSource::Path(path) => write!(f, "{}", path.display()),
            DeviceSource::Tcp(addr) => write!(f, "tcp://{addr}"),
            DeviceSource::Simulator => write!(f, "simulator"),
        }
    }
}

/// How a single connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    Eof,
    Shutdown,
}

/// Exponential reconnect delay.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub(crate) fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait now; doubles the next one up to the maximum.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub(crate) fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl DeviceSource {
    /// Feed `unit` from this source until shutdown (or, for a replay file,
    /// until the file is exhausted).
    pub async fn run(
        &self,
        unit: &SharedConditioner,
        config: &SourceConfig,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tracing::info!(source = %self, "Device source starting");
        if let DeviceSource::Simulator = self {
            run_simulator(unit, config.simulator_tick_ms, &mut shutdown).await;
            tracing::info!(source = %self, "Device source stopped");
            return;
        }

        let mut backoff = Backoff::new(
            Duration::from_millis(config.reconnect_initial_ms),
            Duration::from_millis(config.reconnect_max_ms),
        );
        let started = Instant::now();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let outcome = match self.open().await {
                Ok((reader, is_replay)) => {
                    backoff.reset();
                    tracing::info!(source = %self, "Device connected");
                    match pump_lines(reader, unit, started, &mut shutdown).await {
                        Ok(StreamEnd::Shutdown) => break,
                        Ok(StreamEnd::Eof) if is_replay => {
                            tracing::info!(source = %self, "Replay file exhausted");
                            break;
                        }
                        Ok(StreamEnd::Eof) => "device closed the stream".to_string(),
                        Err(e) => e.to_string(),
                    }
                }
                Err(e) => e.to_string(),
            };

            let delay = backoff.next_delay();
            tracing::warn!(
                source = %self,
                reason = %outcome,
                retry_in_ms = delay.as_millis() as u64,
                "Device disconnected, will reconnect"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
            {
                let mut conditioner = unit.lock();
                conditioner.reset_filters();
                conditioner.record_reconnect();
            }
        }

        tracing::info!(source = %self, stats = ?unit.lock().stats(), "Device source stopped");
    }

    /// Open the underlying stream. The flag is true for a regular file.
    async fn open(&self) -> std::io::Result<(Box<dyn AsyncBufRead + Send + Unpin>, bool)> {
        match self {
            DeviceSource::Path(path) => {
                let file = tokio::fs::File::open(path).await?;
                let is_replay = file.metadata().await?.is_file();
                Ok((Box::new(BufReader::new(file)), is_replay))
            }
            DeviceSource::Tcp(addr) => {
                let stream = tokio::net::TcpStream::connect(addr.as_str()).await?;
                Ok((Box::new(BufReader::new(stream)), false))
            }
            DeviceSource::Simulator => Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "the simulator has no byte stream",
            )),
        }
    }
}

/// Read lines into the conditioner until EOF, error or shutdown.
///
/// A line being conditioned is always finished before shutdown is
/// honoured, so no record is left half-written.
async fn pump_lines<R>(
    mut reader: R,
    unit: &SharedConditioner,
    started: Instant,
    shutdown: &mut watch::Receiver<bool>,
) -> std::io::Result<StreamEnd>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::with_capacity(256);
    loop {
        buf.clear();
        let read = tokio::select! {
            read = reader.read_until(b'\n', &mut buf) => read?,
            _ = shutdown.changed() => return Ok(StreamEnd::Shutdown),
        };
        if read == 0 {
            return Ok(StreamEnd::Eof);
        }
        // Serial links garble bytes; a bad line is dropped by the parser.
        let line = String::from_utf8_lossy(&buf).into_owned();
        ingest_blocking(unit, vec![line], started.elapsed().as_millis() as u64).await;
    }
}

/// Condition `lines` on the blocking pool and wait for the appends.
async fn ingest_blocking(unit: &SharedConditioner, lines: Vec<String>, received_at_ms: u64) {
    let unit = Arc::clone(unit);
    let joined = tokio::task::spawn_blocking(move || {
        let mut unit = unit.lock();
        for line in &lines {
            unit.ingest_line(line, received_at_ms);
        }
    })
    .await;
    if let Err(e) = joined {
        tracing::error!(error = %e, "Conditioning panicked, device lines dropped");
    }
}

async fn run_simulator(unit: &SharedConditioner, tick_ms: u64, shutdown: &mut watch::Receiver<bool>) {
    let mut simulator = Simulator::new(tick_ms);
    let mut ticker = tokio::time::interval(Duration::from_millis(tick_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tracing::info!(tick_ms, "Simulated devices active");

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        ingest_blocking(unit, simulator.next_lines(), 0).await;
    }
    tracing::info!(ticks = simulator.tick(), stats = ?unit.lock().stats(), "Simulator stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use carewatch_core::{ConditionerConfig, Cursor, FallDetectorConfig, MotionFields, VitalsFields};
    use carewatch_store::{MemoryTelemetryStore, TelemetryLog};

    use crate::conditioner::ConditionerUnit;

    fn unit() -> (SharedConditioner, Arc<MemoryTelemetryStore<MotionFields>>) {
        let motion = Arc::new(MemoryTelemetryStore::new("fall_events", 1000));
        let vitals: Arc<MemoryTelemetryStore<VitalsFields>> =
            Arc::new(MemoryTelemetryStore::new("vitals_stream", 1000));
        let unit = ConditionerUnit::new(
            ConditionerConfig::default(),
            &FallDetectorConfig::default(),
            motion.clone(),
            vitals,
        );
        (unit.into_shared(), motion)
    }

    #[test]
    fn backoff_doubles_up_to_max() {
        let mut b = Backoff::new(Duration::from_millis(500), Duration::from_millis(1500));
        let delays: Vec<_> = (0..4).map(|_| b.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![500, 1000, 1500, 1500]);
        b.reset();
        assert_eq!(b.next_delay(), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn pump_skips_garbage_and_stops_at_eof() {
        let (unit, motion) = unit();
        let (_tx, mut rx) = watch::channel(false);
        let input: &[u8] = b"boot banner\n{\"x\":0,\"y\":0,\"z\":1}\n\xff\xfe{bad\n{\"x\":0,\"y\":0,\"z\":1}";

        let end = pump_lines(input, &unit, Instant::now(), &mut rx).await.unwrap();
        assert_eq!(end, StreamEnd::Eof);
        assert_eq!(motion.read_since(Cursor::START).unwrap().len(), 2);
        assert_eq!(unit.lock().stats().lines_discarded, 2);
    }

    /// Motion log whose appends take as long as a slow disk sync.
    struct SlowLog(MemoryTelemetryStore<MotionFields>);

    impl TelemetryLog<MotionFields> for SlowLog {
        fn append(
            &self,
            record: carewatch_core::NewRecord<MotionFields>,
        ) -> carewatch_store::StoreResult<carewatch_core::TelemetryRecord<MotionFields>> {
            std::thread::sleep(Duration::from_millis(100));
            self.0.append(record)
        }

        fn read_since(
            &self,
            cursor: Cursor,
        ) -> carewatch_store::StoreResult<carewatch_store::ReadBatch<MotionFields>> {
            self.0.read_since(cursor)
        }

        fn stats(&self) -> carewatch_store::StoreResult<carewatch_store::LogStats> {
            self.0.stats()
        }

        fn name(&self) -> &str {
            "fall_events"
        }
    }

    #[tokio::test]
    async fn slow_store_does_not_stall_the_runtime() {
        let motion = Arc::new(SlowLog(MemoryTelemetryStore::new("fall_events", 100)));
        let unit = ConditionerUnit::new(
            ConditionerConfig::default(),
            &FallDetectorConfig::default(),
            motion.clone(),
            Arc::new(MemoryTelemetryStore::<VitalsFields>::new("vitals_stream", 100)),
        )
        .into_shared();

        let ticks = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter = Arc::clone(&ticks);
        let heartbeat = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        });

        let (_tx, mut rx) = watch::channel(false);
        let input: &[u8] = b"{\"x\":0,\"y\":0,\"z\":1}\n{\"x\":0,\"y\":0,\"z\":1}\n{\"x\":0,\"y\":0,\"z\":1}\n";
        pump_lines(input, &unit, Instant::now(), &mut rx).await.unwrap();
        heartbeat.abort();

        assert_eq!(motion.read_since(Cursor::START).unwrap().len(), 3);
        // About 300 ms of appends; the single runtime thread kept ticking.
        let ticks = ticks.load(std::sync::atomic::Ordering::SeqCst);
        assert!(ticks >= 10, "runtime stalled: {ticks} ticks");
    }

    #[tokio::test]
    async fn replay_file_runs_to_completion() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("capture.jsonl");
        std::fs::write(&path, "{\"x\":0,\"y\":0,\"z\":1}\n{\"x\":0,\"y\":0,\"z\":1}\n").unwrap();

        let (unit, motion) = unit();
        let (_tx, rx) = watch::channel(false);
        DeviceSource::Path(path)
            .run(&unit, &SourceConfig::default(), rx)
            .await;

        assert_eq!(motion.read_since(Cursor::START).unwrap().len(), 2);
        assert_eq!(unit.lock().stats().reconnects, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_device_retries_until_shutdown() {
        let (unit, _) = unit();
        let (tx, rx) = watch::channel(false);
        let source = DeviceSource::Path(PathBuf::from("/nonexistent/ttyUSB9"));
        let config = SourceConfig::default();

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(4)).await;
            let _ = tx.send(true);
        });
        source.run(&unit, &config, rx).await;
        stopper.await.unwrap();

        // Delays of 0.5 s, 1 s and 2 s fit before shutdown at 4 s.
        assert_eq!(unit.lock().stats().reconnects, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn simulator_feeds_motion_records() {
        let (unit, motion) = unit();
        let (tx, rx) = watch::channel(false);
        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1_000)).await;
            let _ = tx.send(true);
        });
        DeviceSource::Simulator
            .run(&unit, &SourceConfig::default(), rx)
            .await;
        stopper.await.unwrap();

        let len = motion.read_since(Cursor::START).unwrap().len();
        assert!((19..=21).contains(&len), "got {len} records");
    }
}
