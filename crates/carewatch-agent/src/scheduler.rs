//! Poll scheduler.
//!
//! Every unit gets its own task and its own fixed-period timer, so a slow
//! unit never delays another. A unit is never run concurrently with itself:
//! a cycle that overruns its period makes the timer skip the missed ticks
//! instead of queueing them.
//!
//! Cycles run on the blocking pool because they do store I/O. Shutdown stops
//! new ticks; a cycle already in flight always completes.

use std::time::Duration;

use carewatch_detect::{CycleReport, DetectError, DetectorAgent, RecordClassifier};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// A unit of work polled on a fixed period.
pub trait PollUnit: Send + 'static {
    fn name(&self) -> &str;

    /// Run one cycle. An error stops this unit only.
    fn poll(&mut self) -> Result<CycleReport, DetectError>;
}

impl<T, C> PollUnit for DetectorAgent<T, C>
where
    T: 'static,
    C: RecordClassifier<T> + 'static,
{
    fn name(&self) -> &str {
        DetectorAgent::name(self)
    }

    fn poll(&mut self) -> Result<CycleReport, DetectError> {
        self.run_cycle()
    }
}

/// How a unit's task ended.
#[derive(Debug)]
pub enum UnitExit {
    /// Stopped by shutdown.
    Stopped,
    /// Gave up on a persistent failure.
    Failed(DetectError),
    /// The cycle panicked.
    Panicked(String),
}

/// Final state of one scheduled unit.
#[derive(Debug)]
pub struct UnitOutcome {
    pub name: String,
    pub cycles: u64,
    pub exit: UnitExit,
}

/// Runs [`PollUnit`]s on independent timers.
#[derive(Debug)]
pub struct Scheduler {
    shutdown: watch::Sender<bool>,
    tasks: Vec<(String, JoinHandle<UnitOutcome>)>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown,
            tasks: Vec::new(),
        }
    }

    /// Receiver that flips to `true` when shutdown starts. Other tasks (the
    /// device source) use it to stop alongside the scheduled units.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Start polling `unit` every `period`. The first cycle runs at once.
    pub fn spawn<U: PollUnit>(&mut self, unit: U, period: Duration) {
        let name = unit.name().to_string();
        tracing::info!(unit = %name, period_ms = period.as_millis() as u64, "Scheduling unit");
        let handle = tokio::spawn(drive(unit, period, self.shutdown.subscribe()));
        self.tasks.push((name, handle));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Stop accepting ticks and wait for every unit to finish its cycle.
    pub async fn shutdown(self) -> Vec<UnitOutcome> {
        let _ = self.shutdown.send(true);
        let mut outcomes = Vec::with_capacity(self.tasks.len());
        for (name, handle) in self.tasks {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => outcomes.push(UnitOutcome {
                    name,
                    cycles: 0,
                    exit: UnitExit::Panicked(e.to_string()),
                }),
            }
        }
        outcomes
    }
}

async fn drive<U: PollUnit>(
    mut unit: U,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> UnitOutcome {
    let name = unit.name().to_string();
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut cycles = 0u64;

    let exit = loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break UnitExit::Stopped,
            _ = ticker.tick() => {}
        }
        if *shutdown.borrow() {
            break UnitExit::Stopped;
        }

        // Not raced against shutdown: the cycle always runs to completion.
        let joined = tokio::task::spawn_blocking(move || {
            let result = unit.poll();
            (unit, result)
        })
        .await;

        match joined {
            Ok((returned, Ok(report))) => {
                unit = returned;
                cycles += 1;
                if report.alerts_raised > 0 || report.alerts_pending > 0 {
                    tracing::debug!(unit = %name, ?report, "Cycle produced alerts");
                }
            }
            Ok((_, Err(e))) => {
                tracing::error!(unit = %name, error = %e, "Unit stopped after persistent failure");
                break UnitExit::Failed(e);
            }
            Err(e) => {
                tracing::error!(unit = %name, error = %e, "Unit cycle panicked");
                break UnitExit::Panicked(e.to_string());
            }
        }
    };

    tracing::info!(unit = %name, cycles, "Unit stopped");
    UnitOutcome { name, cycles, exit }
}
