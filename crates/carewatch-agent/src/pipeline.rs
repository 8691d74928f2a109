//! Wiring of stores, conditioner and detector agents from a
//! [`PipelineConfig`].

use std::path::Path;
use std::sync::Arc;

use carewatch_core::{MotionFields, PipelineConfig, VitalsFields};
use carewatch_detect::{AgentPolicy, DetectorAgent, FallDetector, VitalsDetector};
use carewatch_store::{
    EscalationSink, JsonFileEscalationStore, JsonFileTelemetryStore, MemoryEscalationStore,
    MemoryTelemetryStore, TelemetryLog,
};

use crate::conditioner::ConditionerUnit;
use crate::error::{AgentError, Result};
use crate::scheduler::Scheduler;

/// Stores shared by every unit of one pipeline.
#[derive(Clone)]
pub struct Stores {
    pub motion: Arc<dyn TelemetryLog<MotionFields>>,
    pub vitals: Arc<dyn TelemetryLog<VitalsFields>>,
    pub escalation: Arc<dyn EscalationSink>,
}

impl Stores {
    /// In-memory stores.
    pub fn in_memory(capacity: usize) -> Self {
        Self {
            motion: Arc::new(MemoryTelemetryStore::new("fall_events", capacity)),
            vitals: Arc::new(MemoryTelemetryStore::new("vitals_stream", capacity)),
            escalation: Arc::new(MemoryEscalationStore::new()),
        }
    }

    /// JSON file stores under `dir`, named by the store config.
    pub fn in_dir(dir: &Path, config: &PipelineConfig) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|error| AgentError::DataDir {
            path: dir.to_path_buf(),
            error,
        })?;
        let store = &config.store;
        let motion = JsonFileTelemetryStore::<MotionFields>::open(
            dir.join(&store.fall_events_file),
            store.telemetry_capacity,
        )?;
        let vitals = JsonFileTelemetryStore::<VitalsFields>::open(
            dir.join(&store.vitals_stream_file),
            store.telemetry_capacity,
        )?;
        let escalation = JsonFileEscalationStore::new(dir.join(&store.escalation_file))
            .with_lock_retry(store.append_retries.max(1) * 10, store.append_retry_backoff());

        Ok(Self {
            motion: Arc::new(motion),
            vitals: Arc::new(vitals),
            escalation: Arc::new(escalation),
        })
    }

    /// File stores when the config names a data directory, memory otherwise.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        match &config.store.data_dir {
            Some(dir) => Self::in_dir(dir, config),
            None => Ok(Self::in_memory(config.store.telemetry_capacity)),
        }
    }
}

/// A configured pipeline, ready to be started.
pub struct Pipeline {
    pub config: PipelineConfig,
    pub stores: Stores,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, stores: Stores) -> Self {
        Self { config, stores }
    }

    /// Validate `config` and open its stores.
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let stores = Stores::from_config(&config)?;
        Ok(Self::new(config, stores))
    }

    /// Conditioner writing into this pipeline's telemetry logs.
    pub fn conditioner(&self) -> ConditionerUnit {
        ConditionerUnit::new(
            self.config.conditioner.clone(),
            &self.config.fall,
            Arc::clone(&self.stores.motion),
            Arc::clone(&self.stores.vitals),
        )
    }

    fn policy(&self) -> AgentPolicy {
        AgentPolicy::from_config(
            &self.config.store,
            self.config.scheduler.max_consecutive_store_failures,
        )
    }

    pub fn fall_agent(&self) -> DetectorAgent<MotionFields, FallDetector> {
        DetectorAgent::new(
            "fall-detector",
            Arc::clone(&self.stores.motion),
            Arc::clone(&self.stores.escalation),
            FallDetector::new(self.config.fall.clone()),
            self.policy(),
        )
    }

    pub fn vitals_agent(&self) -> DetectorAgent<VitalsFields, VitalsDetector> {
        DetectorAgent::new(
            "vitals-detector",
            Arc::clone(&self.stores.vitals),
            Arc::clone(&self.stores.escalation),
            VitalsDetector::new(self.config.vitals.clone()),
            self.policy(),
        )
    }

    /// Schedule both detector agents on their configured periods.
    pub fn schedule_detectors(&self, scheduler: &mut Scheduler) {
        scheduler.spawn(self.fall_agent(), self.config.scheduler.fall_interval());
        scheduler.spawn(self.vitals_agent(), self.config.scheduler.vitals_interval());
    }
}
