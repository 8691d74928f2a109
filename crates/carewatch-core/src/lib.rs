//! Core types for the CareWatch telemetry pipeline.
//!
//! The pipeline conditions raw wearable telemetry, classifies it against
//! fall and vital-sign anomaly patterns and escalates confirmed anomalies:
//!
//! ```text
//! device ─▶ conditioner ─▶ telemetry store (motion | vitals)
//!                                 │
//!                ┌────────────────┴────────────────┐
//!                ▼                                 ▼
//!          fall detector                    vitals detector
//!                └────────────────┬────────────────┘
//!                                 ▼
//!                         escalation store ─▶ notifiers
//! ```
//!
//! This crate holds what every stage shares: the sample, record, cursor and
//! alert types, plus the [`PipelineConfig`] that tunes all of them.

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    ConditionerConfig, FallDetectorConfig, PipelineConfig, SafeRange, SchedulerConfig,
    SourceConfig, StoreConfig, VitalsDetectorConfig,
};
pub use error::ConfigError;
pub use types::{
    Activity, Alert, AlertKind, Cursor, MotionFields, NewRecord, SampleValue, SensorKind,
    SensorSample, Sequence, Severity, TelemetryRecord, VitalParameter, VitalsFields,
};
