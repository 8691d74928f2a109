//! End-to-end pipeline behaviour: device lines in, alerts out.

use std::time::Duration;

use carewatch_agent::{Pipeline, Scheduler, Simulator, Stores, UnitExit};
use carewatch_agent::simulator::CYCLE_TICKS;
use carewatch_core::{
    Activity, AlertKind, MotionFields, NewRecord, PipelineConfig, Severity, VitalsFields,
};
use tempfile::tempdir;

fn memory_pipeline() -> Pipeline {
    let config = PipelineConfig::default();
    let stores = Stores::in_memory(config.store.telemetry_capacity);
    Pipeline::new(config, stores)
}

#[test]
fn simulated_day_raises_one_alert_per_fall() {
    let pipeline = memory_pipeline();
    let mut conditioner = pipeline.conditioner();
    let mut fall = pipeline.fall_agent();
    let mut vitals = pipeline.vitals_agent();
    let mut simulator = Simulator::new(50);

    for _ in 0..CYCLE_TICKS {
        for line in simulator.next_lines() {
            conditioner.ingest_line(&line, 0);
        }
    }
    let report = fall.run_cycle().unwrap();
    assert_eq!(report.records, CYCLE_TICKS as usize);
    // The free-fall phase is seen first; the impact lands inside the cooldown.
    assert_eq!(report.alerts_raised, 1);
    vitals.run_cycle().unwrap();

    let alerts = pipeline.stores.escalation.read_all().unwrap();
    let falls: Vec<_> = alerts.iter().filter(|a| a.kind == AlertKind::Fall).collect();
    assert_eq!(falls.len(), 1);
    assert!(falls[0].message.ends_with("Activity: Free-fall"));
    assert_eq!(falls[0].severity, Severity::Medium);

    // The second scenario cycle is stored within the same few wall-clock
    // milliseconds, so its fall is still inside the first one's cooldown.
    for _ in 0..CYCLE_TICKS {
        for line in simulator.next_lines() {
            conditioner.ingest_line(&line, 0);
        }
    }
    let report = fall.run_cycle().unwrap();
    assert_eq!(report.records, CYCLE_TICKS as usize);
    assert_eq!(report.alerts_raised, 0);
    vitals.run_cycle().unwrap();

    let alerts = pipeline.stores.escalation.read_all().unwrap();
    assert_eq!(alerts.iter().filter(|a| a.kind == AlertKind::Fall).count(), 1);
    // Bedside heart rate climbs during the second half of the second cycle.
    assert!(alerts
        .iter()
        .any(|a| a.kind == AlertKind::Vitals && a.parameter == "heart_rate"));

    let stats = conditioner.stats();
    assert_eq!(stats.lines_discarded, 0);
    assert_eq!(stats.motion_records, 2 * CYCLE_TICKS);
}

#[test]
fn falls_stored_far_apart_alert_separately_in_one_cycle() {
    let pipeline = memory_pipeline();
    let mut fall = pipeline.fall_agent();

    pipeline.stores.motion.append(impact_record()).unwrap();
    std::thread::sleep(Duration::from_millis(5_300));
    pipeline.stores.motion.append(still_record()).unwrap();
    pipeline.stores.motion.append(impact_record()).unwrap();

    let report = fall.run_cycle().unwrap();
    assert_eq!(report.records, 3);
    assert_eq!(report.alerts_raised, 2);
    assert_eq!(pipeline.stores.escalation.len().unwrap(), 2);
}

#[test]
fn fall_records_keep_activity_tags() {
    let pipeline = memory_pipeline();
    let mut conditioner = pipeline.conditioner();
    for _ in 0..5 {
        conditioner.ingest_line(r#"{"x":0.02,"y":0.01,"z":0.03}"#, 0);
    }
    let batch = pipeline
        .stores
        .motion
        .read_since(carewatch_core::Cursor::START)
        .unwrap();
    assert!(batch.records.iter().all(|r| r.fields.activity == Activity::FallDrop));
    assert!(batch.records.iter().all(|r| r.fields.fall_detected));
}

fn still_record() -> NewRecord<MotionFields> {
    NewRecord::new(
        "esp32_fall_sensor_001",
        MotionFields {
            x: 0.0,
            y: 0.0,
            z: 1.0,
            magnitude: 1.0,
            activity: Activity::Inactive,
            fall_detected: false,
            alert_level: None,
        },
    )
}

fn impact_record() -> NewRecord<MotionFields> {
    NewRecord::new(
        "esp32_fall_sensor_001",
        MotionFields {
            x: 2.6,
            y: 2.1,
            z: 1.4,
            magnitude: 3.62,
            activity: Activity::FallImpact,
            fall_detected: true,
            alert_level: Some(Severity::High),
        },
    )
}

fn fast_config(dir: &std::path::Path) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.store.data_dir = Some(dir.to_path_buf());
    config.scheduler.fall_interval_ms = 20;
    config.scheduler.vitals_interval_ms = 20;
    config.scheduler.max_consecutive_store_failures = 2;
    config
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scheduled_detectors_share_escalation_file() {
    let tmp = tempdir().unwrap();
    let pipeline = Pipeline::from_config(fast_config(tmp.path())).unwrap();

    pipeline.stores.motion.append(still_record()).unwrap();
    pipeline.stores.motion.append(impact_record()).unwrap();
    pipeline
        .stores
        .vitals
        .append(NewRecord::new(
            "bedside_monitor_001",
            VitalsFields {
                heart_rate: Some(130.0),
                spo2: Some(85.0),
                temperature: Some(39.0),
                systolic_bp: Some(118.0),
                diastolic_bp: Some(76.0),
            },
        ))
        .unwrap();

    let mut scheduler = Scheduler::new();
    pipeline.schedule_detectors(&mut scheduler);
    tokio::time::sleep(Duration::from_millis(300)).await;
    let outcomes = scheduler.shutdown().await;
    assert!(outcomes.iter().all(|o| matches!(o.exit, UnitExit::Stopped)));

    let alerts = pipeline.stores.escalation.read_all().unwrap();
    assert_eq!(alerts.len(), 4);
    assert_eq!(alerts.iter().filter(|a| a.kind == AlertKind::Fall).count(), 1);
    assert_eq!(alerts.iter().filter(|a| a.kind == AlertKind::Vitals).count(), 3);

    let on_disk: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(tmp.path().join("escalation.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(on_disk["alerts"].as_array().unwrap().len(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn corrupt_store_stops_only_its_detector() {
    let tmp = tempdir().unwrap();
    let pipeline = Pipeline::from_config(fast_config(tmp.path())).unwrap();
    pipeline.stores.motion.append(impact_record()).unwrap();
    std::fs::write(tmp.path().join("vitals_stream.json"), "[{\"sequence\": 1,").unwrap();

    let mut scheduler = Scheduler::new();
    pipeline.schedule_detectors(&mut scheduler);
    tokio::time::sleep(Duration::from_millis(300)).await;
    let outcomes = scheduler.shutdown().await;

    let fall = outcomes.iter().find(|o| o.name == "fall-detector").unwrap();
    let vitals = outcomes.iter().find(|o| o.name == "vitals-detector").unwrap();
    assert!(matches!(fall.exit, UnitExit::Stopped));
    assert!(fall.cycles > 3);
    assert!(matches!(vitals.exit, UnitExit::Failed(_)));

    assert_eq!(pipeline.stores.escalation.len().unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn held_escalation_lock_delays_but_never_drops_alerts() {
    let tmp = tempdir().unwrap();
    let pipeline = Pipeline::from_config(fast_config(tmp.path())).unwrap();
    let lock = tmp.path().join("escalation.json.lock");
    std::fs::write(&lock, "4242\n").unwrap();
    pipeline.stores.motion.append(impact_record()).unwrap();

    let mut scheduler = Scheduler::new();
    pipeline.schedule_detectors(&mut scheduler);
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(pipeline.stores.escalation.len().unwrap(), 0);

    std::fs::remove_file(&lock).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    let outcomes = scheduler.shutdown().await;

    assert!(outcomes.iter().all(|o| matches!(o.exit, UnitExit::Stopped)));
    let alerts = pipeline.stores.escalation.read_all().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::Fall);
}
