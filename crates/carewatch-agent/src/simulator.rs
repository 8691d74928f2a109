//! Deterministic device simulator.
//!
//! Produces the same JSON lines a wrist sensor and a bedside monitor would
//! print, so the whole pipeline can run without hardware. Every value is a
//! pure function of the tick number; runs are reproducible.
//!
//! One scenario cycle lasts [`CYCLE_TICKS`] ticks:
//!
//! | ticks     | motion                                   |
//! |-----------|------------------------------------------|
//! | 0-199     | upright, slight sway                     |
//! | 200-399   | walking gait                             |
//! | 400-539   | resting, nearly still                    |
//! | 540-547   | free-fall                                |
//! | 548-555   | impact                                   |
//! | 556-599   | lying on the side                        |
//!
//! The pulse waveform runs at 72 bpm, rising to 126 bpm during the second
//! half of every other cycle. A vitals line is printed every
//! [`VITALS_EVERY`] ticks.

use std::f64::consts::PI;

use serde_json::json;

use crate::ingest::DEFAULT_MOTION_DEVICE;

/// Ticks per scenario cycle.
pub const CYCLE_TICKS: u64 = 600;
/// Ticks between two vitals lines.
pub const VITALS_EVERY: u64 = 100;

const BEDSIDE_DEVICE: &str = "bedside_monitor_001";

/// Generates simulated device lines tick by tick.
#[derive(Debug, Clone)]
pub struct Simulator {
    tick_ms: u64,
    tick: u64,
}

impl Simulator {
    /// `tick_ms` is the simulated device sampling period.
    pub fn new(tick_ms: u64) -> Self {
        Self {
            tick_ms: tick_ms.max(1),
            tick: 0,
        }
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Lines the devices print during the next tick.
    pub fn next_lines(&mut self) -> Vec<String> {
        let tick = self.tick;
        self.tick += 1;
        let device_ms = tick * self.tick_ms;

        let (x, y, z) = motion_at(tick);
        let mut lines = vec![json!({
            "timestamp": device_ms,
            "x": round3(x),
            "y": round3(y),
            "z": round3(z),
            "pulse_raw": pulse_at(device_ms, bpm_at(tick)).round(),
            "device_id": DEFAULT_MOTION_DEVICE,
        })
        .to_string()];

        if tick % VITALS_EVERY == 0 {
            lines.push(vitals_at(tick, device_ms).to_string());
        }
        lines
    }
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

/// Accelerometer reading (g) for a tick.
fn motion_at(tick: u64) -> (f64, f64, f64) {
    let phase = tick % CYCLE_TICKS;
    let t = tick as f64;
    match phase {
        0..=199 => (
            0.02 * (t * 0.31).sin(),
            0.02 * (t * 0.17).cos(),
            1.0 + 0.08 * (t * 0.05).sin(),
        ),
        200..=399 => {
            // ~2 steps per second at 20 Hz sampling.
            let step = (t * 2.0 * PI / 10.0).sin();
            (0.15 * step, 0.1 * (t * 0.7).cos(), 1.0 + 0.6 * step)
        }
        400..=539 => (0.01 * (t * 0.2).sin(), 0.01, 0.995),
        540..=547 => (0.04, -0.03, 0.05),
        548..=555 => (2.6, 2.1, 1.4),
        _ => (0.98 + 0.01 * (t * 0.3).sin(), 0.05, 0.12),
    }
}

fn bpm_at(tick: u64) -> f64 {
    let cycle = tick / CYCLE_TICKS;
    let phase = tick % CYCLE_TICKS;
    if cycle % 2 == 1 && phase >= CYCLE_TICKS / 2 {
        126.0
    } else {
        72.0
    }
}

/// Pulse sensor ADC value: a flat diastolic floor with a sharp systolic peak.
fn pulse_at(device_ms: u64, bpm: f64) -> f64 {
    let period_ms = 60_000.0 / bpm;
    let phase = (device_ms as f64 % period_ms) / period_ms;
    let peak = if phase < 0.25 {
        (phase / 0.25 * PI).sin()
    } else {
        0.0
    };
    470.0 + 160.0 * peak + 10.0 * (device_ms as f64 * 0.004).sin()
}

/// Bedside monitor reading; temperature drifts high in the last tenth of
/// every third cycle.
fn vitals_at(tick: u64, device_ms: u64) -> serde_json::Value {
    let t = tick as f64;
    let cycle = tick / CYCLE_TICKS;
    let phase = tick % CYCLE_TICKS;
    let temperature = if cycle % 3 == 2 && phase >= CYCLE_TICKS * 9 / 10 {
        38.4
    } else {
        36.7 + 0.2 * (t * 0.01).sin()
    };
    json!({
        "timestamp": device_ms,
        "device_id": BEDSIDE_DEVICE,
        "heart_rate": (bpm_at(tick) + 2.0 * (t * 0.05).sin()).round(),
        "spo2": (97.0 + (t * 0.02).sin()).round(),
        "temperature": round3(temperature),
        "systolic_bp": (115.0 + 4.0 * (t * 0.03).sin()).round(),
        "diastolic_bp": (75.0 + 3.0 * (t * 0.03).cos()).round(),
    })
}
