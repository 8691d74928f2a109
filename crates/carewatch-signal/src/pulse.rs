//! Pulse waveform beat detection.
//!
//! A two-level hysteresis comparator turns the raw analog pulse signal into
//! beats: a beat starts when the signal rises above the high threshold and
//! can only start again after the signal has dropped below the low threshold.
//! The dead band between the two absorbs noise around a single crossing.
//!
//! Beats are counted over a fixed window of device time. When a sample
//! arrives at or past the end of the window, the window is closed and one BPM
//! value is emitted:
//!
//! ```text
//! bpm = beats * 60000 / window_ms
//! ```

use carewatch_core::ConditionerConfig;

/// Hysteresis beat counter with windowed BPM output.
#[derive(Debug, Clone)]
pub struct BeatDetector {
    threshold_high: f64,
    threshold_low: f64,
    window_ms: u64,
    in_beat: bool,
    beats: u32,
    window_start: Option<u64>,
}

impl BeatDetector {
    /// Create a detector.
    ///
    /// - `threshold_high`: level that starts a beat.
    /// - `threshold_low`: level that re-arms the detector; must be below
    ///   `threshold_high`.
    /// - `window_ms`: BPM window length in device milliseconds.
    #[must_use]
    pub fn new(threshold_high: f64, threshold_low: f64, window_ms: u64) -> Self {
        Self {
            threshold_high,
            threshold_low,
            window_ms: window_ms.max(1),
            in_beat: false,
            beats: 0,
            window_start: None,
        }
    }

    /// Create a detector from conditioner settings.
    #[must_use]
    pub fn from_config(cfg: &ConditionerConfig) -> Self {
        Self::new(cfg.pulse_threshold_high, cfg.pulse_threshold_low, cfg.bpm_window_ms)
    }

    /// Feed one raw sample captured at `captured_at` (device ms).
    ///
    /// Returns `Some(bpm)` when this sample closes a window. The sample that
    /// closes a window is counted towards the next one.
    pub fn process(&mut self, captured_at: u64, raw: f64) -> Option<f64> {
        let mut bpm = None;

        match self.window_start {
            None => self.window_start = Some(captured_at),
            Some(start) if captured_at < start => {
                // Device clock went backwards (reboot): the open window is meaningless.
                self.restart_window(captured_at);
            }
            Some(start) if captured_at - start >= self.window_ms => {
                bpm = Some(f64::from(self.beats) * 60_000.0 / self.window_ms as f64);
                self.restart_window(captured_at);
            }
            Some(_) => {}
        }

        if !self.in_beat && raw > self.threshold_high {
            self.in_beat = true;
            self.beats += 1;
        } else if self.in_beat && raw < self.threshold_low {
            self.in_beat = false;
        }

        bpm
    }

    /// Beats counted in the open window.
    #[must_use]
    pub fn beats_in_window(&self) -> u32 {
        self.beats
    }

    /// Whether the signal is currently inside a beat.
    #[must_use]
    pub fn in_beat(&self) -> bool {
        self.in_beat
    }

    /// Forget the open window and the beat state.
    pub fn reset(&mut self) {
        self.in_beat = false;
        self.beats = 0;
        self.window_start = None;
    }

    fn restart_window(&mut self, at: u64) {
        self.window_start = Some(at);
        self.beats = 0;
    }
}
