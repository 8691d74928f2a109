//! Fixed-window moving average.

/// Circular-buffer moving average over the last `window` values.
///
/// Each new value overwrites the oldest buffered one. Until the buffer has
/// filled, the mean is taken over the values received so far, so the first
/// outputs are not dragged towards zero.
#[derive(Debug, Clone)]
pub struct MovingAverage {
    buffer: Vec<f64>,
    next: usize,
    filled: usize,
    sum: f64,
}

impl MovingAverage {
    /// Create an average over `window` values (at least 1).
    #[must_use]
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            buffer: vec![0.0; window],
            next: 0,
            filled: 0,
            sum: 0.0,
        }
    }

    /// Push a value and return the updated mean.
    pub fn push(&mut self, value: f64) -> f64 {
        if self.filled == self.buffer.len() {
            self.sum -= self.buffer[self.next];
        } else {
            self.filled += 1;
        }
        self.buffer[self.next] = value;
        self.sum += value;
        self.next = (self.next + 1) % self.buffer.len();

        // Recompute once per lap to keep float drift from accumulating.
        if self.next == 0 {
            self.sum = self.buffer[..self.filled].iter().sum();
        }
        self.mean()
    }

    /// Current mean, or 0.0 before any value was pushed.
    #[must_use]
    pub fn mean(&self) -> f64 {
        if self.filled == 0 {
            0.0
        } else {
            self.sum / self.filled as f64
        }
    }

    #[must_use]
    pub fn window(&self) -> usize {
        self.buffer.len()
    }

    /// Number of values currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.filled
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// Drop all buffered values.
    pub fn reset(&mut self) {
        self.buffer.iter_mut().for_each(|v| *v = 0.0);
        self.next = 0;
        self.filled = 0;
        self.sum = 0.0;
    }
}
