use core::time::Duration;

use heapless::Vec;

use crate::config::MAX_SAMPLES;
use crate::telemetry::MonotonicInstant;

/// Battery readings collected during [`Sampling`](super::WakeCycleState::Sampling).
pub struct SampleBuffer<I> {
    samples: Vec<f32, MAX_SAMPLES>,
    target: usize,
    last_sample_at: Option<I>,
}

impl<I: MonotonicInstant> SampleBuffer<I> {
    /// Creates an empty buffer that fills after `target` readings.
    ///
    /// `target` is clamped to `1..=MAX_SAMPLES`.
    #[must_use]
    pub fn new(target: u8) -> Self {
        Self {
            samples: Vec::new(),
            target: usize::from(target).clamp(1, MAX_SAMPLES),
            last_sample_at: None,
        }
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.last_sample_at = None;
    }

    /// First reading is due immediately, later ones after `spacing`.
    pub fn is_due(&self, now: I, spacing: Duration) -> bool {
        self.last_sample_at
            .is_none_or(|last| now.saturating_duration_since(last) >= spacing)
    }

    /// Stores a reading and reports whether the buffer is now full.
    pub fn push(&mut self, volts: f32, now: I) -> bool {
        if !self.is_full() {
            let _ = self.samples.push(volts);
            self.last_sample_at = Some(now);
        }
        self.is_full()
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.target
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Mean of the collected readings, only once the buffer is full.
    #[allow(clippy::cast_precision_loss)]
    pub fn average(&self) -> Option<f32> {
        if !self.is_full() {
            return None;
        }
        let sum: f32 = self.samples.iter().sum();
        Some(sum / self.samples.len() as f32)
    }
}
