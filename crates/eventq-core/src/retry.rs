use std::time::Duration;

const DEFAULT_UNIT_MS: u64 = 1_000;

/// Exponential backoff: `round(e^(failures / 2) * unit_ms)`.
///
/// There is no upper bound; callers race the sleep against cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    unit_ms: u64,
}

impl BackoffPolicy {
    pub fn new(unit_ms: u64) -> Self {
        Self { unit_ms }
    }

    pub fn unit_ms(&self) -> u64 {
        self.unit_ms
    }

    /// Sleep duration after `failures` consecutive failures. Zero failures means no delay.
    pub fn delay_for_failures(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }

        let scaled = (f64::from(failures) / 2.0).exp() * self.unit_ms as f64;
        // Float-to-int casts saturate, so very long streaks clamp at u64::MAX.
        Duration::from_millis(scaled.round() as u64)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_UNIT_MS)
    }
}
