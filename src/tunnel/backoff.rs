use crate::config::ReliabilityConfig;
use rand::Rng;
use std::time::Duration;

/// Exponential reconnect delay: `initial * 2^(attempt-1)`, capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, jitter: bool) -> Self {
        Self {
            initial,
            max: max.max(initial),
            jitter,
        }
    }

    pub fn from_config(config: &ReliabilityConfig) -> Self {
        Self::new(
            Duration::from_millis(config.tunnel_initial_backoff_ms),
            Duration::from_millis(config.tunnel_max_backoff_ms),
            config.tunnel_backoff_jitter,
        )
    }

    /// Delay before reconnect `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if !self.jitter {
            return base;
        }
        let quarter = u64::try_from(base.as_millis() / 4).unwrap_or(u64::MAX);
        let extra = rand::rng().random_range(0..=quarter);
        (base + Duration::from_millis(extra)).min(self.max)
    }

    fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.initial
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max)
            .min(self.max)
    }
}
