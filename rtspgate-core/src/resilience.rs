//! Restart backoff for failed sessions.
//!
//! Delay sequences come from `backon`; this module only maps supervisor
//! configuration onto it.

use backon::{BackoffBuilder, ExponentialBuilder};
use std::time::Duration;

use crate::config::SupervisorConfig;

#[derive(Debug, Clone, Copy)]
pub struct RestartPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RestartPolicy {
    #[must_use]
    pub const fn new(max_retries: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff,
            max_backoff,
        }
    }

    #[must_use]
    pub const fn from_config(config: &SupervisorConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.initial_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
        )
    }

    fn builder(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_factor(2.0)
            .with_min_delay(self.initial_backoff)
            .with_max_delay(self.max_backoff)
            .with_max_times(self.max_retries as usize)
    }

    /// Delay before retry number `attempt` (zero-based), or `None` once the
    /// retry budget is spent.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        self.builder().build().nth(attempt as usize)
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::from_config(&SupervisorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_grow_and_are_capped() {
        let policy = RestartPolicy::new(6, Duration::from_millis(100), Duration::from_millis(500));

        let delays: Vec<Duration> = (0..6).filter_map(|n| policy.delay_for(n)).collect();
        assert_eq!(delays.len(), 6);
        assert_eq!(delays[0], Duration::from_millis(100));
        assert!(delays[1] > delays[0]);
        for pair in delays.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
        assert!(delays.iter().all(|d| *d <= Duration::from_millis(500)));
        assert_eq!(delays[5], Duration::from_millis(500));
    }

    #[test]
    fn test_budget_exhausted() {
        let policy = RestartPolicy::new(2, Duration::from_millis(10), Duration::from_secs(1));
        assert!(policy.delay_for(1).is_some());
        assert!(policy.delay_for(2).is_none());

        let never = RestartPolicy::new(0, Duration::from_millis(10), Duration::from_secs(1));
        assert!(never.delay_for(0).is_none());
    }
}
