use std::time::Duration;

use crate::config::SyncConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for BackoffPolicy {
    fn from(cfg: &SyncConfig) -> Self {
        Self {
            initial: Duration::from_millis(cfg.backoff_initial_ms.max(1)),
            max: Duration::from_millis(cfg.backoff_max_ms.max(cfg.backoff_initial_ms).max(1)),
            multiplier: if cfg.backoff_multiplier >= 1.0 {
                cfg.backoff_multiplier
            } else {
                1.0
            },
        }
    }
}

impl BackoffPolicy {
    pub fn start(&self) -> Backoff {
        Backoff {
            policy: *self,
            attempts: 0,
        }
    }
}

/// Exponential delay sequence capped at `max`; never gives up on its own.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempts: u32,
}

impl Backoff {
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn next_delay(&mut self) -> Duration {
        let exp = self.policy.multiplier.powi(self.attempts.min(64) as i32);
        self.attempts = self.attempts.saturating_add(1);
        let millis = (self.policy.initial.as_millis() as f64 * exp)
            .min(self.policy.max.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_then_caps() {
        let policy = BackoffPolicy {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(350),
            multiplier: 2.0,
        };
        let mut backoff = policy.start();
        let delays: Vec<u64> = (0..5).map(|_| backoff.next_delay().as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 200, 350, 350, 350]);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn sub_unit_multiplier_is_clamped() {
        let cfg = SyncConfig {
            backoff_multiplier: 0.5,
            ..SyncConfig::default()
        };
        assert_eq!(BackoffPolicy::from(&cfg).multiplier, 1.0);
    }
}
