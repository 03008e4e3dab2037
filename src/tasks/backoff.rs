//! Exponential backoff between failed poll cycles and reconnect retries

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Multiplier for exponential growth
    pub multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

/// Exponential backoff calculator with jitter
pub struct ExponentialBackoff {
    config: BackoffConfig,
    next_ms: f64,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::with_config(BackoffConfig::default())
    }

    pub fn with_config(config: BackoffConfig) -> Self {
        let initial = config.initial_delay.as_millis() as f64;
        Self {
            config,
            next_ms: initial,
            attempt: 0,
        }
    }

    /// Delay before the next attempt. The first call returns the initial
    /// delay; later calls grow by `multiplier` up to `max_delay`.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt += 1;

        let max_ms = self.config.max_delay.as_millis() as f64;
        let base = self.next_ms.min(max_ms);
        self.next_ms = (base * self.config.multiplier).min(max_ms);

        let delay = if self.config.jitter_factor > 0.0 {
            let jitter_range = base * self.config.jitter_factor;
            let jitter = rand::rng().random_range(-jitter_range..=jitter_range);
            (base + jitter).clamp(1.0, max_ms.max(1.0))
        } else {
            base.max(1.0)
        };

        Duration::from_millis(delay as u64)
    }

    pub fn reset(&mut self) {
        self.next_ms = self.config.initial_delay.as_millis() as f64;
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(initial_ms: u64, max_ms: u64, multiplier: f64) -> ExponentialBackoff {
        ExponentialBackoff::with_config(BackoffConfig {
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(max_ms),
            multiplier,
            jitter_factor: 0.0,
        })
    }

    #[test]
    fn test_exponential_backoff_increases() {
        let mut backoff = no_jitter(100, 10_000, 2.0);

        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(400));
    }

    #[test]
    fn test_exponential_backoff_caps_at_max() {
        let mut backoff = no_jitter(1000, 5000, 10.0);

        for _ in 0..5 {
            backoff.next_delay();
        }

        assert_eq!(backoff.next_delay(), Duration::from_millis(5000));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let mut backoff = ExponentialBackoff::with_config(BackoffConfig {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(1000),
            multiplier: 2.0,
            jitter_factor: 0.1,
        });

        for _ in 0..20 {
            let delay = backoff.next_delay();
            assert!(delay >= Duration::from_millis(900));
            assert!(delay <= Duration::from_millis(1000));
        }
    }

    #[test]
    fn test_exponential_backoff_reset() {
        let mut backoff = no_jitter(100, 10_000, 2.0);

        backoff.next_delay();
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempt(), 3);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }
}
