//! Reconnection Policy
//!
//! Exponential backoff with jitter for re-establishing a dropped stream.
//! The number of attempts per outage is bounded; the counter resets after
//! every successful reconnect.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::StreamSettings;

/// Default number of reconnection attempts per outage.
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 5;

/// Backoff parameters for one supervised session.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound for the delay between attempts.
    pub max_delay: Duration,
    /// Growth factor applied after each attempt; values below 1 act as 1.
    pub multiplier: f64,
    /// Random spread around each delay, as a fraction of it.
    pub jitter_factor: f64,
    /// Attempts per outage before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::from_settings(&StreamSettings::default())
    }
}

impl ReconnectConfig {
    /// Backoff taken from the client's stream settings.
    #[must_use]
    pub const fn from_settings(settings: &StreamSettings) -> Self {
        Self {
            initial_delay: settings.reconnect_delay_initial,
            max_delay: settings.reconnect_delay_max,
            multiplier: settings.reconnect_delay_multiplier,
            jitter_factor: 0.1,
            max_attempts: settings.reconnect_attempts,
        }
    }

    /// Same configuration with a different attempt budget.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// Bounded exponential backoff for one outage.
///
/// # Example
///
/// ```rust
/// use curve_events::infrastructure::stream::reconnect::{ReconnectConfig, ReconnectPolicy};
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default().with_max_attempts(2));
///
/// assert!(policy.next_delay().is_some());
/// assert!(policy.next_delay().is_some());
/// assert!(policy.next_delay().is_none());
///
/// // Connection came back
/// policy.reset();
/// assert!(policy.next_delay().is_some());
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    delay: Duration,
    attempts: u32,
}

impl ReconnectPolicy {
    /// Policy at the start of an outage.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        let delay = config.initial_delay;
        Self {
            config,
            delay,
            attempts: 0,
        }
    }

    /// Delay before the next attempt, or `None` once the budget is spent.
    ///
    /// Successive delays never shrink, up to `max_delay` before jitter.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }
        self.attempts += 1;

        let current = self.delay;
        self.delay = self.grow(current);
        Some(jittered(current, self.config.jitter_factor))
    }

    /// Start over after a successful connection.
    pub const fn reset(&mut self) {
        self.delay = self.config.initial_delay;
        self.attempts = 0;
    }

    /// Attempts made during the current outage.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempts
    }

    /// Whether another attempt is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.attempts < self.config.max_attempts
    }

    /// Configured attempt budget.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    fn grow(&self, delay: Duration) -> Duration {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let scaled = (millis as f64 * self.config.multiplier.max(1.0)).round() as u64;
        Duration::from_millis(scaled)
            .min(self.config.max_delay)
            .max(delay)
    }
}

/// `delay` spread uniformly by `factor` in both directions, at least 1ms.
fn jittered(delay: Duration, factor: f64) -> Duration {
    if factor <= 0.0 {
        return delay;
    }
    let spread = rand::rng().random_range(-factor..=factor);
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    let millis = (delay.as_millis() as f64 * (1.0 + spread)).round().max(1.0) as u64;
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(initial_ms: u64, max_ms: u64, multiplier: f64, attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(max_ms),
            multiplier,
            jitter_factor: 0.0,
            max_attempts: attempts,
        }
    }

    #[test]
    fn defaults_follow_stream_settings() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_millis(500));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert_eq!(config.max_attempts, DEFAULT_RECONNECT_ATTEMPTS);
    }

    #[test]
    fn delays_double() {
        let mut policy = ReconnectPolicy::new(fixed(100, 10_000, 2.0, 10));
        let delays: Vec<u128> = (0..4)
            .filter_map(|_| policy.next_delay())
            .map(|d| d.as_millis())
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800]);
    }

    #[test]
    fn delays_stop_at_cap() {
        let mut policy = ReconnectPolicy::new(fixed(1000, 2000, 4.0, 10));

        assert_eq!(policy.next_delay(), Some(Duration::from_millis(1000)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(2000)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(2000)));
    }

    #[test]
    fn shrinking_multiplier_keeps_delay() {
        let mut policy = ReconnectPolicy::new(fixed(100, 1000, 0.5, 5));

        let delays: Vec<_> = std::iter::from_fn(|| policy.next_delay()).collect();
        assert_eq!(delays, vec![Duration::from_millis(100); 5]);
    }

    #[test]
    fn budget_is_enforced() {
        let mut policy = ReconnectPolicy::new(fixed(100, 1000, 2.0, 3));

        for expected in 1..=3 {
            assert!(policy.next_delay().is_some());
            assert_eq!(policy.attempt_count(), expected);
        }
        assert_eq!(policy.next_delay(), None);
        assert!(!policy.should_retry());
    }

    #[test]
    fn zero_budget_never_retries() {
        let mut policy = ReconnectPolicy::new(fixed(100, 1000, 2.0, 0));
        assert!(!policy.should_retry());
        assert_eq!(policy.next_delay(), None);
    }

    #[test]
    fn reset_restores_budget_and_delay() {
        let mut policy = ReconnectPolicy::new(fixed(100, 10_000, 2.0, 3));
        let _ = policy.next_delay();
        let _ = policy.next_delay();

        policy.reset();

        assert_eq!(policy.attempt_count(), 0);
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn jitter_stays_within_factor() {
        for _ in 0..100 {
            let millis = jittered(Duration::from_secs(1), 0.1).as_millis();
            assert!((900..=1100).contains(&millis), "{millis}ms outside 900..=1100");
        }
        assert_eq!(jittered(Duration::from_millis(7), 0.0), Duration::from_millis(7));
    }
}
