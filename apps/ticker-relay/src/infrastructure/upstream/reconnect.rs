//! Reconnection Policy
//!
//! Exponential backoff with optional jitter for upstream reconnection.
//!
//! The delay for retry `n` (zero-based) is
//! `min(max_delay, initial_delay × multiplier^n)`; with the defaults that is
//! 1s, 2s, 4s, 8s, 16s, 30s, 30s, … A successful open resets `n` to zero.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::UpstreamSettings;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Maximum delay between reconnection attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 doubles delay each attempt).
    pub multiplier: f64,
    /// Jitter factor as a fraction (e.g., 0.1 = ±10% randomization).
    pub jitter_factor: f64,
    /// Maximum number of reconnection attempts (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts: 0, // Unlimited
        }
    }
}

impl ReconnectConfig {
    /// Create configuration from `UpstreamSettings`.
    #[must_use]
    pub const fn from_settings(settings: &UpstreamSettings) -> Self {
        Self {
            initial_delay: settings.reconnect_delay_initial,
            max_delay: settings.reconnect_delay_max,
            multiplier: settings.reconnect_delay_multiplier,
            jitter_factor: settings.reconnect_jitter,
            max_attempts: settings.max_reconnect_attempts,
        }
    }
}

/// Compute the un-jittered delay for a zero-based retry number.
#[must_use]
pub fn backoff_delay(config: &ReconnectConfig, attempt: u32) -> Duration {
    #[allow(clippy::cast_precision_loss)]
    let initial_millis = config.initial_delay.as_millis() as f64;
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let scaled = (initial_millis * config.multiplier.powi(exponent)).round();
    let max_millis = config.max_delay.as_millis();

    let millis = if scaled.is_finite() && scaled >= 0.0 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        {
            (scaled as u128).min(max_millis)
        }
    } else {
        max_millis
    };

    Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
}

/// Reconnection policy implementing exponential backoff with jitter.
///
/// # Example
///
/// ```rust
/// use ticker_relay::infrastructure::upstream::reconnect::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
///
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(1)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(2)));
///
/// // Simulate successful connection
/// policy.reset();
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(1)));
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Get the next delay duration, applying exponential backoff with jitter.
    ///
    /// Returns `None` if max attempts have been exceeded.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }

        let delay = backoff_delay(&self.config, self.attempt_count);
        self.attempt_count = self.attempt_count.saturating_add(1);

        Some(self.apply_jitter(delay))
    }

    /// Reset the policy after a successful connection.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Get the current attempt count.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Check if reconnection should continue.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    /// Apply jitter to a duration.
    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let mut rng = rand::rng();
        let jitter: f64 = rng.random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn default_config_values() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert!((config.multiplier - 2.0).abs() < f64::EPSILON);
        assert!(config.jitter_factor.abs() < f64::EPSILON);
        assert_eq!(config.max_attempts, 0);
    }

    #[test]
    fn default_sequence_caps_at_thirty_seconds() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::default());

        let delays: Vec<u64> = (0..8)
            .map(|_| policy.next_delay().unwrap().as_secs())
            .collect();

        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30, 30]);
    }

    #[test]
    fn policy_max_attempts() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts: 3,
        };
        let mut policy = ReconnectPolicy::new(config);

        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert_eq!(policy.attempt_count(), 3);

        assert!(policy.next_delay().is_none());
        assert!(!policy.should_retry());
    }

    #[test]
    fn policy_reset() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::default());

        let _ = policy.next_delay();
        let _ = policy.next_delay();
        let _ = policy.next_delay();
        assert_eq!(policy.attempt_count(), 3);

        policy.reset();

        assert_eq!(policy.attempt_count(), 0);
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn policy_jitter_bounds() {
        for _ in 0..100 {
            let mut policy = ReconnectPolicy::new(ReconnectConfig {
                jitter_factor: 0.1,
                ..Default::default()
            });

            let millis = policy.next_delay().unwrap().as_millis();

            assert!(millis >= 900, "delay {millis}ms is below minimum 900ms");
            assert!(millis <= 1100, "delay {millis}ms is above maximum 1100ms");
        }
    }

    #[test]
    fn huge_attempt_saturates_at_max() {
        let config = ReconnectConfig::default();
        assert_eq!(backoff_delay(&config, u32::MAX), Duration::from_secs(30));
    }

    proptest! {
        #[test]
        fn delay_never_exceeds_max(attempt in 0u32..10_000, max_secs in 1u64..600) {
            let config = ReconnectConfig {
                max_delay: Duration::from_secs(max_secs),
                ..Default::default()
            };
            prop_assert!(backoff_delay(&config, attempt) <= config.max_delay);
        }

        #[test]
        fn delay_is_monotonic(attempt in 0u32..1_000) {
            let config = ReconnectConfig::default();
            prop_assert!(backoff_delay(&config, attempt) <= backoff_delay(&config, attempt + 1));
        }
    }
}
