// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Retry and backoff strategies for connection attempts.

use std::time::Duration;

use rand::Rng;

// =============================================================================
// RetryConfig
// =============================================================================

/// Configuration for connect-retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (not retries: 3 means connect is tried
    /// three times in total).
    pub max_attempts: u32,
    /// Delay strategy between attempts.
    pub strategy: RetryStrategy,
}

impl RetryConfig {
    /// Creates a config with exponential backoff.
    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            strategy: RetryStrategy::Exponential(ExponentialBackoff::new(base_delay, max_delay)),
        }
    }

    /// Creates a config with a fixed delay.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            strategy: RetryStrategy::Fixed(delay),
        }
    }

    /// Creates a single-attempt config.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            strategy: RetryStrategy::Immediate,
        }
    }

    /// Replaces the strategy.
    pub fn with_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        // Matches the manager defaults: 3 attempts, 2s/4s between them.
        Self::exponential(3, Duration::from_secs(2), Duration::from_secs(30))
    }
}

// =============================================================================
// RetryStrategy
// =============================================================================

/// Strategy for computing the delay before the next attempt.
#[derive(Debug, Clone)]
pub enum RetryStrategy {
    /// No delay between attempts.
    Immediate,
    /// Fixed delay between attempts.
    Fixed(Duration),
    /// Exponential backoff with an optional jitter factor.
    Exponential(ExponentialBackoff),
}

impl RetryStrategy {
    /// Returns the delay after the given 0-based failed attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Self::Immediate => Duration::ZERO,
            Self::Fixed(delay) => *delay,
            Self::Exponential(exp) => exp.delay(attempt),
        }
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::Exponential(ExponentialBackoff::default())
    }
}

// =============================================================================
// ExponentialBackoff
// =============================================================================

/// Exponential backoff: `base_delay * multiplier^attempt`, capped at
/// `max_delay`. Jitter defaults to zero so schedules stay deterministic;
/// opt in via [`with_jitter`](Self::with_jitter) when many connections share
/// one upstream.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Cap on the computed delay.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Jitter factor in `[0.0, 1.0]`; 0 disables jitter.
    pub jitter_factor: f64,
}

impl ExponentialBackoff {
    /// Creates a backoff with multiplier 2 and no jitter.
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }

    /// Sets the growth multiplier.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Sets the jitter factor (clamped to `[0.0, 1.0]`).
    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor.clamp(0.0, 1.0);
        self
    }

    /// Returns the delay after the given 0-based failed attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        let delayed = if self.jitter_factor > 0.0 {
            let mut rng = rand::thread_rng();
            let range = capped * self.jitter_factor;
            (capped + rng.gen_range(-range..=range)).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(delayed)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manager_default_schedule() {
        // 3 attempts: sleeps of 2s then 4s between them.
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.strategy.delay(0), Duration::from_secs(2));
        assert_eq!(config.strategy.delay(1), Duration::from_secs(4));
    }

    #[test]
    fn test_exponential_caps_at_max() {
        let backoff = ExponentialBackoff::new(Duration::from_secs(2), Duration::from_secs(30));
        assert_eq!(backoff.delay(0), Duration::from_secs(2));
        assert_eq!(backoff.delay(1), Duration::from_secs(4));
        assert_eq!(backoff.delay(2), Duration::from_secs(8));
        assert_eq!(backoff.delay(3), Duration::from_secs(16));
        assert_eq!(backoff.delay(4), Duration::from_secs(30));
        assert_eq!(backoff.delay(10), Duration::from_secs(30));
    }

    #[test]
    fn test_fixed_and_immediate() {
        assert_eq!(
            RetryStrategy::Fixed(Duration::from_millis(250)).delay(5),
            Duration::from_millis(250)
        );
        assert_eq!(RetryStrategy::Immediate.delay(0), Duration::ZERO);
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(10))
            .with_jitter(0.5);
        let delay = backoff.delay(0);
        assert!(delay >= Duration::from_millis(500));
        assert!(delay <= Duration::from_millis(1500));
    }

    #[test]
    fn test_custom_multiplier() {
        let backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(100))
            .with_multiplier(3.0);
        assert_eq!(backoff.delay(0), Duration::from_secs(1));
        assert_eq!(backoff.delay(1), Duration::from_secs(3));
        assert_eq!(backoff.delay(2), Duration::from_secs(9));
    }

    #[test]
    fn test_no_retry() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_attempts, 1);
    }
}
