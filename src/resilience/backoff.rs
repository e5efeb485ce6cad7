//! Exponential backoff with jitter.

use std::time::Duration;
use rand::Rng;

/// Shape of the delay curve between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl Backoff {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        calculate_backoff(
            attempt,
            self.base_delay,
            self.multiplier,
            self.max_delay,
            self.jitter,
        )
    }
}

/// Calculate exponential backoff delay with optional jitter.
///
/// `attempt` 1 yields `base`, each later attempt multiplies by `multiplier`,
/// capped at `max`. Jitter scales the result by a uniform factor in [0.5, 1.0].
pub fn calculate_backoff(
    attempt: u32,
    base: Duration,
    multiplier: f64,
    max: Duration,
    jitter: bool,
) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
    let factor = multiplier.max(1.0).powi(exponent);
    let raw_secs = base.as_secs_f64() * factor;
    let capped_secs = if raw_secs.is_finite() {
        raw_secs.min(max.as_secs_f64())
    } else {
        max.as_secs_f64()
    };

    let scaled = if jitter {
        capped_secs * rand::thread_rng().gen_range(0.5..=1.0)
    } else {
        capped_secs
    };

    Duration::from_secs_f64(scaled)
}
