//! Retry logic.
//!
//! # Responsibilities
//! - Re-run a failed async operation a bounded number of times
//! - Sleep with exponential backoff + jitter between attempts
//! - Stop immediately on failures the error type marks non-retryable
//!
//! Attempts are strictly sequential; the next attempt only starts after the
//! previous one completed and its delay elapsed.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::config::RetryConfig;
use crate::resilience::backoff::Backoff;

/// Errors that know whether another attempt could help.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Why [`RetryPolicy::execute`] gave up.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every allowed attempt failed with a retryable error.
    #[error("retry exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    /// A non-retryable error ended the loop at `attempt`.
    #[error("attempt {attempt} failed without retry: {error}")]
    Aborted { attempt: u32, error: E },
}

impl<E> RetryError<E> {
    /// Number of times the operation ran.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } => *attempts,
            RetryError::Aborted { attempt, .. } => *attempt,
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Aborted { error, .. } => error,
        }
    }
}

/// Bounded-attempt execution wrapper.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: Backoff {
                base_delay: Duration::from_millis(config.base_delay_ms),
                multiplier: config.backoff_multiplier,
                max_delay: Duration::from_millis(config.max_delay_ms),
                jitter: config.jitter,
            },
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// A policy that runs the operation exactly once.
    pub fn no_retry() -> Self {
        Self::new(1, Backoff::default())
    }

    /// Run `operation` until it succeeds, fails non-retryably, or attempts run out.
    ///
    /// The closure receives the 1-based attempt number.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, RetryError<E>>
    where
        E: Retryable,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_notify(operation, |_, _, _| {}).await
    }

    /// Like [`execute`](Self::execute), calling `on_retry(attempt, &error, delay)`
    /// before each backoff sleep.
    pub async fn execute_notify<T, E, F, Fut, N>(
        &self,
        mut operation: F,
        mut on_retry: N,
    ) -> Result<T, RetryError<E>>
    where
        E: Retryable,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        N: FnMut(u32, &E, Duration),
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => {
                    return Err(RetryError::Aborted {
                        attempt,
                        error: err,
                    });
                }
                Err(err) if attempt >= max_attempts => {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: err,
                    });
                }
                Err(err) => {
                    let delay = self.backoff.delay_after(attempt);
                    on_retry(attempt, &err, delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
