//! Timeout enforcement.
//!
//! Every backend call, discovery probe and escalation notify runs under a
//! deadline. An elapsed deadline drops the inner future, which cancels the
//! in-flight I/O.

use std::future::Future;
use std::time::Duration;

use crate::orchestrator::GuardError;

/// Resolve the per-call deadline: request override first, then the default.
pub fn effective_timeout(requested: Option<Duration>, default: Duration) -> Duration {
    match requested {
        Some(t) if !t.is_zero() => t,
        _ => default,
    }
}

/// Await `fut` for at most `limit`, flattening a timeout into [`GuardError::Timeout`].
pub async fn with_deadline<T, F>(limit: Duration, fut: F) -> Result<T, GuardError>
where
    F: Future<Output = Result<T, GuardError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(GuardError::Timeout(limit)),
    }
}
