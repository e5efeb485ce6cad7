//! Dispatch failure taxonomy.

use std::time::Duration;

use thiserror::Error;

use crate::orchestrator::types::{ErrorCode, ServiceType};
use crate::resilience::retries::{RetryError, Retryable};
use crate::transport::TransportError;

/// Every way a dispatch can fail below the [`Orchestrator`](crate::orchestrator::Orchestrator).
#[derive(Debug, Clone, Error)]
pub enum GuardError {
    /// Caller named a service that does not exist.
    #[error("unknown service type '{0}'")]
    InvalidServiceType(String),

    /// No registry entry for the service.
    #[error("no registered location for {0}")]
    ServiceUnavailable(ServiceType),

    /// Breaker rejected the attempt without I/O.
    #[error("circuit open for {0}")]
    CircuitOpen(ServiceType),

    #[error("backend call timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Could not reach the backend.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Backend answered with a non-success status.
    #[error("backend returned status {status}: {message}")]
    Backend {
        status: u16,
        message: String,
        transient: bool,
    },

    /// Backend answered 2xx but the body was unusable.
    #[error("malformed backend response: {0}")]
    MalformedResponse(String),

    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetryExhausted { attempts: u32, last: Box<GuardError> },

    #[error("{0}")]
    Unknown(String),
}

impl GuardError {
    /// Stable classification surfaced to callers.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            GuardError::InvalidServiceType(_) => ErrorCode::InvalidServiceType,
            GuardError::ServiceUnavailable(_) => ErrorCode::ServiceUnavailable,
            GuardError::CircuitOpen(_) => ErrorCode::CircuitOpen,
            GuardError::Timeout(_) => ErrorCode::Timeout,
            GuardError::Connection(_)
            | GuardError::Backend { .. }
            | GuardError::MalformedResponse(_) => ErrorCode::BackendError,
            // A single-attempt policy never really retried.
            GuardError::RetryExhausted { attempts, last } if *attempts <= 1 => last.error_code(),
            GuardError::RetryExhausted { .. } => ErrorCode::RetryExhausted,
            GuardError::Unknown(_) => ErrorCode::Unknown,
        }
    }

    /// The error that actually ended the call, looking through exhaustion.
    pub fn root(&self) -> &GuardError {
        match self {
            GuardError::RetryExhausted { last, .. } => last.root(),
            other => other,
        }
    }

    /// Default critical-failure predicate: timeouts, unreachable backends and
    /// backend 5xx, whether or not retries were involved.
    pub fn is_critical(&self) -> bool {
        match self.root() {
            GuardError::Timeout(_) | GuardError::Connection(_) => true,
            GuardError::Backend { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl Retryable for GuardError {
    fn is_retryable(&self) -> bool {
        match self {
            GuardError::Timeout(_) | GuardError::Connection(_) => true,
            GuardError::Backend { transient, .. } => *transient,
            _ => false,
        }
    }
}

impl From<RetryError<GuardError>> for GuardError {
    fn from(err: RetryError<GuardError>) -> Self {
        match err {
            RetryError::Exhausted { attempts, last } => GuardError::RetryExhausted {
                attempts,
                last: Box::new(last),
            },
            RetryError::Aborted { error, .. } => error,
        }
    }
}

impl From<TransportError> for GuardError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Connect(msg) => GuardError::Connection(msg),
            TransportError::InvalidRequest(msg) => GuardError::Unknown(msg),
            TransportError::Body(msg) => GuardError::MalformedResponse(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(status: u16, transient: bool) -> GuardError {
        GuardError::Backend {
            status,
            message: "nope".into(),
            transient,
        }
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            GuardError::CircuitOpen(ServiceType::TrustGuard).error_code(),
            ErrorCode::CircuitOpen
        );
        assert_eq!(
            GuardError::Timeout(Duration::from_secs(1)).error_code(),
            ErrorCode::Timeout
        );
        assert_eq!(backend(500, false).error_code(), ErrorCode::BackendError);
        assert_eq!(
            GuardError::Connection("refused".into()).error_code(),
            ErrorCode::BackendError
        );
    }

    #[test]
    fn test_exhaustion_code_depends_on_attempts() {
        let single = GuardError::RetryExhausted {
            attempts: 1,
            last: Box::new(GuardError::Timeout(Duration::from_secs(1))),
        };
        assert_eq!(single.error_code(), ErrorCode::Timeout);

        let many = GuardError::RetryExhausted {
            attempts: 3,
            last: Box::new(GuardError::Timeout(Duration::from_secs(1))),
        };
        assert_eq!(many.error_code(), ErrorCode::RetryExhausted);
        assert!(many.to_string().contains("3 attempts"));
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(GuardError::Timeout(Duration::from_millis(10)).is_retryable());
        assert!(GuardError::Connection("reset".into()).is_retryable());
        assert!(backend(503, true).is_retryable());
        assert!(!backend(400, false).is_retryable());
        assert!(!GuardError::CircuitOpen(ServiceType::BiasGuard).is_retryable());
        assert!(!GuardError::InvalidServiceType("x".into()).is_retryable());
    }

    #[test]
    fn test_critical_predicate() {
        assert!(backend(500, false).is_critical());
        assert!(!backend(404, false).is_critical());
        assert!(!GuardError::CircuitOpen(ServiceType::BiasGuard).is_critical());
        assert!(!GuardError::ServiceUnavailable(ServiceType::BiasGuard).is_critical());
        let exhausted = GuardError::RetryExhausted {
            attempts: 3,
            last: Box::new(GuardError::Connection("refused".into())),
        };
        assert!(exhausted.is_critical());
    }
}
