//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to guard service:
//!     → circuit_breaker.rs (acquire a permit, fail fast when open)
//!     → retries.rs (bounded attempts, backoff.rs delays between them)
//!     → timeouts.rs (deadline on every attempt)
//!     → circuit_breaker.rs (settle the permit once per attempt)
//! ```
//!
//! # Design Decisions
//! - Every external call has a deadline
//! - Circuit-open rejections are never retried
//! - Breakers are per service, never shared

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use backoff::Backoff;
pub use circuit_breaker::{
    Admission, BreakerPermit, BreakerSettings, CircuitBreaker, CircuitBreakers, CircuitSnapshot, CircuitState,
};
pub use retries::{RetryError, RetryPolicy, Retryable};
