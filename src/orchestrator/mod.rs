//! Request orchestration.
//!
//! # Data Flow
//! ```text
//! OrchestrationRequest
//!     → parse ServiceType (unknown → INVALID_SERVICE_TYPE)
//!     → ServiceRegistry::resolve
//!     → CircuitBreaker::acquire
//!     → RetryPolicy { timeout(GuardTransport::call) }
//!     → OrchestrationResponse (+ fallback, + spawned escalation)
//! ```

pub mod dispatcher;
pub mod error;
pub mod fallback;
pub mod types;

pub use dispatcher::{CriticalPredicate, Orchestrator, OrchestratorBuilder};
pub use error::GuardError;
pub use fallback::{FallbackResponder, StaticFallback};
pub use types::{ErrorCode, OrchestrationRequest, OrchestrationResponse, ServiceType, UnknownServiceType};
