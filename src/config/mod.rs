//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize, GUARD_* env overrides)
//!     → validation.rs (semantic checks)
//!     → OrchestratorConfig (validated, immutable)
//!     → used once to build the Orchestrator and registry
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → new config sent over mpsc
//!     → binary re-applies the static `services` table to the registry
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use schema::{
    BreakerOverride, CircuitBreakerConfig, DiscoveryConfig, DispatchConfig, EscalationConfig,
    FallbackConfig, ListenerConfig, ObservabilityConfig, OrchestratorConfig, RetryConfig,
    ServiceConfig, ShutdownConfig,
};
