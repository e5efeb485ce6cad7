//! Guard Service Orchestration Core Library

pub mod config;
pub mod escalation;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod orchestrator;
pub mod registry;
pub mod resilience;
pub mod transport;

pub use config::schema::OrchestratorConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use orchestrator::{Orchestrator, OrchestrationRequest, OrchestrationResponse, ServiceType};
