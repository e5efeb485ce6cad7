//! HTTP adapter.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum router, request id, trace, timeout)
//!     → handlers.rs (decode JSON, call Orchestrator / registry / breakers)
//!     → response.rs (error code → HTTP status)
//!     → Send to client
//! ```
//!
//! Contains no orchestration logic of its own.

pub mod handlers;
pub mod response;
pub mod server;

pub use server::{AppState, HttpServer};
