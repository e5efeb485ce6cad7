//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     broadcast → HTTP server stops accepting, discovery loop exits
//!     → background tasks joined with a bounded grace period, then aborted
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::{join_with_grace, Shutdown};
pub use signals::wait_for_signal;
