//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Orchestrator, breakers, registry, escalation produce:
//!     → logging.rs (structured tracing events, request_id / service fields)
//!     → metrics.rs (MetricsSink: counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Prometheus scrape endpoint
//! ```

pub mod logging;
pub mod metrics;

pub use metrics::{MetricsSink, NoopSink, PrometheusSink};
