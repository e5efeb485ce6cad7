//! Metrics collection and exposition.
//!
//! # Metrics
//! - `guard_requests_total` (counter): dispatches by service, outcome
//! - `guard_request_duration_seconds` (histogram): whole-dispatch latency
//! - `guard_retries_total` (counter): retry attempts by service
//! - `guard_circuit_transitions_total` (counter): breaker transitions by service, from, to
//! - `guard_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `guard_escalations_total` (counter): escalations by service, delivered
//!
//! Updates go through the `metrics` facade and never block the request path.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::circuit_breaker::CircuitState;

/// Fire-and-forget telemetry boundary.
pub trait MetricsSink: Send + Sync {
    fn record_request(&self, service: &str, success: bool, duration: Duration);
    fn record_retry(&self, service: &str, attempt: u32);
    fn record_circuit_transition(&self, service: &str, from: CircuitState, to: CircuitState);
    fn record_escalation(&self, service: &str, delivered: bool);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn record_request(&self, _: &str, _: bool, _: Duration) {}
    fn record_retry(&self, _: &str, _: u32) {}
    fn record_circuit_transition(&self, _: &str, _: CircuitState, _: CircuitState) {}
    fn record_escalation(&self, _: &str, _: bool) {}
}

/// Emits through the global `metrics` recorder (Prometheus once installed).
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusSink;

fn state_value(state: CircuitState) -> f64 {
    match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    }
}

impl MetricsSink for PrometheusSink {
    fn record_request(&self, service: &str, success: bool, duration: Duration) {
        let outcome = if success { "success" } else { "failure" };
        counter!(
            "guard_requests_total",
            "service" => service.to_string(),
            "outcome" => outcome
        )
        .increment(1);
        histogram!("guard_request_duration_seconds", "service" => service.to_string())
            .record(duration.as_secs_f64());
    }

    fn record_retry(&self, service: &str, attempt: u32) {
        counter!("guard_retries_total", "service" => service.to_string()).increment(1);
        tracing::trace!(service, attempt, "retry recorded");
    }

    fn record_circuit_transition(&self, service: &str, from: CircuitState, to: CircuitState) {
        counter!(
            "guard_circuit_transitions_total",
            "service" => service.to_string(),
            "from" => from.as_str(),
            "to" => to.as_str()
        )
        .increment(1);
        gauge!("guard_circuit_state", "service" => service.to_string()).set(state_value(to));
    }

    fn record_escalation(&self, service: &str, delivered: bool) {
        counter!(
            "guard_escalations_total",
            "service" => service.to_string(),
            "delivered" => if delivered { "true" } else { "false" }
        )
        .increment(1);
    }
}

/// Install the Prometheus recorder with a scrape listener on `addr`.
///
/// Must be called from inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}
