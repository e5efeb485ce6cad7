//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges, service names and
//! URLs. Every problem is reported, not just the first.

use std::fmt;
use std::net::SocketAddr;

use url::Url;

use crate::config::schema::OrchestratorConfig;
use crate::orchestrator::types::ServiceType;

/// A single semantic problem, tagged with the offending field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn check_url(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.trim().is_empty() {
        errors.push(ValidationError::new(field, "must not be empty"));
    } else if let Err(e) = Url::parse(value) {
        errors.push(ValidationError::new(field, format!("invalid URL '{}': {}", value, e)));
    }
}

fn check_service_name(errors: &mut Vec<ValidationError>, field: &str, name: &str) {
    if name.parse::<ServiceType>().is_err() {
        errors.push(ValidationError::new(field, format!("unknown service '{}'", name)));
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &OrchestratorConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("not a socket address: '{}'", config.listener.bind_address),
        ));
    }
    if config.listener.request_timeout_secs == 0 {
        errors.push(ValidationError::new("listener.request_timeout_secs", "must be > 0"));
    }

    if config.dispatch.default_timeout_ms == 0 {
        errors.push(ValidationError::new("dispatch.default_timeout_ms", "must be > 0"));
    }

    let retries = &config.retries;
    if retries.max_attempts == 0 {
        errors.push(ValidationError::new("retries.max_attempts", "must be >= 1"));
    }
    if !(retries.backoff_multiplier >= 1.0 && retries.backoff_multiplier.is_finite()) {
        errors.push(ValidationError::new("retries.backoff_multiplier", "must be a finite value >= 1.0"));
    }
    if retries.max_delay_ms < retries.base_delay_ms {
        errors.push(ValidationError::new("retries.max_delay_ms", "must be >= base_delay_ms"));
    }

    let cb = &config.circuit_breaker;
    if cb.failure_threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.failure_threshold", "must be >= 1"));
    }
    if cb.half_open_success_threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.half_open_success_threshold", "must be >= 1"));
    }
    for (name, o) in &cb.overrides {
        let field = format!("circuit_breaker.overrides.{}", name);
        check_service_name(&mut errors, &field, name);
        if o.failure_threshold == Some(0) || o.half_open_success_threshold == Some(0) {
            errors.push(ValidationError::new(field, "thresholds must be >= 1"));
        }
    }

    for (i, service) in config.services.iter().enumerate() {
        if service.name.trim().is_empty() {
            errors.push(ValidationError::new(format!("services[{}].name", i), "must not be empty"));
        }
        check_url(&mut errors, &format!("services[{}].base_url", i), &service.base_url);
    }

    for name in config.fallbacks.keys() {
        check_service_name(&mut errors, &format!("fallbacks.{}", name), name);
    }

    let discovery = &config.discovery;
    if discovery.enabled {
        if discovery.interval_secs == 0 {
            errors.push(ValidationError::new("discovery.interval_secs", "must be > 0"));
        }
        if discovery.probe_timeout_ms == 0 {
            errors.push(ValidationError::new("discovery.probe_timeout_ms", "must be > 0"));
        }
    }
    for (i, candidate) in discovery.candidates.iter().enumerate() {
        if candidate.name.trim().is_empty() {
            errors.push(ValidationError::new(format!("discovery.candidates[{}].name", i), "must not be empty"));
        }
        check_url(&mut errors, &format!("discovery.candidates[{}].base_url", i), &candidate.base_url);
    }

    if config.escalation.enabled {
        check_url(&mut errors, "escalation.target_url", &config.escalation.target_url);
    }
    if config.escalation.timeout_ms == 0 {
        errors.push(ValidationError::new("escalation.timeout_ms", "must be > 0"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("not a socket address: '{}'", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
