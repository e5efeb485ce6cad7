//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the orchestrator.
//! All types derive Serde traits for deserialization from config files.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Root configuration for the guard orchestrator.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// HTTP transport listener.
    pub listener: ListenerConfig,

    /// Per-call dispatch behavior.
    pub dispatch: DispatchConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Circuit breaker thresholds.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Statically configured guard service locations.
    pub services: Vec<ServiceConfig>,

    /// Static fallback payloads keyed by service name.
    pub fallbacks: BTreeMap<String, FallbackConfig>,

    /// Background discovery.
    pub discovery: DiscoveryConfig,

    /// Forensic escalation target.
    pub escalation: EscalationConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Shutdown behavior.
    pub shutdown: ShutdownConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Overall HTTP request timeout in seconds (outer bound around dispatch).
    pub request_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 120,
        }
    }
}

/// Dispatch configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DispatchConfig {
    /// Default per-attempt timeout in milliseconds.
    pub default_timeout_ms: u64,

    /// Backend statuses treated as transient (retried).
    pub retryable_statuses: Vec<u16>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            retryable_statuses: vec![429, 502, 503, 504],
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds.
    pub base_delay_ms: u64,

    /// Multiplier applied to the delay after each attempt.
    pub backoff_multiplier: f64,

    /// Upper bound for a single delay in milliseconds.
    pub max_delay_ms: u64,

    /// Scale each delay by a random factor in [0.5, 1.0].
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            max_delay_ms: 30_000,
            jitter: true,
        }
    }
}

/// Circuit breaker thresholds, with optional per-service overrides.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening.
    pub failure_threshold: u32,

    /// Seconds an open circuit waits before a trial call.
    pub recovery_timeout_secs: u64,

    /// Trial successes required to close again.
    pub half_open_success_threshold: u32,

    /// Per-service replacements, keyed by service name.
    pub overrides: HashMap<String, BreakerOverride>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 60,
            half_open_success_threshold: 3,
            overrides: HashMap::new(),
        }
    }
}

/// Partial breaker settings; unset fields inherit from the defaults.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct BreakerOverride {
    pub failure_threshold: Option<u32>,
    pub recovery_timeout_secs: Option<u64>,
    pub half_open_success_threshold: Option<u32>,
}

impl CircuitBreakerConfig {
    /// Effective settings for `service`.
    pub fn for_service(&self, service: &str) -> CircuitBreakerConfig {
        let mut merged = CircuitBreakerConfig {
            overrides: HashMap::new(),
            ..self.clone()
        };
        if let Some(o) = self.overrides.get(service) {
            if let Some(v) = o.failure_threshold {
                merged.failure_threshold = v;
            }
            if let Some(v) = o.recovery_timeout_secs {
                merged.recovery_timeout_secs = v;
            }
            if let Some(v) = o.half_open_success_threshold {
                merged.half_open_success_threshold = v;
            }
        }
        merged
    }
}

/// A statically configured guard service.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ServiceConfig {
    /// Logical service name (e.g., "trust_guard").
    pub name: String,

    /// URL the orchestrator POSTs requests to.
    pub base_url: String,

    /// Free-form metadata (version, region, ...).
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Static fallback response for one service.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct FallbackConfig {
    /// Data returned as the degraded response.
    pub data: Map<String, Value>,
}

/// Discovery configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Enable the background discovery loop.
    pub enabled: bool,

    /// Seconds between discovery passes.
    pub interval_secs: u64,

    /// Path probed on each candidate.
    pub probe_path: String,

    /// Probe timeout in milliseconds.
    pub probe_timeout_ms: u64,

    /// Candidates to probe.
    pub candidates: Vec<ServiceConfig>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 30,
            probe_path: "/health".to_string(),
            probe_timeout_ms: 2_000,
            candidates: Vec::new(),
        }
    }
}

/// Forensic escalation configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct EscalationConfig {
    /// Enable escalation of critical failures.
    pub enabled: bool,

    /// URL of the forensic-analysis collaborator.
    pub target_url: String,

    /// Notify timeout in milliseconds (independent of request timeouts).
    pub timeout_ms: u64,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            target_url: String::new(),
            timeout_ms: 5_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log format ("pretty" or "json").
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Seconds background tasks get to stop before being aborted.
    pub grace_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { grace_secs: 5 }
    }
}
