//! Request/response model for a single dispatch.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Default advisory priority when the caller leaves it out.
pub const DEFAULT_PRIORITY: u8 = 5;

/// Logical backend guard services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    TokenGuard,
    TrustGuard,
    ContextGuard,
    BiasGuard,
    HealthGuard,
    SecurityGuard,
}

impl ServiceType {
    pub const ALL: [ServiceType; 6] = [
        ServiceType::TokenGuard,
        ServiceType::TrustGuard,
        ServiceType::ContextGuard,
        ServiceType::BiasGuard,
        ServiceType::HealthGuard,
        ServiceType::SecurityGuard,
    ];

    /// Registry key for this service.
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::TokenGuard => "token_guard",
            ServiceType::TrustGuard => "trust_guard",
            ServiceType::ContextGuard => "context_guard",
            ServiceType::BiasGuard => "bias_guard",
            ServiceType::HealthGuard => "health_guard",
            ServiceType::SecurityGuard => "security_guard",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string names no known guard service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown service type '{0}'")]
pub struct UnknownServiceType(pub String);

impl FromStr for ServiceType {
    type Err = UnknownServiceType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServiceType::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| UnknownServiceType(s.to_string()))
    }
}

/// Machine-readable failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidServiceType,
    ServiceUnavailable,
    CircuitOpen,
    Timeout,
    RetryExhausted,
    BackendError,
    Unknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidServiceType => "INVALID_SERVICE_TYPE",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::CircuitOpen => "CIRCUIT_OPEN",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::RetryExhausted => "RETRY_EXHAUSTED",
            ErrorCode::BackendError => "BACKEND_ERROR",
            ErrorCode::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

fn default_priority() -> u8 {
    DEFAULT_PRIORITY
}

/// A caller's request to one guard service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationRequest {
    #[serde(default = "generate_request_id")]
    pub request_id: String,

    /// Raw service name; parsed into [`ServiceType`] at dispatch.
    pub service_type: String,

    /// Opaque payload forwarded to the backend. Must be present; its shape is
    /// never checked.
    pub payload: Map<String, Value>,

    #[serde(default)]
    pub user_id: Option<String>,

    #[serde(default)]
    pub session_id: Option<String>,

    /// Advisory only (1-10).
    #[serde(default = "default_priority")]
    pub priority: u8,

    /// Per-call timeout override in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    #[serde(default)]
    pub fallback_enabled: bool,
}

impl OrchestrationRequest {
    /// Build a request with a generated id and defaults for everything else.
    pub fn new(service_type: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            request_id: generate_request_id(),
            service_type: service_type.into(),
            payload,
            user_id: None,
            session_id: None,
            priority: DEFAULT_PRIORITY,
            timeout_ms: None,
            fallback_enabled: false,
        }
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = id.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn with_fallback(mut self, enabled: bool) -> Self {
        self.fallback_enabled = enabled;
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>, session_id: Option<String>) -> Self {
        self.user_id = Some(user_id.into());
        self.session_id = session_id;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Priority clamped into the advisory 1-10 range.
    pub fn effective_priority(&self) -> u8 {
        self.priority.clamp(1, 10)
    }
}

/// Normalized result of a dispatch. Exactly one of `data` / `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationResponse {
    pub request_id: String,
    pub service_type: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    /// Wall-clock seconds for the whole dispatch, retries included.
    pub processing_time: f64,
    #[serde(default)]
    pub service_used: Option<String>,
    #[serde(default)]
    pub fallback_used: bool,
}

impl OrchestrationResponse {
    pub fn success(
        request_id: impl Into<String>,
        service_type: impl Into<String>,
        data: Map<String, Value>,
        service_used: Option<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            service_type: service_type.into(),
            success: true,
            data: Some(data),
            error: None,
            error_code: None,
            processing_time: elapsed.as_secs_f64(),
            service_used,
            fallback_used: false,
        }
    }

    pub fn failure(
        request_id: impl Into<String>,
        service_type: impl Into<String>,
        code: ErrorCode,
        error: impl Into<String>,
        service_used: Option<String>,
        elapsed: Duration,
    ) -> Self {
        let mut error = error.into();
        if error.is_empty() {
            error = code.as_str().to_string();
        }
        Self {
            request_id: request_id.into(),
            service_type: service_type.into(),
            success: false,
            data: None,
            error: Some(error),
            error_code: Some(code),
            processing_time: elapsed.as_secs_f64(),
            service_used,
            fallback_used: false,
        }
    }

    /// Mark a response as produced by a fallback responder.
    pub fn from_fallback(mut self) -> Self {
        self.fallback_used = true;
        self
    }

    /// True when the data/error/success fields agree with each other.
    pub fn is_consistent(&self) -> bool {
        match (&self.data, &self.error) {
            (Some(_), None) => self.success && self.error_code.is_none(),
            (None, Some(e)) => !self.success && !e.is_empty() && self.error_code.is_some(),
            _ => false,
        }
    }
}
