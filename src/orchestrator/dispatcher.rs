//! The dispatcher.
//!
//! # Responsibilities
//! - Validate the service type before touching anything else
//! - Resolve the destination, gate it through its circuit breaker
//! - Run the backend call under retry and a per-call deadline
//! - Normalize every outcome into an `OrchestrationResponse`
//! - Apply fallbacks and spawn escalation for critical failures

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::escalation::{EscalationHook, EscalationReport};
use crate::observability::{MetricsSink, NoopSink};
use crate::orchestrator::error::GuardError;
use crate::orchestrator::fallback::{fallbacks_from_config, FallbackResponder};
use crate::orchestrator::types::{ErrorCode, OrchestrationRequest, OrchestrationResponse, ServiceType};
use crate::registry::{HttpProbeSource, ServiceRegistry};
use crate::resilience::timeouts::{effective_timeout, with_deadline};
use crate::resilience::{BreakerSettings, CircuitBreakers, RetryPolicy};
use crate::transport::{BackendCall, BackendReply, GuardTransport};

/// Decides whether a failure is escalated.
pub type CriticalPredicate = Arc<dyn Fn(&GuardError) -> bool + Send + Sync>;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_RETRYABLE_STATUSES: [u16; 4] = [429, 502, 503, 504];

/// Routes requests to guard services. Shared by `Arc` across all callers.
pub struct Orchestrator {
    registry: Arc<ServiceRegistry>,
    breakers: CircuitBreakers,
    retry: RetryPolicy,
    transport: Arc<dyn GuardTransport>,
    default_timeout: Duration,
    retryable_statuses: HashSet<u16>,
    fallbacks: HashMap<ServiceType, Arc<dyn FallbackResponder>>,
    escalation: EscalationHook,
    is_critical: CriticalPredicate,
    metrics: Arc<dyn MetricsSink>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .field("retry", &self.retry)
            .field("default_timeout", &self.default_timeout)
            .field("fallbacks", &self.fallbacks.keys().collect::<Vec<_>>())
            .field("escalation", &self.escalation)
            .finish_non_exhaustive()
    }
}

/// Failure plus the destination it was headed for, if resolved.
struct DispatchFailure {
    error: GuardError,
    service_used: Option<String>,
}

impl Orchestrator {
    pub fn builder(transport: Arc<dyn GuardTransport>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(transport)
    }

    /// Wire an orchestrator from a validated config.
    ///
    /// Seeds the registry with the static `services` table and, when
    /// discovery is enabled, attaches an HTTP probe source over the
    /// configured candidates.
    pub fn from_config(
        config: &OrchestratorConfig,
        transport: Arc<dyn GuardTransport>,
        metrics: Arc<dyn MetricsSink>,
    ) -> (Self, mpsc::UnboundedReceiver<EscalationReport>) {
        let mut registry = ServiceRegistry::new();
        if config.discovery.enabled {
            registry = registry.with_source(Arc::new(HttpProbeSource::from_config(
                &config.discovery,
                transport.clone(),
            )));
        }
        registry.apply_configured(&config.services);

        let (escalation, reports) = EscalationHook::new(&config.escalation, transport.clone(), metrics.clone());

        let mut builder = OrchestratorBuilder::new(transport)
            .registry(Arc::new(registry))
            .metrics(metrics)
            .retry_policy(RetryPolicy::from(&config.retries))
            .breaker_defaults(BreakerSettings::from(&config.circuit_breaker))
            .default_timeout(Duration::from_millis(config.dispatch.default_timeout_ms))
            .retryable_statuses(config.dispatch.retryable_statuses.iter().copied())
            .escalation(escalation);

        for service in ServiceType::ALL {
            if config.circuit_breaker.overrides.contains_key(service.as_str()) {
                let merged = config.circuit_breaker.for_service(service.as_str());
                builder = builder.breaker_override(service, BreakerSettings::from(&merged));
            }
        }
        for (service, fallback) in fallbacks_from_config(&config.fallbacks) {
            builder = builder.fallback(service, Arc::new(fallback));
        }

        (builder.build(), reports)
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn breakers(&self) -> &CircuitBreakers {
        &self.breakers
    }

    pub fn escalation(&self) -> &EscalationHook {
        &self.escalation
    }

    /// Dispatch one request. Never fails: every outcome is a response.
    pub async fn handle(&self, mut request: OrchestrationRequest) -> OrchestrationResponse {
        if request.request_id.trim().is_empty() {
            request.request_id = Uuid::new_v4().to_string();
        }

        let span = tracing::info_span!(
            "dispatch",
            request_id = %request.request_id,
            service_type = %request.service_type,
            user_id = request.user_id.as_deref().unwrap_or(""),
            session_id = request.session_id.as_deref().unwrap_or(""),
        );
        self.handle_inner(request).instrument(span).await
    }

    async fn handle_inner(&self, request: OrchestrationRequest) -> OrchestrationResponse {
        let start = Instant::now();

        let service = match request.service_type.parse::<ServiceType>() {
            Ok(service) => service,
            Err(e) => {
                tracing::warn!(error = %e, "Rejected request for unknown service type");
                return OrchestrationResponse::failure(
                    request.request_id,
                    request.service_type,
                    ErrorCode::InvalidServiceType,
                    e.to_string(),
                    None,
                    start.elapsed(),
                );
            }
        };

        let outcome = self.dispatch(service, &request).await;
        let elapsed = start.elapsed();
        self.metrics.record_request(service.as_str(), outcome.is_ok(), elapsed);

        match outcome {
            Ok((data, service_used)) => {
                tracing::info!(service = %service, elapsed = ?elapsed, "Dispatch succeeded");
                OrchestrationResponse::success(
                    request.request_id,
                    request.service_type,
                    data,
                    Some(service_used),
                    elapsed,
                )
            }
            Err(failure) => self.finish_failure(service, request, failure, start),
        }
    }

    fn finish_failure(
        &self,
        service: ServiceType,
        request: OrchestrationRequest,
        failure: DispatchFailure,
        start: Instant,
    ) -> OrchestrationResponse {
        let DispatchFailure { error, service_used } = failure;
        let code = error.error_code();
        tracing::warn!(service = %service, error_code = %code, error = %error, "Dispatch failed");

        if self.escalation.is_enabled() && (self.is_critical)(&error) {
            self.escalation.spawn_notify(
                service,
                error.to_string(),
                request.request_id.clone(),
                Some(code),
            );
        }

        let responder = if request.fallback_enabled {
            self.fallbacks.get(&service)
        } else {
            None
        };

        let Some(responder) = responder else {
            return OrchestrationResponse::failure(
                request.request_id,
                request.service_type,
                code,
                error.to_string(),
                service_used,
                start.elapsed(),
            );
        };

        match responder.respond(&request, &error) {
            Ok(data) => {
                tracing::info!(service = %service, cause = %code, "Serving fallback response");
                OrchestrationResponse::success(
                    request.request_id,
                    request.service_type,
                    data,
                    service_used,
                    start.elapsed(),
                )
                .from_fallback()
            }
            Err(reason) => {
                tracing::warn!(service = %service, reason = %reason, "Fallback failed");
                OrchestrationResponse::failure(
                    request.request_id,
                    request.service_type,
                    code,
                    format!("{}; fallback failed: {}", error, reason),
                    service_used,
                    start.elapsed(),
                )
                .from_fallback()
            }
        }
    }

    async fn dispatch(
        &self,
        service: ServiceType,
        request: &OrchestrationRequest,
    ) -> Result<(Map<String, Value>, String), DispatchFailure> {
        let entry = self.registry.resolve(service.as_str()).ok_or(DispatchFailure {
            error: GuardError::ServiceUnavailable(service),
            service_used: None,
        })?;
        let service_used = entry.location().to_string();

        let breaker = self.breakers.get(service);
        let Some(first) = breaker.acquire() else {
            tracing::debug!(service = %service, "Circuit open, failing fast");
            return Err(DispatchFailure {
                error: GuardError::CircuitOpen(service),
                service_used: Some(service_used),
            });
        };
        let mut first = Some(first);

        let timeout = effective_timeout(request.timeout(), self.default_timeout);
        let body = outbound_body(service, request);

        let result = self
            .retry
            .execute_notify(
                |attempt| {
                    let admitted = first.take();
                    let breaker = breaker.clone();
                    let call = BackendCall {
                        url: entry.base_url.clone(),
                        request_id: request.request_id.clone(),
                        body: body.clone(),
                    };
                    let transport = self.transport.clone();
                    let statuses = &self.retryable_statuses;
                    async move {
                        // Dropping the permit mid-call abandons the attempt.
                        let Some(permit) = admitted.or_else(|| breaker.acquire()) else {
                            return Err(GuardError::CircuitOpen(service));
                        };
                        tracing::debug!(service = %service, attempt, trial = permit.is_trial(), "Calling backend");
                        let result = with_deadline(timeout, async {
                            let reply = transport.call(call).await?;
                            interpret_reply(reply, statuses)
                        })
                        .await;
                        match &result {
                            Ok(_) => permit.success(),
                            Err(_) => permit.failure(),
                        }
                        result
                    }
                },
                |attempt, error, delay| {
                    tracing::warn!(
                        service = %service,
                        attempt,
                        delay = ?delay,
                        error = %error,
                        "Backend call failed, retrying"
                    );
                    self.metrics.record_retry(service.as_str(), attempt);
                },
            )
            .await;

        result.map(|data| (data, service_used.clone())).map_err(|e| DispatchFailure {
            error: GuardError::from(e),
            service_used: Some(service_used),
        })
    }
}

fn outbound_body(service: ServiceType, request: &OrchestrationRequest) -> Value {
    json!({
        "request_id": request.request_id,
        "service_type": service.as_str(),
        "user_id": request.user_id,
        "session_id": request.session_id,
        "priority": request.effective_priority(),
        "payload": request.payload,
    })
}

/// Map a raw backend reply to result data or a classified error.
pub(crate) fn interpret_reply(reply: BackendReply, retryable_statuses: &HashSet<u16>) -> Result<Map<String, Value>, GuardError> {
    if reply.is_success() {
        return Ok(match reply.body {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("result".into(), other);
                map
            }
        });
    }

    let message = match &reply.body {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("error")
            .or_else(|| map.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| reply.body.to_string()),
        other => other.to_string(),
    };

    Err(GuardError::Backend {
        status: reply.status,
        message,
        transient: retryable_statuses.contains(&reply.status),
    })
}

/// Step-by-step construction of an [`Orchestrator`].
pub struct OrchestratorBuilder {
    transport: Arc<dyn GuardTransport>,
    registry: Option<Arc<ServiceRegistry>>,
    metrics: Arc<dyn MetricsSink>,
    retry: RetryPolicy,
    breaker_defaults: BreakerSettings,
    breaker_overrides: Vec<(ServiceType, BreakerSettings)>,
    default_timeout: Duration,
    retryable_statuses: HashSet<u16>,
    fallbacks: HashMap<ServiceType, Arc<dyn FallbackResponder>>,
    escalation: Option<EscalationHook>,
    is_critical: CriticalPredicate,
}

impl OrchestratorBuilder {
    pub fn new(transport: Arc<dyn GuardTransport>) -> Self {
        Self {
            transport,
            registry: None,
            metrics: Arc::new(NoopSink),
            retry: RetryPolicy::default(),
            breaker_defaults: BreakerSettings::default(),
            breaker_overrides: Vec::new(),
            default_timeout: DEFAULT_TIMEOUT,
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.into_iter().collect(),
            fallbacks: HashMap::new(),
            escalation: None,
            is_critical: Arc::new(GuardError::is_critical),
        }
    }

    pub fn registry(mut self, registry: Arc<ServiceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Register a service location on the (possibly new) registry.
    pub fn service(mut self, service: ServiceType, location: &str) -> Self {
        let registry = self.registry.get_or_insert_with(|| Arc::new(ServiceRegistry::new()));
        registry.register(service.as_str(), location, HashMap::new());
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn breaker_defaults(mut self, settings: BreakerSettings) -> Self {
        self.breaker_defaults = settings;
        self
    }

    pub fn breaker_override(mut self, service: ServiceType, settings: BreakerSettings) -> Self {
        self.breaker_overrides.push((service, settings));
        self
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn retryable_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.retryable_statuses = statuses.into_iter().collect();
        self
    }

    pub fn fallback(mut self, service: ServiceType, responder: Arc<dyn FallbackResponder>) -> Self {
        self.fallbacks.insert(service, responder);
        self
    }

    pub fn escalation(mut self, hook: EscalationHook) -> Self {
        self.escalation = Some(hook);
        self
    }

    pub fn critical_predicate(mut self, predicate: CriticalPredicate) -> Self {
        self.is_critical = predicate;
        self
    }

    pub fn build(self) -> Orchestrator {
        let mut breakers = CircuitBreakers::new(self.breaker_defaults, self.metrics.clone());
        for (service, settings) in self.breaker_overrides {
            breakers = breakers.with_override(service, settings);
        }

        let metrics = self.metrics;
        Orchestrator {
            registry: self.registry.unwrap_or_else(|| Arc::new(ServiceRegistry::new())),
            breakers,
            retry: self.retry,
            transport: self.transport,
            default_timeout: self.default_timeout,
            retryable_statuses: self.retryable_statuses,
            fallbacks: self.fallbacks,
            escalation: self
                .escalation
                .unwrap_or_else(|| EscalationHook::disabled(metrics.clone())),
            is_critical: self.is_critical,
            metrics,
        }
    }
}
