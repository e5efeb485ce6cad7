//! Escalation client.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

use crate::config::EscalationConfig;
use crate::observability::MetricsSink;
use crate::orchestrator::types::{ErrorCode, ServiceType};
use crate::transport::{BackendCall, GuardTransport};

/// What the forensic service sent back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForensicAnalysis {
    #[serde(default)]
    pub analysis_id: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl ForensicAnalysis {
    fn from_reply(body: Value) -> Self {
        match body {
            Value::Null => Self::default(),
            Value::Object(map) => serde_json::from_value(Value::Object(map.clone())).unwrap_or(Self {
                details: map,
                ..Self::default()
            }),
            other => {
                let mut details = Map::new();
                details.insert("result".into(), other);
                Self {
                    details,
                    ..Self::default()
                }
            }
        }
    }
}

/// Outcome of one spawned notification.
#[derive(Debug, Clone, PartialEq)]
pub struct EscalationReport {
    pub service: ServiceType,
    pub request_id: String,
    pub error_code: Option<ErrorCode>,
    /// `None` when escalation is disabled or delivery failed.
    pub analysis: Option<ForensicAnalysis>,
}

#[derive(Clone)]
struct Delivery {
    target: Url,
    timeout: Duration,
    transport: Arc<dyn GuardTransport>,
}

/// Fire-and-forget notifier for critical failures.
#[derive(Clone)]
pub struct EscalationHook {
    delivery: Option<Delivery>,
    metrics: Arc<dyn MetricsSink>,
    reports: Option<mpsc::UnboundedSender<EscalationReport>>,
}

impl std::fmt::Debug for EscalationHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EscalationHook")
            .field("target", &self.delivery.as_ref().map(|d| d.target.as_str()))
            .field("timeout", &self.delivery.as_ref().map(|d| d.timeout))
            .finish()
    }
}

impl EscalationHook {
    /// Build from config. A disabled section, or an unparseable target,
    /// yields a hook whose `notify` always returns `None`.
    pub fn new(
        config: &EscalationConfig,
        transport: Arc<dyn GuardTransport>,
        metrics: Arc<dyn MetricsSink>,
    ) -> (Self, mpsc::UnboundedReceiver<EscalationReport>) {
        let delivery = if config.enabled {
            match Url::parse(&config.target_url) {
                Ok(target) => Some(Delivery {
                    target,
                    timeout: Duration::from_millis(config.timeout_ms),
                    transport,
                }),
                Err(e) => {
                    tracing::warn!(target = %config.target_url, error = %e, "Escalation target invalid, escalation disabled");
                    None
                }
            }
        } else {
            None
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let hook = Self {
            delivery,
            metrics,
            reports: Some(tx),
        };
        (hook, rx)
    }

    /// A hook that never delivers and never reports.
    pub fn disabled(metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            delivery: None,
            metrics,
            reports: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.delivery.is_some()
    }

    /// Send a failure summary to the forensic service.
    ///
    /// Returns `None` when disabled, unreachable, failing, or slower than the
    /// hook's own timeout.
    pub async fn notify(&self, service: ServiceType, error_summary: &str, request_id: &str) -> Option<ForensicAnalysis> {
        self.deliver(service, error_summary, request_id, None).await
    }

    async fn deliver(
        &self,
        service: ServiceType,
        error_summary: &str,
        request_id: &str,
        error_code: Option<ErrorCode>,
    ) -> Option<ForensicAnalysis> {
        let delivery = self.delivery.as_ref()?;

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        let call = BackendCall {
            url: delivery.target.clone(),
            request_id: request_id.to_string(),
            body: json!({
                "service": service.as_str(),
                "error_summary": error_summary,
                "request_id": request_id,
                "error_code": error_code.map(|c| c.as_str()),
                "timestamp": timestamp,
            }),
        };

        let outcome = match tokio::time::timeout(delivery.timeout, delivery.transport.call(call)).await {
            Ok(Ok(reply)) if reply.is_success() => Some(ForensicAnalysis::from_reply(reply.body)),
            Ok(Ok(reply)) => {
                tracing::warn!(service = %service, request_id, status = reply.status, "Escalation rejected");
                None
            }
            Ok(Err(e)) => {
                tracing::warn!(service = %service, request_id, error = %e, "Escalation delivery failed");
                None
            }
            Err(_) => {
                tracing::warn!(service = %service, request_id, timeout = ?delivery.timeout, "Escalation timed out");
                None
            }
        };

        self.metrics.record_escalation(service.as_str(), outcome.is_some());
        outcome
    }

    /// Run the notification on its own task and report the outcome over the
    /// channel. The caller never waits on delivery.
    pub fn spawn_notify(
        &self,
        service: ServiceType,
        error_summary: String,
        request_id: String,
        error_code: Option<ErrorCode>,
    ) -> JoinHandle<()> {
        let hook = self.clone();
        tokio::spawn(async move {
            tracing::info!(service = %service, request_id = %request_id, "Escalating critical failure");
            let analysis = hook.deliver(service, &error_summary, &request_id, error_code).await;
            if let Some(reports) = &hook.reports {
                let _ = reports.send(EscalationReport {
                    service,
                    request_id,
                    error_code,
                    analysis,
                });
            }
        })
    }
}
