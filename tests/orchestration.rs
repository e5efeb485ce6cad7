//! End-to-end dispatch behavior against a scripted transport.

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::{json, Map, Value};

use common::{MetricEvent, RecordingSink, ScriptedTransport, Step};
use guard_orchestrator::config::EscalationConfig;
use guard_orchestrator::escalation::EscalationHook;
use guard_orchestrator::orchestrator::{
    ErrorCode, GuardError, OrchestrationRequest, Orchestrator, ServiceType, StaticFallback,
};
use guard_orchestrator::resilience::{Backoff, BreakerSettings, CircuitState, RetryPolicy};

fn fixed_retries(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(
        max_attempts,
        Backoff {
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: false,
        },
    )
}

fn breaker(failure_threshold: u32) -> BreakerSettings {
    BreakerSettings {
        failure_threshold,
        recovery_timeout: Duration::from_secs(60),
        half_open_success_threshold: 3,
    }
}

fn request(service: &str) -> OrchestrationRequest {
    let mut payload = Map::new();
    payload.insert("text".into(), json!("hello"));
    OrchestrationRequest::new(service, payload)
}

#[tokio::test]
async fn test_unknown_service_type_rejected_without_io() {
    let transport = ScriptedTransport::new(Step::ok(json!({})));
    let orchestrator = Orchestrator::builder(transport.clone())
        .service(ServiceType::TrustGuard, "http://127.0.0.1:7001/validate")
        .build();

    let resp = orchestrator.handle(request("not_a_guard")).await;

    assert!(!resp.success);
    assert_eq!(resp.error_code, Some(ErrorCode::InvalidServiceType));
    assert_eq!(resp.service_type, "not_a_guard");
    assert!(resp.error.as_deref().unwrap().contains("not_a_guard"));
    assert!(resp.is_consistent());
    assert_eq!(transport.call_count(), 0);
    assert!(orchestrator.breakers().snapshots().is_empty());
}

#[tokio::test]
async fn test_unknown_service_type_gets_no_fallback() {
    let transport = ScriptedTransport::new(Step::ok(json!({})));
    let orchestrator = Orchestrator::builder(transport)
        .fallback(ServiceType::TrustGuard, Arc::new(StaticFallback::new(Map::new())))
        .build();

    let resp = orchestrator
        .handle(request("trust-guard").with_fallback(true))
        .await;
    assert_eq!(resp.error_code, Some(ErrorCode::InvalidServiceType));
    assert!(!resp.fallback_used);
}

#[tokio::test]
async fn test_unregistered_service_is_unavailable() {
    let transport = ScriptedTransport::new(Step::ok(json!({})));
    let orchestrator = Orchestrator::builder(transport.clone()).build();

    let resp = orchestrator.handle(request("context_guard")).await;
    assert_eq!(resp.error_code, Some(ErrorCode::ServiceUnavailable));
    assert!(resp.service_used.is_none());
    assert_eq!(transport.call_count(), 0);
    assert!(resp.is_consistent());
}

#[tokio::test]
async fn test_success_carries_data_and_destination() {
    let transport = ScriptedTransport::new(Step::ok(json!({ "trust_score": 0.93 })));
    let sink = RecordingSink::new();
    let orchestrator = Orchestrator::builder(transport.clone())
        .service(ServiceType::TrustGuard, "http://127.0.0.1:7001/validate")
        .metrics(sink.clone())
        .build();

    let resp = orchestrator
        .handle(request("trust_guard").with_request_id("req-1").with_user("u-7", None))
        .await;

    assert!(resp.success);
    assert!(resp.is_consistent());
    assert_eq!(resp.request_id, "req-1");
    assert_eq!(resp.data.as_ref().unwrap()["trust_score"], json!(0.93));
    assert_eq!(resp.service_used.as_deref(), Some("http://127.0.0.1:7001/validate"));
    assert!(!resp.fallback_used);

    let calls = transport.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].request_id, "req-1");
    assert_eq!(calls[0].body["payload"]["text"], json!("hello"));
    assert_eq!(calls[0].body["user_id"], json!("u-7"));
    assert_eq!(calls[0].body["priority"], json!(5));

    assert!(sink.events().contains(&MetricEvent::Request {
        service: "trust_guard".into(),
        success: true,
    }));
}

#[tokio::test]
async fn test_empty_request_id_is_replaced() {
    let transport = ScriptedTransport::new(Step::ok(Value::Null));
    let orchestrator = Orchestrator::builder(transport)
        .service(ServiceType::BiasGuard, "http://127.0.0.1:7003")
        .build();

    let resp = orchestrator.handle(request("bias_guard").with_request_id("")).await;
    assert!(resp.success);
    assert!(!resp.request_id.is_empty());
    assert_eq!(resp.data, Some(Map::new()));
}

#[tokio::test]
async fn test_circuit_opens_after_threshold_and_fails_fast() {
    let transport = ScriptedTransport::new(Step::refused());
    let sink = RecordingSink::new();
    let orchestrator = Orchestrator::builder(transport.clone())
        .service(ServiceType::TrustGuard, "http://127.0.0.1:7001")
        .retry_policy(RetryPolicy::no_retry())
        .breaker_defaults(breaker(5))
        .metrics(sink.clone())
        .build();

    for _ in 0..5 {
        let resp = orchestrator.handle(request("trust_guard")).await;
        assert_eq!(resp.error_code, Some(ErrorCode::BackendError));
        assert!(resp.is_consistent());
    }
    assert_eq!(transport.call_count(), 5);

    let resp = orchestrator.handle(request("trust_guard")).await;
    assert_eq!(resp.error_code, Some(ErrorCode::CircuitOpen));
    assert!(resp.processing_time < 0.001, "took {}s", resp.processing_time);
    assert_eq!(transport.call_count(), 5);
    assert_eq!(
        resp.service_used.as_deref(),
        Some("http://127.0.0.1:7001/")
    );

    assert_eq!(sink.transitions(), vec![(CircuitState::Closed, CircuitState::Open)]);
    let snaps = orchestrator.breakers().snapshots();
    assert_eq!(snaps.len(), 1);
    assert_eq!(snaps[0].state, CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_timeouts_then_success_resets_breaker() {
    let transport = ScriptedTransport::with_script(
        vec![Step::Hang, Step::Hang],
        Step::ok(json!({ "tokens": 12 })),
    );
    let sink = RecordingSink::new();
    let orchestrator = Orchestrator::builder(transport.clone())
        .service(ServiceType::TokenGuard, "http://127.0.0.1:7002/optimize")
        .retry_policy(fixed_retries(3))
        .metrics(sink.clone())
        .build();

    let resp = orchestrator
        .handle(request("token_guard").with_timeout(Duration::from_millis(100)))
        .await;

    assert!(resp.success, "{:?}", resp.error);
    assert_eq!(resp.data.as_ref().unwrap()["tokens"], json!(12));
    assert_eq!(transport.call_count(), 3);
    assert_eq!(sink.retries(), vec![1, 2]);

    let breaker = orchestrator.breakers().get(ServiceType::TokenGuard);
    assert_eq!(breaker.failure_count(), 0);
    assert_eq!(breaker.state(), CircuitState::Closed);

    // 100ms + 1s + 100ms + 2s + success
    assert!((resp.processing_time - 3.2).abs() < 0.01, "took {}s", resp.processing_time);
}

#[tokio::test(start_paused = true)]
async fn test_retry_bound_reports_exhaustion() {
    let transport = ScriptedTransport::new(Step::Reply(503, json!({ "error": "overloaded" })));
    let orchestrator = Orchestrator::builder(transport.clone())
        .service(ServiceType::HealthGuard, "http://127.0.0.1:7005")
        .retry_policy(fixed_retries(3))
        .build();

    let resp = orchestrator.handle(request("health_guard")).await;
    assert_eq!(resp.error_code, Some(ErrorCode::RetryExhausted));
    assert!(resp.error.as_deref().unwrap().contains("overloaded"));
    assert_eq!(transport.call_count(), 3);
    assert_eq!(orchestrator.breakers().get(ServiceType::HealthGuard).failure_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_single_attempt_policy_keeps_timeout_code() {
    let transport = ScriptedTransport::new(Step::Hang);
    let orchestrator = Orchestrator::builder(transport)
        .service(ServiceType::TokenGuard, "http://127.0.0.1:7002")
        .retry_policy(RetryPolicy::no_retry())
        .default_timeout(Duration::from_secs(2))
        .build();

    let resp = orchestrator.handle(request("token_guard")).await;
    assert_eq!(resp.error_code, Some(ErrorCode::Timeout));
}

#[tokio::test(start_paused = true)]
async fn test_non_retryable_backend_error_is_not_retried() {
    let transport = ScriptedTransport::new(Step::Reply(400, json!("payload rejected")));
    let sink = RecordingSink::new();
    let orchestrator = Orchestrator::builder(transport.clone())
        .service(ServiceType::SecurityGuard, "http://127.0.0.1:7006")
        .retry_policy(fixed_retries(3))
        .metrics(sink.clone())
        .build();

    let resp = orchestrator.handle(request("security_guard")).await;
    assert_eq!(resp.error_code, Some(ErrorCode::BackendError));
    assert_eq!(transport.call_count(), 1);
    assert!(sink.retries().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_circuit_opening_mid_retry_aborts() {
    let transport = ScriptedTransport::new(Step::refused());
    let orchestrator = Orchestrator::builder(transport.clone())
        .service(ServiceType::ContextGuard, "http://127.0.0.1:7004")
        .retry_policy(fixed_retries(3))
        .breaker_defaults(breaker(1))
        .build();

    let resp = orchestrator.handle(request("context_guard")).await;
    assert_eq!(resp.error_code, Some(ErrorCode::CircuitOpen));
    assert_eq!(transport.call_count(), 1);
}

/// Trip the trust_guard breaker with one refused call, then wait out recovery.
async fn open_then_recover(orchestrator: &Orchestrator) {
    let resp = orchestrator.handle(request("trust_guard")).await;
    assert_eq!(resp.error_code, Some(ErrorCode::BackendError));
    assert_eq!(
        orchestrator.breakers().get(ServiceType::TrustGuard).state(),
        CircuitState::Open
    );
    tokio::time::sleep(Duration::from_secs(61)).await;
}

async fn wait_for_calls(transport: &ScriptedTransport, n: usize) {
    while transport.call_count() < n {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_half_open_dispatch_sends_one_trial_under_concurrency() {
    let transport = ScriptedTransport::with_script(
        vec![Step::refused()],
        Step::Delay(Duration::from_secs(5), Box::new(Step::ok(json!({ "trusted": true })))),
    );
    let orchestrator = Orchestrator::builder(transport.clone())
        .service(ServiceType::TrustGuard, "http://127.0.0.1:7001")
        .retry_policy(RetryPolicy::no_retry())
        .breaker_defaults(breaker(1))
        .build();
    open_then_recover(&orchestrator).await;

    let responses = join_all((0..5).map(|_| orchestrator.handle(request("trust_guard")))).await;

    let served = responses.iter().filter(|r| r.success).count();
    let rejected = responses
        .iter()
        .filter(|r| r.error_code == Some(ErrorCode::CircuitOpen))
        .count();
    assert_eq!((served, rejected), (1, 4));
    assert_eq!(transport.call_count(), 2);
    assert_eq!(orchestrator.breakers().get(ServiceType::TrustGuard).snapshot().success_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_trial_frees_half_open_slot() {
    let transport = ScriptedTransport::with_script(
        vec![
            Step::refused(),
            Step::Delay(Duration::from_secs(10), Box::new(Step::ok(json!({})))),
        ],
        Step::ok(json!({ "trusted": true })),
    );
    let orchestrator = Orchestrator::builder(transport.clone())
        .service(ServiceType::TrustGuard, "http://127.0.0.1:7001")
        .retry_policy(RetryPolicy::no_retry())
        .breaker_defaults(breaker(1))
        .build();
    open_then_recover(&orchestrator).await;

    let cancelled = tokio::time::timeout(
        Duration::from_secs(1),
        orchestrator.handle(request("trust_guard")),
    )
    .await;
    assert!(cancelled.is_err());

    let breaker = orchestrator.breakers().get(ServiceType::TrustGuard);
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    let resp = orchestrator.handle(request("trust_guard")).await;
    assert!(resp.success, "{:?}", resp.error);
    assert_eq!(transport.call_count(), 3);
    assert_eq!(breaker.snapshot().success_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_late_closed_completion_leaves_trial_alone() {
    let transport = ScriptedTransport::with_script(
        vec![
            Step::Delay(Duration::from_secs(100), Box::new(Step::ok(json!({})))),
            Step::refused(),
            Step::Delay(Duration::from_secs(60), Box::new(Step::ok(json!({})))),
        ],
        Step::ok(json!({})),
    );
    let orchestrator = Arc::new(
        Orchestrator::builder(transport.clone())
            .service(ServiceType::BiasGuard, "http://127.0.0.1:7003")
            .retry_policy(RetryPolicy::no_retry())
            .breaker_defaults(breaker(1))
            .default_timeout(Duration::from_secs(300))
            .build(),
    );
    let spawn_call = |orchestrator: Arc<Orchestrator>| {
        tokio::spawn(async move { orchestrator.handle(request("bias_guard")).await })
    };

    // Admitted while closed; finishes at t=100s.
    let slow = spawn_call(orchestrator.clone());
    wait_for_calls(&transport, 1).await;

    let resp = orchestrator.handle(request("bias_guard")).await;
    assert_eq!(resp.error_code, Some(ErrorCode::BackendError));
    tokio::time::sleep(Duration::from_secs(61)).await;

    // Trial admitted at t=61s; finishes at t=121s.
    let trial = spawn_call(orchestrator.clone());
    wait_for_calls(&transport, 3).await;

    assert!(slow.await.unwrap().success);
    let breaker = orchestrator.breakers().get(ServiceType::BiasGuard);
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
    assert_eq!(breaker.snapshot().success_count, 0);

    let blocked = orchestrator.handle(request("bias_guard")).await;
    assert_eq!(blocked.error_code, Some(ErrorCode::CircuitOpen));
    assert_eq!(transport.call_count(), 3);

    assert!(trial.await.unwrap().success);
    assert_eq!(breaker.snapshot().success_count, 1);
}

#[tokio::test]
async fn test_fallback_served_when_circuit_open() {
    let transport = ScriptedTransport::new(Step::refused());
    let mut data = Map::new();
    data.insert("bias_score".into(), json!(0.0));

    let orchestrator = Orchestrator::builder(transport.clone())
        .service(ServiceType::BiasGuard, "http://127.0.0.1:7003")
        .retry_policy(RetryPolicy::no_retry())
        .breaker_defaults(breaker(1))
        .fallback(ServiceType::BiasGuard, Arc::new(StaticFallback::new(data)))
        .build();

    // Trip the breaker.
    let first = orchestrator.handle(request("bias_guard")).await;
    assert_eq!(first.error_code, Some(ErrorCode::BackendError));
    assert_eq!(
        orchestrator.breakers().get(ServiceType::BiasGuard).state(),
        CircuitState::Open
    );

    let resp = orchestrator
        .handle(request("bias_guard").with_fallback(true))
        .await;
    assert!(resp.success);
    assert!(resp.fallback_used);
    assert!(resp.is_consistent());
    let data = resp.data.unwrap();
    assert_eq!(data["bias_score"], json!(0.0));
    assert_eq!(data["fallback_reason"], json!("CIRCUIT_OPEN"));
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn test_fallback_not_used_unless_requested() {
    let transport = ScriptedTransport::new(Step::refused());
    let orchestrator = Orchestrator::builder(transport)
        .service(ServiceType::BiasGuard, "http://127.0.0.1:7003")
        .retry_policy(RetryPolicy::no_retry())
        .fallback(ServiceType::BiasGuard, Arc::new(StaticFallback::new(Map::new())))
        .build();

    let resp = orchestrator.handle(request("bias_guard")).await;
    assert!(!resp.success);
    assert!(!resp.fallback_used);
}

#[tokio::test]
async fn test_failing_fallback_keeps_original_code() {
    let transport = ScriptedTransport::new(Step::ok(json!({})));
    let failing = |_: &OrchestrationRequest, _: &GuardError| Err::<Map<String, Value>, String>("cache cold".into());
    let orchestrator = Orchestrator::builder(transport)
        .fallback(ServiceType::TrustGuard, Arc::new(failing))
        .build();

    let resp = orchestrator
        .handle(request("trust_guard").with_fallback(true))
        .await;
    assert!(!resp.success);
    assert!(resp.is_consistent());
    assert_eq!(resp.error_code, Some(ErrorCode::ServiceUnavailable));
    assert!(resp.error.as_deref().unwrap().contains("cache cold"));
}

fn escalation_config() -> EscalationConfig {
    EscalationConfig {
        enabled: true,
        target_url: "http://forensics.internal/v1/analyze".into(),
        timeout_ms: 5000,
    }
}

#[tokio::test(start_paused = true)]
async fn test_slow_escalation_does_not_delay_response() {
    let backend = ScriptedTransport::new(Step::Reply(500, json!({ "error": "crashed" })));
    let forensics = ScriptedTransport::new(Step::Delay(
        Duration::from_secs(60),
        Box::new(Step::ok(json!({ "analysis_id": "late" }))),
    ));
    let sink = RecordingSink::new();
    let (hook, mut reports) = EscalationHook::new(&escalation_config(), forensics.clone(), sink.clone());

    let orchestrator = Orchestrator::builder(backend)
        .service(ServiceType::TrustGuard, "http://127.0.0.1:7001")
        .retry_policy(RetryPolicy::no_retry())
        .metrics(sink.clone())
        .escalation(hook)
        .build();

    let start = tokio::time::Instant::now();
    let resp = orchestrator
        .handle(request("trust_guard").with_request_id("crit-1"))
        .await;
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(resp.error_code, Some(ErrorCode::BackendError));
    assert!(reports.try_recv().is_err());

    let report = reports.recv().await.unwrap();
    assert_eq!(report.service, ServiceType::TrustGuard);
    assert_eq!(report.request_id, "crit-1");
    assert_eq!(report.error_code, Some(ErrorCode::BackendError));
    assert!(report.analysis.is_none());
    assert_eq!(forensics.call_count(), 1);
    assert_eq!(forensics.calls()[0].body["error_code"], json!("BACKEND_ERROR"));
    assert!(sink.events().contains(&MetricEvent::Escalation {
        service: "trust_guard".into(),
        delivered: false,
    }));
}

#[tokio::test(start_paused = true)]
async fn test_non_critical_failure_is_not_escalated() {
    let backend = ScriptedTransport::new(Step::Reply(404, Value::Null));
    let forensics = ScriptedTransport::new(Step::ok(json!({})));
    let (hook, mut reports) = EscalationHook::new(
        &escalation_config(),
        forensics.clone(),
        RecordingSink::new(),
    );

    let orchestrator = Orchestrator::builder(backend)
        .service(ServiceType::TrustGuard, "http://127.0.0.1:7001")
        .retry_policy(RetryPolicy::no_retry())
        .escalation(hook)
        .build();

    let resp = orchestrator.handle(request("trust_guard")).await;
    assert_eq!(resp.error_code, Some(ErrorCode::BackendError));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(reports.try_recv().is_err());
    assert_eq!(forensics.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_escalation_runs_even_when_fallback_served() {
    let backend = ScriptedTransport::new(Step::Hang);
    let forensics = ScriptedTransport::new(Step::ok(json!({ "analysis_id": "fa-1" })));
    let (hook, mut reports) = EscalationHook::new(
        &escalation_config(),
        forensics,
        RecordingSink::new(),
    );

    let orchestrator = Orchestrator::builder(backend)
        .service(ServiceType::HealthGuard, "http://127.0.0.1:7005")
        .retry_policy(fixed_retries(2))
        .default_timeout(Duration::from_millis(200))
        .fallback(ServiceType::HealthGuard, Arc::new(StaticFallback::new(Map::new())))
        .escalation(hook)
        .build();

    let resp = orchestrator
        .handle(request("health_guard").with_fallback(true))
        .await;
    assert!(resp.success);
    assert!(resp.fallback_used);

    let report = reports.recv().await.unwrap();
    assert_eq!(report.error_code, Some(ErrorCode::RetryExhausted));
    assert_eq!(report.analysis.unwrap().analysis_id.as_deref(), Some("fa-1"));
}

#[tokio::test]
async fn test_custom_critical_predicate() {
    let backend = ScriptedTransport::new(Step::Reply(404, Value::Null));
    let forensics = ScriptedTransport::new(Step::ok(json!({})));
    let (hook, mut reports) = EscalationHook::new(
        &escalation_config(),
        forensics,
        RecordingSink::new(),
    );

    let orchestrator = Orchestrator::builder(backend)
        .service(ServiceType::SecurityGuard, "http://127.0.0.1:7006")
        .retry_policy(RetryPolicy::no_retry())
        .critical_predicate(Arc::new(|e: &GuardError| {
            matches!(e.root(), GuardError::Backend { status: 404, .. })
        }))
        .escalation(hook)
        .build();

    orchestrator.handle(request("security_guard")).await;
    let report = reports.recv().await.unwrap();
    assert_eq!(report.service, ServiceType::SecurityGuard);
}
