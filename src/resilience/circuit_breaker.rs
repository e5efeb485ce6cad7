//! Circuit breaker for guard service protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: service assumed down, requests fail fast
//! - Half-Open: testing if service recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= failure_threshold
//! Open → Half-Open: first can_execute() after recovery_timeout
//! Half-Open → Closed: half_open_success_threshold consecutive trial successes
//! Half-Open → Open: any trial failure
//! ```
//!
//! One breaker per logical service. Half-Open admits a single trial call at a
//! time; concurrent callers are rejected until the trial resolves.
//!
//! Every admission carries the epoch it was granted in. A call admitted while
//! Closed that completes after the circuit moved on does not touch the newer
//! state, and a Half-Open trial that is dropped before completing frees its
//! slot for the next caller.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics::MetricsSink;
use crate::orchestrator::types::ServiceType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable thresholds for one breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub half_open_success_threshold: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_success_threshold: 3,
        }
    }
}

impl From<&CircuitBreakerConfig> for BreakerSettings {
    fn from(config: &CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            recovery_timeout: Duration::from_secs(config.recovery_timeout_secs),
            half_open_success_threshold: config.half_open_success_threshold.max(1),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
    /// Bumped on every transition. Outcomes stamped with an older epoch are dropped.
    epoch: u64,
    next_trial: u64,
    trial_in_flight: Option<u64>,
}

impl BreakerInner {
    fn enter(&mut self, to: CircuitState) -> CircuitState {
        let from = self.state;
        self.state = to;
        self.epoch += 1;
        self.trial_in_flight = None;
        from
    }

    fn claim_trial(&mut self) -> Admission {
        self.next_trial += 1;
        self.trial_in_flight = Some(self.next_trial);
        Admission {
            epoch: self.epoch,
            trial: Some(self.next_trial),
        }
    }

    fn is_current_trial(&self, admission: &Admission) -> bool {
        admission.trial.is_some() && admission.trial == self.trial_in_flight
    }
}

/// Ticket for one admitted attempt.
///
/// Hand it back through `record_success`, `record_failure` or `abandon`.
/// Its outcome only counts against the state it was admitted under.
#[derive(Debug)]
#[must_use]
pub struct Admission {
    epoch: u64,
    trial: Option<u64>,
}

impl Admission {
    /// True when this attempt is the Half-Open trial.
    pub fn is_trial(&self) -> bool {
        self.trial.is_some()
    }
}

/// Point-in-time view of a breaker, for introspection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitSnapshot {
    pub service: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    /// Seconds since the last recorded failure.
    pub since_last_failure_secs: Option<f64>,
}

/// Per-service failure gate.
pub struct CircuitBreaker {
    service: ServiceType,
    settings: BreakerSettings,
    inner: Mutex<BreakerInner>,
    metrics: Arc<dyn MetricsSink>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("service", &self.service)
            .field("settings", &self.settings)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(service: ServiceType, settings: BreakerSettings, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            service,
            settings,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_time: None,
                epoch: 0,
                next_trial: 0,
                trial_in_flight: None,
            }),
            metrics,
        }
    }

    pub fn service(&self) -> ServiceType {
        self.service
    }

    pub fn settings(&self) -> BreakerSettings {
        self.settings
    }

    // Counters stay meaningful after a panic elsewhere, so recover the guard.
    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// Decide whether an attempt may proceed right now.
    ///
    /// Side-effecting: performs the Open → Half-Open transition and claims the
    /// single trial slot. Call immediately before every attempt.
    pub fn can_execute(&self) -> Option<Admission> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Some(Admission {
                epoch: inner.epoch,
                trial: None,
            }),
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure_time
                    .map(|t| t.elapsed())
                    .unwrap_or(self.settings.recovery_timeout);
                if elapsed < self.settings.recovery_timeout {
                    return None;
                }
                inner.enter(CircuitState::HalfOpen);
                inner.success_count = 0;
                let admission = inner.claim_trial();
                drop(inner);
                self.transitioned(CircuitState::Open, CircuitState::HalfOpen);
                Some(admission)
            }
            CircuitState::HalfOpen if inner.trial_in_flight.is_some() => None,
            CircuitState::HalfOpen => Some(inner.claim_trial()),
        }
    }

    /// Admit an attempt, returning a permit that settles itself on drop.
    pub fn acquire(self: &Arc<Self>) -> Option<BreakerPermit> {
        self.can_execute().map(|admission| BreakerPermit {
            breaker: self.clone(),
            admission: Some(admission),
        })
    }

    pub fn record_success(&self, admission: Admission) {
        let mut inner = self.lock();
        if admission.epoch != inner.epoch {
            drop(inner);
            self.stale(&admission, "success");
            return;
        }
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen if inner.is_current_trial(&admission) => {
                inner.trial_in_flight = None;
                inner.success_count += 1;
                if inner.success_count >= self.settings.half_open_success_threshold {
                    inner.enter(CircuitState::Closed);
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    drop(inner);
                    self.transitioned(CircuitState::HalfOpen, CircuitState::Closed);
                }
            }
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self, admission: Admission) {
        let mut inner = self.lock();
        if admission.epoch != inner.epoch {
            drop(inner);
            self.stale(&admission, "failure");
            return;
        }
        match inner.state {
            CircuitState::Closed => {
                inner.last_failure_time = Some(Instant::now());
                inner.failure_count += 1;
                if inner.failure_count >= self.settings.failure_threshold {
                    inner.enter(CircuitState::Open);
                    let failures = inner.failure_count;
                    drop(inner);
                    tracing::warn!(
                        service = %self.service,
                        failures,
                        threshold = self.settings.failure_threshold,
                        "Failure threshold reached"
                    );
                    self.transitioned(CircuitState::Closed, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen if inner.is_current_trial(&admission) => {
                inner.last_failure_time = Some(Instant::now());
                inner.enter(CircuitState::Open);
                inner.success_count = 0;
                drop(inner);
                self.transitioned(CircuitState::HalfOpen, CircuitState::Open);
            }
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    /// Give back an admission whose attempt never completed.
    ///
    /// A trial slot is released so the next caller becomes the trial. Nothing
    /// is counted.
    pub fn abandon(&self, admission: Admission) {
        let mut inner = self.lock();
        if admission.epoch != inner.epoch || !inner.is_current_trial(&admission) {
            return;
        }
        inner.trial_in_flight = None;
        drop(inner);
        tracing::warn!(service = %self.service, "Trial call abandoned, releasing slot");
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        CircuitSnapshot {
            service: self.service.to_string(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            since_last_failure_secs: inner.last_failure_time.map(|t| t.elapsed().as_secs_f64()),
        }
    }

    fn stale(&self, admission: &Admission, outcome: &str) {
        tracing::debug!(
            service = %self.service,
            outcome,
            trial = admission.is_trial(),
            "Ignoring outcome admitted under an earlier circuit state"
        );
    }

    fn transitioned(&self, from: CircuitState, to: CircuitState) {
        tracing::info!(service = %self.service, from = %from, to = %to, "Circuit state changed");
        self.metrics
            .record_circuit_transition(self.service.as_str(), from, to);
    }
}

/// Admission bound to its breaker. Dropping it unsettled abandons the attempt.
#[derive(Debug)]
pub struct BreakerPermit {
    breaker: Arc<CircuitBreaker>,
    admission: Option<Admission>,
}

impl BreakerPermit {
    pub fn is_trial(&self) -> bool {
        self.admission.as_ref().is_some_and(Admission::is_trial)
    }

    pub fn success(mut self) {
        if let Some(admission) = self.admission.take() {
            self.breaker.record_success(admission);
        }
    }

    pub fn failure(mut self) {
        if let Some(admission) = self.admission.take() {
            self.breaker.record_failure(admission);
        }
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if let Some(admission) = self.admission.take() {
            self.breaker.abandon(admission);
        }
    }
}

/// Lazily-populated map of breakers, one per service.
pub struct CircuitBreakers {
    breakers: DashMap<ServiceType, Arc<CircuitBreaker>>,
    defaults: BreakerSettings,
    overrides: std::collections::HashMap<ServiceType, BreakerSettings>,
    metrics: Arc<dyn MetricsSink>,
}

impl CircuitBreakers {
    pub fn new(defaults: BreakerSettings, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            breakers: DashMap::new(),
            defaults,
            overrides: Default::default(),
            metrics,
        }
    }

    /// Use `settings` instead of the defaults for `service`.
    ///
    /// Only affects breakers created after the call.
    pub fn with_override(mut self, service: ServiceType, settings: BreakerSettings) -> Self {
        self.overrides.insert(service, settings);
        self
    }

    /// Fetch or create the breaker for `service`.
    pub fn get(&self, service: ServiceType) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(&service) {
            return existing.value().clone();
        }
        self.breakers
            .entry(service)
            .or_insert_with(|| {
                let settings = self.overrides.get(&service).copied().unwrap_or(self.defaults);
                tracing::debug!(service = %service, ?settings, "Creating circuit breaker");
                Arc::new(CircuitBreaker::new(service, settings, self.metrics.clone()))
            })
            .value()
            .clone()
    }

    /// Breaker for `service` if one has been created.
    pub fn peek(&self, service: ServiceType) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(&service).map(|r| r.value().clone())
    }

    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        let mut all: Vec<_> = self.breakers.iter().map(|r| r.value().snapshot()).collect();
        all.sort_by(|a, b| a.service.cmp(&b.service));
        all
    }
}
