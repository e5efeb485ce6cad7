use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::http::response::bad_request;
use crate::http::server::AppState;
use crate::orchestrator::OrchestrationRequest;
use crate::registry::{EntryOrigin, ServiceEntry};
use crate::resilience::CircuitSnapshot;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub services: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceView {
    pub name: String,
    pub location: String,
    pub origin: EntryOrigin,
    pub metadata: HashMap<String, String>,
}

impl From<&ServiceEntry> for ServiceView {
    fn from(entry: &ServiceEntry) -> Self {
        Self {
            name: entry.service_name.clone(),
            location: entry.location().to_string(),
            origin: entry.origin,
            metadata: entry.metadata.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterService {
    pub name: String,
    #[serde(alias = "location")]
    pub url: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

pub async fn get_health(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        services: state.orchestrator.registry().len(),
    })
}

/// `POST /v1/orchestrate`. A body without `request_id` takes the one from the
/// `x-request-id` header.
pub async fn orchestrate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut body): Json<Value>,
) -> Response {
    if let Value::Object(map) = &mut body {
        if !map.contains_key("request_id") {
            if let Some(id) = headers.get("x-request-id").and_then(|v| v.to_str().ok()) {
                map.insert("request_id".into(), Value::String(id.to_string()));
            }
        }
    }

    let request: OrchestrationRequest = match serde_json::from_value(body) {
        Ok(r) => r,
        Err(e) => {
            tracing::debug!(error = %e, "Malformed orchestration request");
            return bad_request(format!("invalid request: {}", e));
        }
    };

    state.orchestrator.handle(request).await.into_response()
}

pub async fn list_services(State(state): State<AppState>) -> Json<Vec<ServiceView>> {
    let snapshot = state.orchestrator.registry().snapshot();
    let mut views: Vec<ServiceView> = snapshot.values().map(ServiceView::from).collect();
    views.sort_by(|a, b| a.name.cmp(&b.name));
    Json(views)
}

pub async fn register_service(
    State(state): State<AppState>,
    Json(body): Json<RegisterService>,
) -> Response {
    let registry = state.orchestrator.registry();
    if !registry.register(&body.name, &body.url, body.metadata) {
        return bad_request("name and an absolute url are required");
    }
    match registry.resolve(body.name.trim()) {
        Some(entry) => (StatusCode::CREATED, Json(ServiceView::from(&entry))).into_response(),
        None => StatusCode::CREATED.into_response(),
    }
}

pub async fn unregister_service(State(state): State<AppState>, Path(name): Path<String>) -> StatusCode {
    if state.orchestrator.registry().unregister(&name) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

pub async fn list_circuits(State(state): State<AppState>) -> Json<Vec<CircuitSnapshot>> {
    Json(state.orchestrator.breakers().snapshots())
}
