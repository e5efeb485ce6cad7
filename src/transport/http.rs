//! HTTP/1.1 transport on hyper-util's pooled client.

use axum::body::Body;
use axum::http::{header, Method, Request};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use serde_json::Value;
use url::Url;

use crate::transport::{BackendCall, BackendReply, GuardTransport, TransportError};

/// Largest backend body the orchestrator will buffer.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

const USER_AGENT: &str = concat!("guard-orchestrator/", env!("CARGO_PKG_VERSION"));

/// Plain-HTTP client for guard services.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client<HttpConnector, Body>,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport").finish_non_exhaustive()
    }
}

impl HttpTransport {
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { client }
    }
}

fn decode_body(bytes: &[u8]) -> Result<Value, TransportError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(bytes).map_err(|e| TransportError::Body(format!("invalid JSON: {}", e)))
}

impl GuardTransport for HttpTransport {
    fn call(&self, call: BackendCall) -> BoxFuture<'static, Result<BackendReply, TransportError>> {
        let client = self.client.clone();
        async move {
            let payload = serde_json::to_vec(&call.body)
                .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;

            let request = Request::builder()
                .method(Method::POST)
                .uri(call.url.as_str())
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::USER_AGENT, USER_AGENT)
                .header("x-request-id", call.request_id.as_str())
                .body(Body::from(payload))
                .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;

            let response: hyper::Response<hyper::body::Incoming> = client
                .request(request)
                .await
                .map_err(|e| TransportError::Connect(e.to_string()))?;

            let status = response.status().as_u16();
            let bytes = axum::body::to_bytes(Body::new(response.into_body()), MAX_BODY_BYTES)
                .await
                .map_err(|e| TransportError::Body(e.to_string()))?;

            // Error bodies are often plain text; keep them readable instead of failing.
            let body = match decode_body(&bytes) {
                Ok(v) => v,
                Err(_) if !(200..300).contains(&status) => {
                    Value::String(String::from_utf8_lossy(&bytes).into_owned())
                }
                Err(e) => return Err(e),
            };

            tracing::debug!(url = %call.url, status, request_id = %call.request_id, "Backend replied");
            Ok(BackendReply { status, body })
        }
        .boxed()
    }

    fn probe(&self, url: Url) -> BoxFuture<'static, Result<u16, TransportError>> {
        let client = self.client.clone();
        async move {
            let request = Request::builder()
                .method(Method::GET)
                .uri(url.as_str())
                .header(header::USER_AGENT, "guard-orchestrator-discovery")
                .body(Body::empty())
                .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;

            let response = client
                .request(request)
                .await
                .map_err(|e| TransportError::Connect(e.to_string()))?;
            Ok(response.status().as_u16())
        }
        .boxed()
    }
}
