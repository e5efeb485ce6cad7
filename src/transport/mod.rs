//! Outbound call boundary.
//!
//! The orchestrator only needs "POST this JSON body to this location and give
//! me back a status and a body". Deadlines are enforced by the caller, so an
//! implementation may block on I/O for as long as it likes.

use futures_util::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;
use url::Url;

pub mod http;

pub use http::HttpTransport;

/// One outbound request.
#[derive(Debug, Clone)]
pub struct BackendCall {
    pub url: Url,
    /// Correlation id, sent as `x-request-id`.
    pub request_id: String,
    pub body: Value,
}

/// Raw reply from a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendReply {
    pub status: u16,
    /// Parsed JSON body; `Value::Null` when the body was empty.
    pub body: Value,
}

impl BackendReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Connection refused, reset, DNS failure, ...
    #[error("connect error: {0}")]
    Connect(String),

    /// The request could not be built.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The response body could not be read or decoded.
    #[error("body error: {0}")]
    Body(String),
}

/// Pluggable network capability used for guard calls, discovery probes and escalation.
pub trait GuardTransport: Send + Sync {
    /// POST `call.body` as JSON to `call.url`.
    fn call(&self, call: BackendCall) -> BoxFuture<'static, Result<BackendReply, TransportError>>;

    /// GET `url`, returning only the status code.
    fn probe(&self, url: Url) -> BoxFuture<'static, Result<u16, TransportError>>;
}
