//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use url::Url;

use guard_orchestrator::observability::MetricsSink;
use guard_orchestrator::resilience::CircuitState;
use guard_orchestrator::transport::{BackendCall, BackendReply, GuardTransport, TransportError};

/// One scripted backend behavior.
#[derive(Debug, Clone)]
pub enum Step {
    Reply(u16, Value),
    Fail(TransportError),
    /// Never answers; only a deadline ends the call.
    Hang,
    Delay(Duration, Box<Step>),
}

impl Step {
    pub fn ok(body: Value) -> Self {
        Step::Reply(200, body)
    }

    pub fn status(status: u16) -> Self {
        Step::Reply(status, Value::Null)
    }

    pub fn refused() -> Self {
        Step::Fail(TransportError::Connect("connection refused".into()))
    }

    fn run(self) -> BoxFuture<'static, Result<BackendReply, TransportError>> {
        async move {
            match self {
                Step::Reply(status, body) => Ok(BackendReply { status, body }),
                Step::Fail(e) => Err(e),
                Step::Hang => std::future::pending::<Result<BackendReply, TransportError>>().await,
                Step::Delay(d, next) => {
                    tokio::time::sleep(d).await;
                    next.run().await
                }
            }
        }
        .boxed()
    }
}

/// In-process transport that plays back a script, then repeats `default`.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    default: Step,
    calls: Mutex<Vec<BackendCall>>,
    probes: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(default: Step) -> Arc<Self> {
        Self::with_script(Vec::new(), default)
    }

    pub fn with_script(script: Vec<Step>, default: Step) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            default,
            calls: Mutex::new(Vec::new()),
            probes: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

impl GuardTransport for ScriptedTransport {
    fn call(&self, call: BackendCall) -> BoxFuture<'static, Result<BackendReply, TransportError>> {
        self.calls.lock().unwrap().push(call);
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default.clone());
        step.run()
    }

    fn probe(&self, _url: Url) -> BoxFuture<'static, Result<u16, TransportError>> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        async { Ok(200) }.boxed()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricEvent {
    Request { service: String, success: bool },
    Retry { service: String, attempt: u32 },
    Transition { service: String, from: CircuitState, to: CircuitState },
    Escalation { service: String, delivered: bool },
}

/// Sink that keeps every event for assertions.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<MetricEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<MetricEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn retries(&self) -> Vec<u32> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                MetricEvent::Retry { attempt, .. } => Some(attempt),
                _ => None,
            })
            .collect()
    }

    pub fn transitions(&self) -> Vec<(CircuitState, CircuitState)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                MetricEvent::Transition { from, to, .. } => Some((from, to)),
                _ => None,
            })
            .collect()
    }
}

impl MetricsSink for RecordingSink {
    fn record_request(&self, service: &str, success: bool, _duration: Duration) {
        self.events.lock().unwrap().push(MetricEvent::Request {
            service: service.into(),
            success,
        });
    }

    fn record_retry(&self, service: &str, attempt: u32) {
        self.events.lock().unwrap().push(MetricEvent::Retry {
            service: service.into(),
            attempt,
        });
    }

    fn record_circuit_transition(&self, service: &str, from: CircuitState, to: CircuitState) {
        self.events.lock().unwrap().push(MetricEvent::Transition {
            service: service.into(),
            from,
            to,
        });
    }

    fn record_escalation(&self, service: &str, delivered: bool) {
        self.events.lock().unwrap().push(MetricEvent::Escalation {
            service: service.into(),
            delivered,
        });
    }
}

/// What the programmable backend saw.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    /// Request line plus headers.
    pub head: String,
    pub body: String,
}

impl SeenRequest {
    pub fn header(&self, name: &str) -> Option<String> {
        self.head.lines().skip(1).find_map(|line| {
            let (k, v) = line.split_once(':')?;
            k.trim().eq_ignore_ascii_case(name).then(|| v.trim().to_string())
        })
    }
}

async fn read_request(socket: &mut TcpStream) -> Option<SeenRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let content_length = head
        .lines()
        .find_map(|l| {
            let (k, v) = l.split_once(':')?;
            k.trim().eq_ignore_ascii_case("content-length").then(|| v.trim().parse::<usize>().ok())?
        })
        .unwrap_or(0);

    let body_start = head_end + 4;
    while buf.len() < body_start + content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body_end = buf.len().min(body_start + content_length);
    let body = String::from_utf8_lossy(&buf[body_start..body_end]).into_owned();
    Some(SeenRequest { head, body })
}

/// Start a programmable mock backend on an ephemeral port.
///
/// `f` receives each request and returns `(status, body)`.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(SeenRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let Some(seen) = read_request(&mut socket).await else {
                            return;
                        };
                        let (status, body) = f(seen).await;
                        let reason = axum::http::StatusCode::from_u16(status)
                            .ok()
                            .and_then(|s| s.canonical_reason())
                            .unwrap_or("Unknown");

                        let response_str = format!(
                            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status,
                            reason,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Backend that answers every request with the same status and body.
pub async fn start_mock_backend(status: u16, body: &'static str) -> SocketAddr {
    start_programmable_backend(move |_| async move { (status, body.to_string()) }).await
}
