//! Background service discovery.
//!
//! # Responsibilities
//! - Define the pluggable `DiscoverySource` seam
//! - Probe a fixed candidate list over HTTP (`HttpProbeSource`)
//! - Run `ServiceRegistry::discover` on an interval until shutdown

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::config::DiscoveryConfig;
use crate::lifecycle::shutdown::join_with_grace;
use crate::registry::entry::{EntryOrigin, ServiceEntry};
use crate::registry::store::{DiscoveryReport, ServiceRegistry};
use crate::transport::GuardTransport;

/// Produces the entries one discovery pass found.
pub trait DiscoverySource: Send + Sync {
    fn discover(&self) -> BoxFuture<'_, Vec<ServiceEntry>>;
}

/// Fixed list of entries, swappable at runtime.
#[derive(Debug, Default)]
pub struct StaticSource {
    entries: Mutex<Vec<ServiceEntry>>,
}

impl StaticSource {
    pub fn new(entries: Vec<ServiceEntry>) -> Self {
        Self {
            entries: Mutex::new(entries),
        }
    }

    pub fn set(&self, entries: Vec<ServiceEntry>) {
        *self.entries.lock().unwrap_or_else(PoisonError::into_inner) = entries;
    }
}

impl DiscoverySource for StaticSource {
    fn discover(&self) -> BoxFuture<'_, Vec<ServiceEntry>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner).clone();
        async move { entries }.boxed()
    }
}

/// Probes each candidate with `GET {base_url}{probe_path}`; a 2xx within the
/// probe timeout means the candidate is reachable.
pub struct HttpProbeSource {
    candidates: Vec<ServiceEntry>,
    probe_path: String,
    probe_timeout: Duration,
    transport: Arc<dyn GuardTransport>,
}

impl HttpProbeSource {
    pub fn new(
        candidates: Vec<ServiceEntry>,
        probe_path: impl Into<String>,
        probe_timeout: Duration,
        transport: Arc<dyn GuardTransport>,
    ) -> Self {
        Self {
            candidates,
            probe_path: probe_path.into(),
            probe_timeout,
            transport,
        }
    }

    /// Build from the `[discovery]` section. Invalid candidates are dropped with a warning.
    pub fn from_config(config: &DiscoveryConfig, transport: Arc<dyn GuardTransport>) -> Self {
        let candidates = config
            .candidates
            .iter()
            .filter_map(|c| {
                let entry = ServiceEntry::parse(&c.name, &c.base_url, c.metadata.clone(), EntryOrigin::Discovered);
                if entry.is_none() {
                    tracing::warn!(service = %c.name, location = %c.base_url, "Ignoring invalid discovery candidate");
                }
                entry
            })
            .collect();
        Self::new(
            candidates,
            config.probe_path.clone(),
            Duration::from_millis(config.probe_timeout_ms),
            transport,
        )
    }

    async fn probe(&self, candidate: &ServiceEntry) -> bool {
        let url = match candidate.base_url.join(&self.probe_path) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(service = %candidate.service_name, error = %e, "Cannot build probe URL");
                return false;
            }
        };

        match time::timeout(self.probe_timeout, self.transport.probe(url)).await {
            Ok(Ok(status)) if (200..300).contains(&status) => true,
            Ok(Ok(status)) => {
                tracing::debug!(service = %candidate.service_name, status, "Probe failed: non-success status");
                false
            }
            Ok(Err(e)) => {
                tracing::debug!(service = %candidate.service_name, error = %e, "Probe failed: connection error");
                false
            }
            Err(_) => {
                tracing::debug!(service = %candidate.service_name, "Probe failed: timeout");
                false
            }
        }
    }
}

impl DiscoverySource for HttpProbeSource {
    fn discover(&self) -> BoxFuture<'_, Vec<ServiceEntry>> {
        async move {
            let mut found = Vec::new();
            for candidate in &self.candidates {
                if self.probe(candidate).await {
                    let mut metadata: HashMap<String, String> = candidate.metadata.clone();
                    metadata.entry("discovered_via".into()).or_insert_with(|| self.probe_path.clone());
                    found.push(ServiceEntry::new(
                        candidate.service_name.clone(),
                        candidate.base_url.clone(),
                        metadata,
                        EntryOrigin::Discovered,
                    ));
                }
            }
            found
        }
        .boxed()
    }
}

/// Periodic discovery loop.
pub struct DiscoveryTask {
    registry: Arc<ServiceRegistry>,
    interval: Duration,
}

impl DiscoveryTask {
    pub fn new(registry: Arc<ServiceRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    /// Spawn the loop. It ends on the process shutdown broadcast or on
    /// `DiscoveryHandle::stop`, whichever comes first.
    pub fn spawn(
        self,
        mut shutdown: broadcast::Receiver<()>,
    ) -> (DiscoveryHandle, mpsc::UnboundedReceiver<DiscoveryReport>) {
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let join = tokio::spawn(async move {
            tracing::info!(interval = ?self.interval, "Discovery task starting");
            let mut ticker = time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let (_, report) = self.registry.discover_with_report().await;
                        // Receiver may be gone; discovery keeps running regardless.
                        let _ = report_tx.send(report);
                    }
                    _ = shutdown.recv() => {
                        tracing::info!("Discovery task received shutdown signal, exiting loop");
                        break;
                    }
                    _ = &mut stop_rx => {
                        tracing::info!("Discovery task stopped");
                        break;
                    }
                }
            }
        });

        (
            DiscoveryHandle {
                stop: Some(stop_tx),
                join,
            },
            report_rx,
        )
    }
}

/// Owner handle for a running `DiscoveryTask`.
pub struct DiscoveryHandle {
    stop: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl DiscoveryHandle {
    /// Signal the loop, wait at most `grace`, then abort. Returns true if it
    /// exited on its own.
    pub async fn stop(mut self, grace: Duration) -> bool {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        join_with_grace("discovery", self.join, grace).await
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}
