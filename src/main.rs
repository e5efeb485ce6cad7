//! Guard Service Orchestration Core (v1)
//!
//! Routes requests to independent guard services and protects callers and
//! backends from cascading failure.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────────────┐
//!                     │                    GUARD ORCHESTRATOR                    │
//!                     │                                                          │
//!   Caller request    │  ┌─────────┐    ┌──────────────┐    ┌──────────────┐     │
//!   ──────────────────┼─▶│  http   │───▶│ orchestrator │───▶│   registry   │     │
//!                     │  │ adapter │    │  dispatcher  │    │ (+discovery) │     │
//!                     │  └─────────┘    └──────┬───────┘    └──────────────┘     │
//!                     │                        │                                 │
//!                     │                        ▼                                 │
//!                     │                 ┌──────────────┐                         │
//!                     │                 │  resilience  │ breaker/retry/timeout   │
//!                     │                 └──────┬───────┘                         │
//!                     │                        ▼                                 │
//!   Caller response   │  ┌─────────┐    ┌──────────────┐                         │
//!   ◀─────────────────┼──│response │◀───│  transport   │◀────────────────────────┼── Guard
//!                     │  └─────────┘    └──────────────┘                         │   service
//!                     │                                                          │
//!                     │  config · observability · escalation · lifecycle         │
//!                     └──────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use guard_orchestrator::config::loader::load_with_env;
use guard_orchestrator::config::watcher::ConfigWatcher;
use guard_orchestrator::http::HttpServer;
use guard_orchestrator::lifecycle::{join_with_grace, wait_for_signal, Shutdown};
use guard_orchestrator::observability::logging::init_logging;
use guard_orchestrator::observability::metrics::init_metrics;
use guard_orchestrator::observability::{MetricsSink, NoopSink, PrometheusSink};
use guard_orchestrator::orchestrator::Orchestrator;
use guard_orchestrator::registry::DiscoveryTask;
use guard_orchestrator::transport::HttpTransport;

#[derive(Parser)]
#[command(name = "guard-orchestrator")]
#[command(about = "Guard service orchestration core", long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_with_env(args.config.as_deref())?;

    init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "guard-orchestrator starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        services = config.services.len(),
        discovery = config.discovery.enabled,
        escalation = config.escalation.enabled,
        "Configuration loaded"
    );

    let metrics: Arc<dyn MetricsSink> = if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
        Arc::new(PrometheusSink)
    } else {
        Arc::new(NoopSink)
    };

    let transport = Arc::new(HttpTransport::new());
    let (orchestrator, mut escalation_reports) = Orchestrator::from_config(&config, transport, metrics);
    let orchestrator = Arc::new(orchestrator);
    let registry = orchestrator.registry().clone();

    let shutdown = Shutdown::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));
    let grace = Duration::from_secs(config.shutdown.grace_secs);

    let mut stop = shutdown.subscribe();
    let escalation_logger = tokio::spawn(async move {
        loop {
            tokio::select! {
                report = escalation_reports.recv() => match report {
                    Some(report) => tracing::info!(
                        service = %report.service,
                        request_id = %report.request_id,
                        delivered = report.analysis.is_some(),
                        "Escalation finished"
                    ),
                    None => break,
                },
                _ = stop.recv() => break,
            }
        }
    });

    let discovery = if config.discovery.enabled {
        let (handle, mut reports) = DiscoveryTask::new(
            registry.clone(),
            Duration::from_secs(config.discovery.interval_secs),
        )
        .spawn(shutdown.subscribe());
        tokio::spawn(async move {
            while let Some(report) = reports.recv().await {
                if !report.skipped.is_empty() {
                    tracing::debug!(skipped = ?report.skipped, "Discovery left existing entries untouched");
                }
            }
        });
        Some(handle)
    } else {
        tracing::info!("Service discovery disabled");
        None
    };

    // Kept alive for the life of the process.
    let mut _watcher = None;
    let mut reloader = None;
    if let Some(path) = args.config.as_deref() {
        let (watcher, mut updates) = ConfigWatcher::new(path);
        match watcher.run() {
            Ok(w) => {
                _watcher = Some(w);
                let registry = registry.clone();
                let mut stop = shutdown.subscribe();
                reloader = Some(tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            update = updates.recv() => match update {
                                Some(new_config) => {
                                    registry.apply_configured(&new_config.services);
                                }
                                None => break,
                            },
                            _ = stop.recv() => break,
                        }
                    }
                }));
            }
            Err(e) => tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled"),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = HttpServer::new(orchestrator, &config.listener);
    let served = server.run(listener, shutdown.clone()).await;

    // The server may also stop on an I/O error; make sure everything else follows.
    shutdown.trigger();
    if let Some(handle) = discovery {
        handle.stop(grace).await;
    }
    join_with_grace("escalation-logger", escalation_logger, grace).await;
    if let Some(reloader) = reloader {
        join_with_grace("config-reloader", reloader, grace).await;
    }

    served?;
    tracing::info!("Shutdown complete");
    Ok(())
}
