//! wsprwatch - multi-band WSPR decode coordinator
//!
//! Keeps one record/decode/publish loop running per configured band against
//! remote receivers, and serves read-only status and decode metrics.

mod config;
mod coordinator;
mod decoder;
mod metrics;
mod publish;
mod receiver;
mod web;

use config::{ServerConfig, StationConfig};
use coordinator::{CycleTiming, Manager, MetricsJanitor, WorkerContext};
use metrics::MetricsStore;
use publish::{SpotPublisher, WebhookPublisher};
use receiver::CommandReceiver;
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("wsprwatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting wsprwatch on port {}...", cfg.http_port);
    tracing::info!("Using station config at {}", cfg.config_path.display());

    let station = StationConfig::from_file(&cfg.config_path)?;
    let metrics = Arc::new(MetricsStore::new());

    let publisher: Option<Arc<dyn SpotPublisher>> = match &cfg.publish_url {
        Some(url) => {
            tracing::info!("Publishing spots to {}", url);
            Some(Arc::new(WebhookPublisher::new(url, station.receiver.clone())?))
        }
        None => {
            tracing::info!("No publish URL set, spots are only counted");
            None
        }
    };

    let manager = Arc::new(Manager::new(WorkerContext {
        decoder_path: cfg.decoder_path.clone(),
        work_dir: cfg.work_dir.clone(),
        identity: station.receiver.clone(),
        receiver: Arc::new(CommandReceiver::new(&cfg.recorder_path)),
        publisher,
        metrics: metrics.clone(),
        timing: CycleTiming::default(),
        keep_wav: cfg.keep_wav,
    })?);

    // Start workers and metrics cleanup
    manager.start_all(station).await;
    let janitor = MetricsJanitor::new(metrics.clone());
    janitor.start().await;

    tokio::spawn(reload_on_hangup(manager.clone(), cfg.clone()));

    // Serve until interrupted
    let server = Server::new(cfg.http_port, manager.clone(), metrics);
    tokio::select! {
        result = server.start() => {
            if let Err(e) = &result {
                tracing::error!("Web server failed: {}", e);
            }
            shutdown(&manager, &janitor).await;
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, shutting down");
            shutdown(&manager, &janitor).await;
        }
    }

    Ok(())
}

async fn shutdown(manager: &Manager, janitor: &MetricsJanitor) {
    manager.stop_all().await;
    janitor.stop().await;
}

/// Re-read the station config on SIGHUP and reconcile the running workers.
/// A config that fails to load leaves the running set as it is.
#[cfg(unix)]
async fn reload_on_hangup(manager: Arc<Manager>, cfg: ServerConfig) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangups = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("Live reload disabled: {}", e);
            return;
        }
    };

    while hangups.recv().await.is_some() {
        match StationConfig::from_file(&cfg.config_path) {
            Ok(station) => {
                tracing::info!("Reloading {}", cfg.config_path.display());
                manager.reload(station).await;
            }
            Err(e) => tracing::error!("Reload rejected: {}", e),
        }
    }
}

#[cfg(not(unix))]
async fn reload_on_hangup(_manager: Arc<Manager>, _cfg: ServerConfig) {}
