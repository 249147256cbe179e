//! Periodic metrics cleanup.

use crate::metrics::MetricsStore;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Background task that expires old metrics samples.
pub struct MetricsJanitor {
    metrics: Arc<MetricsStore>,
    interval: Duration,
    stop: Arc<Mutex<Option<tokio::sync::broadcast::Sender<()>>>>,
}

impl MetricsJanitor {
    pub fn new(metrics: Arc<MetricsStore>) -> Self {
        Self::with_interval(metrics, Duration::from_secs(60))
    }

    pub fn with_interval(metrics: Arc<MetricsStore>, interval: Duration) -> Self {
        Self {
            metrics,
            interval,
            stop: Arc::new(Mutex::new(None)),
        }
    }

    /// Start the cleanup background task.
    pub async fn start(&self) {
        let (tx, mut rx) = tokio::sync::broadcast::channel(1);
        {
            let mut stop = self.stop.lock().await;
            *stop = Some(tx);
        }

        let metrics = self.metrics.clone();
        let mut interval = tokio::time::interval(self.interval);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = interval.tick() => {
                        metrics.cleanup_old_data();
                        tracing::debug!("MetricsJanitor: expired old samples");
                    }
                }
            }
        });
    }

    /// Stop the cleanup task.
    pub async fn stop(&self) {
        let stop = self.stop.lock().await;
        if let Some(tx) = stop.as_ref() {
            let _ = tx.send(());
        }
    }
}
