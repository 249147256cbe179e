//! Coordinator owning one decode worker per enabled band.

mod cleanup;
mod worker;

pub use cleanup::*;
pub use worker::*;

#[cfg(test)]
pub(crate) use worker::tests as test_support;

use crate::config::{Band, StationConfig};

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Coordinator error types.
#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("failed to create work directory {path}: {source}")]
    WorkDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Snapshot returned by [`Manager::status`].
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatus {
    pub running: usize,
    pub active_bands: Vec<String>,
    pub workers: Vec<WorkerStatus>,
}

struct ManagerState {
    config: Arc<StationConfig>,
    workers: HashMap<String, Arc<BandWorker>>,
}

/// Starts, reconciles and stops band workers.
///
/// All mutations go through one write lock, so there is never more than one
/// worker per band name.
pub struct Manager {
    ctx: WorkerContext,
    state: RwLock<ManagerState>,
}

impl Manager {
    /// Create a manager, making sure the base work directory exists.
    pub fn new(ctx: WorkerContext) -> Result<Self, ManagerError> {
        std::fs::create_dir_all(&ctx.work_dir).map_err(|source| ManagerError::WorkDir {
            path: ctx.work_dir.clone(),
            source,
        })?;

        Ok(Self {
            ctx,
            state: RwLock::new(ManagerState {
                config: Arc::new(StationConfig::default()),
                workers: HashMap::new(),
            }),
        })
    }

    /// Start a worker for every enabled band in `config`.
    ///
    /// A band that cannot start is logged and skipped; the rest still start.
    /// Bands that already have a worker are left alone.
    pub async fn start_all(&self, config: StationConfig) {
        let mut state = self.state.write().await;
        let config = Arc::new(config);

        let bands: BTreeMap<String, Band> = config.enabled_bands().into_iter().collect();
        tracing::info!("Manager: starting {} bands", bands.len());

        for band in bands.values() {
            if state.workers.contains_key(&band.name) {
                continue;
            }
            self.start_band(&mut state.workers, &config, band).await;
        }

        state.config = config;
    }

    /// Reconcile running workers with `config`.
    ///
    /// Removed or disabled bands are stopped. Bands whose frequency or
    /// receiver changed are restarted. New bands, and enabled bands without a
    /// worker, are started. Everything else keeps running untouched.
    pub async fn reload(&self, config: StationConfig) {
        let mut state = self.state.write().await;
        let config = Arc::new(config);

        let old_bands = state.config.enabled_bands();
        let new_bands: BTreeMap<String, Band> = config.enabled_bands().into_iter().collect();

        let mut restart = HashSet::new();
        // Workers, not the old config, decide what is running.
        let mut removed: Vec<String> = state
            .workers
            .keys()
            .filter(|name| !new_bands.contains_key(*name))
            .cloned()
            .collect();
        removed.sort();

        for name in removed {
            if let Some(worker) = state.workers.remove(&name) {
                tracing::info!("Manager: band {} removed", name);
                worker.stop();
            }
        }

        for (name, band) in &new_bands {
            let changed = match state.workers.get(name) {
                Some(worker) => {
                    worker.band().differs_from(band)
                        || config
                            .instance_for(band)
                            .map(|i| i != worker.instance())
                            .unwrap_or(true)
                }
                None => continue,
            };

            if changed {
                tracing::info!("Manager: band {} changed, restarting", name);
                if let Some(worker) = state.workers.remove(name) {
                    worker.stop();
                }
                restart.insert(name.clone());
            }
        }

        let mut started = 0;
        for (name, band) in &new_bands {
            if state.workers.contains_key(name) {
                continue;
            }
            if !restart.contains(name) && old_bands.contains_key(name) {
                tracing::info!("Manager: retrying band {}", name);
            }
            if self.start_band(&mut state.workers, &config, band).await {
                started += 1;
            }
        }

        state.config = config;
        tracing::info!(
            "Manager: reload done, {} started, {} running",
            started,
            state.workers.len()
        );
    }

    /// Stop every worker.
    pub async fn stop_all(&self) {
        let mut state = self.state.write().await;
        for (_, worker) in state.workers.drain() {
            worker.stop();
        }
        tracing::info!("Manager: all workers stopped");
    }

    pub async fn status(&self) -> ManagerStatus {
        let state = self.state.read().await;
        let mut workers: Vec<WorkerStatus> = state.workers.values().map(|w| w.status()).collect();
        workers.sort_by(|a, b| a.band.cmp(&b.band));

        ManagerStatus {
            running: workers.len(),
            active_bands: workers.iter().map(|w| w.band.clone()).collect(),
            workers,
        }
    }

    async fn start_band(
        &self,
        workers: &mut HashMap<String, Arc<BandWorker>>,
        config: &StationConfig,
        band: &Band,
    ) -> bool {
        let instance = match config.instance_for(band) {
            Ok(instance) => instance.clone(),
            Err(e) => {
                tracing::error!("Manager: skipping band {}: {}", band.name, e);
                return false;
            }
        };

        let worker = BandWorker::new(band.clone(), instance, self.ctx.clone());
        match worker.start().await {
            Ok(()) => {
                workers.insert(band.name.clone(), worker);
                true
            }
            Err(e) => {
                tracing::error!("Manager: failed to start band {}: {}", band.name, e);
                false
            }
        }
    }
}
