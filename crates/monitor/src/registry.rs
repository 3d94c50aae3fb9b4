//! Arena of independent monitors keyed by run id.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use trainwatch_core::{ConfigError, MonitorConfig, RunStatus, TimelineEngine};

use crate::events::MonitorPhase;
use crate::manager::LogMonitor;

/// Type alias for the shared monitor map.
pub type MonitorMap = Arc<RwLock<HashMap<String, Arc<LogMonitor>>>>;

/// Owns one [`LogMonitor`] per run. Monitors share the configuration and the
/// compiled marker vocabulary, but no mutable state.
pub struct MonitorRegistry {
    config: Arc<MonitorConfig>,
    engine: Arc<TimelineEngine>,
    monitors: MonitorMap,
}

impl MonitorRegistry {
    pub fn new(config: MonitorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let engine = TimelineEngine::new(&config.vocabulary)?;
        Ok(Self {
            config: Arc::new(config),
            engine: Arc::new(engine),
            monitors: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Start monitoring `path` for `run_id`, replacing any loop already
    /// running for that run.
    pub async fn start(&self, run_id: &str, path: impl Into<PathBuf>) -> Arc<LogMonitor> {
        let monitor = {
            let mut monitors = self.monitors.write().await;
            monitors
                .entry(run_id.to_string())
                .or_insert_with(|| {
                    Arc::new(LogMonitor::with_engine(
                        run_id,
                        self.config.clone(),
                        self.engine.clone(),
                    ))
                })
                .clone()
        };
        // Outside the map lock: start() awaits the previous loop and a tail read.
        monitor.start(path).await;
        monitor
    }

    /// Stop and forget one run. Returns false if it was not registered.
    pub async fn stop(&self, run_id: &str) -> bool {
        let removed = self.monitors.write().await.remove(run_id);
        match removed {
            Some(monitor) => {
                monitor.stop().await;
                true
            }
            None => false,
        }
    }

    /// Stop and forget every run.
    pub async fn stop_all(&self) {
        let drained: Vec<_> = self.monitors.write().await.drain().collect();
        let count = drained.len();
        for (_, monitor) in drained {
            monitor.stop().await;
        }
        if count > 0 {
            info!(count, "Stopped all monitors");
        }
    }

    pub async fn get(&self, run_id: &str) -> Option<Arc<LogMonitor>> {
        self.monitors.read().await.get(run_id).cloned()
    }

    /// Registered run ids, sorted.
    pub async fn run_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.monitors.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Forward an external run result. Returns false for unknown runs.
    pub async fn set_run_status(&self, run_id: &str, status: Option<RunStatus>) -> bool {
        match self.get(run_id).await {
            Some(monitor) => {
                monitor.set_run_status(status);
                true
            }
            None => false,
        }
    }

    /// Drop monitors whose loop has exited on its own (finished runs).
    /// Returns the removed run ids.
    pub async fn prune_stopped(&self) -> Vec<String> {
        let mut monitors = self.monitors.write().await;
        let stopped: Vec<String> = monitors
            .iter()
            .filter(|(_, m)| m.phase() == MonitorPhase::Stopped)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stopped {
            monitors.remove(id);
        }
        stopped
    }
}
