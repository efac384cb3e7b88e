//! Registry of backup orchestrators.
//!
//! Holds one orchestrator per persisted backup config, keyed by config id.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{AppError, Result};
use crate::models::BackupConfig;
use crate::services::backup_orchestrator::{BackupOrchestrator, OrchestratorDeps};

/// Summary of a bootstrap pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    pub loaded: usize,
    pub started: usize,
    pub copies_deleted: usize,
    pub copies_rearmed: usize,
}

/// Backup registry
pub struct BackupRegistry {
    deps: OrchestratorDeps,
    orchestrators: Arc<RwLock<HashMap<String, BackupOrchestrator>>>,
}

impl BackupRegistry {
    pub fn new(deps: OrchestratorDeps) -> Self {
        Self {
            deps,
            orchestrators: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Load every persisted config, run its recovery sweep and start it.
    ///
    /// A config that fails to recover or start is logged and skipped.
    pub async fn bootstrap(&self) -> Result<BootstrapReport> {
        let configs = self
            .deps
            .store
            .list_configs()
            .await
            .map_err(|e| e.into_catalog())?;
        let mut report = BootstrapReport::default();

        for config in configs {
            let orchestrator = BackupOrchestrator::new(config, self.deps.clone());
            let id = orchestrator.id().to_string();
            report.loaded += 1;

            match orchestrator.recover().await {
                Ok(recovery) => {
                    report.copies_deleted += recovery.deleted.len();
                    report.copies_rearmed += recovery.rearmed.len();
                }
                Err(e) => warn!(config_id = %id, error = %e, "Recovery sweep failed"),
            }
            match orchestrator.start().await {
                Ok(()) => {
                    if orchestrator.status().await.is_schedulable() {
                        report.started += 1;
                    }
                }
                Err(e) => warn!(config_id = %id, error = %e, "Failed to start backup"),
            }
            self.orchestrators.write().await.insert(id, orchestrator);
        }

        info!(
            loaded = report.loaded,
            started = report.started,
            copies_deleted = report.copies_deleted,
            copies_rearmed = report.copies_rearmed,
            "Backup registry bootstrapped"
        );
        Ok(report)
    }

    /// Persist a new config and return its orchestrator, not yet started.
    pub async fn add(&self, config: BackupConfig) -> Result<BackupOrchestrator> {
        if self.orchestrators.read().await.contains_key(&config.id) {
            return Err(AppError::Validation(format!(
                "backup config {} already exists",
                config.id
            )));
        }
        let orchestrator = BackupOrchestrator::create(config, self.deps.clone()).await?;
        self.orchestrators
            .write()
            .await
            .insert(orchestrator.id().to_string(), orchestrator.clone());
        Ok(orchestrator)
    }

    pub async fn get(&self, id: &str) -> Result<BackupOrchestrator> {
        self.orchestrators
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("backup config {}", id)))
    }

    /// Orchestrators sorted by config id
    pub async fn list(&self) -> Vec<BackupOrchestrator> {
        let mut all: Vec<_> = self.orchestrators.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.id().cmp(b.id()));
        all
    }

    /// Cancel every timer and flush pending audit entries. Persisted status is kept.
    pub async fn shutdown(&self) {
        for orchestrator in self.orchestrators.read().await.values() {
            orchestrator.shutdown();
        }
        self.deps.scheduler.shutdown();
        self.deps.audit.flush().await;
        info!("Backup registry shut down");
    }
}
