//! CLI command runner.
//!
//! Wires the filesystem store and source connector into the services and
//! executes one `KeeperCommand`.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;

use crate::cli::keeper::{output, table_row, KeeperCli, KeeperCommand};
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::{BackupConfig, BackupStatus};
use crate::services::audit_service::AuditService;
use crate::services::backup_orchestrator::{BackupOrchestrator, OrchestratorDeps};
use crate::services::event_bus::EventBus;
use crate::services::registry_service::BackupRegistry;
use crate::services::scheduler_service::Scheduler;
use crate::source::FilesystemConnector;
use crate::storage::{FilesystemStore, LocalStore};

/// Run a CLI command against the configured store and source root
pub async fn run(cli: KeeperCli, config: Config) -> Result<()> {
    let store: Arc<dyn LocalStore> = Arc::new(FilesystemStore::new(&config.store_path));
    if let Some(ref path) = config.backup_configs {
        let seeded = seed_configs(store.as_ref(), Path::new(path)).await?;
        if seeded > 0 {
            tracing::info!(seeded, path = %path, "Seeded backup configs");
        }
    }

    let bus = Arc::new(EventBus::new(config.event_bus_capacity));
    let deps = OrchestratorDeps {
        store: store.clone(),
        connector: Arc::new(FilesystemConnector::new(&config.source_root)),
        scheduler: Scheduler::new(),
        audit: AuditService::spawn(store),
        notifier: bus.clone(),
    };
    let format = cli.format.as_str();

    match cli.command {
        KeeperCommand::Serve => serve(deps, &bus).await,
        KeeperCommand::Status => run_status(format, &deps).await,
        KeeperCommand::RunNow { id } => {
            let orchestrator = load(&deps, &id).await?;
            let result = run_now(format, &orchestrator).await;
            finish(&deps).await;
            result
        }
        KeeperCommand::Copies { id } => {
            let orchestrator = load(&deps, &id).await?;
            run_copies(format, &orchestrator).await
        }
        KeeperCommand::DeleteCopy { id, name } => {
            let orchestrator = load(&deps, &id).await?;
            let result = orchestrator.delete_copy(&name).await;
            finish(&deps).await;
            result?;
            output(
                format,
                &format!("Deleted backup copy {}", name),
                Some(serde_json::json!({ "config_id": id, "deleted": name })),
            );
            Ok(())
        }
        KeeperCommand::Logs { id } => {
            let orchestrator = load(&deps, &id).await?;
            run_logs(format, &orchestrator).await
        }
    }
}

/// Store every config from the JSON file at `path` whose id is not already persisted.
pub async fn seed_configs(store: &dyn LocalStore, path: &Path) -> Result<usize> {
    let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
        AppError::Config(format!("Failed to read {}: {}", path.display(), e))
    })?;
    let configs: Vec<BackupConfig> = serde_json::from_str(&contents)?;

    let mut seeded = 0;
    for config in configs {
        if store.get_config(&config.id).await?.is_some() {
            continue;
        }
        config.validate()?;
        store.update_config(&config).await?;
        seeded += 1;
    }
    Ok(seeded)
}

async fn serve(deps: OrchestratorDeps, bus: &EventBus) -> Result<()> {
    let mut events = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracing::debug!(
                    config_id = %event.config_id,
                    version = event.version,
                    status = %event.status,
                    "Backup config changed"
                ),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Config change listener lagged")
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let registry = BackupRegistry::new(deps);
    let report = registry.bootstrap().await?;
    tracing::info!(
        loaded = report.loaded,
        started = report.started,
        "Backup Keeper running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    registry.shutdown().await;
    Ok(())
}

async fn load(deps: &OrchestratorDeps, id: &str) -> Result<BackupOrchestrator> {
    let config = deps
        .store
        .get_config(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("backup config {}", id)))?;
    Ok(BackupOrchestrator::new(config, deps.clone()))
}

async fn finish(deps: &OrchestratorDeps) {
    deps.scheduler.shutdown();
    deps.audit.flush().await;
}

async fn run_status(format: &str, deps: &OrchestratorDeps) -> Result<()> {
    let mut configs = deps.store.list_configs().await?;
    configs.sort_by(|a, b| a.id.cmp(&b.id));

    if format == "json" {
        output(format, "", Some(serde_json::to_value(&configs)?));
        return Ok(());
    }
    table_row(&["ID", "DB", "STATUS", "NEXT RUN", "RUNS", "OK", "FAILED"]);
    for config in &configs {
        let next = config
            .next_run_time
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".into());
        table_row(&[
            &config.id,
            &config.source.db,
            &config.status.to_string(),
            &next,
            &config.total_runs.to_string(),
            &config.successful_runs.to_string(),
            &config.failed_runs.to_string(),
        ]);
    }
    Ok(())
}

/// Run one backup in this process.
///
/// A persisted RUNNING status may belong to a `serve` process sharing the
/// store, so it is refused rather than reset.
async fn run_now(format: &str, orchestrator: &BackupOrchestrator) -> Result<()> {
    if orchestrator.status().await == BackupStatus::Running {
        return Err(AppError::Overlap(format!(
            "{} (persisted status is RUNNING)",
            orchestrator.id()
        )));
    }
    let copy = orchestrator.run_now().await?;
    output(
        format,
        &format!(
            "Created backup copy {} ({} collections)",
            copy.name,
            copy.collections.len()
        ),
        Some(serde_json::to_value(&copy)?),
    );
    Ok(())
}

async fn run_copies(format: &str, orchestrator: &BackupOrchestrator) -> Result<()> {
    let copies = orchestrator.list_copies().await?;
    if format == "json" {
        output(format, "", Some(serde_json::to_value(&copies)?));
        return Ok(());
    }
    table_row(&["NAME", "CREATED", "DELETES AT", "COLLECTIONS"]);
    for copy in &copies {
        let delete_time = copy
            .delete_time
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".into());
        table_row(&[
            &copy.name,
            &copy.created_time.to_rfc3339(),
            &delete_time,
            &copy.collections.join(","),
        ]);
    }
    Ok(())
}

async fn run_logs(format: &str, orchestrator: &BackupOrchestrator) -> Result<()> {
    let logs = orchestrator.list_logs().await?;
    if format == "json" {
        output(format, "", Some(serde_json::to_value(&logs)?));
        return Ok(());
    }
    for entry in &logs {
        table_row(&[
            &entry.timestamp.to_rfc3339(),
            entry.level.as_str(),
            &entry.message,
        ]);
    }
    Ok(())
}
