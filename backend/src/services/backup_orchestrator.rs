//! Per-config backup state machine.
//!
//! The orchestrator is the only entry point for a backup configuration. It
//! arms the schedule, drives the pipeline, registers copies with retention and
//! keeps the persisted config (status, next run, counters) current.
//!
//! Concurrency model:
//! - the config is an immutable snapshot swapped under a write lock, each swap
//!   bumping `version`
//! - lifecycle operations (start, stop, reconfigure, restart, abort) serialize
//!   on one async mutex
//! - a run holds an atomic claim for its whole duration; a second operator
//!   trigger fails with `Overlap`, while a scheduled first run waits for the
//!   claim to be released
//! - every lifecycle change bumps a generation counter, and a run only
//!   restores the pre-run status if the generation is unchanged

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock};

use crate::error::{AppError, Result};
use crate::models::backup::next_copy_instant;
use crate::models::{
    AuditLogEntry, BackupConfig, BackupCopy, BackupStatus, ConfigUpdate, Document,
    DocumentFilter, RunResult,
};
use crate::services::audit_service::AuditService;
use crate::services::backup_service::{BackupService, CompletedRun, RunObserver};
use crate::services::event_bus::ChangeNotifier;
use crate::services::retention_service::{DeletionCause, RecoveryReport, RetentionService};
use crate::services::scheduler_service::{ActivityKind, Scheduler};
use crate::source::{SourceConnector, SourceDatabaseClient};
use crate::storage::LocalStore;

/// Shared collaborators handed to every orchestrator
#[derive(Clone)]
pub struct OrchestratorDeps {
    pub store: Arc<dyn LocalStore>,
    pub connector: Arc<dyn SourceConnector>,
    pub scheduler: Scheduler,
    pub audit: AuditService,
    pub notifier: Arc<dyn ChangeNotifier>,
}

struct OrchestratorInner {
    id: String,
    config: RwLock<Arc<BackupConfig>>,
    source: RwLock<Arc<dyn SourceDatabaseClient>>,
    deps: OrchestratorDeps,
    pipeline: BackupService,
    retention: Arc<RetentionService>,
    lifecycle: Mutex<()>,
    generation: AtomicU64,
    run_claimed: AtomicBool,
    run_released: Notify,
    current_collections: StdMutex<Option<Vec<String>>>,
    last_copy_millis: AtomicI64,
}

/// Releases the run claim and wakes waiting first runs when dropped.
struct RunClaim<'a>(&'a OrchestratorInner);

impl<'a> RunClaim<'a> {
    fn acquire(inner: &'a OrchestratorInner) -> Option<Self> {
        inner
            .run_claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunClaim(inner))
    }
}

impl Drop for RunClaim<'_> {
    fn drop(&mut self) {
        self.0.run_claimed.store(false, Ordering::Release);
        self.0.run_released.notify_waiters();
    }
}

/// Backup orchestrator for one config
#[derive(Clone)]
pub struct BackupOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl BackupOrchestrator {
    pub fn new(config: BackupConfig, deps: OrchestratorDeps) -> Self {
        let client = deps.connector.client(&config.source);
        let pipeline = BackupService::new(deps.store.clone(), deps.audit.clone());
        let retention = Arc::new(RetentionService::new(
            deps.store.clone(),
            deps.audit.clone(),
            deps.scheduler.clone(),
        ));
        Self {
            inner: Arc::new(OrchestratorInner {
                id: config.id.clone(),
                config: RwLock::new(Arc::new(config)),
                source: RwLock::new(client),
                deps,
                pipeline,
                retention,
                lifecycle: Mutex::new(()),
                generation: AtomicU64::new(0),
                run_claimed: AtomicBool::new(false),
                run_released: Notify::new(),
                current_collections: StdMutex::new(None),
                last_copy_millis: AtomicI64::new(0),
            }),
        }
    }

    /// Validate and persist a new config, returning its orchestrator.
    pub async fn create(config: BackupConfig, deps: OrchestratorDeps) -> Result<Self> {
        config.validate()?;
        let written = deps
            .store
            .update_config(&config)
            .await
            .map_err(|e| e.into_catalog())?;
        if !written {
            return Err(AppError::Catalog(format!(
                "a newer version of backup config {} is already stored",
                config.id
            )));
        }
        deps.notifier.notify_config_changed(&config);
        Ok(Self::new(config, deps))
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    fn audit(&self) -> &AuditService {
        &self.inner.deps.audit
    }

    fn scheduler(&self) -> &Scheduler {
        &self.inner.deps.scheduler
    }

    fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    fn bump_generation(&self) -> u64 {
        self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn set_collections(&self, collections: Option<Vec<String>>) {
        *self
            .inner
            .current_collections
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = collections;
    }

    /// Current config snapshot
    pub async fn config(&self) -> Arc<BackupConfig> {
        self.inner.config.read().await.clone()
    }

    pub async fn status(&self) -> BackupStatus {
        self.config().await.status
    }

    pub async fn next_run_time(&self) -> Option<DateTime<Utc>> {
        self.config().await.next_run_time
    }

    /// Collections resolved by the run in flight, if any
    pub fn current_collections(&self) -> Option<Vec<String>> {
        self.inner
            .current_collections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Kinds of the timers currently armed for this config
    pub fn pending_activities(&self) -> Vec<ActivityKind> {
        self.scheduler().pending(self.id())
    }

    fn schedule_armed(&self) -> bool {
        self.pending_activities()
            .iter()
            .any(|kind| matches!(kind, ActivityKind::FirstRun | ActivityKind::Recurring))
    }

    /// Swap in a modified snapshot and persist it.
    ///
    /// A status transition is written to the audit log.
    async fn mutate<F>(&self, f: F) -> Arc<BackupConfig>
    where
        F: FnOnce(&mut BackupConfig),
    {
        let (previous, snapshot) = {
            let mut guard = self.inner.config.write().await;
            let previous = guard.status;
            let mut next = BackupConfig::clone(&guard);
            f(&mut next);
            next.version = guard.version + 1;
            let next = Arc::new(next);
            *guard = next.clone();
            (previous, next)
        };
        if previous != snapshot.status {
            self.audit().info(
                self.id(),
                format!("Backup status changed from {} to {}", previous, snapshot.status),
            );
        }
        self.persist(&snapshot).await;
        snapshot
    }

    async fn persist(&self, config: &BackupConfig) {
        match self.inner.deps.store.update_config(config).await {
            Ok(true) => self.inner.deps.notifier.notify_config_changed(config),
            Ok(false) => {
                tracing::warn!(
                    config_id = %config.id,
                    version = config.version,
                    "Stored backup config is newer, snapshot not persisted"
                );
            }
            Err(e) => {
                tracing::error!(config_id = %config.id, error = %e, "Failed to persist backup config");
                self.audit()
                    .error(&config.id, format!("Failed to persist configuration: {}", e));
            }
        }
    }

    async fn close_source(&self) {
        let client = self.inner.source.read().await.clone();
        if let Err(e) = client.close().await {
            tracing::warn!(config_id = %self.id(), error = %e, "Failed to close source connection");
            self.audit()
                .warn(self.id(), format!("Failed to close source connection: {}", e));
        }
    }

    fn clear_schedule(&self) -> usize {
        let cancelled = self.scheduler().cancel_all(self.id());
        self.inner.retention.forget(self.id());
        cancelled
    }

    /// Arm the first run. No-op for STOP and ABORTED configs.
    pub async fn start(&self) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.start_locked().await
    }

    async fn start_locked(&self) -> Result<()> {
        let config = self.config().await;
        if !config.status.is_schedulable() {
            tracing::debug!(config_id = %config.id, status = %config.status, "Not starting");
            return Ok(());
        }
        if self.schedule_armed() {
            tracing::debug!(config_id = %config.id, "Schedule already armed");
            return Ok(());
        }

        let now = Utc::now();
        let first = match config.first_run_at(now) {
            Ok(first) => first,
            Err(e) => {
                tracing::error!(config_id = %self.id(), error = %e, "Failed to compute first run");
                self.audit()
                    .error(self.id(), format!("Failed to schedule backup: {}", e));
                return Err(e);
            }
        };
        let delay = (first - now).to_std().unwrap_or(Duration::ZERO);
        let generation = self.bump_generation();

        self.audit().info(self.id(), format!("Started {}", self.id()));
        self.mutate(|c| {
            c.status = BackupStatus::Waiting;
            c.next_run_time = Some(first);
        })
        .await;

        let this = self.clone();
        let armed = self.scheduler().arm_once(
            self.id(),
            ActivityKind::FirstRun,
            delay,
            move || async move { this.first_run(generation).await },
        );
        if let Err(e) = armed {
            tracing::error!(config_id = %self.id(), error = %e, "Failed to arm first run");
            self.audit()
                .error(self.id(), format!("Failed to schedule backup: {}", e));
            self.mutate(|c| {
                c.status = BackupStatus::Pending;
                c.next_run_time = None;
            })
            .await;
            return Err(e);
        }
        tracing::info!(config_id = %self.id(), first_run = %first, "Backup scheduled");
        Ok(())
    }

    async fn first_run(&self, generation: u64) {
        {
            let _lifecycle = self.inner.lifecycle.lock().await;
            if self.generation() != generation {
                return;
            }
            let config = self.config().await;
            if let Some(interval) = config.interval() {
                let this = self.clone();
                let armed = self.scheduler().arm_recurring(self.id(), interval, move || {
                    let this = this.clone();
                    async move { this.tick(generation).await }
                });
                match armed {
                    Ok(_) => {
                        self.mutate(|c| c.next_run_time = next_tick(interval)).await;
                    }
                    Err(e) => {
                        tracing::error!(config_id = %self.id(), error = %e, "Failed to arm recurring run");
                        self.audit()
                            .error(self.id(), format!("Failed to schedule recurring backup: {}", e));
                        self.mutate(|c| {
                            c.status = BackupStatus::Pending;
                            c.next_run_time = None;
                        })
                        .await;
                    }
                }
            }
        }
        let Some(claim) = self.claim_when_idle(generation).await else {
            tracing::debug!(config_id = %self.id(), "First run superseded while waiting");
            return;
        };
        if let Err(e) = self.execute(claim, generation).await {
            tracing::debug!(config_id = %self.id(), error = %e, "Scheduled run did not complete");
        }
    }

    /// Take the run claim, waiting for a run in flight to release it.
    ///
    /// Returns `None` once a lifecycle change has replaced `generation`.
    async fn claim_when_idle(&self, generation: u64) -> Option<RunClaim<'_>> {
        loop {
            let released = self.inner.run_released.notified();
            tokio::pin!(released);
            released.as_mut().enable();
            if self.generation() != generation {
                return None;
            }
            if let Some(claim) = RunClaim::acquire(&self.inner) {
                return Some(claim);
            }
            tracing::debug!(config_id = %self.id(), "Waiting for the run in flight to finish");
            released.await;
        }
    }

    async fn tick(&self, generation: u64) {
        let claim = {
            let _lifecycle = self.inner.lifecycle.lock().await;
            if self.generation() != generation {
                return;
            }
            let config = self.config().await;
            let claim = match config.status {
                BackupStatus::Running => None,
                _ => RunClaim::acquire(&self.inner),
            };
            let Some(claim) = claim else {
                tracing::debug!(config_id = %self.id(), "Previous run still in progress, skipping tick");
                return;
            };
            if let Some(interval) = config.interval() {
                self.mutate(|c| c.next_run_time = next_tick(interval)).await;
            }
            claim
        };
        if let Err(e) = self.execute(claim, generation).await {
            tracing::debug!(config_id = %self.id(), error = %e, "Scheduled run did not complete");
        }
    }

    /// Execute one backup run now.
    ///
    /// A run already in flight makes this fail with `Overlap`, counted as a
    /// failed run.
    pub async fn run_now(&self) -> Result<BackupCopy> {
        if self.status().await == BackupStatus::Aborted {
            return Err(AppError::Aborted(self.id().to_string()));
        }
        let Some(claim) = RunClaim::acquire(&self.inner) else {
            return Err(self.reject_overlap().await);
        };
        self.execute(claim, self.generation()).await
    }

    async fn reject_overlap(&self) -> AppError {
        let error = AppError::Overlap(self.id().to_string());
        tracing::warn!(config_id = %self.id(), "Backup already running");
        self.audit()
            .warn(self.id(), "Backup already running, overlapping run rejected");
        self.mutate(|c| {
            c.total_runs += 1;
            c.failed_runs += 1;
            c.last_run_result = Some(RunResult::Failed);
        })
        .await;
        error
    }

    /// Run the pipeline while holding the run claim. A lifecycle change away
    /// from `generation` before the run reaches RUNNING cancels it.
    async fn execute(&self, _claim: RunClaim<'_>, generation: u64) -> Result<BackupCopy> {
        let config = self.config().await;
        let started = Utc::now();
        let created = next_copy_instant(
            started,
            self.inner.last_copy_millis.load(Ordering::SeqCst),
        );
        self.inner
            .last_copy_millis
            .fetch_max(created.timestamp_millis(), Ordering::SeqCst);
        let copy_name = BackupCopy::name_for(self.id(), &config.source.db, created);
        let client = self.inner.source.read().await.clone();

        let tracker = RunTracker {
            orchestrator: self.clone(),
            generation,
            prior: StdMutex::new(None),
        };
        let result = self
            .inner
            .pipeline
            .run(self.id(), &config.source, client.as_ref(), &copy_name, &tracker)
            .await;
        self.set_collections(None);

        let _lifecycle = self.inner.lifecycle.lock().await;
        let prior = tracker.prior();
        let unchanged = self.generation() == generation;

        match result {
            Ok(run) => self.complete_success(run, started, created, prior, unchanged).await,
            Err(AppError::Cancelled(reason)) => {
                tracing::info!(config_id = %self.id(), %reason, "Backup run cancelled");
                Err(AppError::Cancelled(reason))
            }
            Err(e) => {
                self.complete_failure(&e, started, prior, unchanged).await;
                Err(e)
            }
        }
    }

    async fn complete_success(
        &self,
        run: CompletedRun,
        started: DateTime<Utc>,
        created: DateTime<Utc>,
        prior: Option<BackupStatus>,
        unchanged: bool,
    ) -> Result<BackupCopy> {
        let config = self.config().await;
        let arm_timer = config.status.is_schedulable();
        let copy = match self
            .inner
            .retention
            .register_copy(&config, &run, created, arm_timer)
            .await
        {
            Ok(copy) => copy,
            Err(e) => {
                if let Err(discard) = self.inner.deps.store.delete_copy(&run.copy_name).await {
                    tracing::error!(config_id = %self.id(), copy = %run.copy_name, error = %discard, "Failed to discard uncatalogued copy");
                }
                self.complete_failure(&e, started, prior, unchanged).await;
                return Err(e);
            }
        };

        self.audit().info(
            self.id(),
            format!(
                "Backup {} completed: {} collections, {} documents",
                copy.name,
                run.collections.len(),
                run.document_count
            ),
        );
        let armed = self.schedule_armed();
        let updated = self
            .mutate(|c| {
                c.total_runs += 1;
                c.successful_runs += 1;
                c.last_run_time = Some(started);
                c.last_run_result = Some(RunResult::Succeeded);
                if unchanged {
                    restore_status(c, prior, armed);
                }
            })
            .await;

        if let Err(e) = self.inner.retention.evict_excess(&updated).await {
            tracing::error!(config_id = %self.id(), error = %e, "Eviction failed");
        }
        Ok(copy)
    }

    async fn complete_failure(
        &self,
        error: &AppError,
        started: DateTime<Utc>,
        prior: Option<BackupStatus>,
        unchanged: bool,
    ) {
        tracing::error!(config_id = %self.id(), code = error.code(), error = %error, "Backup failed");
        self.audit()
            .error(self.id(), format!("Backup failed [{}]: {}", error.code(), error));
        let armed = self.schedule_armed();
        self.mutate(|c| {
            c.total_runs += 1;
            c.failed_runs += 1;
            c.last_run_time = Some(started);
            c.last_run_result = Some(RunResult::Failed);
            if unchanged {
                restore_status(c, prior, armed);
            }
        })
        .await;
    }

    /// Cancel every activity and halt the config.
    pub async fn stop(&self) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.stop_locked().await
    }

    async fn stop_locked(&self) -> Result<()> {
        if self.status().await == BackupStatus::Aborted {
            return Err(AppError::Aborted(self.id().to_string()));
        }
        self.bump_generation();
        self.close_source().await;
        let cancelled = self.clear_schedule();
        self.mutate(|c| {
            c.status = BackupStatus::Stop;
            c.next_run_time = None;
        })
        .await;
        self.set_collections(None);
        tracing::info!(config_id = %self.id(), cancelled, "Backup stopped");
        self.audit().info(self.id(), "Stop all the backup activities");
        Ok(())
    }

    /// Stop, apply `update`, and start again under the new parameters.
    pub async fn reconfigure(&self, update: ConfigUpdate) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let current = self.config().await;
        let candidate = update.applied_to(&current);
        candidate.validate()?;
        self.stop_locked().await?;

        let updated = self
            .mutate(|c| {
                *c = update.applied_to(c);
                c.status = BackupStatus::Pending;
                c.next_run_time = None;
            })
            .await;

        if updated.source != current.source {
            *self.inner.source.write().await = self.inner.deps.connector.client(&updated.source);
            self.audit().warn(
                self.id(),
                format!(
                    "Source changed from {}/{} to {}/{}; existing copies keep their original source",
                    current.source.server,
                    current.source.db,
                    updated.source.server,
                    updated.source.db
                ),
            );
        }
        self.audit().info(self.id(), "Configuration updated");
        self.start_locked().await?;
        self.recover_retention(&updated).await;
        Ok(())
    }

    /// Clear STOP or ABORTED and start again.
    pub async fn restart(&self) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.bump_generation();
        self.clear_schedule();
        let updated = self
            .mutate(|c| {
                c.status = BackupStatus::Pending;
                c.next_run_time = None;
            })
            .await;
        self.audit().info(self.id(), format!("Restarted {}", self.id()));
        self.start_locked().await?;
        self.recover_retention(&updated).await;
        Ok(())
    }

    /// Mark the config ABORTED and cancel everything armed for it.
    pub async fn abort(&self, reason: &str) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.bump_generation();
        self.close_source().await;
        self.clear_schedule();
        self.mutate(|c| {
            c.status = BackupStatus::Aborted;
            c.next_run_time = None;
        })
        .await;
        self.set_collections(None);
        tracing::warn!(config_id = %self.id(), %reason, "Backup aborted");
        self.audit()
            .error(self.id(), format!("Backup aborted: {}", reason));
        Ok(())
    }

    /// Startup pass: reset a run interrupted by the previous process and
    /// reconcile copy deletion deadlines.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let mut config = self.config().await;
        if config.status == BackupStatus::Running {
            self.audit()
                .warn(self.id(), "Backup run was interrupted by a restart");
            config = self
                .mutate(|c| {
                    c.status = BackupStatus::Pending;
                    c.next_run_time = None;
                })
                .await;
        }
        let arm_timers = config.status.is_schedulable();
        self.inner.retention.recover(&config, arm_timers).await
    }

    async fn recover_retention(&self, config: &BackupConfig) {
        if let Err(e) = self.inner.retention.recover(config, true).await {
            tracing::error!(config_id = %self.id(), error = %e, "Retention recovery failed");
        }
    }

    /// Cancel timers without touching persisted status.
    pub fn shutdown(&self) {
        self.clear_schedule();
    }

    /// Copies of this config, newest first
    pub async fn list_copies(&self) -> Result<Vec<BackupCopy>> {
        let mut copies = self
            .inner
            .deps
            .store
            .list_copies(self.id())
            .await
            .map_err(|e| e.into_catalog())?;
        copies.sort_by(|a, b| b.created_time.cmp(&a.created_time));
        Ok(copies)
    }

    async fn find_copy(&self, name: &str) -> Result<Option<BackupCopy>> {
        Ok(self.list_copies().await?.into_iter().find(|c| c.name == name))
    }

    /// Operator delete of one copy
    pub async fn delete_copy(&self, name: &str) -> Result<()> {
        if self.find_copy(name).await?.is_none() {
            return Err(AppError::NotFound(format!("backup copy {}", name)));
        }
        self.inner
            .retention
            .delete_copy(self.id(), name, DeletionCause::Operator)
            .await
    }

    /// Audit history of this config
    pub async fn list_logs(&self) -> Result<Vec<AuditLogEntry>> {
        self.audit().history(self.id()).await
    }

    async fn open_source(&self, config: &BackupConfig) -> Result<Arc<dyn SourceDatabaseClient>> {
        let client = self.inner.deps.connector.client(&config.source);
        client.connect().await.map_err(|e| e.into_source_connect())?;
        Ok(client)
    }

    async fn close_quietly(&self, client: &dyn SourceDatabaseClient) {
        if let Err(e) = client.close().await {
            tracing::warn!(config_id = %self.id(), error = %e, "Failed to close browsing connection");
        }
    }

    /// Collection names of the source database or of a catalogued copy
    pub async fn list_collections(&self, db: &str) -> Result<Vec<String>> {
        let config = self.config().await;
        if db == config.source.db {
            let client = self.open_source(&config).await?;
            let result = client.list_collection_names(db).await;
            self.close_quietly(client.as_ref()).await;
            return result.map_err(|e| e.into_source_read());
        }
        self.require_copy(db).await?;
        self.inner.deps.store.list_copy_collections(db).await
    }

    /// Documents of one collection in the source database or a copy
    pub async fn read_collection(
        &self,
        db: &str,
        collection: &str,
        filter: &DocumentFilter,
    ) -> Result<Vec<Document>> {
        let config = self.config().await;
        if db == config.source.db {
            let client = self.open_source(&config).await?;
            let result = client.read_collection(db, collection, filter).await;
            self.close_quietly(client.as_ref()).await;
            return result.map_err(|e| e.into_source_read());
        }
        self.require_copy(db).await?;
        self.inner
            .deps
            .store
            .read_copy_collection(db, collection, filter)
            .await
    }

    /// Drop collections from the source database or from a copy
    pub async fn delete_collections(&self, db: &str, collections: &[String]) -> Result<()> {
        let config = self.config().await;
        let listed = collections.join(", ");
        if db == config.source.db {
            let client = self.open_source(&config).await?;
            let result = client.delete_collections(db, collections).await;
            self.close_quietly(client.as_ref()).await;
            result.map_err(|e| e.into_source_read())?;
            self.audit().warn(
                self.id(),
                format!("Deleted collections [{}] from source database {}", listed, db),
            );
            return Ok(());
        }
        self.require_copy(db).await?;
        self.inner
            .deps
            .store
            .delete_copy_collections(db, collections)
            .await
            .map_err(|e| e.into_target_write())?;
        self.audit().info(
            self.id(),
            format!("Deleted collections [{}] from backup copy {}", listed, db),
        );
        Ok(())
    }

    async fn require_copy(&self, name: &str) -> Result<()> {
        match self.find_copy(name).await? {
            Some(_) => Ok(()),
            None => Err(AppError::NotFound(format!("database {}", name))),
        }
    }
}

fn next_tick(interval: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(interval)
        .ok()
        .and_then(|interval| Utc::now().checked_add_signed(interval))
}

/// Status after a run: the pre-run status, except that a consumed one-shot
/// schedule falls back to PENDING.
fn restore_status(config: &mut BackupConfig, prior: Option<BackupStatus>, armed: bool) {
    let prior = prior.unwrap_or(config.status);
    if prior == BackupStatus::Waiting && config.interval().is_none() && !armed {
        config.status = BackupStatus::Pending;
        config.next_run_time = None;
    } else {
        config.status = prior;
    }
}

struct RunTracker {
    orchestrator: BackupOrchestrator,
    generation: u64,
    prior: StdMutex<Option<BackupStatus>>,
}

impl RunTracker {
    fn prior(&self) -> Option<BackupStatus> {
        *self.prior.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RunObserver for RunTracker {
    async fn on_connected(&self) -> Result<()> {
        let orchestrator = &self.orchestrator;
        let _lifecycle = orchestrator.inner.lifecycle.lock().await;
        if orchestrator.generation() != self.generation {
            return Err(AppError::Cancelled(format!(
                "{} was stopped or reconfigured",
                orchestrator.id()
            )));
        }
        let config = orchestrator.config().await;
        if config.status == BackupStatus::Aborted {
            return Err(AppError::Aborted(orchestrator.id().to_string()));
        }
        *self.prior.lock().unwrap_or_else(PoisonError::into_inner) = Some(config.status);
        orchestrator
            .mutate(|c| c.status = BackupStatus::Running)
            .await;
        orchestrator.audit().info(
            orchestrator.id(),
            format!(
                "Backup running: {} on {}",
                config.source.db, config.source.server
            ),
        );
        Ok(())
    }

    fn on_collections_resolved(&self, collections: &[String]) {
        self.orchestrator.set_collections(Some(collections.to_vec()));
    }
}
