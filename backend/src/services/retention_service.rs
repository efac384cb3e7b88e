//! Copy retention service.
//!
//! Owns the lifetime of backup copies:
//! - copy_lifetime: each copy gets a one-shot deletion timer at creation
//! - max_copies: after every successful run only the N most recent copies stay
//! - recovery: on startup overdue copies are deleted and pending timers re-armed
//!
//! Deleting a copy removes its data first and its catalog record second, so a
//! failed data deletion leaves the record for the next recovery sweep.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::models::{BackupConfig, BackupCopy};
use crate::services::audit_service::AuditService;
use crate::services::backup_service::CompletedRun;
use crate::services::scheduler_service::{ActivityId, ActivityKind, Scheduler};
use crate::storage::LocalStore;

/// Why a copy is being deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionCause {
    Expired,
    Evicted,
    Operator,
}

impl DeletionCause {
    fn as_str(self) -> &'static str {
        match self {
            DeletionCause::Expired => "lifetime expired",
            DeletionCause::Evicted => "exceeds max copies",
            DeletionCause::Operator => "operator request",
        }
    }
}

/// Result of a recovery sweep
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub deleted: Vec<String>,
    pub rearmed: Vec<String>,
    pub failed: Vec<String>,
}

type TimerKey = (String, String);

/// Retention service
pub struct RetentionService {
    store: Arc<dyn LocalStore>,
    audit: AuditService,
    scheduler: Scheduler,
    timers: Mutex<HashMap<TimerKey, ActivityId>>,
}

impl RetentionService {
    pub fn new(store: Arc<dyn LocalStore>, audit: AuditService, scheduler: Scheduler) -> Self {
        Self {
            store,
            audit,
            scheduler,
            timers: Mutex::new(HashMap::new()),
        }
    }

    fn timers(&self) -> MutexGuard<'_, HashMap<TimerKey, ActivityId>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Catalog the copy produced by a run and arm its deletion timer.
    ///
    /// A catalog failure is returned; a timer that cannot be armed is only
    /// logged, since the next recovery sweep picks the copy up again.
    pub async fn register_copy(
        self: &Arc<Self>,
        config: &BackupConfig,
        run: &CompletedRun,
        created: DateTime<Utc>,
        arm_timer: bool,
    ) -> Result<BackupCopy> {
        let delete_time = match config.copy_lifetime() {
            Some(lifetime) => Some(
                chrono::Duration::from_std(lifetime)
                    .ok()
                    .and_then(|lifetime| created.checked_add_signed(lifetime))
                    .ok_or_else(|| {
                        AppError::Validation(format!("copy lifetime {:?} is out of range", lifetime))
                    })?,
            ),
            None => None,
        };
        let copy = BackupCopy {
            name: run.copy_name.clone(),
            config_id: config.id.clone(),
            source: config.source.clone(),
            collections: run.collections.clone(),
            created_time: created,
            delete_time,
        };
        self.store
            .add_copy(&copy)
            .await
            .map_err(|e| e.into_catalog())?;

        if let (true, Some(delete_time)) = (arm_timer, delete_time) {
            if let Err(e) = self.arm_deletion(&copy.config_id, &copy.name, delete_time) {
                tracing::error!(config_id = %config.id, copy = %copy.name, error = %e, "Failed to arm copy deletion");
                self.audit.error(
                    &config.id,
                    format!("Failed to schedule deletion of {}: {}", copy.name, e),
                );
            }
        }
        Ok(copy)
    }

    fn arm_deletion(self: &Arc<Self>, config_id: &str, name: &str, at: DateTime<Utc>) -> Result<()> {
        let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let key = (config_id.to_string(), name.to_string());
        let mut timers = self.timers();
        if let Some(previous) = timers.remove(&key) {
            self.scheduler.cancel(config_id, previous);
        }

        let this = Arc::clone(self);
        let (cfg, copy) = key.clone();
        let id = self.scheduler.arm_once(
            config_id,
            ActivityKind::CopyDeletion(name.to_string()),
            delay,
            move || async move {
                this.timers().remove(&(cfg.clone(), copy.clone()));
                tracing::info!(config_id = %cfg, copy = %copy, "Copy lifetime expired");
                let _ = this.delete_copy(&cfg, &copy, DeletionCause::Expired).await;
            },
        )?;
        timers.insert(key, id);
        Ok(())
    }

    /// Delete a copy's data and catalog record, cancelling its timer.
    pub async fn delete_copy(&self, config_id: &str, name: &str, cause: DeletionCause) -> Result<()> {
        let pending = self.timers().remove(&(config_id.to_string(), name.to_string()));
        if let Some(id) = pending {
            self.scheduler.cancel(config_id, id);
        }

        if let Err(e) = self.store.delete_copy(name).await {
            tracing::error!(config_id = %config_id, copy = %name, error = %e, "Failed to delete copy data");
            self.audit
                .error(config_id, format!("Failed to delete backup copy {}: {}", name, e));
            return Err(e.into_target_write());
        }

        if let Err(e) = self.store.remove_copy(config_id, name).await {
            tracing::error!(config_id = %config_id, copy = %name, error = %e, "Failed to remove catalog record");
            self.audit.error(
                config_id,
                format!("Failed to remove catalog record of {}: {}", name, e),
            );
            return Err(e.into_catalog());
        }

        self.audit.info(
            config_id,
            format!("Deleted backup copy {} ({})", name, cause.as_str()),
        );
        Ok(())
    }

    /// Delete every copy beyond the `max_copies` most recent. Returns the deleted names.
    pub async fn evict_excess(&self, config: &BackupConfig) -> Result<Vec<String>> {
        let Some(max) = config.max_copies else {
            return Ok(Vec::new());
        };
        let mut copies = self
            .store
            .list_copies(&config.id)
            .await
            .map_err(|e| e.into_catalog())?;
        if copies.len() <= max {
            return Ok(Vec::new());
        }
        copies.sort_by(|a, b| b.created_time.cmp(&a.created_time));
        let excess = copies.split_off(max);

        tracing::info!(config_id = %config.id, count = excess.len(), max, "Evicting excess copies");
        let results = join_all(
            excess
                .iter()
                .map(|copy| self.delete_copy(&config.id, &copy.name, DeletionCause::Evicted)),
        )
        .await;

        Ok(excess
            .into_iter()
            .zip(results)
            .filter_map(|(copy, result)| result.ok().map(|_| copy.name))
            .collect())
    }

    /// Delete overdue copies and, when `arm_timers` is set, re-arm the rest.
    pub async fn recover(self: &Arc<Self>, config: &BackupConfig, arm_timers: bool) -> Result<RecoveryReport> {
        let copies = self
            .store
            .list_copies(&config.id)
            .await
            .map_err(|e| e.into_catalog())?;
        let now = Utc::now();
        let mut report = RecoveryReport::default();

        for copy in copies {
            let Some(delete_time) = copy.delete_time else {
                continue;
            };
            if delete_time <= now {
                match self
                    .delete_copy(&config.id, &copy.name, DeletionCause::Expired)
                    .await
                {
                    Ok(()) => report.deleted.push(copy.name),
                    Err(_) => report.failed.push(copy.name),
                }
            } else if arm_timers {
                match self.arm_deletion(&config.id, &copy.name, delete_time) {
                    Ok(()) => report.rearmed.push(copy.name),
                    Err(e) => {
                        tracing::error!(config_id = %config.id, copy = %copy.name, error = %e, "Failed to re-arm copy deletion");
                        report.failed.push(copy.name);
                    }
                }
            }
        }

        if !report.deleted.is_empty() || !report.rearmed.is_empty() {
            tracing::info!(
                config_id = %config.id,
                deleted = report.deleted.len(),
                rearmed = report.rearmed.len(),
                "Retention recovery sweep finished"
            );
        }
        Ok(report)
    }

    /// Drop timer bookkeeping for a config whose scheduler scope was cancelled.
    pub fn forget(&self, config_id: &str) {
        self.timers().retain(|(cfg, _), _| cfg != config_id);
    }
}
