//! Backup configuration and copy catalog models.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::error::{AppError, Result};

/// Longest accepted interval or copy lifetime, one hundred years
pub const MAX_DURATION_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// Lifecycle status of a backup configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupStatus {
    /// Idle, no schedule armed
    Pending,
    /// Schedule armed, next run pending
    Waiting,
    /// Pipeline executing
    Running,
    /// Deliberately halted, schedule cleared
    Stop,
    /// Permanently disabled until explicitly restarted
    Aborted,
}

impl BackupStatus {
    /// Whether `start()` is allowed to arm a schedule from this status.
    pub fn is_schedulable(self) -> bool {
        !matches!(self, BackupStatus::Stop | BackupStatus::Aborted)
    }
}

impl std::fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackupStatus::Pending => write!(f, "PENDING"),
            BackupStatus::Waiting => write!(f, "WAITING"),
            BackupStatus::Running => write!(f, "RUNNING"),
            BackupStatus::Stop => write!(f, "STOP"),
            BackupStatus::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// Outcome of the most recent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunResult {
    Succeeded,
    Failed,
}

/// Where the protected data lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Server address understood by the source connector
    pub server: String,
    /// Source database name
    pub db: String,
    /// Explicit collection list; `None` discovers every collection at run time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collections: Option<Vec<String>>,
}

impl SourceDescriptor {
    pub fn new(server: impl Into<String>, db: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            db: db.into(),
            collections: None,
        }
    }

    pub fn with_collections(mut self, collections: Vec<String>) -> Self {
        self.collections = Some(collections);
        self
    }
}

/// One protected source database with its schedule, retention policy and bookkeeping.
///
/// Instances are treated as immutable snapshots by the orchestrator: every
/// mutation produces a new value with a bumped `version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupConfig {
    pub id: String,
    pub source: SourceDescriptor,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub interval_secs: Option<u64>,
    #[serde(default)]
    pub copy_lifetime_secs: Option<u64>,
    #[serde(default)]
    pub max_copies: Option<usize>,
    #[serde(default = "default_status")]
    pub status: BackupStatus,
    #[serde(default)]
    pub next_run_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_run_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_run_result: Option<RunResult>,
    #[serde(default)]
    pub total_runs: u64,
    #[serde(default)]
    pub successful_runs: u64,
    #[serde(default)]
    pub failed_runs: u64,
    #[serde(default)]
    pub version: u64,
}

fn default_status() -> BackupStatus {
    BackupStatus::Pending
}

impl BackupConfig {
    /// Create a pending config with a fresh id and no schedule or retention policy.
    pub fn new(source: SourceDescriptor) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source,
            start_time: None,
            interval_secs: None,
            copy_lifetime_secs: None,
            max_copies: None,
            status: BackupStatus::Pending,
            next_run_time: None,
            last_run_time: None,
            last_run_result: None,
            total_runs: 0,
            successful_runs: 0,
            failed_runs: 0,
            version: 0,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = Some(start_time);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_secs = Some(interval.as_secs());
        self
    }

    pub fn with_copy_lifetime(mut self, lifetime: Duration) -> Self {
        self.copy_lifetime_secs = Some(lifetime.as_secs());
        self
    }

    pub fn with_max_copies(mut self, max_copies: usize) -> Self {
        self.max_copies = Some(max_copies);
        self
    }

    /// Recurring interval. A zero interval counts as none.
    pub fn interval(&self) -> Option<Duration> {
        self.interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Lifetime of each copy. A zero lifetime counts as none.
    pub fn copy_lifetime(&self) -> Option<Duration> {
        self.copy_lifetime_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Instant of the first run when the schedule is armed at `now`.
    ///
    /// No start time runs immediately. A future start time is used as is.
    /// A past start time is aligned forward onto the interval grid, or runs
    /// immediately when the config has no interval.
    pub fn first_run_at(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        match (self.start_time, self.interval()) {
            (None, _) => Ok(now),
            (Some(start), _) if start >= now => Ok(start),
            (Some(start), Some(interval)) => {
                let out_of_range =
                    || AppError::Schedule(format!("interval {:?} is out of range", interval));
                let step = i64::try_from(interval.as_millis()).map_err(|_| out_of_range())?;
                let behind = (now - start).num_milliseconds();
                let periods = (behind.saturating_add(step - 1) / step).max(1);
                periods
                    .checked_mul(step)
                    .and_then(chrono::Duration::try_milliseconds)
                    .and_then(|offset| start.checked_add_signed(offset))
                    .ok_or_else(out_of_range)
            }
            (Some(_), None) => Ok(now),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(AppError::Validation("config id must not be empty".into()));
        }
        if self.source.db.trim().is_empty() {
            return Err(AppError::Validation("source database name must not be empty".into()));
        }
        if self.max_copies == Some(0) {
            return Err(AppError::Validation("max_copies must be at least 1".into()));
        }
        if self.interval_secs.is_some_and(|secs| secs > MAX_DURATION_SECS) {
            return Err(AppError::Validation(format!(
                "interval must not exceed {} seconds",
                MAX_DURATION_SECS
            )));
        }
        if self.copy_lifetime_secs.is_some_and(|secs| secs > MAX_DURATION_SECS) {
            return Err(AppError::Validation(format!(
                "copy lifetime must not exceed {} seconds",
                MAX_DURATION_SECS
            )));
        }
        if let Some(collections) = &self.source.collections {
            if collections.iter().any(|c| c.trim().is_empty()) {
                return Err(AppError::Validation("collection names must not be empty".into()));
            }
        }
        Ok(())
    }
}

/// Partial update applied by `reconfigure`.
///
/// Outer `None` leaves a field untouched; `Some(None)` clears an optional field.
#[derive(Debug, Clone, Default)]
pub struct ConfigUpdate {
    pub server: Option<String>,
    pub db: Option<String>,
    pub collections: Option<Option<Vec<String>>>,
    pub start_time: Option<Option<DateTime<Utc>>>,
    pub interval_secs: Option<Option<u64>>,
    pub copy_lifetime_secs: Option<Option<u64>>,
    pub max_copies: Option<Option<usize>>,
}

impl ConfigUpdate {
    pub fn server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    pub fn db(mut self, db: impl Into<String>) -> Self {
        self.db = Some(db.into());
        self
    }

    pub fn collections(mut self, collections: Option<Vec<String>>) -> Self {
        self.collections = Some(collections);
        self
    }

    pub fn start_time(mut self, start_time: Option<DateTime<Utc>>) -> Self {
        self.start_time = Some(start_time);
        self
    }

    pub fn interval(mut self, interval: Option<Duration>) -> Self {
        self.interval_secs = Some(interval.map(|d| d.as_secs()));
        self
    }

    pub fn copy_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.copy_lifetime_secs = Some(lifetime.map(|d| d.as_secs()));
        self
    }

    pub fn max_copies(mut self, max_copies: Option<usize>) -> Self {
        self.max_copies = Some(max_copies);
        self
    }

    /// Apply onto a copy of `config`, returning the result without touching bookkeeping.
    pub fn applied_to(&self, config: &BackupConfig) -> BackupConfig {
        let mut next = config.clone();
        if let Some(server) = &self.server {
            next.source.server = server.clone();
        }
        if let Some(db) = &self.db {
            next.source.db = db.clone();
        }
        if let Some(collections) = &self.collections {
            next.source.collections = collections.clone();
        }
        if let Some(start_time) = self.start_time {
            next.start_time = start_time;
        }
        if let Some(interval) = self.interval_secs {
            next.interval_secs = interval;
        }
        if let Some(lifetime) = self.copy_lifetime_secs {
            next.copy_lifetime_secs = lifetime;
        }
        if let Some(max_copies) = self.max_copies {
            next.max_copies = max_copies;
        }
        next
    }
}

/// Catalog record of one completed snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupCopy {
    pub name: String,
    pub config_id: String,
    /// Source descriptor at creation time
    pub source: SourceDescriptor,
    /// Collections captured in this copy
    pub collections: Vec<String>,
    pub created_time: DateTime<Utc>,
    #[serde(default)]
    pub delete_time: Option<DateTime<Utc>>,
}

impl BackupCopy {
    /// Copy name for a snapshot of `db` taken by `config_id` at `created`.
    ///
    /// The config id keeps copies of two configs on the same database apart.
    pub fn name_for(config_id: &str, db: &str, created: DateTime<Utc>) -> String {
        format!("{}-{}-{}", db, config_id, created.timestamp_millis())
    }
}

/// Creation instant strictly after `last_millis`, so copy names never collide.
pub fn next_copy_instant(now: DateTime<Utc>, last_millis: i64) -> DateTime<Utc> {
    let millis = now.timestamp_millis().max(last_millis.saturating_add(1));
    Utc.timestamp_millis_opt(millis).single().unwrap_or(now)
}
