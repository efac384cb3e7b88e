//! Timer registry for backup configurations.
//!
//! Every activity (first run, recurring tick, copy deletion) is armed inside a
//! per-config scope. A scope owns a `CancellationToken`; each activity gets a
//! child token, so cancelling the scope cancels every timer derived from it.
//! A callback that has already started is left to finish.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};

/// Identifier of one armed activity
pub type ActivityId = u64;

/// What an armed activity is for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActivityKind {
    FirstRun,
    Recurring,
    CopyDeletion(String),
}

struct Activity {
    kind: ActivityKind,
    token: CancellationToken,
}

struct Scope {
    token: CancellationToken,
    activities: HashMap<ActivityId, Activity>,
}

struct SchedulerInner {
    scopes: Mutex<HashMap<String, Scope>>,
    next_id: AtomicU64,
    root: CancellationToken,
}

impl SchedulerInner {
    fn scopes(&self) -> MutexGuard<'_, HashMap<String, Scope>> {
        self.scopes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forget a one-shot activity that has fired, without cancelling it.
    fn release(&self, config_id: &str, id: ActivityId) {
        let mut scopes = self.scopes();
        if let Some(scope) = scopes.get_mut(config_id) {
            scope.activities.remove(&id);
        }
    }
}

/// Per-config registry of cancellable timers
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                scopes: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                root: CancellationToken::new(),
            }),
        }
    }

    fn register(&self, config_id: &str, kind: ActivityKind) -> Result<(ActivityId, CancellationToken)> {
        if self.inner.root.is_cancelled() {
            return Err(AppError::Schedule("scheduler is shut down".into()));
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut scopes = self.inner.scopes();
        let root = &self.inner.root;
        let scope = scopes.entry(config_id.to_string()).or_insert_with(|| Scope {
            token: root.child_token(),
            activities: HashMap::new(),
        });
        let token = scope.token.child_token();
        scope.activities.insert(
            id,
            Activity {
                kind,
                token: token.clone(),
            },
        );
        Ok((id, token))
    }

    fn runtime() -> Result<Handle> {
        Handle::try_current()
            .map_err(|e| AppError::Schedule(format!("no async runtime available: {}", e)))
    }

    /// Run `task` once after `delay` unless cancelled first.
    pub fn arm_once<F, Fut>(
        &self,
        config_id: &str,
        kind: ActivityKind,
        delay: Duration,
        task: F,
    ) -> Result<ActivityId>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = Self::runtime()?;
        let deadline = Instant::now()
            .checked_add(delay)
            .ok_or_else(|| AppError::Schedule(format!("delay {:?} is out of range", delay)))?;
        let (id, token) = self.register(config_id, kind.clone())?;
        let inner = self.inner.clone();
        let config_id = config_id.to_string();

        tracing::debug!(config_id = %config_id, activity = id, ?kind, ?delay, "Armed one-shot timer");

        handle.spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::debug!(config_id = %config_id, activity = id, "One-shot timer cancelled");
                }
                _ = tokio::time::sleep_until(deadline) => {
                    inner.release(&config_id, id);
                    task().await;
                }
            }
        });
        Ok(id)
    }

    /// Run `task` every `interval`, the first tick one interval from now.
    ///
    /// Each tick spawns its own task so a slow callback never delays the next
    /// tick; overlapping is for the callback to guard against.
    pub fn arm_recurring<F, Fut>(
        &self,
        config_id: &str,
        interval: Duration,
        task: F,
    ) -> Result<ActivityId>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if interval.is_zero() {
            return Err(AppError::Schedule("recurring interval must be positive".into()));
        }
        let handle = Self::runtime()?;
        let start = Instant::now()
            .checked_add(interval)
            .ok_or_else(|| AppError::Schedule(format!("interval {:?} is out of range", interval)))?;
        let (id, token) = self.register(config_id, ActivityKind::Recurring)?;
        let config_id = config_id.to_string();

        tracing::debug!(config_id = %config_id, activity = id, ?interval, "Armed recurring timer");

        handle.spawn(async move {
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        tokio::spawn(task());
                    }
                }
            }
            tracing::debug!(config_id = %config_id, activity = id, "Recurring timer cancelled");
        });
        Ok(id)
    }

    /// Cancel one activity. Returns whether it was still pending.
    pub fn cancel(&self, config_id: &str, id: ActivityId) -> bool {
        let mut scopes = self.inner.scopes();
        let Some(activity) = scopes
            .get_mut(config_id)
            .and_then(|scope| scope.activities.remove(&id))
        else {
            return false;
        };
        activity.token.cancel();
        true
    }

    /// Cancel every activity armed for a config. Returns how many were pending.
    pub fn cancel_all(&self, config_id: &str) -> usize {
        let scope = self.inner.scopes().remove(config_id);
        match scope {
            Some(scope) => {
                scope.token.cancel();
                let count = scope.activities.len();
                if count > 0 {
                    tracing::debug!(config_id = %config_id, count, "Cancelled scheduled activities");
                }
                count
            }
            None => 0,
        }
    }

    /// Kinds of the activities pending for a config, in arming order
    pub fn pending(&self, config_id: &str) -> Vec<ActivityKind> {
        let scopes = self.inner.scopes();
        let Some(scope) = scopes.get(config_id) else {
            return Vec::new();
        };
        let mut activities: Vec<_> = scope.activities.iter().collect();
        activities.sort_by_key(|(id, _)| **id);
        activities.into_iter().map(|(_, a)| a.kind.clone()).collect()
    }

    /// Cancel everything and refuse further arming.
    pub fn shutdown(&self) {
        self.inner.root.cancel();
        self.inner.scopes().clear();
    }
}
