//! Audit logging service.
//!
//! Records every lifecycle event of a backup configuration in the local
//! store. Appends are queued onto a background writer task so callers never
//! wait on, or fail because of, the store. Entries are written in submission
//! order.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::error::Result;
use crate::models::{AuditLogEntry, LogLevel};
use crate::storage::LocalStore;

enum AuditCommand {
    Append(AuditLogEntry),
    Flush(oneshot::Sender<()>),
}

/// Audit service
#[derive(Clone)]
pub struct AuditService {
    tx: mpsc::UnboundedSender<AuditCommand>,
    store: Arc<dyn LocalStore>,
}

impl AuditService {
    /// Spawn the writer task. Must be called inside a tokio runtime.
    pub fn spawn(store: Arc<dyn LocalStore>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(store.clone(), rx));
        Self { tx, store }
    }

    /// Queue an audit entry
    pub fn log(&self, config_id: &str, level: LogLevel, message: impl Into<String>) {
        let entry = AuditLogEntry::new(config_id, level, message);
        if self.tx.send(AuditCommand::Append(entry)).is_err() {
            tracing::warn!(config_id = %config_id, "Audit writer stopped, entry dropped");
        }
    }

    pub fn info(&self, config_id: &str, message: impl Into<String>) {
        self.log(config_id, LogLevel::Info, message);
    }

    pub fn warn(&self, config_id: &str, message: impl Into<String>) {
        self.log(config_id, LogLevel::Warn, message);
    }

    pub fn error(&self, config_id: &str, message: impl Into<String>) {
        self.log(config_id, LogLevel::Error, message);
    }

    /// Wait until every entry queued before this call has been handled.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(AuditCommand::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Entries for a config, including everything queued so far
    pub async fn history(&self, config_id: &str) -> Result<Vec<AuditLogEntry>> {
        self.flush().await;
        self.store.list_logs(config_id).await
    }
}

async fn run_writer(store: Arc<dyn LocalStore>, mut rx: mpsc::UnboundedReceiver<AuditCommand>) {
    while let Some(command) = rx.recv().await {
        match command {
            AuditCommand::Append(entry) => {
                tracing::debug!(
                    config_id = %entry.config_id,
                    level = entry.level.as_str(),
                    message = %entry.message,
                    "Audit"
                );
                if let Err(e) = store.append_log(&entry).await {
                    tracing::error!(
                        config_id = %entry.config_id,
                        error = %e,
                        "Failed to write audit entry"
                    );
                }
            }
            AuditCommand::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}
