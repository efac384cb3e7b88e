//! Common test utilities for backend integration tests
//!
//! Provides a filesystem-backed environment:
//! - a local store rooted in a temp directory
//! - a source root seeded with JSON collections
//! - orchestrator dependencies wired to both

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tempfile::TempDir;

use backup_keeper_backend::models::{BackupConfig, SourceDescriptor};
use backup_keeper_backend::services::audit_service::AuditService;
use backup_keeper_backend::services::backup_orchestrator::OrchestratorDeps;
use backup_keeper_backend::services::event_bus::EventBus;
use backup_keeper_backend::services::scheduler_service::Scheduler;
use backup_keeper_backend::source::FilesystemConnector;
use backup_keeper_backend::storage::FilesystemStore;

pub const SERVER: &str = "primary";
pub const DB: &str = "shop";

/// Test context holding the temp directory alive
pub struct TestContext {
    _dir: TempDir,
    pub store_path: PathBuf,
    pub source_root: PathBuf,
    pub store: Arc<FilesystemStore>,
    pub bus: Arc<EventBus>,
}

impl TestContext {
    /// Create a context whose source holds `shop.users` and `shop.orders`.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let store_path = dir.path().join("store");
        let source_root = dir.path().join("sources");

        let ctx = Self {
            store: Arc::new(FilesystemStore::new(&store_path)),
            bus: Arc::new(EventBus::new(64)),
            store_path,
            source_root,
            _dir: dir,
        };
        ctx.write_collection(
            "users",
            serde_json::json!([
                {"name": "ada", "role": "admin"},
                {"name": "bob", "role": "user"},
                {"name": "cy", "role": "user"}
            ]),
        );
        ctx.write_collection("orders", serde_json::json!([{"total": 3}]));
        ctx
    }

    pub fn db_dir(&self) -> PathBuf {
        self.source_root.join(SERVER).join(DB)
    }

    pub fn write_collection(&self, name: &str, documents: Value) {
        let dir = self.db_dir();
        std::fs::create_dir_all(&dir).expect("Failed to create source db dir");
        std::fs::write(dir.join(format!("{}.json", name)), documents.to_string())
            .expect("Failed to write collection");
    }

    /// Fresh dependencies over the same directories, as a restarted process would build.
    pub fn deps(&self) -> OrchestratorDeps {
        OrchestratorDeps {
            store: self.store.clone(),
            connector: Arc::new(FilesystemConnector::new(&self.source_root)),
            scheduler: Scheduler::new(),
            audit: AuditService::spawn(self.store.clone()),
            notifier: self.bus.clone(),
        }
    }

    pub fn copy_dir(&self, name: &str) -> PathBuf {
        self.store_path.join("copies").join(name)
    }

    pub fn catalog_file(&self, config_id: &str, name: &str) -> PathBuf {
        self.store_path
            .join("catalog")
            .join(config_id)
            .join(format!("{}.json", name))
    }
}

/// Config for the seeded source whose first run is an hour away
pub fn config(id: &str) -> BackupConfig {
    BackupConfig::new(SourceDescriptor::new(SERVER, DB))
        .with_id(id)
        .with_start_time(chrono::Utc::now() + chrono::Duration::hours(1))
}
