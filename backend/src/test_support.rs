//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::models::{
    AuditLogEntry, BackupConfig, BackupCopy, CollectionDocuments, Document, DocumentFilter,
    SourceDescriptor,
};
use crate::source::{SourceConnector, SourceDatabaseClient};
use crate::storage::{LocalStore, MemoryStore};

/// Let spawned tasks run until they block on something other than the scheduler.
pub async fn settle() {
    for _ in 0..100 {
        tokio::task::yield_now().await;
    }
}

#[derive(Default)]
struct SourceState {
    databases: Mutex<HashMap<String, CollectionDocuments>>,
    fail_connect: AtomicBool,
    fail_read: AtomicBool,
    fail_close: AtomicBool,
    read_delay: Mutex<Option<Duration>>,
    connects: AtomicUsize,
    closes: AtomicUsize,
    servers: Mutex<Vec<String>>,
}

/// In-memory source server whose failures can be injected
#[derive(Clone, Default)]
pub struct MemoryConnector {
    state: Arc<SourceState>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, db: &str, collection: &str, docs: Vec<Document>) {
        self.state
            .databases
            .lock()
            .unwrap()
            .entry(db.to_string())
            .or_default()
            .insert(collection.to_string(), docs);
    }

    pub fn collections(&self, db: &str) -> Vec<String> {
        self.state
            .databases
            .lock()
            .unwrap()
            .get(db)
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn fail_connect(&self, fail: bool) {
        self.state.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn fail_read(&self, fail: bool) {
        self.state.fail_read.store(fail, Ordering::SeqCst);
    }

    pub fn fail_close(&self, fail: bool) {
        self.state.fail_close.store(fail, Ordering::SeqCst);
    }

    pub fn read_delay(&self, delay: Option<Duration>) {
        *self.state.read_delay.lock().unwrap() = delay;
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// How many clients were built, and for which servers
    pub fn clients_built(&self) -> Vec<String> {
        self.state.servers.lock().unwrap().clone()
    }
}

impl SourceConnector for MemoryConnector {
    fn client(&self, source: &SourceDescriptor) -> Arc<dyn SourceDatabaseClient> {
        self.state.servers.lock().unwrap().push(source.server.clone());
        Arc::new(MemorySource {
            state: self.state.clone(),
            server: source.server.clone(),
            connected: AtomicBool::new(false),
        })
    }
}

pub struct MemorySource {
    state: Arc<SourceState>,
    server: String,
    connected: AtomicBool,
}

impl MemorySource {
    async fn before_read(&self) -> Result<()> {
        let delay = *self.state.read_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.state.fail_read.load(Ordering::SeqCst) {
            return Err(AppError::SourceRead("injected read failure".into()));
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(AppError::SourceRead("not connected".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SourceDatabaseClient for MemorySource {
    async fn connect(&self) -> Result<()> {
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(AppError::SourceConnect("injected connect failure".into()));
        }
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_close.load(Ordering::SeqCst) {
            return Err(AppError::SourceClose("injected close failure".into()));
        }
        Ok(())
    }

    async fn list_collection_names(&self, db: &str) -> Result<Vec<String>> {
        self.before_read().await?;
        Ok(self
            .state
            .databases
            .lock()
            .unwrap()
            .get(db)
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn read_all_documents(
        &self,
        db: &str,
        collections: &[String],
    ) -> Result<CollectionDocuments> {
        self.before_read().await?;
        let databases = self.state.databases.lock().unwrap();
        let mut out = CollectionDocuments::new();
        for collection in collections {
            let docs = databases
                .get(db)
                .and_then(|c| c.get(collection))
                .cloned()
                .ok_or_else(|| AppError::SourceRead(format!("no collection {}", collection)))?;
            out.insert(collection.clone(), docs);
        }
        Ok(out)
    }

    async fn read_collection(
        &self,
        db: &str,
        collection: &str,
        filter: &DocumentFilter,
    ) -> Result<Vec<Document>> {
        self.before_read().await?;
        let databases = self.state.databases.lock().unwrap();
        let docs = databases
            .get(db)
            .and_then(|c| c.get(collection))
            .ok_or_else(|| AppError::SourceRead(format!("no collection {}", collection)))?;
        Ok(filter.apply(docs))
    }

    async fn delete_collections(&self, db: &str, collections: &[String]) -> Result<()> {
        self.before_read().await?;
        if let Some(existing) = self.state.databases.lock().unwrap().get_mut(db) {
            for collection in collections {
                existing.remove(collection);
            }
        }
        Ok(())
    }

    fn address(&self) -> &str {
        &self.server
    }
}

/// Memory store with injectable failures
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_write_copy: AtomicBool,
    fail_delete_copy: AtomicBool,
    fail_add_copy: AtomicBool,
    fail_append_log: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    /// Writes the first collection, then fails
    pub fn fail_write_copy(&self, fail: bool) {
        self.fail_write_copy.store(fail, Ordering::SeqCst);
    }

    pub fn fail_delete_copy(&self, fail: bool) {
        self.fail_delete_copy.store(fail, Ordering::SeqCst);
    }

    pub fn fail_add_copy(&self, fail: bool) {
        self.fail_add_copy.store(fail, Ordering::SeqCst);
    }

    pub fn fail_append_log(&self, fail: bool) {
        self.fail_append_log.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl LocalStore for FlakyStore {
    async fn list_configs(&self) -> Result<Vec<BackupConfig>> {
        self.inner.list_configs().await
    }

    async fn get_config(&self, id: &str) -> Result<Option<BackupConfig>> {
        self.inner.get_config(id).await
    }

    async fn update_config(&self, config: &BackupConfig) -> Result<bool> {
        self.inner.update_config(config).await
    }

    async fn add_copy(&self, copy: &BackupCopy) -> Result<()> {
        if self.fail_add_copy.load(Ordering::SeqCst) {
            return Err(AppError::Catalog("injected catalog failure".into()));
        }
        self.inner.add_copy(copy).await
    }

    async fn list_copies(&self, config_id: &str) -> Result<Vec<BackupCopy>> {
        self.inner.list_copies(config_id).await
    }

    async fn remove_copy(&self, config_id: &str, name: &str) -> Result<bool> {
        self.inner.remove_copy(config_id, name).await
    }

    async fn write_copy(&self, copy_name: &str, documents: &CollectionDocuments) -> Result<()> {
        if self.fail_write_copy.load(Ordering::SeqCst) {
            let partial: CollectionDocuments = documents
                .iter()
                .take(1)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            self.inner.write_copy(copy_name, &partial).await?;
            return Err(AppError::TargetWrite("injected write failure".into()));
        }
        self.inner.write_copy(copy_name, documents).await
    }

    async fn delete_copy(&self, copy_name: &str) -> Result<()> {
        if self.fail_delete_copy.load(Ordering::SeqCst) {
            return Err(AppError::TargetWrite("injected delete failure".into()));
        }
        self.inner.delete_copy(copy_name).await
    }

    async fn list_copy_collections(&self, copy_name: &str) -> Result<Vec<String>> {
        self.inner.list_copy_collections(copy_name).await
    }

    async fn read_copy_collection(
        &self,
        copy_name: &str,
        collection: &str,
        filter: &DocumentFilter,
    ) -> Result<Vec<Document>> {
        self.inner
            .read_copy_collection(copy_name, collection, filter)
            .await
    }

    async fn delete_copy_collections(&self, copy_name: &str, collections: &[String]) -> Result<()> {
        self.inner.delete_copy_collections(copy_name, collections).await
    }

    async fn append_log(&self, entry: &AuditLogEntry) -> Result<()> {
        if self.fail_append_log.load(Ordering::SeqCst) {
            return Err(AppError::Catalog("injected log failure".into()));
        }
        self.inner.append_log(entry).await
    }

    async fn list_logs(&self, config_id: &str) -> Result<Vec<AuditLogEntry>> {
        self.inner.list_logs(config_id).await
    }
}
