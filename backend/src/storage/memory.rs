//! In-memory local store backend.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::LocalStore;
use crate::error::{AppError, Result};
use crate::models::{
    AuditLogEntry, BackupConfig, BackupCopy, CollectionDocuments, Document, DocumentFilter,
};

#[derive(Default)]
struct MemoryState {
    configs: BTreeMap<String, BackupConfig>,
    catalog: HashMap<String, Vec<BackupCopy>>,
    copies: HashMap<String, CollectionDocuments>,
    logs: HashMap<String, Vec<AuditLogEntry>>,
}

/// Store that keeps everything in process memory
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether copy data exists for `copy_name`
    pub async fn has_copy_data(&self, copy_name: &str) -> bool {
        self.state.read().await.copies.contains_key(copy_name)
    }

    /// Names of every stored copy, catalogued or not
    pub async fn copy_data_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.read().await.copies.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn list_configs(&self) -> Result<Vec<BackupConfig>> {
        Ok(self.state.read().await.configs.values().cloned().collect())
    }

    async fn get_config(&self, id: &str) -> Result<Option<BackupConfig>> {
        Ok(self.state.read().await.configs.get(id).cloned())
    }

    async fn update_config(&self, config: &BackupConfig) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.configs.get(&config.id) {
            Some(stored) if stored.version > config.version => {
                tracing::debug!(
                    config_id = %config.id,
                    stored = stored.version,
                    incoming = config.version,
                    "Ignoring stale config snapshot"
                );
                Ok(false)
            }
            _ => {
                state.configs.insert(config.id.clone(), config.clone());
                Ok(true)
            }
        }
    }

    async fn add_copy(&self, copy: &BackupCopy) -> Result<()> {
        let mut state = self.state.write().await;
        let records = state.catalog.entry(copy.config_id.clone()).or_default();
        if records.iter().any(|c| c.name == copy.name) {
            return Err(AppError::Catalog(format!("copy {} already catalogued", copy.name)));
        }
        records.push(copy.clone());
        Ok(())
    }

    async fn list_copies(&self, config_id: &str) -> Result<Vec<BackupCopy>> {
        Ok(self
            .state
            .read()
            .await
            .catalog
            .get(config_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn remove_copy(&self, config_id: &str, name: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(records) = state.catalog.get_mut(config_id) else {
            return Ok(false);
        };
        let before = records.len();
        records.retain(|c| c.name != name);
        Ok(records.len() != before)
    }

    async fn write_copy(&self, copy_name: &str, documents: &CollectionDocuments) -> Result<()> {
        self.state
            .write()
            .await
            .copies
            .insert(copy_name.to_string(), documents.clone());
        Ok(())
    }

    async fn delete_copy(&self, copy_name: &str) -> Result<()> {
        self.state.write().await.copies.remove(copy_name);
        Ok(())
    }

    async fn list_copy_collections(&self, copy_name: &str) -> Result<Vec<String>> {
        let state = self.state.read().await;
        let copy = state
            .copies
            .get(copy_name)
            .ok_or_else(|| AppError::NotFound(format!("copy {}", copy_name)))?;
        Ok(copy.keys().cloned().collect())
    }

    async fn read_copy_collection(
        &self,
        copy_name: &str,
        collection: &str,
        filter: &DocumentFilter,
    ) -> Result<Vec<Document>> {
        let state = self.state.read().await;
        let docs = state
            .copies
            .get(copy_name)
            .and_then(|copy| copy.get(collection))
            .ok_or_else(|| AppError::NotFound(format!("collection {} in {}", collection, copy_name)))?;
        Ok(filter.apply(docs))
    }

    async fn delete_copy_collections(&self, copy_name: &str, collections: &[String]) -> Result<()> {
        let mut state = self.state.write().await;
        let copy = state
            .copies
            .get_mut(copy_name)
            .ok_or_else(|| AppError::NotFound(format!("copy {}", copy_name)))?;
        for collection in collections {
            copy.remove(collection);
        }
        Ok(())
    }

    async fn append_log(&self, entry: &AuditLogEntry) -> Result<()> {
        self.state
            .write()
            .await
            .logs
            .entry(entry.config_id.clone())
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn list_logs(&self, config_id: &str) -> Result<Vec<AuditLogEntry>> {
        Ok(self
            .state
            .read()
            .await
            .logs
            .get(config_id)
            .cloned()
            .unwrap_or_default())
    }
}
