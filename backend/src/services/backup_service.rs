//! Backup pipeline.
//!
//! Runs one extract-then-load pass: connect to the source, resolve the
//! collection set, read every document, close the connection and write the
//! documents into a new copy in the local store. Status bookkeeping belongs
//! to the orchestrator, which hooks in through `RunObserver`.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::models::document::document_count;
use crate::models::{CollectionDocuments, SourceDescriptor};
use crate::services::audit_service::AuditService;
use crate::source::SourceDatabaseClient;
use crate::storage::LocalStore;

/// Outcome of a successful pipeline run
#[derive(Debug, Clone)]
pub struct CompletedRun {
    pub copy_name: String,
    pub collections: Vec<String>,
    pub document_count: usize,
}

/// Hooks the orchestrator uses to track a run in flight.
#[async_trait]
pub trait RunObserver: Send + Sync {
    /// Called once the source connection is open. An error aborts the run.
    async fn on_connected(&self) -> Result<()>;

    /// Called with the resolved collection set before documents are read.
    fn on_collections_resolved(&self, _collections: &[String]) {}
}

/// Backup pipeline service
pub struct BackupService {
    store: Arc<dyn LocalStore>,
    audit: AuditService,
}

impl BackupService {
    pub fn new(store: Arc<dyn LocalStore>, audit: AuditService) -> Self {
        Self { store, audit }
    }

    /// Execute one run into the copy `copy_name`.
    pub async fn run(
        &self,
        config_id: &str,
        source: &SourceDescriptor,
        client: &dyn SourceDatabaseClient,
        copy_name: &str,
        observer: &dyn RunObserver,
    ) -> Result<CompletedRun> {
        client
            .connect()
            .await
            .map_err(|e| e.into_source_connect())?;
        tracing::debug!(config_id = %config_id, server = client.address(), "Connected to source");

        let extracted = self.extract(source, client, observer).await;
        self.close_source(config_id, client).await;
        let (collections, documents) = extracted?;

        if let Err(e) = self.store.write_copy(copy_name, &documents).await {
            self.discard_partial(config_id, copy_name).await;
            return Err(e.into_target_write());
        }

        let count = document_count(&documents);
        tracing::info!(
            config_id = %config_id,
            copy = %copy_name,
            collections = collections.len(),
            documents = count,
            "Backup copy written"
        );
        Ok(CompletedRun {
            copy_name: copy_name.to_string(),
            collections,
            document_count: count,
        })
    }

    async fn extract(
        &self,
        source: &SourceDescriptor,
        client: &dyn SourceDatabaseClient,
        observer: &dyn RunObserver,
    ) -> Result<(Vec<String>, CollectionDocuments)> {
        observer.on_connected().await?;

        let collections = match &source.collections {
            Some(list) => list.clone(),
            None => client
                .list_collection_names(&source.db)
                .await
                .map_err(|e| e.into_source_read())?,
        };
        observer.on_collections_resolved(&collections);

        let documents = client
            .read_all_documents(&source.db, &collections)
            .await
            .map_err(|e| e.into_source_read())?;
        Ok((collections, documents))
    }

    /// Close failures never fail a run; the data is already in memory.
    async fn close_source(&self, config_id: &str, client: &dyn SourceDatabaseClient) {
        if let Err(e) = client.close().await {
            tracing::warn!(config_id = %config_id, error = %e, "Failed to close source connection");
            self.audit
                .warn(config_id, format!("Failed to close source connection: {}", e));
        }
    }

    async fn discard_partial(&self, config_id: &str, copy_name: &str) {
        if let Err(e) = self.store.delete_copy(copy_name).await {
            tracing::error!(
                config_id = %config_id,
                copy = %copy_name,
                error = %e,
                "Failed to discard partial copy"
            );
        }
    }
}
