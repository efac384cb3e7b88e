//! Local store backends.
//!
//! The local store persists backup configs, the copy catalog, audit entries
//! and the copy data itself. It is long-lived and shared by every config.

pub mod filesystem;
pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    AuditLogEntry, BackupConfig, BackupCopy, CollectionDocuments, Document, DocumentFilter,
};

pub use filesystem::FilesystemStore;
pub use memory::MemoryStore;

/// Local store trait
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// All persisted backup configs
    async fn list_configs(&self) -> Result<Vec<BackupConfig>>;

    /// A single config by id
    async fn get_config(&self, id: &str) -> Result<Option<BackupConfig>>;

    /// Upsert a config snapshot.
    ///
    /// Returns `false` without writing when the stored version is newer, which
    /// happens when another process sharing the store updated the config.
    async fn update_config(&self, config: &BackupConfig) -> Result<bool>;

    /// Add a copy catalog record
    async fn add_copy(&self, copy: &BackupCopy) -> Result<()>;

    /// Catalog records for a config, in no particular order
    async fn list_copies(&self, config_id: &str) -> Result<Vec<BackupCopy>>;

    /// Remove a catalog record, returning whether it existed
    async fn remove_copy(&self, config_id: &str, name: &str) -> Result<bool>;

    /// Write copy data
    async fn write_copy(&self, copy_name: &str, documents: &CollectionDocuments) -> Result<()>;

    /// Delete copy data. Deleting missing data is not an error.
    async fn delete_copy(&self, copy_name: &str) -> Result<()>;

    /// Collection names stored in a copy
    async fn list_copy_collections(&self, copy_name: &str) -> Result<Vec<String>>;

    /// Documents of one collection in a copy that match `filter`
    async fn read_copy_collection(
        &self,
        copy_name: &str,
        collection: &str,
        filter: &DocumentFilter,
    ) -> Result<Vec<Document>>;

    /// Delete collections from a copy
    async fn delete_copy_collections(&self, copy_name: &str, collections: &[String]) -> Result<()>;

    /// Append an audit log entry
    async fn append_log(&self, entry: &AuditLogEntry) -> Result<()>;

    /// Audit log entries for a config in append order
    async fn list_logs(&self, config_id: &str) -> Result<Vec<AuditLogEntry>>;
}
