//! Abstraction over source database clients.
//!
//! The `SourceDatabaseClient` trait gives the backup pipeline a uniform way to
//! pull collections out of whatever database a config protects. A
//! `SourceConnector` builds one client per config from its source descriptor.

pub mod filesystem;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::models::{CollectionDocuments, Document, DocumentFilter, SourceDescriptor};

pub use filesystem::{FilesystemConnector, FilesystemSource};

/// Client for one source database server.
#[async_trait]
pub trait SourceDatabaseClient: Send + Sync {
    /// Open the connection
    async fn connect(&self) -> Result<()>;

    /// Close the connection. Closing an unopened client is a no-op.
    async fn close(&self) -> Result<()>;

    /// Collection names in `db`
    async fn list_collection_names(&self, db: &str) -> Result<Vec<String>>;

    /// Full scan of every listed collection
    async fn read_all_documents(&self, db: &str, collections: &[String])
        -> Result<CollectionDocuments>;

    /// Documents of one collection matching `filter`
    async fn read_collection(
        &self,
        db: &str,
        collection: &str,
        filter: &DocumentFilter,
    ) -> Result<Vec<Document>>;

    /// Drop collections from `db`
    async fn delete_collections(&self, db: &str, collections: &[String]) -> Result<()>;

    /// Server address, for logging
    fn address(&self) -> &str;
}

/// Builds source clients from descriptors.
pub trait SourceConnector: Send + Sync {
    fn client(&self, source: &SourceDescriptor) -> Arc<dyn SourceDatabaseClient>;
}
