//! Filesystem source database.
//!
//! Each server is a directory under the connector root, each database a
//! subdirectory, and each collection a JSON array file:
//! `<root>/<server>/<db>/<collection>.json`.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::fs;

use super::{SourceConnector, SourceDatabaseClient};
use crate::error::{AppError, Result};
use crate::models::{CollectionDocuments, Document, DocumentFilter, SourceDescriptor};

/// Source client reading JSON collection files
pub struct FilesystemSource {
    server: String,
    server_path: PathBuf,
    connected: AtomicBool,
}

impl FilesystemSource {
    pub fn new(root: impl AsRef<Path>, server: impl Into<String>) -> Self {
        let server = server.into();
        let server_path = root.as_ref().join(&server);
        Self {
            server,
            server_path,
            connected: AtomicBool::new(false),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(AppError::SourceRead(format!("{} is not connected", self.server)))
        }
    }

    fn db_path(&self, db: &str) -> Result<PathBuf> {
        Ok(self.server_path.join(name_segment(db)?))
    }

    fn collection_path(&self, db: &str, collection: &str) -> Result<PathBuf> {
        Ok(self
            .db_path(db)?
            .join(format!("{}.json", name_segment(collection)?)))
    }

    async fn load(&self, db: &str, collection: &str) -> Result<Vec<Document>> {
        let path = self.collection_path(db, collection)?;
        let bytes = fs::read(&path).await.map_err(|e| {
            AppError::SourceRead(format!("Failed to read {}.{}: {}", db, collection, e))
        })?;
        serde_json::from_slice(&bytes).map_err(|e| {
            AppError::SourceRead(format!("Malformed collection {}.{}: {}", db, collection, e))
        })
    }
}

fn name_segment(name: &str) -> Result<&str> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(AppError::Validation(format!("Invalid name: {:?}", name)));
    }
    Ok(name)
}

#[async_trait]
impl SourceDatabaseClient for FilesystemSource {
    async fn connect(&self) -> Result<()> {
        let meta = fs::metadata(&self.server_path).await.map_err(|e| {
            AppError::SourceConnect(format!("{}: {}", self.server_path.display(), e))
        })?;
        if !meta.is_dir() {
            return Err(AppError::SourceConnect(format!(
                "{} is not a directory",
                self.server_path.display()
            )));
        }
        self.connected.store(true, Ordering::SeqCst);
        tracing::debug!(server = %self.server, "Source connected");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn list_collection_names(&self, db: &str) -> Result<Vec<String>> {
        self.ensure_connected()?;
        let dir = self.db_path(db)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AppError::SourceRead(format!("{}: {}", db, e))),
        };
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AppError::SourceRead(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn read_all_documents(
        &self,
        db: &str,
        collections: &[String],
    ) -> Result<CollectionDocuments> {
        self.ensure_connected()?;
        let mut out = CollectionDocuments::new();
        for collection in collections {
            let docs = self.load(db, collection).await?;
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
        self.ensure_connected()?;
        let docs = self.load(db, collection).await?;
        Ok(filter.apply(&docs))
    }

    async fn delete_collections(&self, db: &str, collections: &[String]) -> Result<()> {
        self.ensure_connected()?;
        for collection in collections {
            let path = self.collection_path(db, collection)?;
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(AppError::SourceRead(format!(
                        "Failed to drop {}.{}: {}",
                        db, collection, e
                    )))
                }
            }
        }
        Ok(())
    }

    fn address(&self) -> &str {
        &self.server
    }
}

/// Connector handing out filesystem clients rooted at one directory
#[derive(Debug, Clone)]
pub struct FilesystemConnector {
    root: PathBuf,
}

impl FilesystemConnector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl SourceConnector for FilesystemConnector {
    fn client(&self, source: &SourceDescriptor) -> Arc<dyn SourceDatabaseClient> {
        Arc::new(FilesystemSource::new(&self.root, source.server.clone()))
    }
}
