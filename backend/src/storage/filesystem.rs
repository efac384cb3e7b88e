//! Filesystem local store backend.
//!
//! Layout under the base path:
//!
//! ```text
//! configs/<config_id>.json
//! catalog/<config_id>/<copy_name>.json
//! copies/<copy_name>/<collection>.json
//! logs/<config_id>.jsonl
//! ```

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::LocalStore;
use crate::error::{AppError, Result};
use crate::models::{
    AuditLogEntry, BackupConfig, BackupCopy, CollectionDocuments, Document, DocumentFilter,
};

/// Filesystem-based local store
pub struct FilesystemStore {
    base_path: PathBuf,
}

impl FilesystemStore {
    /// Create new filesystem store
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn config_path(&self, id: &str) -> Result<PathBuf> {
        Ok(self
            .base_path
            .join("configs")
            .join(format!("{}.json", segment(id)?)))
    }

    fn catalog_dir(&self, config_id: &str) -> Result<PathBuf> {
        Ok(self.base_path.join("catalog").join(segment(config_id)?))
    }

    fn copy_dir(&self, copy_name: &str) -> Result<PathBuf> {
        Ok(self.base_path.join("copies").join(segment(copy_name)?))
    }

    fn collection_path(&self, copy_name: &str, collection: &str) -> Result<PathBuf> {
        Ok(self
            .copy_dir(copy_name)?
            .join(format!("{}.json", segment(collection)?)))
    }

    fn log_path(&self, config_id: &str) -> Result<PathBuf> {
        Ok(self
            .base_path
            .join("logs")
            .join(format!("{}.jsonl", segment(config_id)?)))
    }
}

/// Reject names that would escape their directory.
fn segment(name: &str) -> Result<&str> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(AppError::Validation(format!("Invalid path segment: {:?}", name)));
    }
    Ok(name)
}

/// Write through a temp file and rename so readers never see a torn file.
async fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp).await?;
    file.write_all(content).await?;
    file.sync_all().await?;
    fs::rename(&tmp, path).await
}

async fn read_json_files<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut out = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let bytes = fs::read(&path).await?;
        out.push(serde_json::from_slice(&bytes)?);
    }
    Ok(out)
}

#[async_trait]
impl LocalStore for FilesystemStore {
    async fn list_configs(&self) -> Result<Vec<BackupConfig>> {
        read_json_files(&self.base_path.join("configs"))
            .await
            .map_err(AppError::into_catalog)
    }

    async fn get_config(&self, id: &str) -> Result<Option<BackupConfig>> {
        let path = self.config_path(id)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Catalog(format!("Failed to read config {}: {}", id, e))),
        }
    }

    async fn update_config(&self, config: &BackupConfig) -> Result<bool> {
        if let Some(stored) = self.get_config(&config.id).await? {
            if stored.version > config.version {
                tracing::debug!(
                    config_id = %config.id,
                    stored = stored.version,
                    incoming = config.version,
                    "Ignoring stale config snapshot"
                );
                return Ok(false);
            }
        }
        let path = self.config_path(&config.id)?;
        let content = serde_json::to_vec_pretty(config)?;
        write_atomic(&path, &content)
            .await
            .map_err(|e| AppError::Catalog(format!("Failed to write config {}: {}", config.id, e)))?;
        Ok(true)
    }

    async fn add_copy(&self, copy: &BackupCopy) -> Result<()> {
        let path = self
            .catalog_dir(&copy.config_id)?
            .join(format!("{}.json", segment(&copy.name)?));
        if fs::try_exists(&path).await.unwrap_or(false) {
            return Err(AppError::Catalog(format!("copy {} already catalogued", copy.name)));
        }
        let content = serde_json::to_vec_pretty(copy)?;
        write_atomic(&path, &content)
            .await
            .map_err(|e| AppError::Catalog(format!("Failed to catalog {}: {}", copy.name, e)))
    }

    async fn list_copies(&self, config_id: &str) -> Result<Vec<BackupCopy>> {
        read_json_files(&self.catalog_dir(config_id)?)
            .await
            .map_err(AppError::into_catalog)
    }

    async fn remove_copy(&self, config_id: &str, name: &str) -> Result<bool> {
        let path = self
            .catalog_dir(config_id)?
            .join(format!("{}.json", segment(name)?));
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AppError::Catalog(format!("Failed to remove {}: {}", name, e))),
        }
    }

    async fn write_copy(&self, copy_name: &str, documents: &CollectionDocuments) -> Result<()> {
        for (collection, docs) in documents {
            let path = self.collection_path(copy_name, collection)?;
            let content = serde_json::to_vec(docs)?;
            write_atomic(&path, &content).await.map_err(|e| {
                AppError::TargetWrite(format!(
                    "Failed to write {}/{}: {}",
                    copy_name, collection, e
                ))
            })?;
        }
        // An empty database still produces a copy directory.
        let dir = self.copy_dir(copy_name)?;
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| AppError::TargetWrite(format!("Failed to create {}: {}", copy_name, e)))
    }

    async fn delete_copy(&self, copy_name: &str) -> Result<()> {
        let dir = self.copy_dir(copy_name)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::TargetWrite(format!(
                "Failed to delete {}: {}",
                copy_name, e
            ))),
        }
    }

    async fn list_copy_collections(&self, copy_name: &str) -> Result<Vec<String>> {
        let dir = self.copy_dir(copy_name)?;
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|_| AppError::NotFound(format!("copy {}", copy_name)))?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
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

    async fn read_copy_collection(
        &self,
        copy_name: &str,
        collection: &str,
        filter: &DocumentFilter,
    ) -> Result<Vec<Document>> {
        let path = self.collection_path(copy_name, collection)?;
        let bytes = fs::read(&path).await.map_err(|_| {
            AppError::NotFound(format!("collection {} in {}", collection, copy_name))
        })?;
        let docs: Vec<Document> = serde_json::from_slice(&bytes)?;
        Ok(filter.apply(&docs))
    }

    async fn delete_copy_collections(&self, copy_name: &str, collections: &[String]) -> Result<()> {
        if !fs::try_exists(self.copy_dir(copy_name)?).await.unwrap_or(false) {
            return Err(AppError::NotFound(format!("copy {}", copy_name)));
        }
        for collection in collections {
            let path = self.collection_path(copy_name, collection)?;
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(AppError::TargetWrite(format!(
                        "Failed to delete {}/{}: {}",
                        copy_name, collection, e
                    )))
                }
            }
        }
        Ok(())
    }

    async fn append_log(&self, entry: &AuditLogEntry) -> Result<()> {
        let path = self.log_path(&entry.config_id)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| AppError::Catalog(format!("Failed to open log: {}", e)))?;
        file.write_all(&line)
            .await
            .map_err(|e| AppError::Catalog(format!("Failed to append log: {}", e)))?;
        file.flush().await?;
        Ok(())
    }

    async fn list_logs(&self, config_id: &str) -> Result<Vec<AuditLogEntry>> {
        let path = self.log_path(config_id)?;
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AppError::Catalog(format!("Failed to read log: {}", e))),
        };
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(AppError::from))
            .collect()
    }
}
