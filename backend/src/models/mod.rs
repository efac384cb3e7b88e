//! Domain models.

pub mod audit_log;
pub mod backup;
pub mod document;

pub use audit_log::{AuditLogEntry, LogLevel};
pub use backup::{BackupConfig, BackupCopy, BackupStatus, ConfigUpdate, RunResult, SourceDescriptor};
pub use document::{CollectionDocuments, Document, DocumentFilter};
