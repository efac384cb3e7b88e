//! Application error types and result alias.

use thiserror::Error;

/// Application result type alias
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// A run was requested while another run for the same config holds the guard
    #[error("Backup already running for {0}")]
    Overlap(String),

    /// The configuration was aborted and refuses lifecycle operations
    #[error("Backup configuration {0} is aborted")]
    Aborted(String),

    /// A lifecycle change (stop, reconfigure, abort) superseded an in-flight run
    #[error("Backup run cancelled: {0}")]
    Cancelled(String),

    /// Source database could not be reached
    #[error("Failed to connect to source: {0}")]
    SourceConnect(String),

    /// Source connection could not be closed cleanly
    #[error("Failed to close source connection: {0}")]
    SourceClose(String),

    /// Reading collection names or documents from the source failed
    #[error("Failed to read from source: {0}")]
    SourceRead(String),

    /// Writing or deleting copy data in the local store failed
    #[error("Failed to write backup copy: {0}")]
    TargetWrite(String),

    /// Catalog, config or log metadata mutation failed
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Timer could not be armed
    #[error("Schedule error: {0}")]
    Schedule(String),

    /// Not found error
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code for audit messages and CLI output.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Overlap(_) => "OVERLAP",
            AppError::Aborted(_) => "ABORTED",
            AppError::Cancelled(_) => "CANCELLED",
            AppError::SourceConnect(_) => "SOURCE_CONNECT",
            AppError::SourceClose(_) => "SOURCE_CLOSE",
            AppError::SourceRead(_) => "SOURCE_READ",
            AppError::TargetWrite(_) => "TARGET_WRITE",
            AppError::Catalog(_) => "CATALOG",
            AppError::Schedule(_) => "SCHEDULE",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Validation(_) => "VALIDATION",
            AppError::Config(_) => "CONFIG",
            AppError::Io(_) => "IO",
            AppError::Json(_) => "JSON",
            AppError::Internal(_) => "INTERNAL",
        }
    }

    /// Re-tag a collaborator error as a source connect failure.
    pub fn into_source_connect(self) -> Self {
        match self {
            AppError::SourceConnect(_) => self,
            other => AppError::SourceConnect(other.to_string()),
        }
    }

    /// Re-tag a collaborator error as a source read failure.
    pub fn into_source_read(self) -> Self {
        match self {
            AppError::SourceRead(_) => self,
            other => AppError::SourceRead(other.to_string()),
        }
    }

    /// Re-tag a collaborator error as a copy write failure.
    pub fn into_target_write(self) -> Self {
        match self {
            AppError::TargetWrite(_) => self,
            other => AppError::TargetWrite(other.to_string()),
        }
    }

    /// Re-tag a collaborator error as a catalog failure.
    pub fn into_catalog(self) -> Self {
        match self {
            AppError::Catalog(_) | AppError::NotFound(_) => self,
            other => AppError::Catalog(other.to_string()),
        }
    }
}
