//! Business logic services.

pub mod audit_service;
pub mod backup_orchestrator;
pub mod backup_service;
pub mod event_bus;
pub mod registry_service;
pub mod retention_service;
pub mod scheduler_service;
