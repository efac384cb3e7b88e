//! Backup Keeper - Backend Library
//!
//! Scheduled backups of document databases with TTL and count-based copy retention.

pub mod cli;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod source;
pub mod storage;
pub mod telemetry;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use error::{AppError, Result};
