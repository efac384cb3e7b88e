//! Application configuration loaded from environment variables.

use crate::error::{AppError, Result};
use std::env;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory of the filesystem local store
    pub store_path: String,

    /// Root directory of the filesystem source connector
    pub source_root: String,

    /// Optional JSON file of backup configs seeded into the store on boot
    pub backup_configs: Option<String>,

    /// Log level
    pub log_level: String,

    /// Capacity of the config change broadcast channel
    pub event_bus_capacity: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let store_path = var("STORE_PATH").unwrap_or_else(|| "./data".into());
        if store_path.trim().is_empty() {
            return Err(AppError::Config("STORE_PATH must not be empty".into()));
        }

        Ok(Self {
            store_path,
            source_root: var("SOURCE_ROOT").unwrap_or_else(|| "./sources".into()),
            backup_configs: var("BACKUP_CONFIGS").filter(|v| !v.trim().is_empty()),
            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".into()),
            event_bus_capacity: var("EVENT_BUS_CAPACITY")
                .and_then(|v| v.parse().ok())
                .filter(|&n: &usize| n > 0)
                .unwrap_or(64),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.store_path, "./data");
        assert_eq!(config.source_root, "./sources");
        assert!(config.backup_configs.is_none());
        assert_eq!(config.log_level, "info");
        assert_eq!(config.event_bus_capacity, 64);
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("STORE_PATH", "/var/lib/keeper"),
            ("SOURCE_ROOT", "/srv/db"),
            ("BACKUP_CONFIGS", "/etc/keeper/backups.json"),
            ("LOG_LEVEL", "trace"),
            ("EVENT_BUS_CAPACITY", "8"),
        ])
        .unwrap();
        assert_eq!(config.store_path, "/var/lib/keeper");
        assert_eq!(config.source_root, "/srv/db");
        assert_eq!(config.backup_configs.as_deref(), Some("/etc/keeper/backups.json"));
        assert_eq!(config.log_level, "trace");
        assert_eq!(config.event_bus_capacity, 8);
    }

    #[test]
    fn test_invalid_numbers_fall_back() {
        assert_eq!(load(&[("EVENT_BUS_CAPACITY", "lots")]).unwrap().event_bus_capacity, 64);
        assert_eq!(load(&[("EVENT_BUS_CAPACITY", "0")]).unwrap().event_bus_capacity, 64);
    }

    #[test]
    fn test_empty_store_path_rejected() {
        assert!(matches!(load(&[("STORE_PATH", " ")]), Err(AppError::Config(_))));
    }
}
