use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::{BackupConfig, BackupStatus};

/// Event published after a backup config was persisted.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigChanged {
    pub config_id: String,
    /// Snapshot version that was persisted
    pub version: u64,
    pub status: BackupStatus,
    /// ISO 8601 timestamp
    pub timestamp: String,
}

impl ConfigChanged {
    /// Create an event for `config` timestamped to now.
    pub fn now(config: &BackupConfig) -> Self {
        Self {
            config_id: config.id.clone(),
            version: config.version,
            status: config.status,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Receives a notification after every persisted config mutation.
pub trait ChangeNotifier: Send + Sync {
    fn notify_config_changed(&self, config: &BackupConfig);
}

/// Broadcast-based event bus for config change events.
///
/// Subscribers receive events via `tokio::sync::broadcast`. If a subscriber
/// falls behind, it receives `RecvError::Lagged` and should re-read the store.
pub struct EventBus {
    tx: broadcast::Sender<ConfigChanged>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. If there are no subscribers the event is dropped silently.
    pub fn publish(&self, event: ConfigChanged) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChanged> {
        self.tx.subscribe()
    }
}

impl ChangeNotifier for EventBus {
    fn notify_config_changed(&self, config: &BackupConfig) {
        self.publish(ConfigChanged::now(config));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceDescriptor;

    fn config(id: &str) -> BackupConfig {
        BackupConfig::new(SourceDescriptor::new("primary", "shop")).with_id(id)
    }

    #[tokio::test]
    async fn test_notify_publishes_snapshot() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        let mut cfg = config("nightly");
        cfg.version = 7;
        cfg.status = BackupStatus::Waiting;
        bus.notify_config_changed(&cfg);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.config_id, "nightly");
        assert_eq!(event.version, 7);
        assert_eq!(event.status, BackupStatus::Waiting);
    }

    #[tokio::test]
    async fn test_no_subscribers_does_not_panic() {
        let bus = EventBus::new(16);
        bus.notify_config_changed(&config("x"));
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();

        for i in 0..5 {
            bus.notify_config_changed(&config(&format!("cfg-{i}")));
        }

        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            other => panic!("Expected Lagged, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.notify_config_changed(&config("weekly"));

        let e1 = rx1.recv().await.unwrap();
        let e2 = rx2.recv().await.unwrap();
        assert_eq!(e1.config_id, e2.config_id);
        assert_eq!(e1.version, e2.version);
    }

    #[test]
    fn test_event_serializes_status_upper_case() {
        let mut cfg = config("nightly");
        cfg.status = BackupStatus::Stop;
        let json = serde_json::to_string(&ConfigChanged::now(&cfg)).unwrap();
        assert!(json.contains(r#""status":"STOP""#));
        assert!(json.contains(r#""config_id":"nightly""#));
    }
}
