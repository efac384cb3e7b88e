//! Telemetry initialization: stdout tracing subscriber.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` takes precedence; otherwise the crate logs at `log_level`.
pub fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_directive(log_level).into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn default_directive(log_level: &str) -> String {
    format!("backup_keeper_backend={}", log_level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive_targets_crate() {
        assert_eq!(default_directive("debug"), "backup_keeper_backend=debug");
        assert!(EnvFilter::try_new(default_directive("info")).is_ok());
    }
}
