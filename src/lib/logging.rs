use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_ENV: &str = "WEBUI_BRIDGE_LOG";

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Installs the global subscriber. Later calls are no-ops.
pub fn init_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let directives = filter_directives(
            std::env::var(LOG_ENV).ok(),
            std::env::var("RUST_LOG").ok(),
        );

        let subscriber = tracing_subscriber::registry().with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_filter(EnvFilter::new(&directives)),
        );
        if subscriber.try_init().is_err() {
            tracing::debug!("global subscriber already installed");
        }

        tracing::debug!(filter = %directives, "logging initialized");
    });
}

fn filter_directives(own: Option<String>, rust_log: Option<String>) -> String {
    own.filter(|s| !s.trim().is_empty())
        .or(rust_log.filter(|s| !s.trim().is_empty()))
        .unwrap_or_else(|| "info".to_string())
}
