//! Log subscriber setup.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn default_filter(level: &str) -> String {
    format!("{level},warden={level},warden_xmpp={level},warden_core={level}")
}

/// `RUST_LOG` wins; otherwise a bare level from the configuration applies to
/// every warden crate, and a full directive list is used as given.
pub fn build_log_filter(level_or_filter: &str) -> EnvFilter {
    if let Ok(filter) = std::env::var("RUST_LOG") {
        if let Ok(filter) = EnvFilter::try_new(filter) {
            return filter;
        }
    }

    let level_or_filter = level_or_filter.trim();
    let filter = if level_or_filter.contains('=') || level_or_filter.contains(',') {
        level_or_filter.to_string()
    } else if level_or_filter.is_empty() {
        default_filter("info")
    } else {
        default_filter(level_or_filter)
    };
    EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new(default_filter("info")))
}

pub fn init_tracing(level_or_filter: &str) -> Result<(), tracing_subscriber::util::TryInitError> {
    tracing_subscriber::registry()
        .with(build_log_filter(level_or_filter))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
}
