//! Bootstrap utilities for processes embedding the event store.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LOG_ENV_VAR;

/// Initialize tracing with the EVENTVAULT_LOG environment variable.
///
/// Defaults to "info" level if EVENTVAULT_LOG is not set.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Like [`init_tracing`], but tolerates a subscriber already being set and
/// writes through the test writer. Safe to call from every test.
pub fn try_init_test_tracing() {
    let _ = tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}
