//! Tracing subscriber setup.
//!
//! The crate only emits `tracing` events; installing a subscriber is left to
//! the application. These helpers cover the common setups.

use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

fn env_filter(default_directives: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives))
}

/// Installs a human-readable global subscriber.
///
/// `RUST_LOG` takes precedence over `default_directives`.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(default_directives: &str) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(env_filter(default_directives))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()?;
    tracing::debug!(directives = default_directives, "Tracing initialized");
    Ok(())
}

/// Installs a global subscriber writing one JSON object per event.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_json_tracing(default_directives: &str) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(env_filter(default_directives))
        .with(tracing_subscriber::fmt::layer().json())
        .try_init()?;
    Ok(())
}

/// Installs a subscriber writing through the test harness capture.
///
/// Safe to call from every test; only the first call installs.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter("signal_context=trace"))
        .with_test_writer()
        .try_init();
}
