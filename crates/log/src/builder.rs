//! Global subscriber installation.

use std::sync::Once;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, fmt};

use crate::config::{Config, Format};
use crate::error::{LogError, LogResult};

/// Install the global subscriber described by `config`.
///
/// Fails on an unparsable filter or if a subscriber is already installed.
pub fn init(config: &Config) -> LogResult<()> {
    let filter = EnvFilter::try_new(&config.level).map_err(|e| LogError::Filter {
        directive: config.level.clone(),
        reason: e.to_string(),
    })?;

    let registry = Registry::default().with(filter);
    let installed = match config.format {
        Format::Pretty => registry
            .with(fmt::layer().pretty().with_ansi(config.ansi))
            .try_init(),
        Format::Compact => registry
            .with(fmt::layer().compact().with_ansi(config.ansi))
            .try_init(),
        Format::Json => registry
            .with(fmt::layer().json().flatten_event(true).with_ansi(false))
            .try_init(),
    };
    installed.map_err(|_| LogError::AlreadyInitialized)
}

/// Install a test writer subscriber once per process.
///
/// Safe to call from every test; later calls and conflicts with a subscriber
/// installed elsewhere are ignored.
pub fn init_test() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        let config = Config::test();
        let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("trace"));
        let _ = Registry::default()
            .with(filter)
            .with(fmt::layer().compact().with_ansi(false).with_test_writer())
            .try_init();
    });
}
