//! Tracing subscriber setup.

use bftsim_config::BftsimConfig;
use tracing_subscriber::EnvFilter;

/// Installs a global fmt subscriber.
///
/// `RUST_LOG` takes precedence; `default_directive` (for example `"info"` or
/// `"bftsim_pbft=debug"`) applies when it is unset or invalid.
///
/// # Panics
///
/// Panics if a global subscriber is already installed.
pub fn init_tracing(default_directive: &str) {
    tracing_subscriber::fmt().with_env_filter(env_filter(default_directive)).init();
}

/// Installs a global fmt subscriber using the `[logging]` section's filter
/// as the default directive.
///
/// # Panics
///
/// Panics if a global subscriber is already installed.
pub fn init_from_config(config: &BftsimConfig) {
    init_tracing(&config.logging.filter);
}

/// Like [`init_tracing`], but writes through the test harness and tolerates
/// being called from several tests.
pub fn init_test_tracing(default_directive: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_directive))
        .with_test_writer()
        .try_init();
}

/// [`init_test_tracing`] with the `[logging]` section's filter.
pub fn init_test_from_config(config: &BftsimConfig) {
    init_test_tracing(&config.logging.filter);
}

fn env_filter(default_directive: &str) -> EnvFilter {
    let from_env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    choose_filter(from_env.as_deref(), default_directive)
}

fn choose_filter(from_env: Option<&str>, default_directive: &str) -> EnvFilter {
    from_env
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(default_directive))
}
