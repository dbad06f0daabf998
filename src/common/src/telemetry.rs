//! Tracing setup for binaries and tests embedding the maintenance jobs.

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to
/// `default_level` when the variable is unset or invalid.
///
/// Returns `false` when a global subscriber was already installed, so it is
/// safe to call more than once.
pub fn init_tracing(default_level: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

/// Like [`init_tracing`], but writes through the test harness capture.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("rowkeeper=debug,maintenance=debug,common=debug,info"))
        .with_test_writer()
        .try_init();
}
