//! Structured logging setup.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::{fmt, EnvFilter};

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initializes the global `tracing` subscriber with the given filter directive (e.g.
/// `"info"` or `"kishu=debug"`). Safe to call more than once per process — a session
/// registry may host several notebooks, each calling this at `install()` time — a repeat
/// call is logged at `debug` and otherwise ignored rather than treated as an error.
pub fn init_logging(level: &str) {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::debug!("logging already initialized, ignoring repeat init_logging call");
        return;
    }
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(true).try_init();
}
