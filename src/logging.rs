//! Logging initialization for binaries and tests.
//!
//! The engine itself only emits `tracing` events; hosts decide how they are
//! rendered. This helper wires up the conventional console subscriber with
//! `RUST_LOG`-style filtering.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the default console subscriber.
///
/// Reads the filter from the environment (`RUST_LOG`), falling back to the
/// given directive. Safe to call more than once; later calls are no-ops.
pub fn init(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init();
}
