//! Tracing setup for binaries and integration harnesses.

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. Filtering follows `RUST_LOG`,
/// defaulting to `info`. Safe to call more than once; later calls lose
/// quietly.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if let Err(err) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
    {
        eprintln!("tracing init failed: {err}");
    }
}
