//! Structured logging (ambient stack), mirroring
//! `original_source/internal/log/logger.go`'s `Dev`/`Prod` split: a
//! human-readable mode for local development and a JSON mode for production,
//! both on stderr, with the debug flag raising verbosity.

use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Dev,
    Prod,
}

/// Initializes the global `tracing` subscriber. Must be called once, before
/// any vault operation, from the embedding binary.
pub fn init(mode: Mode, debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);

    match mode {
        Mode::Dev => {
            subscriber.init();
        }
        Mode::Prod => {
            subscriber.json().init();
        }
    }
}
