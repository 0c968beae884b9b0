//! Tracing setup.
//!
//! Logs go to stderr so streamed replies on stdout stay readable. The
//! filter comes from `RUST_LOG`, defaulting to `modelchat=info,warn`.
//! Colours are only used when stderr is a terminal.

use std::io::IsTerminal;

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "modelchat=info,warn";

/// Install the global subscriber. Calling it again is a no-op.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(true)
        .try_init();
}
