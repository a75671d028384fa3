//! Tracing subscriber setup for the CLI.
//!
//! The library only emits events; installing a subscriber is left to the
//! binary so embedders keep control of their own.

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Default filter for a `-v` count
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "s3_explorer=warn",
        1 => "s3_explorer=info",
        2 => "s3_explorer=debug",
        _ => "trace",
    }
}

/// Build the filter. `RUST_LOG` overrides the verbosity flag when set.
pub fn build_filter(verbosity: u8) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)))
}

/// Install the global subscriber, writing to stderr. Returns false when a
/// subscriber was already installed.
pub fn init(verbosity: u8) -> bool {
    let fmt_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(build_filter(verbosity))
        .try_init()
        .is_ok()
}
