//! Logging setup
//!
//! The library logs through `tracing`; this helper installs a formatting
//! subscriber for binaries and tests. `RUST_LOG` takes precedence over the
//! `verbose` flag:
//!
//! ```bash
//! RUST_LOG=eiger_stream_rust=debug
//! RUST_LOG=eiger_stream_rust::container=trace
//! ```

use crate::error::{Result, StreamError};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber
///
/// Without `RUST_LOG`, logs at `info`, or at `debug` when `verbose` is set.
/// Fails if a global subscriber is already installed.
pub fn init_logging(verbose: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(verbose)
        .try_init()
        .map_err(|e| StreamError::Config(format!("logging already initialized: {}", e)))
}

fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "info"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        assert_eq!(default_directive(false), "info");
        assert_eq!(default_directive(true), "debug");
    }
}
