//! Log output for binaries embedding the monitor.
//!
//! The library itself only emits `tracing` events. Applications that do not
//! install their own subscriber can call [`init_logging`], which honours
//! `RUST_LOG` and otherwise uses the given default directive.

use tracing_subscriber::EnvFilter;

/// Installs a formatted stderr subscriber.
///
/// Returns `false` if a global subscriber was already installed, in which
/// case nothing changes.
///
/// # Examples
///
/// ```
/// taskwatch::init_logging("taskwatch=debug");
/// ```
pub fn init_logging(default_directive: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .is_ok()
}
