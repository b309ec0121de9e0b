//! Logging setup for simbase hosts
//!
//! Hosts call [`init`] once at startup. `RUST_LOG` takes precedence over the
//! configured level so individual subsystems can be traced without editing
//! the configuration file.

use crate::config::LogLevel;
use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber
///
/// Returns `false` if a subscriber was already installed (tests and embedding
/// hosts may initialize logging more than once).
pub fn init(level: LogLevel) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_directive()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        init(LogLevel::Warn);
        assert!(!init(LogLevel::Debug));
    }
}
