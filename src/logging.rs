//! Diagnostics setup
//!
//! Library code logs through `tracing`; the binary installs a stderr subscriber once.
//! Console report lines are plain `println!` and do not go through here.

use tracing_subscriber::EnvFilter;

/// Environment variable holding an `EnvFilter` directive, e.g. `REDLINE_LOG=redline=trace`.
pub const LOG_ENV: &str = "REDLINE_LOG";

/// Install the global stderr subscriber. Subsequent calls are no-ops.
///
/// `level` applies when `REDLINE_LOG` is unset or invalid.
pub fn init_subscriber(level: &str) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact();

    let _ = subscriber.try_init();
}

/// Default filter for the `--debug` flag.
pub fn default_level(debug: bool) -> &'static str {
    if debug {
        "debug"
    } else {
        "warn"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_flag_raises_level() {
        assert_eq!(default_level(true), "debug");
        assert_eq!(default_level(false), "warn");
    }

    #[test]
    fn init_twice_is_harmless() {
        init_subscriber("warn");
        init_subscriber("debug");
        tracing::debug!("still fine");
    }
}
