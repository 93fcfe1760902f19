//! Logging macros for the batch scheduler with verbosity level control.
//!
//! Verbosity levels:
//! - 0: SILENT (only errors and dispatch failures)
//! - 1: CHANGES (dispatches, batch creation and retirement)
//! - 2: CHECKS (per-target eligibility and window checks)
//! - 3: DEBUG (thread math and budget internals)
//!
//! Records are emitted through `tracing`, so whatever subscriber the host
//! installs decides where they go. [`init_logging`] installs a plain fmt
//! subscriber for hosts that have none.

use tracing_subscriber::EnvFilter;

/// Verbosity level constants.
pub const VERBOSITY_SILENT: u8 = 0;
pub const VERBOSITY_CHANGES: u8 = 1;
pub const VERBOSITY_CHECKS: u8 = 2;
pub const VERBOSITY_DEBUG: u8 = 3;

/// Log at CHANGES level (verbosity >= 1).
///
/// Used for: dispatches, new batches, retirements.
#[macro_export]
macro_rules! log_changes {
    ($verbosity:expr, $($arg:tt)*) => {
        if $verbosity >= $crate::logging::VERBOSITY_CHANGES {
            tracing::info!($($arg)*);
        }
    };
}

/// Log at CHECKS level (verbosity >= 2).
///
/// Used for: skip reasons, admission refusals, window misses.
#[macro_export]
macro_rules! log_checks {
    ($verbosity:expr, $($arg:tt)*) => {
        if $verbosity >= $crate::logging::VERBOSITY_CHECKS {
            tracing::debug!($($arg)*);
        }
    };
}

/// Log at DEBUG level (verbosity >= 3).
///
/// Used for: thread math results, budget bookkeeping.
#[macro_export]
macro_rules! log_debug {
    ($verbosity:expr, $($arg:tt)*) => {
        if $verbosity >= $crate::logging::VERBOSITY_DEBUG {
            tracing::trace!($($arg)*);
        }
    };
}

/// Map a verbosity level onto the `tracing` filter directive that lets its
/// records through.
pub fn filter_directive(verbosity: u8) -> &'static str {
    match verbosity {
        VERBOSITY_SILENT => "warn",
        VERBOSITY_CHANGES => "info",
        VERBOSITY_CHECKS => "debug",
        _ => "trace",
    }
}

/// Install a global fmt subscriber writing to stderr.
///
/// `RUST_LOG` wins over `verbosity` when set. Returns false if a subscriber
/// was already installed.
pub fn init_logging(verbosity: u8) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(verbosity)));
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
    fn test_verbosity_constants() {
        assert_eq!(VERBOSITY_SILENT, 0);
        assert_eq!(VERBOSITY_CHANGES, 1);
        assert_eq!(VERBOSITY_CHECKS, 2);
        assert_eq!(VERBOSITY_DEBUG, 3);
    }

    #[test]
    fn test_filter_directive() {
        assert_eq!(filter_directive(VERBOSITY_SILENT), "warn");
        assert_eq!(filter_directive(VERBOSITY_CHANGES), "info");
        assert_eq!(filter_directive(VERBOSITY_CHECKS), "debug");
        assert_eq!(filter_directive(VERBOSITY_DEBUG), "trace");
        assert_eq!(filter_directive(9), "trace");
    }

    #[test]
    fn test_log_macros_compile() {
        // Just verify macros compile and don't panic
        let verbosity = VERBOSITY_DEBUG;
        log_changes!(verbosity, "test {}", 1);
        log_checks!(verbosity, "test {}", 2);
        log_debug!(verbosity, "test {}", 3);
    }
}
