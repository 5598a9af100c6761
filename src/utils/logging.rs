//! Logging setup plus per-module switchable logging macros.
//!
//! Modules that tick every second (the ticker, the snapshot slot) would
//! flood the log at `info` level, so they gate their output on a
//! module-local flag:
//!
//! ```ignore
//! const ENABLE_LOGS: bool = false;
//!
//! use crate::{log_debug, log_warn};
//!
//! log_debug!("tick {}", remaining);
//! ```

use log::LevelFilter;

/// Initialise `env_logger`. `RUST_LOG` still takes precedence over the
/// default level picked here.
pub fn init(debug: bool) {
    let default_level = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let _ = env_logger::Builder::new()
        .filter_level(default_level)
        .parse_default_env()
        .try_init();
}

/// Info logging gated on the calling module's `ENABLE_LOGS` const.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    }};
}

/// Debug logging gated on the calling module's `ENABLE_LOGS` const.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        if ENABLE_LOGS {
            log::debug!($($arg)*);
        }
    }};
}

/// Warnings are never silenced by `ENABLE_LOGS`; absorbed failures must
/// always leave a trace.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        log::warn!($($arg)*);
    }};
}

/// Errors are never silenced by `ENABLE_LOGS`.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {{
        log::error!($($arg)*);
    }};
}

#[cfg(test)]
mod tests {
    const ENABLE_LOGS: bool = false;

    #[test]
    fn macros_expand_to_match_arm_expressions() {
        for outcome in [Ok(1u8), Err("disk full")] {
            match outcome {
                Ok(n) if n > 1 => crate::log_info!("got {n}"),
                Ok(n) => crate::log_debug!("got {n}"),
                Err(err) if err.is_empty() => crate::log_error!("empty error"),
                Err(err) => crate::log_warn!("failed: {err}"),
            }
        }
    }
}
