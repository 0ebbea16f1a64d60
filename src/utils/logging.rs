//! Logging macros gated by a per-module `ENABLE_LOGS` const, so chatty
//! polling paths can be silenced without touching the global filter.
//!
//! Each module using these declares its own flag:
//! ```rust
//! const ENABLE_LOGS: bool = false;
//! ```

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}
