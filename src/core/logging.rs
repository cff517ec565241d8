//! Zero-overhead logging macros wrapping `tracing`.
//!
//! These give every module a uniform, low-ceremony way to log allocation and
//! reclaim decisions without importing `tracing` directly everywhere.

/// Info level logging - general information messages.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        tracing::info!($($arg)*)
    };
}

/// Warning level logging - potentially problematic situations.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        tracing::warn!($($arg)*)
    };
}

/// Error level logging - error conditions.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        tracing::error!($($arg)*)
    };
}

/// Debug level logging - detailed information for debugging.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        tracing::debug!($($arg)*)
    };
}

/// Trace level logging - very detailed tracing information.
#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {
        tracing::trace!($($arg)*)
    };
}
