//! Unified Logging Macros for knx-tunnel
//!
//! This module provides a unified logging interface that automatically
//! selects between `log::` and `defmt::` based on the active feature flags.
//! The library never installs a logger; the application decides where
//! records go.
//!
//! # Usage
//!
//! ```rust,ignore
//! use knx_tunnel::knx_log;
//!
//! knx_log!(info, "Connection established");
//! knx_log!(debug, "Received {} bytes", n);
//! knx_log!(warn, "Ack timeout, retry {}", attempt);
//! ```
//!
//! # Feature Flags
//!
//! - No feature - Uses `log::` (default, works with any `log` backend)
//! - `defmt` - Uses `defmt::` (for embedded targets with a defmt transport)
//!
//! With `defmt` every argument must implement `defmt::Format`, so only
//! plain integers, strings and types deriving `Format` are logged.

/// Unified logging macro - selects log:: or defmt:: based on features
#[macro_export]
#[cfg(not(feature = "defmt"))]
macro_rules! knx_log {
    (info, $($arg:tt)*) => { log::info!($($arg)*) };
    (debug, $($arg:tt)*) => { log::debug!($($arg)*) };
    (warn, $($arg:tt)*) => { log::warn!($($arg)*) };
    (error, $($arg:tt)*) => { log::error!($($arg)*) };
    (trace, $($arg:tt)*) => { log::trace!($($arg)*) };
}

#[macro_export]
#[cfg(feature = "defmt")]
macro_rules! knx_log {
    (info, $($arg:tt)*) => { defmt::info!($($arg)*) };
    (debug, $($arg:tt)*) => { defmt::debug!($($arg)*) };
    (warn, $($arg:tt)*) => { defmt::warn!($($arg)*) };
    (error, $($arg:tt)*) => { defmt::error!($($arg)*) };
    (trace, $($arg:tt)*) => { defmt::trace!($($arg)*) };
}
