//! Provides logging facilities.
//!
//! The macros forward to [`defmt`](https://docs.rs/defmt) when the `defmt` feature is enabled,
//! to the [`log`](https://docs.rs/log) facade when the `log` feature is enabled, and otherwise
//! only type-check their arguments.
//!
//! Format strings must stay within the subset understood by both backends: `{}` and `{:?}`.

#![cfg_attr(not(test), no_std)]
#![deny(missing_docs)]
#![deny(clippy::pedantic)]

#[cfg(feature = "defmt")]
pub mod defmt {
    //! Selected [`defmt`] items.

    // This module is hidden in the docs, but would still be imported by a wildcard import of this
    // crate's items.
    #[doc(hidden)]
    pub mod hidden {
        // Required so the macros can access it.
        #[doc(hidden)]
        pub use defmt;
    }

    pub use defmt::{unreachable, Debug2Format, Display2Format, Format};

    // These are required "internally" by `defmt`.
    pub use defmt::{export, Formatter, Str};
}

#[cfg(all(feature = "log", not(feature = "defmt")))]
#[doc(hidden)]
pub mod hidden {
    pub use log;
}

// The declarative macros are required because the defmt macros expect defmt to be in scope.

/// Logs a message at the trace level.
#[cfg(feature = "defmt")]
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {{
        use $crate::defmt::hidden::defmt;
        defmt::trace!($($arg)*);
    }};
}

/// Logs a message at the debug level.
#[cfg(feature = "defmt")]
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {{
        use $crate::defmt::hidden::defmt;
        defmt::debug!($($arg)*);
    }};
}

/// Logs a message at the info level.
#[cfg(feature = "defmt")]
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {{
        use $crate::defmt::hidden::defmt;
        defmt::info!($($arg)*);
    }};
}

/// Logs a message at the warn level.
#[cfg(feature = "defmt")]
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {{
        use $crate::defmt::hidden::defmt;
        defmt::warn!($($arg)*);
    }};
}

/// Logs a message at the error level.
#[cfg(feature = "defmt")]
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {{
        use $crate::defmt::hidden::defmt;
        defmt::error!($($arg)*);
    }};
}

/// Logs a message at the trace level.
#[cfg(all(feature = "log", not(feature = "defmt")))]
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {{
        $crate::hidden::log::trace!($($arg)*);
    }};
}

/// Logs a message at the debug level.
#[cfg(all(feature = "log", not(feature = "defmt")))]
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {{
        $crate::hidden::log::debug!($($arg)*);
    }};
}

/// Logs a message at the info level.
#[cfg(all(feature = "log", not(feature = "defmt")))]
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {{
        $crate::hidden::log::info!($($arg)*);
    }};
}

/// Logs a message at the warn level.
#[cfg(all(feature = "log", not(feature = "defmt")))]
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {{
        $crate::hidden::log::warn!($($arg)*);
    }};
}

/// Logs a message at the error level.
#[cfg(all(feature = "log", not(feature = "defmt")))]
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {{
        $crate::hidden::log::error!($($arg)*);
    }};
}

// The no-op variants only borrow their arguments, through `format_args!`.

/// No-op log macro.
#[cfg(not(any(feature = "defmt", feature = "log")))]
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {{
        ::core::mem::drop(::core::format_args!($($arg)*));
    }};
}

/// No-op log macro.
#[cfg(not(any(feature = "defmt", feature = "log")))]
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {{
        ::core::mem::drop(::core::format_args!($($arg)*));
    }};
}

/// No-op log macro.
#[cfg(not(any(feature = "defmt", feature = "log")))]
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {{
        ::core::mem::drop(::core::format_args!($($arg)*));
    }};
}

/// No-op log macro.
#[cfg(not(any(feature = "defmt", feature = "log")))]
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {{
        ::core::mem::drop(::core::format_args!($($arg)*));
    }};
}

/// No-op log macro.
#[cfg(not(any(feature = "defmt", feature = "log")))]
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {{
        ::core::mem::drop(::core::format_args!($($arg)*));
    }};
}
