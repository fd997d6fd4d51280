//! Logging facade for diagnostics.
//!
//! - **With `tracing-integration`** (default): re-exports the `tracing`
//!   macros used by this crate.
//! - **Without it**: no-op macros that expand to nothing, so the hot
//!   acquire/release path carries no logging cost.
//!
//! Diagnostics that must always reach a human (held-lock listings, fatal
//! messages) go through a [`Reporter`](crate::Reporter) instead, which
//! falls back to stderr when tracing is compiled out.

#[cfg(feature = "tracing-integration")]
pub use tracing::{debug, error, info, trace, warn};

#[cfg(not(feature = "tracing-integration"))]
mod noop {
    //! No-op implementations when tracing is disabled.

    /// No-op trace-level logging macro.
    #[macro_export]
    macro_rules! trace {
        ($($arg:tt)*) => {};
    }

    /// No-op debug-level logging macro.
    #[macro_export]
    macro_rules! debug {
        ($($arg:tt)*) => {};
    }

    /// No-op info-level logging macro.
    #[macro_export]
    macro_rules! info {
        ($($arg:tt)*) => {};
    }

    /// No-op warn-level logging macro.
    #[macro_export]
    macro_rules! warn {
        ($($arg:tt)*) => {};
    }

    /// No-op error-level logging macro.
    #[macro_export]
    macro_rules! error {
        ($($arg:tt)*) => {};
    }

    pub use crate::{debug, error, info, trace, warn};
}

#[cfg(not(feature = "tracing-integration"))]
pub use noop::*;
