//! Error construction helpers.
//!
//! The data plane never propagates per-packet errors: each stage logs
//! its own drop reason with `log::info!`/`log::warn!` at the call site
//! and discards the buffer there (no shared `Drop`-reason enum). This
//! module only covers the handful of startup / control-plane failures
//! that *do* need an `io::Error`, built the way
//! `Core::alloc` builds its contextual errors in the teacher crate this
//! codebase grew out of — a formatted message wrapped in the closest
//! matching `io::ErrorKind`, no separate error-enum crate.

use std::io;

/// Build an `io::Error` of kind `InvalidData` with a formatted message.
pub fn invalid(context: impl AsRef<str>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, context.as_ref().to_string())
}

/// Build an `io::Error` of kind `Other` for conditions with no closer match.
pub fn other(context: impl AsRef<str>) -> io::Error {
    io::Error::new(io::ErrorKind::Other, context.as_ref().to_string())
}

/// Log at `error` level and exit the process with status 1.
///
/// Used exclusively for control-plane invariant violations: a failed CAS
/// in the key handoff state machine, or a cipher setup failure. These are
/// not recoverable per-packet errors and the supervisor is expected to
/// observe the child's exit and tear down the remaining stages.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {{
        log::error!($($arg)*);
        std::process::exit(1);
    }};
}
