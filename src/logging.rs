//! Per-process log setup.
//!
//! The teacher crate has no logging crate — its FFI layer just
//! `eprintln!`s. A daemon with five worker processes interleaving output
//! needs each line attributable to a stage and pid, so every process
//! (parent and each forked stage) calls `init` once at startup with its
//! own stage tag.

use std::io::Write;

/// Initialize the `env_logger` backend with a `[stage:pid]` prefix on
/// every line. Safe to call once per process; a second call is a no-op
/// (mirrors `env_logger::Builder::try_init`'s documented behavior).
pub fn init(stage: &'static str) {
    let pid = std::process::id();
    let _ = env_logger::Builder::from_default_env()
        .format(move |buf, record| {
            writeln!(
                buf,
                "[{stage}:{pid}] {} {}: {}",
                buf.timestamp_millis(),
                record.level(),
                record.args()
            )
        })
        .try_init();
}
