//! Common stage-worker scaffolding (spec.md §4.6).
//!
//! Every stage process runs the same shape: install signal disposition,
//! optionally drop privileges, then loop poll/process/enqueue until a
//! quit signal arrives. This module factors out the parts identical
//! across all five stages; `clear.rs`/`crypto_io.rs`/`encrypt.rs`/
//! `decrypt.rs`/`keying.rs` each provide the per-stage body.

pub mod clear;
pub mod crypto_io;
pub mod decrypt;
pub mod encrypt;
pub mod keying;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::config::IdlePolicy;

/// Set by the installed `SIGTERM` handler; every stage's loop checks
/// this once per sweep (spec.md §4.6 "on a quit signal, exit the loop").
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigterm(_: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

/// Install the stage's signal disposition: `SIGTERM` stops the loop
/// gracefully, `SIGINT` is ignored outright (SPEC_FULL.md §12 — only
/// the supervisor's own Ctrl-C handling is actionable).
pub fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGTERM, on_sigterm as usize);
        libc::signal(libc::SIGINT, libc::SIG_IGN);
    }
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN.load(Ordering::SeqCst)
}

/// Between sweeps that found no work, idle per the configured policy:
/// `Perf` busy-spins (a hint only, no sleep), `Balanced` sleeps ~500us
/// to keep CPU cost down (spec.md §4.6).
pub fn idle(policy: IdlePolicy) {
    match policy {
        IdlePolicy::Perf => std::hint::spin_loop(),
        IdlePolicy::Balanced => std::thread::sleep(Duration::from_micros(500)),
    }
}

/// Drop this process's privileges to the named user's uid/gid, if one
/// was configured for this stage. Must be called after every shared
/// resource the stage needs has been mapped (the resources themselves
/// may require root, e.g. opening `/dev/net/tun`).
pub fn drop_privileges(user: &str) -> std::io::Result<()> {
    use nix::unistd::{setgid, setuid, Gid, Uid, User};

    let user = User::from_name(user)
        .map_err(|e| crate::error::other(format!("looking up user `{user}`: {e}")))?
        .ok_or_else(|| crate::error::invalid(format!("no such user `{user}`")))?;

    setgid(Gid::from_raw(user.gid.as_raw()))
        .map_err(|e| crate::error::other(format!("setgid: {e}")))?;
    setuid(Uid::from_raw(user.uid.as_raw()))
        .map_err(|e| crate::error::other(format!("setuid: {e}")))?;

    Ok(())
}

/// How many packets a single sweep drains at most before yielding back
/// to the idle check (spec.md §4.6: "read up to 32-64 packets per wake").
pub const BATCH_SIZE: usize = 64;

/// Shared handle every stage receives at startup instead of reaching
/// into a singleton (spec.md §9). Each field is a pointer view into one
/// of `supervisor`'s independent `mmap` regions; a stage only touches
/// the fields it needs, and `supervisor::detach_unused` backs that up
/// at the OS level by `munmap`-ing every region a stage doesn't need
/// right after `fork`, in that process only. A field the current stage
/// doesn't use can therefore point at memory that is no longer even
/// mapped in this process — accidentally touching it faults instead of
/// silently reading a sibling stage's data. Cheap to copy: every field
/// is a thin pointer view.
#[derive(Clone, Copy)]
pub struct StageContext {
    pub pool: crate::pool::PacketPool,
    pub to_encrypt: crate::ring::Ring,
    pub to_crypto: crate::ring::Ring,
    pub to_decrypt: crate::ring::Ring,
    pub to_clear: crate::ring::Ring,
    pub state: *const crate::state::SharedState,
    /// Shared permissive anti-replay pre-check window (spec.md §3, §4.5):
    /// crypto-in consults it before routing a datagram to the decrypt
    /// queue at all, widened by the decrypt queue's depth so packets
    /// still in flight aren't falsely rejected; decrypt advances it past
    /// each packet number it authoritatively accepts.
    pub replay_gate: *const crate::crypto::replay::ReplayWindow,
    pub idle_policy: IdlePolicy,
}

impl StageContext {
    pub fn state(&self) -> &crate::state::SharedState {
        unsafe { &*self.state }
    }

    pub fn replay_gate(&self) -> &crate::crypto::replay::ReplayWindow {
        unsafe { &*self.replay_gate }
    }
}

unsafe impl Send for StageContext {}
unsafe impl Sync for StageContext {}
