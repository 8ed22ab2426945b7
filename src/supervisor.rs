//! Supervisor: lays out shared memory, forks the five stage workers,
//! forwards signals, reaps children (spec.md §2, §5, §9).

use std::io;
use std::net::SocketAddrV4;

use nix::sys::signal::{self, SigHandler, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};

use crate::config::{Config, IdlePolicy, Stage};
use crate::crypto::keys::HandoffCell;
use crate::crypto::replay::ReplayWindow;
use crate::pool::PacketPool;
use crate::ring::Ring;
use crate::shm::SharedRegion;
use crate::stage::{self, StageContext};
use crate::state::SharedState;

pub const RING_CAPACITY: u32 = 1024;
pub const POOL_CAPACITY: u32 = 1024;

/// One independent `mmap` per shared structure, rather than one combined
/// region sliced by byte offset (spec.md §9). Confinement after `fork`
/// needs to `munmap` exactly the sub-ranges a stage doesn't use, and
/// `munmap` requires a page-aligned address; a hand-computed byte offset
/// into one large region generally isn't page-aligned, while a fresh
/// `mmap` always returns one. Splitting the region this way is what
/// turns "never hand the reference to stages that should not have it"
/// from a convention into something `SIGSEGV` enforces.
struct SharedRegions {
    pool: SharedRegion,
    to_encrypt: SharedRegion,
    to_crypto: SharedRegion,
    to_decrypt: SharedRegion,
    to_clear: SharedRegion,
    tx_handoff: SharedRegion,
    rx_handoff: SharedRegion,
    state: SharedRegion,
    replay_gate: SharedRegion,
}

fn map_regions() -> io::Result<SharedRegions> {
    Ok(SharedRegions {
        pool: SharedRegion::new(PacketPool::footprint(POOL_CAPACITY))?,
        to_encrypt: SharedRegion::new(Ring::footprint(RING_CAPACITY))?,
        to_crypto: SharedRegion::new(Ring::footprint(RING_CAPACITY))?,
        to_decrypt: SharedRegion::new(Ring::footprint(RING_CAPACITY))?,
        to_clear: SharedRegion::new(Ring::footprint(RING_CAPACITY))?,
        tx_handoff: SharedRegion::new(std::mem::size_of::<HandoffCell>())?,
        rx_handoff: SharedRegion::new(std::mem::size_of::<HandoffCell>())?,
        state: SharedRegion::new(std::mem::size_of::<SharedState>())?,
        replay_gate: SharedRegion::new(std::mem::size_of::<ReplayWindow>())?,
    })
}

/// The raw-pointer views built on top of each of `SharedRegions`'s
/// independent mappings, handed identically to every stage (spec.md §3
/// "offsets computed from a single base pointer and fixed stride",
/// generalized here across the several distinct structures the daemon
/// now shares rather than just packet buffers).
struct Layout {
    pool: PacketPool,
    to_encrypt: Ring,
    to_crypto: Ring,
    to_decrypt: Ring,
    to_clear: Ring,
    tx_handoff: *mut HandoffCell,
    rx_handoff: *mut HandoffCell,
    state: *mut SharedState,
    replay_gate: *mut ReplayWindow,
}

/// # Safety
/// Each field of `regions` must not yet be initialized by anyone else.
unsafe fn init_layout(regions: &SharedRegions) -> io::Result<Layout> {
    let pool = PacketPool::init(regions.pool.as_ptr(), POOL_CAPACITY).map_err(crate::error::invalid)?;
    let to_encrypt = Ring::init(regions.to_encrypt.as_ptr(), RING_CAPACITY).map_err(crate::error::invalid)?;
    let to_crypto = Ring::init(regions.to_crypto.as_ptr(), RING_CAPACITY).map_err(crate::error::invalid)?;
    let to_decrypt = Ring::init(regions.to_decrypt.as_ptr(), RING_CAPACITY).map_err(crate::error::invalid)?;
    let to_clear = Ring::init(regions.to_clear.as_ptr(), RING_CAPACITY).map_err(crate::error::invalid)?;

    let tx_handoff = regions.tx_handoff.as_ptr() as *mut HandoffCell;
    std::ptr::write(tx_handoff, HandoffCell::zeroed());

    let rx_handoff = regions.rx_handoff.as_ptr() as *mut HandoffCell;
    std::ptr::write(rx_handoff, HandoffCell::zeroed());

    let state = regions.state.as_ptr() as *mut SharedState;
    std::ptr::write(state, SharedState::zeroed());

    let replay_gate = regions.replay_gate.as_ptr() as *mut ReplayWindow;
    std::ptr::write(replay_gate, ReplayWindow::new());

    Ok(Layout {
        pool,
        to_encrypt,
        to_crypto,
        to_decrypt,
        to_clear,
        tx_handoff,
        rx_handoff,
        state,
        replay_gate,
    })
}

/// `munmap` every sub-range `stage` does not need, from the calling
/// (just-forked) process's own address space (spec.md §9). Must run
/// before the stage body starts, and after `reset_signal_dispositions`
/// so a detached region is never touched by a signal handler racing the
/// detach itself.
///
/// Per-stage needs, audited against each stage's actual call sites:
/// - `clear`: pool, to_encrypt, to_clear.
/// - `crypto` (crypto-in/out): pool, to_crypto, to_decrypt, state,
///   replay_gate.
/// - `encrypt`: pool, to_encrypt, to_crypto, state, tx_handoff.
/// - `decrypt`: pool, to_decrypt, to_clear, state, rx_handoff,
///   replay_gate.
/// - `keying`: state, tx_handoff, rx_handoff only — no packet pool, no
///   rings, no replay gate.
fn detach_unused(regions: &SharedRegions, stage: Stage) {
    use Stage::*;

    let needs_pool = matches!(stage, Clear | Crypto | Encrypt | Decrypt);
    let needs_to_encrypt = matches!(stage, Clear | Encrypt);
    let needs_to_crypto = matches!(stage, Encrypt | Crypto);
    let needs_to_decrypt = matches!(stage, Crypto | Decrypt);
    let needs_to_clear = matches!(stage, Decrypt | Clear);
    let needs_tx_handoff = matches!(stage, Encrypt | Keying);
    let needs_rx_handoff = matches!(stage, Decrypt | Keying);
    let needs_state = matches!(stage, Crypto | Encrypt | Decrypt | Keying);
    let needs_replay_gate = matches!(stage, Crypto | Decrypt);

    if !needs_pool {
        regions.pool.detach();
    }
    if !needs_to_encrypt {
        regions.to_encrypt.detach();
    }
    if !needs_to_crypto {
        regions.to_crypto.detach();
    }
    if !needs_to_decrypt {
        regions.to_decrypt.detach();
    }
    if !needs_to_clear {
        regions.to_clear.detach();
    }
    if !needs_tx_handoff {
        regions.tx_handoff.detach();
    }
    if !needs_rx_handoff {
        regions.rx_handoff.detach();
    }
    if !needs_state {
        regions.state.detach();
    }
    if !needs_replay_gate {
        regions.replay_gate.detach();
    }
}

/// Reinstall default signal dispositions after `fork`, before running
/// stage-specific logic, so a child never inherits the parent's signal
/// forwarding behavior.
fn reset_signal_dispositions() {
    unsafe {
        let _ = signal::signal(Signal::SIGTERM, SigHandler::SigDfl);
        let _ = signal::signal(Signal::SIGINT, SigHandler::SigDfl);
    }
}

static mut CHILDREN_SHOULD_STOP: bool = false;

extern "C" fn forward_shutdown(_: libc::c_int) {
    unsafe {
        CHILDREN_SHOULD_STOP = true;
    }
}

/// Run the full daemon: map shared memory, fork all five stages, wait
/// for shutdown or a fatal child exit, tear everything down.
pub fn run(config: Config) -> io::Result<()> {
    crate::logging::init("supervisor");

    let regions = map_regions()?;
    let layout = unsafe { init_layout(&regions)? };

    let (peer, local, idle_policy) = (config.peer, config.local, config.idle_policy);
    layout_state(&layout).set_local(local);

    let children = spawn_children(&config, &regions, &layout, peer, local, idle_policy)?;

    install_supervisor_signals();
    log::info!("signsky supervisor started, pid={}", std::process::id());

    loop {
        if unsafe { CHILDREN_SHOULD_STOP } {
            break;
        }

        match waitpid(Pid::from_raw(-1), Some(nix::sys::wait::WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) | Err(nix::errno::Errno::ECHILD) => {
                std::thread::sleep(std::time::Duration::from_millis(200));
            }
            Ok(WaitStatus::Exited(pid, code)) => {
                log::error!("supervisor: stage pid {pid} exited with code {code}, tearing down");
                break;
            }
            Ok(WaitStatus::Signaled(pid, sig, _)) => {
                log::error!("supervisor: stage pid {pid} killed by signal {sig:?}, tearing down");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                log::error!("supervisor: waitpid failed: {e}");
                break;
            }
        }
    }

    shutdown_children(&children);
    Ok(())
}

fn layout_state(layout: &Layout) -> &SharedState {
    unsafe { &*layout.state }
}

fn spawn_children(
    config: &Config,
    regions: &SharedRegions,
    layout: &Layout,
    peer: SocketAddrV4,
    local: SocketAddrV4,
    idle_policy: IdlePolicy,
) -> io::Result<Vec<Pid>> {
    let ctx = StageContext {
        pool: layout.pool,
        to_encrypt: layout.to_encrypt,
        to_crypto: layout.to_crypto,
        to_decrypt: layout.to_decrypt,
        to_clear: layout.to_clear,
        state: layout.state,
        replay_gate: layout.replay_gate,
        idle_policy,
    };
    layout_state(layout).set_peer(peer);
    layout_state(layout).mark_started();

    let mut children = Vec::with_capacity(Stage::ALL.len());

    for stage in Stage::ALL {
        match unsafe { fork() }.map_err(|e| crate::error::other(format!("fork: {e}")))? {
            ForkResult::Parent { child } => children.push(child),
            ForkResult::Child => {
                reset_signal_dispositions();
                detach_unused(regions, stage);
                if let Some(user) = config.user_for(stage) {
                    if let Err(e) = stage::drop_privileges(user) {
                        crate::fatal!("failed to drop privileges to `{user}`: {e}");
                    }
                }

                let result = match stage {
                    Stage::Clear => crate::stage::clear::run(ctx, "signsky0"),
                    Stage::Crypto => crate::stage::crypto_io::run(ctx, local),
                    Stage::Encrypt => crate::stage::encrypt::run(ctx, layout.tx_handoff),
                    Stage::Decrypt => crate::stage::decrypt::run(ctx, layout.rx_handoff),
                    Stage::Keying => crate::stage::keying::run(
                        ctx,
                        layout.tx_handoff,
                        layout.rx_handoff,
                        crate::stage::keying::KeyingPaths {
                            keying_path: &config.keying_path,
                            keying_uid: config.keying_uid,
                            keying_gid: config.keying_gid,
                            control_path: &config.control_path,
                        },
                    ),
                };

                if let Err(e) = result {
                    crate::fatal!("{stage} stage exited with error: {e}");
                }
                std::process::exit(0);
            }
        }
    }

    Ok(children)
}

fn install_supervisor_signals() {
    unsafe {
        let _ = signal::signal(Signal::SIGTERM, SigHandler::Handler(forward_shutdown));
        let _ = signal::signal(Signal::SIGINT, SigHandler::Handler(forward_shutdown));
    }
}

fn shutdown_children(children: &[Pid]) {
    for &pid in children {
        let _ = signal::kill(pid, Signal::SIGTERM);
    }
    for &pid in children {
        let _ = waitpid(pid, None);
    }
    log::info!("supervisor: all stages reaped, exiting");
}
