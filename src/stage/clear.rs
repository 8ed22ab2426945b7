//! clear-in/out stage (spec.md §2): tunnel device <-> encrypt/decrypt queues.

use crate::net::tun::Tun;
use crate::pool::packet::Route;
use crate::stage::{self, StageContext, BATCH_SIZE};

pub fn run(ctx: StageContext, tun_name: &str) -> std::io::Result<()> {
    crate::logging::init("clear");
    stage::install_signal_handlers();

    let mut tun = Tun::open(tun_name)?;

    while !stage::shutdown_requested() {
        let mut did_work = false;

        // Decrypted packets headed out to the tunnel.
        for _ in 0..BATCH_SIZE {
            let Some(handle) = ctx.to_clear.dequeue() else { break };
            did_work = true;
            let buf = unsafe { ctx.pool.get(handle) };
            if let Err(e) = tun.write_packet(buf.payload()) {
                log::info!("clear: tunnel write failed: {e}");
            }
            ctx.pool.release(handle);
        }

        // Plaintext packets read off the tunnel, destined for encrypt.
        for _ in 0..BATCH_SIZE {
            let Some(handle) = ctx.pool.acquire() else {
                let mut discard = [0u8; 1500];
                match tun.read_packet(&mut discard) {
                    Ok(_) => log::info!("clear: pool exhausted, dropped tunnel read"),
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(e) => log::info!("clear: tunnel read failed: {e}"),
                }
                break;
            };

            let buf = unsafe { ctx.pool.get(handle) };
            match tun.read_packet(buf.payload_area_mut()) {
                Ok(0) => {
                    ctx.pool.release(handle);
                    break;
                }
                Ok(n) => {
                    did_work = true;
                    buf.set_payload_len(n);
                    buf.set_route(Route::ToEncrypt);
                    if ctx.to_encrypt.enqueue(handle).is_err() {
                        log::info!("clear: encrypt queue full, dropped packet");
                        ctx.pool.release(handle);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    ctx.pool.release(handle);
                    break;
                }
                Err(e) => {
                    log::info!("clear: tunnel read failed: {e}");
                    ctx.pool.release(handle);
                    break;
                }
            }
        }

        if !did_work {
            stage::idle(ctx.idle_policy);
        }
    }

    Ok(())
}
