//! decrypt stage (spec.md §2, §4.3, §4.4, §4.5, §4.7): verifies,
//! opens, and strips framing from inbound ESP datagrams.

use std::net::SocketAddrV4;

use crate::crypto::esp::{decrypt_packet, EspError};
use crate::crypto::keys::HandoffCell;
use crate::crypto::sa::RxSa;
use crate::pool::packet::Route;
use crate::stage::{self, StageContext, BATCH_SIZE};

pub fn run(ctx: StageContext, handoff: *const HandoffCell) -> std::io::Result<()> {
    crate::logging::init("decrypt");
    stage::install_signal_handlers();

    let handoff = unsafe { &*handoff };
    let mut rx = RxSa::empty();

    while !stage::shutdown_requested() {
        if let Some((spi, key, salt)) = handoff.try_take() {
            log::info!("decrypt: installing new RX key, spi={spi:#010x}");
            rx.install(spi, &key, salt);
            ctx.state().set_rx_spi(spi);
        }

        let mut did_work = false;

        for _ in 0..BATCH_SIZE {
            let Some(handle) = ctx.to_decrypt.dequeue() else { break };
            did_work = true;
            let buf = unsafe { ctx.pool.get(handle) };

            match decrypt_packet(buf, &mut rx) {
                Ok(pn) => {
                    // Peer address learning (spec.md §4.7): a verified
                    // packet's source becomes the recorded peer.
                    if let Some((ip, port)) = buf.origin() {
                        let learned = SocketAddrV4::new(ip, port);
                        if ctx.state().peer() != Some(learned) {
                            ctx.state().set_peer(learned);
                        }
                    }
                    // Advance the shared permissive pre-check window
                    // (spec.md §4.5) so crypto-in's early filter tracks
                    // the authoritative high-water mark.
                    ctx.replay_gate().update(pn);
                    ctx.state().record_rx(buf.payload_len() as u64);
                    buf.set_route(Route::ToClear);
                    if ctx.to_clear.enqueue(handle).is_err() {
                        log::info!("decrypt: clear queue full, dropped packet");
                        ctx.pool.release(handle);
                    }
                }
                Err(EspError::Truncated) => {
                    log::info!("decrypt: dropped truncated datagram");
                    ctx.pool.release(handle);
                }
                Err(EspError::BadTrailer) => {
                    log::info!("decrypt: dropped packet with invalid trailer");
                    ctx.pool.release(handle);
                }
                Err(EspError::Rejected) => {
                    log::info!("decrypt: dropped packet failing verification or replay check");
                    ctx.pool.release(handle);
                }
                Err(EspError::SequenceExhausted) => unreachable!("decrypt never calls next_pn"),
            }
        }

        if !did_work {
            stage::idle(ctx.idle_policy);
        }
    }

    Ok(())
}
