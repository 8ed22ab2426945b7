//! crypto-in/out stage (spec.md §2): peer UDP socket <-> crypto/decrypt queues.
//!
//! "crypto-in" (peer -> decrypt) and "crypto-out" (encrypt -> peer) share
//! one process and one UDP socket, same as the spec's single "crypto-in/
//! out" row describes.

use std::net::SocketAddrV4;

use crate::net::udp::{is_peer_unreachable, PeerSocket};
use crate::pool::packet::{Route, HEAD_RESERVE};
use crate::stage::{self, StageContext, BATCH_SIZE};

pub fn run(ctx: StageContext, local: SocketAddrV4) -> std::io::Result<()> {
    crate::logging::init("crypto");
    stage::install_signal_handlers();

    let socket = PeerSocket::bind(local)?;

    while !stage::shutdown_requested() {
        let mut did_work = false;

        // Framed ESP datagrams produced by encrypt, headed to the peer.
        for _ in 0..BATCH_SIZE {
            let Some(handle) = ctx.to_crypto.dequeue() else { break };
            did_work = true;
            let buf = unsafe { ctx.pool.get(handle) };

            match ctx.state().peer() {
                None => log::info!("crypto: no peer address learned yet, dropped outbound packet"),
                Some(peer) => {
                    let frame = buf.frame();
                    match socket.send_to(frame, peer) {
                        Ok(_) => ctx.state().record_tx(frame.len() as u64),
                        Err(e) if is_peer_unreachable(&e) => {
                            log::warn!("crypto: peer {peer} unreachable: {e}");
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                        Err(e) => log::info!("crypto: send to peer failed: {e}"),
                    }
                }
            }
            ctx.pool.release(handle);
        }

        // ESP datagrams arriving from the peer, headed to decrypt.
        for _ in 0..BATCH_SIZE {
            let Some(handle) = ctx.pool.acquire() else {
                let mut discard = [0u8; 2048];
                match socket.recv_from(&mut discard) {
                    Ok(_) => log::info!("crypto: pool exhausted, dropped inbound datagram"),
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(e) => log::info!("crypto: recv failed: {e}"),
                }
                break;
            };

            let buf = unsafe { ctx.pool.get(handle) };
            match socket.recv_from(buf.raw_mut()) {
                Ok((n, from)) => {
                    did_work = true;
                    buf.set_frame_len(n);
                    buf.set_origin(*from.ip(), from.port());

                    // Permissive anti-replay pre-check (spec.md §4.5, §9):
                    // reject datagrams too old to plausibly verify before
                    // they even take a decrypt-queue slot, widened by the
                    // queue's own depth minus one so packets still
                    // waiting in line aren't falsely pre-rejected. The
                    // authoritative strict check runs inside decrypt.
                    if n >= HEAD_RESERVE {
                        let pn = u64::from_be_bytes(buf.raw_mut()[8..16].try_into().unwrap());
                        let slack = (ctx.to_decrypt.capacity() - 1) as u64;
                        if !ctx.replay_gate().check_permissive(pn, slack) {
                            log::info!("crypto: dropped inbound datagram failing permissive replay pre-check");
                            ctx.pool.release(handle);
                            continue;
                        }
                    }

                    buf.set_route(Route::ToDecrypt);
                    if ctx.to_decrypt.enqueue(handle).is_err() {
                        log::info!("crypto: decrypt queue full, dropped packet");
                        ctx.pool.release(handle);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    ctx.pool.release(handle);
                    break;
                }
                Err(e) => {
                    log::info!("crypto: recv failed: {e}");
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
