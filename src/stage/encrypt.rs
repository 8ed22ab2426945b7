//! encrypt stage (spec.md §2, §4.3, §4.4): frames and seals outbound packets.

use crate::crypto::esp::{encrypt_packet, EspError};
use crate::crypto::keys::HandoffCell;
use crate::crypto::sa::TxSa;
use crate::pool::packet::Route;
use crate::stage::{self, StageContext, BATCH_SIZE};

pub fn run(ctx: StageContext, handoff: *const HandoffCell) -> std::io::Result<()> {
    crate::logging::init("encrypt");
    stage::install_signal_handlers();

    let handoff = unsafe { &*handoff };
    let mut tx: Option<TxSa> = None;

    while !stage::shutdown_requested() {
        // Install any key the keying stage has published before touching
        // packets this sweep (spec.md §4.6).
        if let Some((spi, key, salt)) = handoff.try_take() {
            log::info!("encrypt: installing new TX key, spi={spi:#010x}");
            tx = Some(TxSa::new(spi, &key, salt));
            ctx.state().set_tx_spi(spi);
        }

        let mut did_work = false;

        for _ in 0..BATCH_SIZE {
            let Some(handle) = ctx.to_encrypt.dequeue() else { break };
            did_work = true;
            let buf = unsafe { ctx.pool.get(handle) };

            let Some(tx_sa) = tx.as_mut() else {
                log::info!("encrypt: no TX key installed, dropped packet");
                ctx.pool.release(handle);
                continue;
            };

            match encrypt_packet(buf, tx_sa) {
                Ok(()) => {
                    buf.set_route(Route::ToCrypto);
                    if ctx.to_crypto.enqueue(handle).is_err() {
                        log::info!("encrypt: crypto queue full, dropped packet");
                        ctx.pool.release(handle);
                    }
                }
                Err(EspError::SequenceExhausted) => {
                    log::error!("encrypt: TX sequence space exhausted, awaiting rekey");
                    tx = None;
                    ctx.pool.release(handle);
                }
                Err(e) => {
                    log::info!("encrypt: failed to seal packet: {e:?}");
                    ctx.pool.release(handle);
                }
            }
        }

        if !did_work {
            stage::idle(ctx.idle_policy);
        }
    }

    Ok(())
}
