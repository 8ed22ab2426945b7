//! keying stage (spec.md §2, §4.4, §6): accepts key material and status
//! requests on the control-plane unix sockets and publishes into the
//! TX/RX handoff cells.

use std::io;
use std::path::Path;

use crate::crypto::keys::HandoffCell;
use crate::net::control::{
    bind_control_socket, KeyInjection, StatusResponse, KEY_INJECTION_LEN, STATUS_REQUEST_CODE,
};
use crate::stage::{self, StageContext};

pub struct KeyingPaths<'a> {
    pub keying_path: &'a Path,
    pub keying_uid: Option<u32>,
    pub keying_gid: Option<u32>,
    pub control_path: &'a Path,
}

pub fn run(
    ctx: StageContext,
    tx_handoff: *const HandoffCell,
    rx_handoff: *const HandoffCell,
    paths: KeyingPaths,
) -> io::Result<()> {
    crate::logging::init("keying");
    stage::install_signal_handlers();

    let tx_handoff = unsafe { &*tx_handoff };
    let rx_handoff = unsafe { &*rx_handoff };

    let keying_socket = bind_control_socket(paths.keying_path, paths.keying_uid, paths.keying_gid)?;
    let status_socket = bind_control_socket(paths.control_path, paths.keying_uid, paths.keying_gid)?;

    let mut key_buf = [0u8; KEY_INJECTION_LEN];
    let mut status_buf = [0u8; 1];

    while !stage::shutdown_requested() {
        let mut did_work = false;

        match keying_socket.recv_from(&mut key_buf) {
            Ok((n, _from)) if n == KEY_INJECTION_LEN => {
                did_work = true;
                match KeyInjection::parse(&key_buf[..n]) {
                    Some(injected) => {
                        log::info!(
                            "keying: publishing tx_spi={:#010x} rx_spi={:#010x}",
                            injected.tx_spi,
                            injected.rx_spi
                        );
                        let salt = derive_salt(&injected.key);
                        tx_handoff.publish(injected.tx_spi, &injected.key, salt);
                        rx_handoff.publish(injected.rx_spi, &injected.key, salt);
                    }
                    None => log::info!("keying: malformed key injection record"),
                }
            }
            Ok(_) => {
                did_work = true;
                log::info!("keying: key injection record had the wrong length, dropped");
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => log::info!("keying: keying socket recv failed: {e}"),
        }

        match status_socket.recv_from(&mut status_buf) {
            Ok((1, from)) if status_buf[0] == STATUS_REQUEST_CODE => {
                did_work = true;
                match from.as_pathname() {
                    Some(path) => {
                        let response: StatusResponse = ctx.state().snapshot().into();
                        let bytes = response.to_bytes();
                        if let Err(e) = status_socket.send_to(&bytes, path) {
                            log::info!("keying: status reply failed: {e}");
                        }
                    }
                    None => log::info!("keying: status request from an unbound client socket"),
                }
            }
            Ok(_) => {
                did_work = true;
                log::info!("keying: unrecognized status request code");
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => log::info!("keying: status socket recv failed: {e}"),
        }

        if !did_work {
            stage::idle(ctx.idle_policy);
        }
    }

    Ok(())
}

/// Non-goal per spec.md §1/§9: key derivation is out of scope and the
/// keying socket's input is already-derived material. The nonce salt,
/// however, has to come from *somewhere* distinct from the AEAD key
/// itself; this rewrite derives it from the key bytes deterministically
/// so both peers, given the same injected key, compute the same salt
/// without a separate wire field the spec never defines.
fn derive_salt(key: &[u8; crate::crypto::aead::KEY_LEN]) -> [u8; 4] {
    let mut salt = [0u8; 4];
    for (i, chunk) in key.chunks(4).enumerate() {
        for (j, b) in chunk.iter().enumerate() {
            salt[j] ^= b.wrapping_add(i as u8);
        }
    }
    salt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn salt_derivation_is_deterministic() {
        let key = [0x77u8; crate::crypto::aead::KEY_LEN];
        assert_eq!(derive_salt(&key), derive_salt(&key));
    }

    #[test]
    fn salt_differs_across_distinct_keys() {
        let a = derive_salt(&[0x01u8; crate::crypto::aead::KEY_LEN]);
        let b = derive_salt(&[0x02u8; crate::crypto::aead::KEY_LEN]);
        assert_ne!(a, b);
    }
}
