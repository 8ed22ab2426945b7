//! ESP tunnel-mode framing (spec.md §4.3).
//!
//! Wire layout: `SPI(4) | low32 PN(4) | full PN(8) | ciphertext(payload |
//! trailer) | tag(16)`, all big-endian. The trailer is always
//! `{pad_length: 0, next_header: IPPROTO_IP}` since signsky only ever
//! tunnels whole IP packets and never pads. Ties `pool::packet`,
//! `crypto::sa` and `crypto::replay` together into the two operations
//! the encrypt and decrypt stages actually call.

use crate::crypto::sa::{frame_nonce_aad, RxSa, TxSa};
use crate::pool::packet::{PacketBuffer, HEAD_RESERVE, TRAILER_LEN, TAG_LEN};

const NEXT_HEADER_IP: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EspError {
    /// The TX association has exhausted its 64-bit packet number space.
    SequenceExhausted,
    /// Frame too short to contain even the fixed head and tag.
    Truncated,
    /// AEAD tag verification failed, the packet number was outside the
    /// anti-replay window, or no installed association matched the SPI.
    Rejected,
    /// Tag verified but the decrypted trailer was not the expected
    /// `{pad: 0, next: IPPROTO_IP}`.
    BadTrailer,
}

/// Seal `buf`'s resident plaintext payload into an ESP frame in place,
/// appending the trailer and tag and writing the head at offset 0.
/// Leaves `buf`'s frame view (`frame()`/`frame_len()`) populated.
pub fn encrypt_packet(buf: &mut PacketBuffer, tx: &mut TxSa) -> Result<(), EspError> {
    let pn = tx.next_pn().ok_or(EspError::SequenceExhausted)?;
    let payload_len = buf.payload_len();
    let plaintext_len = payload_len + TRAILER_LEN;

    let (nonce, aad) = frame_nonce_aad(tx.spi(), pn, &tx.salt());

    let raw = buf.raw_mut();
    raw[HEAD_RESERVE + payload_len] = 0;
    raw[HEAD_RESERVE + payload_len + 1] = NEXT_HEADER_IP;

    tx.cipher()
        .encrypt(&nonce, &aad, &mut raw[HEAD_RESERVE..], plaintext_len)
        .map_err(|_| EspError::Rejected)?;

    raw[0..4].copy_from_slice(&tx.spi().to_be_bytes());
    raw[4..8].copy_from_slice(&(pn as u32).to_be_bytes());
    raw[8..16].copy_from_slice(&pn.to_be_bytes());

    buf.set_frame_len(HEAD_RESERVE + plaintext_len + TAG_LEN);
    Ok(())
}

/// Open an ESP frame resident in `buf` in place, validating the trailer
/// and landing the plaintext payload back at its fixed headroom offset
/// (`buf.payload()`/`buf.payload_len()`). Returns the packet's PN on
/// success, so a caller holding the shared permissive pre-check window
/// (spec.md §4.5) can advance it past the authoritative per-SA check.
pub fn decrypt_packet(buf: &mut PacketBuffer, rx: &mut RxSa) -> Result<u64, EspError> {
    let frame_len = buf.frame_len();
    if frame_len < HEAD_RESERVE + TAG_LEN {
        return Err(EspError::Truncated);
    }

    let raw = buf.raw_mut();
    let spi = u32::from_be_bytes(raw[0..4].try_into().unwrap());
    let pn_low32 = u32::from_be_bytes(raw[4..8].try_into().unwrap());
    let pn = u64::from_be_bytes(raw[8..16].try_into().unwrap());
    if pn_low32 != pn as u32 {
        return Err(EspError::Rejected);
    }
    let ciphertext_len = frame_len - HEAD_RESERVE - TAG_LEN;

    if !rx.accept(spi, pn, &mut raw[HEAD_RESERVE..], ciphertext_len) {
        return Err(EspError::Rejected);
    }

    let plaintext_len = ciphertext_len - TRAILER_LEN;
    let pad = raw[HEAD_RESERVE + plaintext_len];
    let next = raw[HEAD_RESERVE + plaintext_len + 1];
    if pad != 0 || next != NEXT_HEADER_IP {
        return Err(EspError::BadTrailer);
    }

    buf.set_payload_len(plaintext_len);
    Ok(pn)
}
