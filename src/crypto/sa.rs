//! Security association state (spec.md §4.4).
//!
//! A TX association is owned by exactly one stage (encrypt) and needs no
//! atomics on its sequence counter — the same "exclusive owner, plain
//! fields" reasoning as `pool::packet::PacketBuffer`. An RX association
//! is the two-slot current/pending pair the decrypt stage keeps so a
//! rekey in flight doesn't stall packets still arriving under the old
//! key: try the current slot, fall back to pending, promote pending to
//! current on its first success.

use crate::crypto::aead::{AeadContext, KEY_LEN};
use crate::crypto::replay::ReplayWindow;

/// One direction's worth of keying material: the 32-byte AEAD key (wrapped
/// in a ready `AeadContext`), the 4-byte salt that seeds the nonce, and the
/// SPI that names this association on the wire.
pub struct TxSa {
    spi: u32,
    salt: [u8; 4],
    cipher: AeadContext,
    seq: u64,
    exhausted: bool,
}

impl TxSa {
    pub fn new(spi: u32, key: &[u8; KEY_LEN], salt: [u8; 4]) -> TxSa {
        TxSa { spi, salt, cipher: AeadContext::setup(key), seq: 1, exhausted: false }
    }

    pub fn spi(&self) -> u32 {
        self.spi
    }

    pub fn salt(&self) -> [u8; 4] {
        self.salt
    }

    pub fn cipher(&self) -> &AeadContext {
        &self.cipher
    }

    /// Hand out the next packet number, starting at 1 (spec.md §4.4: a
    /// freshly installed slot's sequence starts at 1 — PN 0 is never a
    /// valid wire value, per the replay window's `p > 0` admission rule
    /// in spec.md §4.5), or `None` once the 64-bit space is exhausted (a
    /// TX association that has used every PN must not be reused — the
    /// peer has to rekey first). The single owning stage calls this, so
    /// a plain non-atomic increment is safe and matches the Open
    /// Question's "single-writer" resolution.
    pub fn next_pn(&mut self) -> Option<u64> {
        if self.exhausted {
            return None;
        }
        let pn = self.seq;
        if pn == u64::MAX {
            self.exhausted = true;
        } else {
            self.seq += 1;
        }
        Some(pn)
    }
}

struct RxSlot {
    spi: u32,
    cipher: AeadContext,
    salt: [u8; 4],
    window: ReplayWindow,
}

/// The decrypt stage's two-slot receive state: `current` is the
/// association new packets are expected under, `pending` is a freshly
/// installed association waiting for its first successful packet before
/// it is promoted (spec.md §4.4's rekey-without-a-gap policy).
pub struct RxSa {
    current: Option<RxSlot>,
    pending: Option<RxSlot>,
}

impl RxSa {
    pub fn empty() -> RxSa {
        RxSa { current: None, pending: None }
    }

    pub fn current_spi(&self) -> Option<u32> {
        self.current.as_ref().map(|s| s.spi)
    }

    /// Install a freshly keyed association as `pending`. If there was no
    /// `current` yet (first key of this association's lifetime) it is
    /// installed directly as `current` instead, so the very first packet
    /// doesn't have to go through a promotion.
    pub fn install(&mut self, spi: u32, key: &[u8; KEY_LEN], salt: [u8; 4]) {
        let slot = RxSlot { spi, cipher: AeadContext::setup(key), salt, window: ReplayWindow::new() };
        if self.current.is_none() {
            self.current = Some(slot);
        } else {
            self.pending = Some(slot);
        }
    }

    /// Open `buf[..ciphertext_len]` in place against whichever slot's SPI
    /// matches the one carried on the wire, building the nonce/AAD from
    /// that slot's own salt (spec.md §4.3: nonce = salt || PN, AAD = SPI
    /// || PN). A `pending` success promotes it to `current` (spec.md
    /// §4.4). Returns `true` on acceptance; the caller is left with
    /// plaintext in `buf` on success, unchanged input otherwise.
    pub fn accept(&mut self, spi: u32, pn: u64, buf: &mut [u8], ciphertext_len: usize) -> bool {
        if let Some(slot) = &mut self.current {
            if slot.spi == spi && slot.window.check(pn) {
                let (nonce, aad) = frame_nonce_aad(spi, pn, &slot.salt);
                if slot.cipher.decrypt(&nonce, &aad, buf, ciphertext_len).is_ok() {
                    slot.window.update(pn);
                    return true;
                }
            }
        }

        if let Some(slot) = &mut self.pending {
            if slot.spi == spi && slot.window.check(pn) {
                let (nonce, aad) = frame_nonce_aad(spi, pn, &slot.salt);
                if slot.cipher.decrypt(&nonce, &aad, buf, ciphertext_len).is_ok() {
                    slot.window.update(pn);
                    self.current = self.pending.take();
                    return true;
                }
            }
        }

        false
    }
}

/// Build the 12-byte nonce (salt || PN) and 12-byte AAD (SPI || PN) that
/// spec.md §4.3 defines for ESP tunnel mode framing, shared by both the
/// TX and RX paths.
pub fn frame_nonce_aad(spi: u32, pn: u64, salt: &[u8; 4]) -> ([u8; 12], [u8; 12]) {
    let mut nonce = [0u8; 12];
    nonce[..4].copy_from_slice(salt);
    nonce[4..].copy_from_slice(&pn.to_be_bytes());

    let mut aad = [0u8; 12];
    aad[..4].copy_from_slice(&spi.to_be_bytes());
    aad[4..].copy_from_slice(&pn.to_be_bytes());

    (nonce, aad)
}
