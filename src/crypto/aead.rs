//! The AEAD primitive (spec.md §4.3, §9: "four-operation interface").
//!
//! `setup(key) -> ctx`, `overhead() -> 16`, `encrypt`/`decrypt` in place.
//! Any AES-256-GCM implementation satisfies this; this rewrite uses the
//! RustCrypto `aes-gcm` crate, the same family as the `sha2` crate the
//! teacher already depended on (the teacher's own use of `sha2` had no
//! surviving call site once key derivation turned out to be entirely
//! out of scope — see DESIGN.md — so it was replaced rather than kept
//! alongside an unrelated cipher crate).

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce, Tag};
use std::fmt;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const AAD_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AeadError;

impl fmt::Display for AeadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AEAD operation failed")
    }
}

impl std::error::Error for AeadError {}

/// A ready-to-use AES-256-GCM context bound to one 32-byte key.
pub struct AeadContext {
    cipher: Aes256Gcm,
}

impl AeadContext {
    pub fn setup(key: &[u8; KEY_LEN]) -> AeadContext {
        let key = Key::<Aes256Gcm>::from_slice(key);
        AeadContext { cipher: Aes256Gcm::new(key) }
    }

    pub const fn overhead() -> usize {
        TAG_LEN
    }

    /// Seal `buf[..plaintext_len]` in place under `nonce`/`aad`, writing
    /// the 16-byte tag to `buf[plaintext_len..plaintext_len + TAG_LEN]`.
    /// `buf` must have at least `plaintext_len + TAG_LEN` bytes.
    pub fn encrypt(
        &self,
        nonce: &[u8; NONCE_LEN],
        aad: &[u8; AAD_LEN],
        buf: &mut [u8],
        plaintext_len: usize,
    ) -> Result<(), AeadError> {
        debug_assert!(buf.len() >= plaintext_len + TAG_LEN);
        let nonce = Nonce::from_slice(nonce);
        let tag = self
            .cipher
            .encrypt_in_place_detached(nonce, aad, &mut buf[..plaintext_len])
            .map_err(|_| AeadError)?;
        buf[plaintext_len..plaintext_len + TAG_LEN].copy_from_slice(tag.as_slice());
        Ok(())
    }

    /// Open `buf[..ciphertext_len]` in place (tag follows at
    /// `buf[ciphertext_len..ciphertext_len + TAG_LEN]`), verifying the
    /// tag and, on success, leaving the plaintext in
    /// `buf[..ciphertext_len]`.
    pub fn decrypt(
        &self,
        nonce: &[u8; NONCE_LEN],
        aad: &[u8; AAD_LEN],
        buf: &mut [u8],
        ciphertext_len: usize,
    ) -> Result<(), AeadError> {
        debug_assert!(buf.len() >= ciphertext_len + TAG_LEN);
        let nonce = Nonce::from_slice(nonce);
        let tag = Tag::clone_from_slice(&buf[ciphertext_len..ciphertext_len + TAG_LEN]);
        self.cipher
            .decrypt_in_place_detached(nonce, aad, &mut buf[..ciphertext_len], &tag)
            .map_err(|_| AeadError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let key = [0x42u8; KEY_LEN];
        let ctx = AeadContext::setup(&key);
        let nonce = [1u8; NONCE_LEN];
        let aad = [2u8; AAD_LEN];

        let mut buf = vec![0u8; 32 + TAG_LEN];
        buf[..32].copy_from_slice(&[7u8; 32]);
        ctx.encrypt(&nonce, &aad, &mut buf, 32).unwrap();
        assert_ne!(&buf[..32], &[7u8; 32][..]);

        ctx.decrypt(&nonce, &aad, &mut buf, 32).unwrap();
        assert_eq!(&buf[..32], &[7u8; 32][..]);
    }

    #[test]
    fn tampered_ciphertext_rejected() {
        let key = [0x11u8; KEY_LEN];
        let ctx = AeadContext::setup(&key);
        let nonce = [3u8; NONCE_LEN];
        let aad = [4u8; AAD_LEN];

        let mut buf = vec![0u8; 16 + TAG_LEN];
        ctx.encrypt(&nonce, &aad, &mut buf, 16).unwrap();
        buf[0] ^= 0x01;
        assert!(ctx.decrypt(&nonce, &aad, &mut buf, 16).is_err());
    }

    #[test]
    fn tampered_aad_rejected() {
        let key = [0x22u8; KEY_LEN];
        let ctx = AeadContext::setup(&key);
        let nonce = [5u8; NONCE_LEN];
        let mut aad = [6u8; AAD_LEN];

        let mut buf = vec![0u8; 16 + TAG_LEN];
        ctx.encrypt(&nonce, &aad, &mut buf, 16).unwrap();
        aad[0] ^= 0x01;
        assert!(ctx.decrypt(&nonce, &aad, &mut buf, 16).is_err());
    }

    #[test]
    fn wrong_key_rejected() {
        let ctx_a = AeadContext::setup(&[0xAAu8; KEY_LEN]);
        let ctx_b = AeadContext::setup(&[0xBBu8; KEY_LEN]);
        let nonce = [7u8; NONCE_LEN];
        let aad = [8u8; AAD_LEN];

        let mut buf = vec![0u8; 16 + TAG_LEN];
        ctx_a.encrypt(&nonce, &aad, &mut buf, 16).unwrap();
        assert!(ctx_b.decrypt(&nonce, &aad, &mut buf, 16).is_err());
    }
}
