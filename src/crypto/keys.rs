//! Process-shared key handoff cell (spec.md §4.6).
//!
//! A single producer (the keying stage) and a single consumer (encrypt or
//! decrypt, one `HandoffCell` per direction) pass a freshly negotiated key
//! across the process boundary through shared memory, using a small CAS
//! state machine instead of a lock: `EMPTY -> GENERATING -> PENDING ->
//! INSTALLING -> EMPTY`. Grounded on the same "raw pointer into a shared
//! region, atomics carry the handoff" idiom as `crate::ring::Ring`, sized
//! down to a single value instead of a queue because at most one key is
//! ever in flight per direction.

use crate::crypto::aead::KEY_LEN;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};

const EMPTY: u32 = 0;
const GENERATING: u32 = 1;
const PENDING: u32 = 2;
const INSTALLING: u32 = 3;

/// Layout placed directly in shared memory; `key` and `salt` are touched
/// only while the state machine guarantees exclusive access, so they need
/// no atomics of their own.
#[repr(C)]
pub struct HandoffCell {
    pub state: AtomicU32,
    pub spi: AtomicU32,
    pub key: UnsafeCell<[u8; KEY_LEN]>,
    pub salt: UnsafeCell<[u8; 4]>,
}

unsafe impl Send for HandoffCell {}
unsafe impl Sync for HandoffCell {}

impl HandoffCell {
    pub(crate) fn zeroed() -> HandoffCell {
        HandoffCell {
            state: AtomicU32::new(EMPTY),
            spi: AtomicU32::new(0),
            key: UnsafeCell::new([0u8; KEY_LEN]),
            salt: UnsafeCell::new([0u8; 4]),
        }
    }

    /// Keying-stage producer: claim the cell, write the new key, and
    /// publish it. Any state other than `EMPTY` at the start means the
    /// previous key was never collected by the consumer stage, which
    /// violates the one-key-in-flight invariant — fatal per spec.md §4.6.
    pub fn publish(&self, spi: u32, key: &[u8; KEY_LEN], salt: [u8; 4]) {
        if self
            .state
            .compare_exchange(EMPTY, GENERATING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            crate::fatal!("key handoff cell was not empty at publish");
        }

        unsafe {
            *self.key.get() = *key;
            *self.salt.get() = salt;
        }
        self.spi.store(spi, Ordering::SeqCst);

        if self
            .state
            .compare_exchange(GENERATING, PENDING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            crate::fatal!("key handoff cell mutated concurrently during publish");
        }
    }

    /// Consumer stage (encrypt or decrypt): if a key is waiting, claim it
    /// exclusively, copy it out, and release the cell back to `EMPTY`.
    /// Returns `None` with no side effects if nothing is pending.
    pub fn try_take(&self) -> Option<(u32, [u8; KEY_LEN], [u8; 4])> {
        if self
            .state
            .compare_exchange(PENDING, INSTALLING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }

        let spi = self.spi.load(Ordering::SeqCst);
        let (key, salt) = unsafe {
            let key = *self.key.get();
            let salt = *self.salt.get();
            // Don't leave key material sitting in shared memory once
            // it's been copied out (spec.md §4.4).
            *self.key.get() = [0u8; KEY_LEN];
            *self.salt.get() = [0u8; 4];
            (key, salt)
        };

        if self
            .state
            .compare_exchange(INSTALLING, EMPTY, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            crate::fatal!("key handoff cell mutated concurrently during take");
        }

        Some((spi, key, salt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_on_empty_cell_returns_none() {
        let cell = HandoffCell::zeroed();
        assert!(cell.try_take().is_none());
    }

    #[test]
    fn publish_then_take_round_trips() {
        let cell = HandoffCell::zeroed();
        cell.publish(42, &[9u8; KEY_LEN], [1, 2, 3, 4]);

        let (spi, key, salt) = cell.try_take().unwrap();
        assert_eq!(spi, 42);
        assert_eq!(key, [9u8; KEY_LEN]);
        assert_eq!(salt, [1, 2, 3, 4]);
    }

    #[test]
    fn cell_is_empty_again_after_take() {
        let cell = HandoffCell::zeroed();
        cell.publish(1, &[0u8; KEY_LEN], [0u8; 4]);
        cell.try_take().unwrap();
        assert!(cell.try_take().is_none());
    }
}
