//! Key handoff state machine legality and RX slot promotion (spec.md §8).

use signsky::crypto::aead::KEY_LEN;
use signsky::crypto::keys::HandoffCell;
use signsky::crypto::sa::{frame_nonce_aad, RxSa};

#[test]
fn cell_starts_empty_and_round_trips_one_key() {
    let cell = HandoffCell::zeroed();
    assert!(cell.try_take().is_none(), "nothing to take before a publish");

    cell.publish(0xAA, &[7u8; KEY_LEN], [1, 2, 3, 4]);
    let (spi, key, salt) = cell.try_take().unwrap();
    assert_eq!(spi, 0xAA);
    assert_eq!(key, [7u8; KEY_LEN]);
    assert_eq!(salt, [1, 2, 3, 4]);

    assert!(cell.try_take().is_none(), "cell must be empty again after take");
}

#[test]
fn sequential_publishes_each_deliver_exactly_once() {
    let cell = HandoffCell::zeroed();

    for spi in 0u32..20 {
        cell.publish(spi, &[spi as u8; KEY_LEN], [0u8; 4]);
        let (taken_spi, ..) = cell.try_take().unwrap();
        assert_eq!(taken_spi, spi);
        assert!(cell.try_take().is_none());
    }
}

#[test]
fn slot_promotion_after_second_slot_verifies() {
    let mut rx = RxSa::empty();

    let old_key = [0x01u8; KEY_LEN];
    let old_salt = [0x02u8; 4];
    rx.install(1, &old_key, old_salt);
    assert_eq!(rx.current_spi(), Some(1));

    let new_key = [0x03u8; KEY_LEN];
    let new_salt = [0x04u8; 4];
    rx.install(2, &new_key, new_salt);
    assert_eq!(rx.current_spi(), Some(1), "pending slot must not replace current yet");

    // A packet verifying under the new (slot-2) key promotes it.
    let cipher = signsky::crypto::aead::AeadContext::setup(&new_key);
    let (nonce, aad) = frame_nonce_aad(2, 0, &new_salt);
    let mut buf = vec![0u8; 16 + 16];
    cipher.encrypt(&nonce, &aad, &mut buf, 16).unwrap();

    assert!(rx.accept(2, 0, &mut buf, 16));
    assert_eq!(rx.current_spi(), Some(2), "slot 2 promoted to slot 1 after it verified");

    // The next packet under the now-promoted key verifies against what
    // is now slot 1.
    let (nonce2, aad2) = frame_nonce_aad(2, 1, &new_salt);
    let mut buf2 = vec![0u8; 16 + 16];
    cipher.encrypt(&nonce2, &aad2, &mut buf2, 16).unwrap();
    assert!(rx.accept(2, 1, &mut buf2, 16));
}

#[test]
fn old_key_still_verifies_until_promotion() {
    let mut rx = RxSa::empty();
    let old_key = [0x11u8; KEY_LEN];
    let old_salt = [0x22u8; 4];
    rx.install(10, &old_key, old_salt);
    rx.install(11, &[0x33u8; KEY_LEN], [0x44u8; 4]);

    let cipher = signsky::crypto::aead::AeadContext::setup(&old_key);
    let (nonce, aad) = frame_nonce_aad(10, 5, &old_salt);
    let mut buf = vec![0u8; 8 + 16];
    cipher.encrypt(&nonce, &aad, &mut buf, 8).unwrap();

    assert!(rx.accept(10, 5, &mut buf, 8));
    assert_eq!(rx.current_spi(), Some(10), "slot 1 unchanged while still verifying");
}
