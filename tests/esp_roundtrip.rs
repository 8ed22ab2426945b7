//! ESP framing round trip and tamper detection (spec.md §8 scenarios
//! "loopback echo" and "trailer corruption").

use signsky::crypto::aead::KEY_LEN;
use signsky::crypto::esp::{decrypt_packet, encrypt_packet, EspError};
use signsky::crypto::sa::{RxSa, TxSa};
use signsky::pool::packet::PacketBuffer;

fn paired_sas(spi: u32) -> (TxSa, RxSa) {
    let key = [0x5Au8; KEY_LEN];
    let salt = [0x11u8; 4];
    let tx = TxSa::new(spi, &key, salt);
    let mut rx = RxSa::empty();
    rx.install(spi, &key, salt);
    (tx, rx)
}

#[test]
fn round_trip_for_every_size_class() {
    let (mut tx, mut rx) = paired_sas(0x01020304);

    for &size in &[64usize, 512, 1500] {
        let payload = vec![0xABu8; size];
        let mut buf = PacketBuffer::zeroed();
        buf.set_payload(&payload);

        encrypt_packet(&mut buf, &mut tx).unwrap();
        decrypt_packet(&mut buf, &mut rx).unwrap();

        assert_eq!(buf.payload(), payload.as_slice());
    }
}

#[test]
fn sequence_is_monotone_across_many_packets() {
    let (mut tx, mut rx) = paired_sas(0xAABBCCDD);

    for i in 0..1000u32 {
        let mut buf = PacketBuffer::zeroed();
        buf.set_payload(&i.to_be_bytes());
        encrypt_packet(&mut buf, &mut tx).unwrap();

        let frame = buf.frame();
        let pn = u64::from_be_bytes(frame[8..16].try_into().unwrap());
        assert_eq!(pn, i as u64 + 1, "PN sequence starts at 1, not 0");

        decrypt_packet(&mut buf, &mut rx).unwrap();
    }
}

#[test]
fn bit_flip_in_ciphertext_spi_or_pn_is_rejected() {
    let (mut tx, mut rx) = paired_sas(0x0A0B0C0D);

    for byte_to_flip in [0usize, 4, 8, 20] {
        let mut buf = PacketBuffer::zeroed();
        buf.set_payload(b"tamper detection");
        encrypt_packet(&mut buf, &mut tx).unwrap();

        buf.raw_mut()[byte_to_flip] ^= 0x80;
        assert_eq!(
            decrypt_packet(&mut buf, &mut rx),
            Err(EspError::Rejected),
            "flipping byte {byte_to_flip} should be rejected"
        );
    }
}

#[test]
fn trailer_corruption_rejected_even_with_valid_tag() {
    // Build a frame by hand, sealing a deliberately wrong trailer, so
    // the AEAD tag verifies but the trailer's next-header is invalid -
    // `encrypt_packet` itself never produces a malformed trailer, so
    // this has to bypass it the way an adversarial peer would.
    use signsky::crypto::aead::AeadContext;
    use signsky::crypto::sa::frame_nonce_aad;

    let key = [0x5Au8; KEY_LEN];
    let salt = [0x11u8; 4];
    let spi = 0x11223344u32;
    let pn = 1u64;
    let cipher = AeadContext::setup(&key);
    let (nonce, aad) = frame_nonce_aad(spi, pn, &salt);

    let payload = b"valid payload, bad trailer";
    let mut buf = PacketBuffer::zeroed();
    buf.set_payload(payload);
    let raw = buf.raw_mut();
    raw[16 + payload.len()] = 0; // pad_length = 0
    raw[16 + payload.len() + 1] = 0xFF; // next-header != IPPROTO_IP
    cipher.encrypt(&nonce, &aad, &mut raw[16..], payload.len() + 2).unwrap();
    raw[0..4].copy_from_slice(&spi.to_be_bytes());
    raw[4..8].copy_from_slice(&(pn as u32).to_be_bytes());
    raw[8..16].copy_from_slice(&pn.to_be_bytes());
    buf.set_frame_len(16 + payload.len() + 2 + 16);

    let mut rx = RxSa::empty();
    rx.install(spi, &key, salt);
    assert_eq!(decrypt_packet(&mut buf, &mut rx), Err(EspError::BadTrailer));
}
