//! The packet buffer layout (spec.md §3).
//!
//! A fixed 2048-byte, `repr(C)` region: a small header of plain
//! (non-atomic) fields followed by a data area wide enough to hold a
//! 16-byte ESP head reservation, up to 1500 bytes of payload, and room
//! for the 2-byte ESP trailer and 16-byte AEAD tag. No field here is
//! atomic — ownership of a buffer is exclusive to whichever single
//! stage currently holds its handle (spec.md §3 invariant), so plain
//! reads/writes are correct and cheaper than the teacher's always-atomic
//! `SlotHeader` fields, which exist specifically because teacher slots
//! are read and written across a publish/consume boundary that this
//! buffer does not have.
//!
//! The plaintext payload always lives at the fixed offset
//! `HEAD_RESERVE` inside `data`, whether the buffer currently holds a
//! bare tunnel packet or a just-decrypted one: the encrypt stage fills
//! in the 16 bytes *before* an already-resident payload rather than
//! shifting it, and the decrypt stage lands plaintext back at that same
//! offset for the clear stage to consume — the `sk_buff` "reserve
//! headroom up front" trick, expressed as a compile-time constant
//! offset. `payload_len` and `frame_len` track the two representations
//! a buffer can be in (bare plaintext vs. full ESP datagram)
//! independently so a stage can tell which one it is holding.

use std::net::Ipv4Addr;

/// ESP head: 4-byte SPI + 4-byte low-32 PN + 8-byte full PN.
pub const HEAD_RESERVE: usize = 16;
/// spec.md Non-goals: no jumbo frames, datagrams above the path MTU are dropped.
pub const MAX_PAYLOAD: usize = 1500;
/// pad-length + next-header.
pub const TRAILER_LEN: usize = 2;
pub const TAG_LEN: usize = 16;

const PAYLOAD_AREA_LEN: usize = HEAD_RESERVE + MAX_PAYLOAD + TRAILER_LEN + TAG_LEN;
const TOTAL_LEN: usize = 2048;
const HEADER_LEN: usize = 20;
const PAD_LEN: usize = TOTAL_LEN - HEADER_LEN - PAYLOAD_AREA_LEN;

/// Which stage a buffer is travelling towards. Mirrors the "routing tag
/// naming its next stage" field from spec.md §3; stages other than the
/// intended destination must not touch a buffer bearing this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Route {
    None = 0,
    ToEncrypt = 1,
    ToCrypto = 2,
    ToDecrypt = 3,
    ToClear = 4,
}

impl Route {
    fn from_u32(v: u32) -> Route {
        match v {
            1 => Route::ToEncrypt,
            2 => Route::ToCrypto,
            3 => Route::ToDecrypt,
            4 => Route::ToClear,
            _ => Route::None,
        }
    }
}

#[repr(C)]
pub struct PacketBuffer {
    /// Length of the plaintext payload at `data[HEAD_RESERVE..]`.
    payload_len: u32,
    /// Length of the full ESP-framed datagram at `data[0..]`, 0 if the
    /// buffer does not currently hold framed bytes.
    frame_len: u32,
    route: u32,
    origin_ip: u32,
    origin_port: u16,
    _reserved: u16,
    data: [u8; PAYLOAD_AREA_LEN],
    _pad: [u8; PAD_LEN],
}

const _: () = assert!(std::mem::size_of::<PacketBuffer>() == TOTAL_LEN);

impl PacketBuffer {
    pub(crate) fn zeroed() -> PacketBuffer {
        PacketBuffer {
            payload_len: 0,
            frame_len: 0,
            route: Route::None as u32,
            origin_ip: 0,
            origin_port: 0,
            _reserved: 0,
            data: [0u8; PAYLOAD_AREA_LEN],
            _pad: [0u8; PAD_LEN],
        }
    }

    pub fn route(&self) -> Route {
        Route::from_u32(self.route)
    }

    pub fn set_route(&mut self, route: Route) {
        self.route = route as u32;
    }

    pub fn origin(&self) -> Option<(Ipv4Addr, u16)> {
        if self.origin_ip == 0 && self.origin_port == 0 {
            None
        } else {
            Some((Ipv4Addr::from(self.origin_ip.to_be()), self.origin_port))
        }
    }

    pub fn set_origin(&mut self, ip: Ipv4Addr, port: u16) {
        self.origin_ip = u32::from(ip).to_be();
        self.origin_port = port;
    }

    pub fn clear_origin(&mut self) {
        self.origin_ip = 0;
        self.origin_port = 0;
    }

    // --- plaintext payload view (clear stage, pre-seal encrypt input, post-open decrypt output) ---

    pub fn payload_len(&self) -> usize {
        self.payload_len as usize
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[HEAD_RESERVE..HEAD_RESERVE + self.payload_len as usize]
    }

    /// Write a plaintext payload at the fixed headroom offset and mark
    /// the buffer as holding a bare (unframed) packet.
    pub fn set_payload(&mut self, bytes: &[u8]) {
        debug_assert!(bytes.len() <= MAX_PAYLOAD);
        self.data[HEAD_RESERVE..HEAD_RESERVE + bytes.len()].copy_from_slice(bytes);
        self.payload_len = bytes.len() as u32;
        self.frame_len = 0;
    }

    /// Mutable view of up to `MAX_PAYLOAD` bytes at the headroom offset,
    /// for callers that want to write the payload themselves (e.g. a
    /// `read()` into the buffer) before calling `set_payload_len`.
    pub fn payload_area_mut(&mut self) -> &mut [u8] {
        &mut self.data[HEAD_RESERVE..HEAD_RESERVE + MAX_PAYLOAD]
    }

    pub fn set_payload_len(&mut self, len: usize) {
        debug_assert!(len <= MAX_PAYLOAD);
        self.payload_len = len as u32;
        self.frame_len = 0;
    }

    // --- ESP-framed wire view (crypto stage UDP I/O, encrypt/decrypt framing) ---

    pub fn frame_len(&self) -> usize {
        self.frame_len as usize
    }

    pub fn frame(&self) -> &[u8] {
        &self.data[..self.frame_len as usize]
    }

    /// Mutable view of the whole data area, for the encrypt stage to
    /// write the ESP head/trailer/tag around the already-resident
    /// payload, and for the crypto-in stage to `recv` a full datagram
    /// into offset 0.
    pub fn raw_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn set_frame_len(&mut self, len: usize) {
        debug_assert!(len <= PAYLOAD_AREA_LEN);
        self.frame_len = len as u32;
    }
}
