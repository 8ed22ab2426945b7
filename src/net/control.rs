//! Control-plane unix-domain sockets (spec.md §6 "Control sockets").
//!
//! Two independent sockets, both `SOCK_DGRAM` at configurable paths
//! owned by a configured uid/gid with mode `0700`: a keying socket that
//! accepts fixed-size key-injection records, and a status socket that
//! answers a one-byte request code with a `repr(C)` snapshot of the
//! counters in `crate::state`. Field order for `StatusResponse` is not
//! pinned by spec.md itself (see SPEC_FULL.md §12); this rewrite fixes
//! one order and keeps it stable.

use std::io;
use std::os::unix::net::UnixDatagram;
use std::path::Path;

use crate::crypto::aead::KEY_LEN;
use crate::state::StateSnapshot;

/// Wire record delivered to the keying socket: 32-byte key material plus
/// the TX and RX SPIs it should be installed under.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct KeyInjection {
    pub key: [u8; KEY_LEN],
    pub tx_spi: u32,
    pub rx_spi: u32,
}

pub const KEY_INJECTION_LEN: usize = std::mem::size_of::<KeyInjection>();

impl KeyInjection {
    pub fn parse(buf: &[u8]) -> Option<KeyInjection> {
        if buf.len() != KEY_INJECTION_LEN {
            return None;
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&buf[..KEY_LEN]);
        let tx_spi = u32::from_be_bytes(buf[KEY_LEN..KEY_LEN + 4].try_into().unwrap());
        let rx_spi = u32::from_be_bytes(buf[KEY_LEN + 4..KEY_LEN + 8].try_into().unwrap());
        Some(KeyInjection { key, tx_spi, rx_spi })
    }
}

/// The single-byte request code the status socket accepts.
pub const STATUS_REQUEST_CODE: u8 = 0x01;

/// Wire reply from the status socket: per-direction SPI, packet count,
/// byte count, and last-activity epoch seconds.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct StatusResponse {
    pub tx_spi: u32,
    pub rx_spi: u32,
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub tx_last_activity: u64,
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub rx_last_activity: u64,
}

impl From<StateSnapshot> for StatusResponse {
    fn from(s: StateSnapshot) -> StatusResponse {
        StatusResponse {
            tx_spi: s.tx_spi,
            rx_spi: s.rx_spi,
            tx_packets: s.tx_packets,
            tx_bytes: s.tx_bytes,
            tx_last_activity: s.tx_last_activity,
            rx_packets: s.rx_packets,
            rx_bytes: s.rx_bytes,
            rx_last_activity: s.rx_last_activity,
        }
    }
}

impl StatusResponse {
    pub fn to_bytes(self) -> [u8; std::mem::size_of::<StatusResponse>()] {
        unsafe { std::mem::transmute(self) }
    }
}

/// Bind a unix datagram socket at `path`, removing any stale socket file
/// left behind by a previous run, and apply the fixed `0700` mode and
/// configured ownership spec.md §6 requires.
pub fn bind_control_socket(
    path: &Path,
    uid: Option<u32>,
    gid: Option<u32>,
) -> io::Result<UnixDatagram> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }

    let socket = UnixDatagram::bind(path)?;
    socket.set_nonblocking(true)?;

    let mut perms = std::fs::metadata(path)?.permissions();
    std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o700);
    std::fs::set_permissions(path, perms)?;

    if uid.is_some() || gid.is_some() {
        let c_path = std::ffi::CString::new(path.as_os_str().as_encoded_bytes())
            .map_err(|_| crate::error::invalid("control socket path contains a NUL byte"))?;
        let rc = unsafe {
            libc::chown(
                c_path.as_ptr(),
                uid.unwrap_or(u32::MAX),
                gid.unwrap_or(u32::MAX),
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
    }

    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_injection_round_trips() {
        let mut buf = vec![0u8; KEY_INJECTION_LEN];
        buf[..KEY_LEN].copy_from_slice(&[0x5Au8; KEY_LEN]);
        buf[KEY_LEN..KEY_LEN + 4].copy_from_slice(&1u32.to_be_bytes());
        buf[KEY_LEN + 4..KEY_LEN + 8].copy_from_slice(&2u32.to_be_bytes());

        let parsed = KeyInjection::parse(&buf).unwrap();
        assert_eq!(parsed.key, [0x5Au8; KEY_LEN]);
        assert_eq!(parsed.tx_spi, 1);
        assert_eq!(parsed.rx_spi, 2);
    }

    #[test]
    fn key_injection_rejects_wrong_length() {
        assert!(KeyInjection::parse(&[0u8; 10]).is_none());
    }

    #[test]
    fn status_response_byte_length_matches_wire_size() {
        let resp = StatusResponse {
            tx_spi: 1,
            rx_spi: 2,
            tx_packets: 3,
            tx_bytes: 4,
            tx_last_activity: 5,
            rx_packets: 6,
            rx_bytes: 7,
            rx_last_activity: 8,
        };
        assert_eq!(resp.to_bytes().len(), std::mem::size_of::<StatusResponse>());
    }
}
