//! Tunnel device I/O (spec.md §6 "Tunnel device").
//!
//! Linux-only for now: opens `/dev/net/tun`, configures it as a no-ARP
//! IP tunnel via `TUNSETIFF`, and exposes non-blocking read/write of raw
//! IP datagrams. The platform split the spec calls for ("on one OS a
//! plain TUN fd, on another a control-socket variant with a 4-byte
//! protocol-family header") is expressed as a `cfg`-gated module the way
//! the teacher splits its shared-memory backend by platform
//! (`Core::shm::{linux, bsd}`) rather than a runtime trait object —
//! there is exactly one implementation compiled in per target, decided
//! at compile time like the teacher's own platform split.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;

#[cfg(target_os = "linux")]
mod ioctl {
    pub const TUNSETIFF: u64 = 0x4004_54ca;
    pub const IFF_TUN: i16 = 0x0001;
    pub const IFF_NO_PI: i16 = 0x1000;
}

pub struct Tun {
    file: File,
}

impl Tun {
    #[cfg(target_os = "linux")]
    pub fn open(name: &str) -> io::Result<Tun> {
        let file = OpenOptions::new().read(true).write(true).open("/dev/net/tun")?;

        let mut ifr = [0u8; 40];
        let name_bytes = name.as_bytes();
        let n = name_bytes.len().min(15);
        ifr[..n].copy_from_slice(&name_bytes[..n]);
        let flags = (ioctl::IFF_TUN | ioctl::IFF_NO_PI) as i16;
        ifr[16..18].copy_from_slice(&flags.to_ne_bytes());

        let rc = unsafe { libc::ioctl(file.as_raw_fd(), ioctl::TUNSETIFF, ifr.as_mut_ptr()) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        set_nonblocking(&file)?;
        Ok(Tun { file })
    }

    #[cfg(not(target_os = "linux"))]
    pub fn open(_name: &str) -> io::Result<Tun> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "tun device support is linux-only in this build"))
    }

    /// Read one raw IP datagram into `buf`, returning its length.
    /// `EAGAIN`/`EWOULDBLOCK` surface as `io::ErrorKind::WouldBlock` for
    /// callers to treat as "nothing to do this sweep" (spec.md §7).
    pub fn read_packet(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }

    pub fn write_packet(&mut self, buf: &[u8]) -> io::Result<()> {
        self.file.write_all(buf)
    }
}

fn set_nonblocking(file: &File) -> io::Result<()> {
    let fd = file.as_raw_fd();
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
