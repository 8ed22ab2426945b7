//! Peer UDP socket (spec.md §6 "UDP socket").
//!
//! A non-blocking IPv4 datagram socket bound to the configured local
//! address with path-MTU discovery forced on (`IP_MTU_DISCOVER` /
//! `IP_PMTUDISC_DO`), built with `socket2` for the portable parts (type,
//! domain, non-blocking, bind) the way the pack's `hlieu5402-collab-
//! spark2026` TCP transport reaches for `socket2::SockRef` to set socket
//! options instead of hand-rolling them — raw `libc::setsockopt` only
//! for the one option `socket2` doesn't wrap.

use std::io;
use std::net::SocketAddrV4;
use std::os::fd::AsRawFd;

use socket2::{Domain, Protocol, Socket, Type};

#[cfg(target_os = "linux")]
const IP_MTU_DISCOVER: libc::c_int = libc::IP_MTU_DISCOVER;
#[cfg(target_os = "linux")]
const IP_PMTUDISC_DO: libc::c_int = 2;

pub struct PeerSocket {
    socket: Socket,
}

impl PeerSocket {
    pub fn bind(local: SocketAddrV4) -> io::Result<PeerSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_nonblocking(true)?;
        socket.bind(&local.into())?;

        #[cfg(target_os = "linux")]
        {
            let rc = unsafe {
                libc::setsockopt(
                    socket.as_raw_fd(),
                    libc::IPPROTO_IP,
                    IP_MTU_DISCOVER,
                    &IP_PMTUDISC_DO as *const _ as *const libc::c_void,
                    std::mem::size_of_val(&IP_PMTUDISC_DO) as libc::socklen_t,
                )
            };
            if rc < 0 {
                return Err(io::Error::last_os_error());
            }
        }

        Ok(PeerSocket { socket })
    }

    /// Send `buf` to `peer`. `ECONNREFUSED`/`EHOSTUNREACH` (a previously
    /// delivered ICMP unreachable) is the peer-unreachable condition the
    /// spec calls for logging and continuing past (spec.md §7), left for
    /// the caller to classify since only it knows the current log level
    /// policy.
    pub fn send_to(&self, buf: &[u8], peer: SocketAddrV4) -> io::Result<usize> {
        self.socket.send_to(buf, &peer.into())
    }

    /// Receive one datagram, returning its length and source address.
    pub fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddrV4)> {
        let uninit = unsafe { &mut *(buf as *mut [u8] as *mut [std::mem::MaybeUninit<u8>]) };
        let (n, addr) = self.socket.recv_from(uninit)?;
        let addr = addr.as_socket_ipv4().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "received datagram from a non-IPv4 address")
        })?;
        Ok((n, addr))
    }
}

/// `true` for the errno values spec.md §7 calls "peer unreachable".
pub fn is_peer_unreachable(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(code) if code == libc::ECONNREFUSED || code == libc::EHOSTUNREACH
    )
}
