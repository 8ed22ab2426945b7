//! Platform I/O: tunnel device, peer UDP socket, control sockets
//! (spec.md §6).

pub mod control;
pub mod tun;
pub mod udp;
