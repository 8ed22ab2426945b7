//! Shared global state (spec.md §3 "Shared global state", §9 "avoid
//! singleton patterns").
//!
//! One `SharedState` value lives in the shared-memory region alongside
//! the packet pool, rings, and handoff cells; every stage is handed a
//! pointer to the same instance at startup rather than reaching for a
//! process-wide singleton, exactly per the design note's instruction to
//! "pass the context to each stage". Every field is independently
//! atomic, `SeqCst`, so any stage may read or update it without a lock.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

#[repr(C)]
pub struct SharedState {
    peer_ip: AtomicU32,
    peer_port: AtomicU32,
    local_ip: AtomicU32,
    local_port: AtomicU32,

    tx_packets: AtomicU64,
    tx_bytes: AtomicU64,
    rx_packets: AtomicU64,
    rx_bytes: AtomicU64,

    tx_last_activity: AtomicU64,
    rx_last_activity: AtomicU64,

    tx_spi: AtomicU32,
    rx_spi: AtomicU32,

    started_at: AtomicU64,
}

fn now_epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

impl SharedState {
    pub(crate) fn zeroed() -> SharedState {
        SharedState {
            peer_ip: AtomicU32::new(0),
            peer_port: AtomicU32::new(0),
            local_ip: AtomicU32::new(0),
            local_port: AtomicU32::new(0),
            tx_packets: AtomicU64::new(0),
            tx_bytes: AtomicU64::new(0),
            rx_packets: AtomicU64::new(0),
            rx_bytes: AtomicU64::new(0),
            tx_last_activity: AtomicU64::new(0),
            rx_last_activity: AtomicU64::new(0),
            tx_spi: AtomicU32::new(0),
            rx_spi: AtomicU32::new(0),
            started_at: AtomicU64::new(0),
        }
    }

    pub fn mark_started(&self) {
        self.started_at.store(now_epoch_secs(), Ordering::SeqCst);
    }

    pub fn uptime_secs(&self) -> u64 {
        now_epoch_secs().saturating_sub(self.started_at.load(Ordering::SeqCst))
    }

    pub fn set_local(&self, addr: SocketAddrV4) {
        self.local_ip.store(u32::from(*addr.ip()), Ordering::SeqCst);
        self.local_port.store(addr.port() as u32, Ordering::SeqCst);
    }

    /// Atomically learn a new peer address (spec.md §4.7 peer roaming).
    pub fn set_peer(&self, addr: SocketAddrV4) {
        self.peer_ip.store(u32::from(*addr.ip()), Ordering::SeqCst);
        self.peer_port.store(addr.port() as u32, Ordering::SeqCst);
    }

    /// `None` while the peer address is still the zero address — the
    /// encrypt/crypto path must drop rather than send in that state.
    pub fn peer(&self) -> Option<SocketAddrV4> {
        let ip = self.peer_ip.load(Ordering::SeqCst);
        let port = self.peer_port.load(Ordering::SeqCst);
        if ip == 0 && port == 0 {
            None
        } else {
            Some(SocketAddrV4::new(Ipv4Addr::from(ip), port as u16))
        }
    }

    pub fn record_tx(&self, bytes: u64) {
        self.tx_packets.fetch_add(1, Ordering::SeqCst);
        self.tx_bytes.fetch_add(bytes, Ordering::SeqCst);
        self.tx_last_activity.store(now_epoch_secs(), Ordering::SeqCst);
    }

    pub fn record_rx(&self, bytes: u64) {
        self.rx_packets.fetch_add(1, Ordering::SeqCst);
        self.rx_bytes.fetch_add(bytes, Ordering::SeqCst);
        self.rx_last_activity.store(now_epoch_secs(), Ordering::SeqCst);
    }

    pub fn set_tx_spi(&self, spi: u32) {
        self.tx_spi.store(spi, Ordering::SeqCst);
    }

    pub fn set_rx_spi(&self, spi: u32) {
        self.rx_spi.store(spi, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            tx_spi: self.tx_spi.load(Ordering::SeqCst),
            rx_spi: self.rx_spi.load(Ordering::SeqCst),
            tx_packets: self.tx_packets.load(Ordering::SeqCst),
            tx_bytes: self.tx_bytes.load(Ordering::SeqCst),
            rx_packets: self.rx_packets.load(Ordering::SeqCst),
            rx_bytes: self.rx_bytes.load(Ordering::SeqCst),
            tx_last_activity: self.tx_last_activity.load(Ordering::SeqCst),
            rx_last_activity: self.rx_last_activity.load(Ordering::SeqCst),
        }
    }
}

/// A point-in-time copy of the counters, used to build a
/// `net::control::StatusResponse` without holding references into
/// shared memory across the unix-socket reply.
pub struct StateSnapshot {
    pub tx_spi: u32,
    pub rx_spi: u32,
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub tx_last_activity: u64,
    pub rx_last_activity: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_starts_unset() {
        let state = SharedState::zeroed();
        assert_eq!(state.peer(), None);
    }

    #[test]
    fn peer_round_trips() {
        let state = SharedState::zeroed();
        let addr = SocketAddrV4::new(Ipv4Addr::new(203, 0, 113, 9), 4500);
        state.set_peer(addr);
        assert_eq!(state.peer(), Some(addr));
    }

    #[test]
    fn counters_accumulate() {
        let state = SharedState::zeroed();
        state.record_tx(100);
        state.record_tx(50);
        let snap = state.snapshot();
        assert_eq!(snap.tx_packets, 2);
        assert_eq!(snap.tx_bytes, 150);
    }
}
