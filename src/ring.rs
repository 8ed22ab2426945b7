//! Bounded, process-shared MPMC ring queue of opaque packet handles.
//!
//! This is the DPDK/`rte_ring`-shaped algorithm spec.md §4.1 describes:
//! two cursors per side (a `head` that reserves a slot, a `tail` that
//! publishes it in FIFO order) rather than the teacher crate's
//! Vyukov-style per-slot sequence number. The teacher's contribution
//! carried over here is everything *around* the algorithm: `CachePadded`
//! atomics to avoid false sharing between producer-side and
//! consumer-side cursors (`MPMC/Buffer/Buffer.rs`), a raw-pointer view
//! over a caller-supplied memory region instead of an owned allocation
//! (`MPMC/Buffer/Buffer_impl.rs::new`), sequentially consistent ordering
//! throughout rather than the tightest provable ordering, and a
//! spin-loop hint on contention.
//!
//! Slot storage itself needs no atomics: visibility of a slot's payload
//! is established entirely by the tail-cursor CAS (spec.md: "slot
//! payload writes need only happen-before the matching tail CAS"), so
//! slots are plain `UnsafeCell<u32>` and the ordering is carried by the
//! surrounding head/tail operations.

use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Ring capacity must be a power of two, and spec.md caps it at 4096.
pub const MAX_CAPACITY: u32 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Full;

impl fmt::Display for Full {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ring queue full")
    }
}

/// The fixed, process-shared control block placed at the start of a
/// ring's memory region. The slot array (`capacity` x `u32`) follows
/// immediately after it — see `Ring::footprint`.
#[repr(C)]
pub struct RingHeader {
    pub capacity: u32,
    pub mask: u32,
    pub prod_head: CachePadded<AtomicU32>,
    pub prod_tail: CachePadded<AtomicU32>,
    pub cons_head: CachePadded<AtomicU32>,
    pub cons_tail: CachePadded<AtomicU32>,
}

/// A view over a ring living in shared memory: a header plus the slot
/// array that immediately follows it. Cheap to copy — it is just two
/// raw pointers — so each stage keeps its own `Ring` value pointing at
/// the same underlying memory as every other stage.
#[derive(Clone, Copy)]
pub struct Ring {
    header: *mut RingHeader,
    slots: *mut UnsafeCell<u32>,
}

unsafe impl Send for Ring {}
unsafe impl Sync for Ring {}

impl Ring {
    /// Bytes required to hold a ring of the given capacity: header plus
    /// `capacity` slots. `capacity` must already be a validated power of
    /// two not exceeding `MAX_CAPACITY`.
    pub fn footprint(capacity: u32) -> usize {
        std::mem::size_of::<RingHeader>() + capacity as usize * std::mem::size_of::<u32>()
    }

    /// Initialize a fresh ring over `base`, which must point to at least
    /// `Self::footprint(capacity)` writable, zeroed, process-shared
    /// bytes. Only the creating process calls this; every other process
    /// that shares the region calls `attach` with the same pointer.
    ///
    /// # Safety
    /// `base` must be valid, suitably aligned for `RingHeader`, and not
    /// concurrently accessed by another initializer.
    pub unsafe fn init(base: *mut u8, capacity: u32) -> Result<Ring, &'static str> {
        if capacity == 0 || capacity > MAX_CAPACITY || (capacity & (capacity - 1)) != 0 {
            return Err("ring capacity must be a non-zero power of two <= 4096");
        }

        let header = base as *mut RingHeader;
        std::ptr::write(
            header,
            RingHeader {
                capacity,
                mask: capacity - 1,
                prod_head: CachePadded::new(AtomicU32::new(0)),
                prod_tail: CachePadded::new(AtomicU32::new(0)),
                cons_head: CachePadded::new(AtomicU32::new(0)),
                cons_tail: CachePadded::new(AtomicU32::new(0)),
            },
        );

        let slots = base.add(std::mem::size_of::<RingHeader>()) as *mut UnsafeCell<u32>;
        Ok(Ring { header, slots })
    }

    /// Attach a view to a ring previously initialized by `init` at `base`.
    ///
    /// # Safety
    /// `base` must point at an already-initialized `RingHeader` plus its
    /// slot array, outliving this `Ring` value.
    pub unsafe fn attach(base: *mut u8) -> Ring {
        let header = base as *mut RingHeader;
        let slots = base.add(std::mem::size_of::<RingHeader>()) as *mut UnsafeCell<u32>;
        Ring { header, slots }
    }

    #[inline]
    fn header(&self) -> &RingHeader {
        unsafe { &*self.header }
    }

    pub fn capacity(&self) -> u32 {
        self.header().capacity
    }

    /// Items currently queued: `producer.tail - consumer.head`.
    pub fn pending(&self) -> u32 {
        let h = self.header();
        h.prod_tail.load(Ordering::SeqCst).wrapping_sub(h.cons_head.load(Ordering::SeqCst))
    }

    /// Free slots: `capacity + consumer.tail - producer.head`.
    pub fn free(&self) -> u32 {
        let h = self.header();
        h.capacity
            .wrapping_add(h.cons_tail.load(Ordering::SeqCst))
            .wrapping_sub(h.prod_head.load(Ordering::SeqCst))
    }

    #[inline]
    unsafe fn slot_mut(&self, index: u32) -> *mut u32 {
        (*self.slots.add(index as usize)).get()
    }

    /// Reserve a slot and publish `handle` into it. Returns `Full` if no
    /// slot was free at the moment of the check — the caller must drop
    /// the packet and return its buffer to the pool (spec.md §4.1).
    pub fn enqueue(&self, handle: u32) -> Result<(), Full> {
        let h = self.header();
        let mask = h.mask;

        let reserved = loop {
            let head = h.prod_head.load(Ordering::SeqCst);
            let tail = h.cons_tail.load(Ordering::SeqCst);
            if h.capacity.wrapping_add(tail).wrapping_sub(head) == 0 {
                return Err(Full);
            }
            if h.prod_head
                .compare_exchange_weak(head, head.wrapping_add(1), Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                break head;
            }
            std::hint::spin_loop();
        };

        unsafe {
            *self.slot_mut(reserved & mask) = handle;
        }

        loop {
            let cur = h.prod_tail.load(Ordering::SeqCst);
            if cur == reserved
                && h.prod_tail
                    .compare_exchange_weak(reserved, reserved.wrapping_add(1), Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            {
                break;
            }
            std::hint::spin_loop();
        }

        Ok(())
    }

    /// Claim and return the oldest queued handle, or `None` if the ring
    /// was empty at the moment of the check (normal idle, not an error).
    pub fn dequeue(&self) -> Option<u32> {
        let h = self.header();
        let mask = h.mask;

        let reserved = loop {
            let head = h.cons_head.load(Ordering::SeqCst);
            let tail = h.prod_tail.load(Ordering::SeqCst);
            if tail.wrapping_sub(head) == 0 {
                return None;
            }
            if h.cons_head
                .compare_exchange_weak(head, head.wrapping_add(1), Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                break head;
            }
            std::hint::spin_loop();
        };

        let value = unsafe { *self.slot_mut(reserved & mask) };

        loop {
            let cur = h.cons_tail.load(Ordering::SeqCst);
            if cur == reserved
                && h.cons_tail
                    .compare_exchange_weak(reserved, reserved.wrapping_add(1), Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            {
                break;
            }
            std::hint::spin_loop();
        }

        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_ring(capacity: u32) -> (Vec<u8>, Ring) {
        let size = Ring::footprint(capacity);
        let mut backing = vec![0u8; size];
        let ring = unsafe { Ring::init(backing.as_mut_ptr(), capacity).unwrap() };
        (backing, ring)
    }

    #[test]
    fn enqueue_dequeue_roundtrip() {
        let (_backing, ring) = make_ring(16);
        ring.enqueue(42).unwrap();
        assert_eq!(ring.pending(), 1);
        assert_eq!(ring.dequeue(), Some(42));
        assert_eq!(ring.pending(), 0);
    }

    #[test]
    fn dequeue_on_empty_returns_none() {
        let (_backing, ring) = make_ring(8);
        assert_eq!(ring.dequeue(), None);
    }

    #[test]
    fn saturates_exactly_at_capacity() {
        let (_backing, ring) = make_ring(1024);
        for i in 0..1024u32 {
            ring.enqueue(i).unwrap();
        }
        assert_eq!(ring.enqueue(9999), Err(Full));
        assert_eq!(ring.pending(), 1024);
        assert_eq!(ring.free(), 0);
    }

    #[test]
    fn fifo_order_preserved_single_producer_consumer() {
        let (_backing, ring) = make_ring(32);
        for i in 0..20u32 {
            ring.enqueue(i).unwrap();
        }
        for i in 0..20u32 {
            assert_eq!(ring.dequeue(), Some(i));
        }
    }

    #[test]
    fn rejects_non_power_of_two_capacity() {
        let size = Ring::footprint(100);
        let mut backing = vec![0u8; size];
        assert!(unsafe { Ring::init(backing.as_mut_ptr(), 100) }.is_err());
    }

    #[test]
    fn rejects_capacity_above_max() {
        let size = Ring::footprint(8192);
        let mut backing = vec![0u8; size];
        assert!(unsafe { Ring::init(backing.as_mut_ptr(), 8192) }.is_err());
    }

    /// Ring conservation + no-duplicate-delivery under concurrent
    /// producers/consumers (spec.md §8).
    #[test]
    fn conservation_and_no_duplicates_under_contention() {
        use std::sync::atomic::AtomicUsize;
        use std::sync::Arc;
        use std::thread;

        const CAPACITY: u32 = 1024;
        const PRODUCERS: u32 = 4;
        const PER_PRODUCER: u32 = 5_000;

        let size = Ring::footprint(CAPACITY);
        let mut backing = vec![0u8; size];
        let ring = unsafe { Ring::init(backing.as_mut_ptr(), CAPACITY).unwrap() };

        let seen = Arc::new(std::sync::Mutex::new(vec![0u32; (PRODUCERS * PER_PRODUCER) as usize]));
        let consumed = Arc::new(AtomicUsize::new(0));

        thread::scope(|scope| {
            for p in 0..PRODUCERS {
                scope.spawn(move || {
                    for i in 0..PER_PRODUCER {
                        let handle = p * PER_PRODUCER + i;
                        loop {
                            if ring.enqueue(handle).is_ok() {
                                break;
                            }
                            std::hint::spin_loop();
                        }
                    }
                });
            }

            for _ in 0..4 {
                let seen = Arc::clone(&seen);
                let consumed = Arc::clone(&consumed);
                scope.spawn(move || loop {
                    match ring.dequeue() {
                        Some(handle) => {
                            let mut guard = seen.lock().unwrap();
                            guard[handle as usize] += 1;
                            drop(guard);
                            if consumed.fetch_add(1, Ordering::SeqCst) + 1
                                == (PRODUCERS * PER_PRODUCER) as usize
                            {
                                return;
                            }
                        }
                        None => std::hint::spin_loop(),
                    }
                });
            }
        });

        let guard = seen.lock().unwrap();
        assert!(guard.iter().all(|&count| count == 1), "every handle delivered exactly once");
        assert_eq!(ring.pending(), 0);
    }
}
