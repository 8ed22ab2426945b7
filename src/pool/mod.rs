//! Process-shared packet buffer pool (spec.md §3, §4.2).
//!
//! Grounded on the teacher's `Core::alloc::SharedMemoryAllocator`: a
//! fixed array of buffers carved out of one shared-memory region, whose
//! free list is itself a ring queue populated at init time. The
//! teacher's allocator supports an arbitrary number of runtime-created
//! channels (`MAX_CHANNELS = 256`, a control-plane `GlobalHeader` table
//! of `ChannelEntry`); this system has exactly one pool of one fixed
//! size decided at config time, so that generality collapses to a
//! single `PacketPool` value with no channel table — the same "offsets
//! computed from a single base pointer and fixed stride" idea (spec.md
//! §4.2), just without the indirection a variable channel count needs.

pub mod packet;

use crate::ring::Ring;
use packet::PacketBuffer;

/// A handle is just the buffer's index in the pool; it is what travels
/// through the stage-to-stage `Ring`s (spec.md: "opaque packet handles").
pub type Handle = u32;

#[derive(Clone, Copy)]
pub struct PacketPool {
    buffers: *mut PacketBuffer,
    free_list: Ring,
    capacity: u32,
}

unsafe impl Send for PacketPool {}
unsafe impl Sync for PacketPool {}

impl PacketPool {
    /// Bytes required for a pool of `capacity` buffers: the buffer array
    /// plus the free-list ring's own footprint.
    pub fn footprint(capacity: u32) -> usize {
        capacity as usize * std::mem::size_of::<PacketBuffer>() + Ring::footprint(capacity)
    }

    /// Initialize a fresh pool over `base`: zero every buffer and seed
    /// the free list with every index `0..capacity`.
    ///
    /// # Safety
    /// `base` must point to at least `Self::footprint(capacity)` bytes
    /// of writable, zeroed, process-shared memory, and only one process
    /// may call `init` (every other attaches with `attach`).
    pub unsafe fn init(base: *mut u8, capacity: u32) -> Result<PacketPool, &'static str> {
        let buffers = base as *mut PacketBuffer;
        for i in 0..capacity as usize {
            std::ptr::write(buffers.add(i), PacketBuffer::zeroed());
        }

        let ring_base = base.add(capacity as usize * std::mem::size_of::<PacketBuffer>());
        let free_list = Ring::init(ring_base, capacity)?;
        for i in 0..capacity {
            // Capacity-sized ring seeded with exactly `capacity` entries
            // cannot report Full; an error here is a construction bug.
            free_list.enqueue(i).map_err(|_| "pool free list rejected initial seed")?;
        }

        Ok(PacketPool { buffers, free_list, capacity })
    }

    /// Attach a view onto a pool previously initialized by `init`.
    ///
    /// # Safety
    /// `base` must point at memory already initialized by `init` with
    /// the same `capacity`.
    pub unsafe fn attach(base: *mut u8, capacity: u32) -> PacketPool {
        let buffers = base as *mut PacketBuffer;
        let ring_base = base.add(capacity as usize * std::mem::size_of::<PacketBuffer>());
        let free_list = Ring::attach(ring_base);
        PacketPool { buffers, free_list, capacity }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Draw a free buffer, or `None` if the pool is exhausted. Callers
    /// must have a fallback — spec.md §4.2: "ingress reads into a
    /// throwaway buffer and discards the datagram".
    pub fn acquire(&self) -> Option<Handle> {
        self.free_list.dequeue()
    }

    /// Return a buffer to the pool. Every acquired handle must be
    /// released exactly once, on successful egress or any error
    /// (spec.md §3 lifecycle).
    pub fn release(&self, handle: Handle) {
        if self.free_list.enqueue(handle).is_err() {
            // The free list is sized to `capacity`, so this can only
            // happen if `handle` was released twice — a violation of
            // the "owned by exactly one stage" invariant somewhere
            // upstream. Not a data-plane packet error, but also not
            // a condition the pool itself can safely treat as fatal
            // (it doesn't know which stage is at fault), so it is
            // logged for the operator to investigate.
            log::error!("packet pool: release of handle {handle} overflowed the free list (double free?)");
        }
    }

    /// # Safety
    /// The caller must currently own `handle` (hold it exclusively,
    /// per spec.md §3) and `handle` must be `< capacity`.
    pub unsafe fn get(&self, handle: Handle) -> &mut PacketBuffer {
        debug_assert!(handle < self.capacity);
        &mut *self.buffers.add(handle as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_pool(capacity: u32) -> (Vec<u8>, PacketPool) {
        let size = PacketPool::footprint(capacity);
        let mut backing = vec![0u8; size];
        let pool = unsafe { PacketPool::init(backing.as_mut_ptr(), capacity).unwrap() };
        (backing, pool)
    }

    #[test]
    fn acquire_exhausts_then_release_replenishes() {
        let (_backing, pool) = make_pool(4);
        let mut handles = Vec::new();
        for _ in 0..4 {
            handles.push(pool.acquire().expect("pool should not be empty yet"));
        }
        assert!(pool.acquire().is_none());

        pool.release(handles.pop().unwrap());
        assert!(pool.acquire().is_some());
    }

    #[test]
    fn acquired_buffers_are_distinct() {
        let (_backing, pool) = make_pool(8);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..8 {
            let h = pool.acquire().unwrap();
            assert!(seen.insert(h), "handle {h} acquired twice while outstanding");
        }
    }

    #[test]
    fn buffer_contents_are_independent_per_handle() {
        let (_backing, pool) = make_pool(2);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        unsafe {
            pool.get(a).set_payload(&[1, 2, 3, 4]);
            pool.get(b).set_payload(&[5, 6, 7, 8]);
            assert_eq!(pool.get(a).payload(), &[1, 2, 3, 4]);
            assert_eq!(pool.get(b).payload(), &[5, 6, 7, 8]);
        }
    }
}
