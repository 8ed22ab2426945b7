//! Anonymous process-shared memory region.
//!
//! The teacher crate's `Core::SharedMemory` maps a named `memfd` so
//! unrelated processes can attach to it by name. signsky's processes are
//! never unrelated: the supervisor `fork(2)`s all five workers from
//! itself, so the idiomatic Linux mechanism is a single anonymous
//! `mmap(MAP_SHARED | MAP_ANONYMOUS)` region created *before* forking —
//! every child inherits the same mapping and writes through it remain
//! visible to its siblings and the parent. This keeps the teacher's
//! "mmap + raw pointer into shared memory" idiom while dropping the
//! memfd-naming machinery that only pays for itself when there is no
//! common ancestor process, which here there always is.

use std::io;
use std::ptr::NonNull;

/// A single anonymous, page-aligned, process-shared mapping.
///
/// Must be created before the first `fork` and kept alive (not dropped)
/// for the lifetime of the daemon; every stage process holds its own
/// `SharedRegion` value pointing at the same pages, created by `fork`
/// duplicating the parent's address space.
pub struct SharedRegion {
    ptr: NonNull<u8>,
    size: usize,
}

unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Map `size` bytes of zeroed, process-shared memory.
    pub fn new(size: usize) -> io::Result<SharedRegion> {
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        Ok(SharedRegion {
            ptr: NonNull::new(ptr as *mut u8).expect("mmap returned null but not MAP_FAILED"),
            size,
        })
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Unmap this region from the *calling* process only (spec.md §9:
    /// a stage worker detaches the shared resources it does not need).
    /// `MAP_SHARED` pages are reference-counted by the kernel across the
    /// distinct mappings each process obtained via `fork`, so this has
    /// no effect on any other process's view of the same memory — it
    /// only removes the calling process's own page-table entries,
    /// turning any access through this range in *this* process into a
    /// `SIGSEGV` instead of a silent cross-stage read. Safe to call more
    /// than once (a second `munmap` of an already-unmapped range just
    /// fails, harmlessly) and safe to call from a process that is about
    /// to `exit` without ever running `Drop` (the usual case for a
    /// forked stage worker).
    pub fn detach(&self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.size);
        }
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.size);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn zeroed_on_creation() {
        let region = SharedRegion::new(4096).unwrap();
        let slice = unsafe { std::slice::from_raw_parts(region.as_ptr(), region.size()) };
        assert!(slice.iter().all(|&b| b == 0));
    }

    #[test]
    fn writes_are_visible_through_raw_pointer() {
        let region = SharedRegion::new(4096).unwrap();
        let atomic = unsafe { &*(region.as_ptr() as *const AtomicU64) };
        atomic.store(0xdead_beef, Ordering::SeqCst);
        let reread = unsafe { &*(region.as_ptr() as *const AtomicU64) };
        assert_eq!(reread.load(Ordering::SeqCst), 0xdead_beef);
    }
}
