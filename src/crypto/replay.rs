//! Anti-replay window (spec.md §4.5).
//!
//! A 64-bit sliding bitmap behind the highest packet number accepted so
//! far (`last`). Two instances of this same type exist in this crate:
//! one per RX SA slot, private to the decrypt process (`crypto::sa::RxSlot`),
//! and one placed in shared memory as the crypto-ingress stage's
//! permissive pre-check gate (spec.md §4.5, §9) — `supervisor::Layout`
//! allocates the shared one and every stage context carries a pointer to
//! it. `SeqCst` throughout is what makes the shared instance correct
//! under concurrent cross-process access (crypto-in checking while
//! decrypt updates); for the process-local instances it costs nothing
//! to keep the same discipline.

use std::sync::atomic::{AtomicU64, Ordering};

#[repr(C)]
pub struct ReplayWindow {
    last: AtomicU64,
    bitmap: AtomicU64,
}

impl ReplayWindow {
    pub fn new() -> ReplayWindow {
        ReplayWindow { last: AtomicU64::new(0), bitmap: AtomicU64::new(0) }
    }

    /// Strict admission check: `pn` must be new (not already marked in
    /// the window) and not older than 64 packets behind `last`. Does not
    /// mutate state — call `update` after a packet actually verifies.
    ///
    /// PN 0 is never valid (spec.md §4.5 requires `p > 0`) and is
    /// rejected unconditionally, regardless of `last`.
    pub fn check(&self, pn: u64) -> bool {
        if pn == 0 {
            return false;
        }

        let last = self.last.load(Ordering::SeqCst);

        if pn > last {
            return true;
        }

        let diff = last - pn;
        if diff >= 64 {
            return false;
        }

        let bitmap = self.bitmap.load(Ordering::SeqCst);
        bitmap & (1u64 << diff) == 0
    }

    /// The crypto-ingress stage's relaxed pre-check (spec.md §9): before
    /// a packet has even been routed to the decrypt stage, reject early
    /// only if it is so far behind that no association's window could
    /// plausibly still accept it, widened by `slack` (the decrypt
    /// queue's capacity minus one) to account for packets already
    /// in flight ahead of it in that queue.
    pub fn check_permissive(&self, pn: u64, slack: u64) -> bool {
        if pn == 0 {
            return false;
        }

        let last = self.last.load(Ordering::SeqCst);
        if pn > last {
            return true;
        }
        last - pn < 64 + slack
    }

    /// Record `pn` as accepted. Must only be called after the packet's
    /// AEAD tag has verified; advances `last` and slides `bitmap` when
    /// `pn` is a new high point, otherwise just sets `pn`'s bit.
    pub fn update(&self, pn: u64) {
        let last = self.last.load(Ordering::SeqCst);

        if pn > last {
            let shift = pn - last;
            let bitmap = self.bitmap.load(Ordering::SeqCst);
            let shifted = if shift >= 64 { 0 } else { bitmap << shift };
            self.bitmap.store(shifted | 1, Ordering::SeqCst);
            self.last.store(pn, Ordering::SeqCst);
        } else {
            let diff = last - pn;
            self.bitmap.fetch_or(1u64 << diff, Ordering::SeqCst);
        }
    }

    /// Convenience combining `check` and `update` for callers that
    /// verify the AEAD tag themselves between the two.
    pub fn accept(&self, pn: u64) -> bool {
        if !self.check(pn) {
            return false;
        }
        self.update(pn);
        true
    }
}

impl Default for ReplayWindow {
    fn default() -> ReplayWindow {
        ReplayWindow::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_sequence_always_accepted() {
        let w = ReplayWindow::new();
        for pn in 1..200u64 {
            assert!(w.accept(pn), "pn {pn} should be accepted");
        }
    }

    #[test]
    fn pn_zero_always_rejected() {
        let w = ReplayWindow::new();
        assert!(!w.check(0));
        assert!(!w.check_permissive(0, 1000));
        assert!(!w.accept(0));
    }

    #[test]
    fn exact_duplicate_rejected() {
        let w = ReplayWindow::new();
        assert!(w.accept(10));
        assert!(!w.check(10));
    }

    #[test]
    fn reorder_within_window_accepted_once() {
        let w = ReplayWindow::new();
        assert!(w.accept(100));
        assert!(w.accept(95));
        assert!(!w.check(95));
        assert!(w.accept(99));
    }

    #[test]
    fn too_far_behind_rejected() {
        let w = ReplayWindow::new();
        assert!(w.accept(1000));
        assert!(!w.check(935));
        assert!(w.check(937));
    }

    #[test]
    fn permissive_check_widens_by_slack() {
        let w = ReplayWindow::new();
        assert!(w.accept(1000));
        assert!(!w.check(900));
        assert!(w.check_permissive(900, 50));
        assert!(!w.check_permissive(800, 50));
    }
}
