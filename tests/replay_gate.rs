//! Shared permissive anti-replay pre-check gate (spec.md §3, §4.5, §9):
//! the crypto-ingress stage's early filter, separate from the
//! authoritative per-SA window tested in `tests/replay.rs`.

use signsky::crypto::replay::ReplayWindow;

const DECRYPT_QUEUE_CAPACITY: u64 = 1024;
const SLACK: u64 = DECRYPT_QUEUE_CAPACITY - 1;

#[test]
fn permissive_gate_tolerates_packets_still_in_queue() {
    let gate = ReplayWindow::new();
    gate.update(2000);

    // A packet queued behind 1023 others before this one's sender's PN
    // advanced past it must still pass the gate, even though it would
    // fail the strict (64-wide) check decrypt applies later.
    let still_in_flight = 2000 - (SLACK - 1);
    assert!(!gate.check(still_in_flight), "strict window would already reject this");
    assert!(gate.check_permissive(still_in_flight, SLACK));
}

#[test]
fn permissive_gate_still_rejects_far_too_old() {
    let gate = ReplayWindow::new();
    gate.update(10_000);

    assert!(!gate.check_permissive(10_000 - SLACK - 64, SLACK));
}

#[test]
fn permissive_gate_tracks_authoritative_high_water_mark() {
    // Mirrors how stage::decrypt::run advances the shared gate: only
    // `update` (post-authoritative-accept), never from the pre-check
    // side, which only ever calls `check_permissive`.
    let gate = ReplayWindow::new();
    for pn in 0..5000u64 {
        gate.update(pn);
    }
    assert!(gate.check_permissive(4999, SLACK));
    assert!(!gate.check_permissive(4999 - SLACK - 64, SLACK));
}
