//! Ring-queue conservation properties (spec.md §8), exercised with
//! randomized interleavings the way the teacher's own ring tests use
//! `fastrand` to avoid hand-picking a small number of fixed cases.

use signsky::ring::Ring;

fn make_ring(capacity: u32) -> (Vec<u8>, Ring) {
    let size = Ring::footprint(capacity);
    let mut backing = vec![0u8; size];
    let ring = unsafe { Ring::init(backing.as_mut_ptr(), capacity).unwrap() };
    (backing, ring)
}

#[test]
fn random_enqueue_dequeue_interleaving_conserves_items() {
    let (_backing, ring) = make_ring(64);
    let mut produced = 0u32;
    let mut consumed = Vec::new();
    let mut outstanding = 0u32;

    for _ in 0..20_000 {
        if outstanding == 0 || (outstanding < 64 && fastrand::bool()) {
            if ring.enqueue(produced).is_ok() {
                produced += 1;
                outstanding += 1;
            }
        } else if let Some(handle) = ring.dequeue() {
            consumed.push(handle);
            outstanding -= 1;
        }
    }

    while let Some(handle) = ring.dequeue() {
        consumed.push(handle);
        outstanding -= 1;
    }

    assert_eq!(outstanding, 0);
    assert_eq!(ring.pending(), 0);
    for (expected, got) in consumed.iter().enumerate() {
        assert_eq!(*got, expected as u32, "delivery order must be FIFO");
    }
}

#[test]
fn saturates_at_declared_capacity_for_random_sizes() {
    for _ in 0..20 {
        let capacity = 1u32 << fastrand::u32(1..=10);
        let (_backing, ring) = make_ring(capacity);
        for i in 0..capacity {
            ring.enqueue(i).expect("ring should accept up to capacity");
        }
        assert!(ring.enqueue(capacity).is_err());
        assert_eq!(ring.free(), 0);
    }
}
