//! Anti-replay scenarios (spec.md §8 scenario 2: "reorder within window").

use signsky::crypto::replay::ReplayWindow;

#[test]
fn reorder_scenario_from_spec() {
    let window = ReplayWindow::new();

    for pn in 1..=50u64 {
        assert!(window.accept(pn), "pn {pn} should be accepted in order");
    }

    assert!(window.accept(100));

    // 51..99 now fall outside the post-100 window (last - p >= 64 for
    // p <= 36), and are rejected as too old; 37..50 were already seen
    // and are rejected as duplicates.
    for pn in 51..=99u64 {
        let expect_ok = 100 - pn < 64;
        assert_eq!(window.check(pn), expect_ok, "pn {pn}");
    }

    for pn in 37..=50u64 {
        assert!(!window.check(pn), "pn {pn} was already seen");
    }
}

#[test]
fn forced_rekey_mid_stream_uses_independent_windows_per_slot() {
    // Each SA slot owns its own window; a rekey installs a fresh one,
    // so packet numbers restart cleanly under the new SPI without
    // inheriting the old slot's history.
    let old = ReplayWindow::new();
    for pn in 1..12_000u64 {
        assert!(old.accept(pn));
    }

    let new = ReplayWindow::new();
    for pn in 1..100u64 {
        assert!(new.accept(pn), "new association should accept its own low PNs");
    }
}

#[test]
fn every_accepted_pn_rejected_on_resubmission() {
    let window = ReplayWindow::new();
    let mut accepted = Vec::new();

    for pn in 1..500u64 {
        if fastrand::bool() {
            if window.accept(pn) {
                accepted.push(pn);
            }
        }
    }

    for pn in accepted {
        assert!(!window.check(pn), "pn {pn} must not be accepted twice");
    }
}
