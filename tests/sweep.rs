//! Sweeps expunge stale entries of every table in the process, so these
//! tests run apart from the ones that count retained values.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use lingering::{
    ExpungeStrategy, Payload, ProbeConfig, RetentionCounter, Slot, TableHandle, Verdict,
};

#[test]
fn sweep_releases_stale_values_of_other_threads() {
    let counter = RetentionCounter::new();
    let handle = thread::spawn({
        let counter = counter.clone();
        move || {
            let slot = Slot::new();
            slot.set(Arc::new(Payload::new(64, &counter)));
            TableHandle::current()
        }
    })
    .join()
    .unwrap();

    assert_eq!(handle.stats().entries, 1);
    assert_eq!(counter.outstanding(), 1);

    lingering::sweep_all().unwrap();
    assert_eq!(counter.outstanding(), 0);
    assert_eq!(handle.stats().entries, 0);
}

#[test]
fn sweeping_reclaims_the_bounded_leak() {
    let config = ProbeConfig::new()
        .with_payload_size(1024)
        .with_grace(Duration::from_millis(10))
        .with_max_retries(3)
        .with_expunge(ExpungeStrategy::Sweep);

    let report = lingering::bounded_leak(&config).unwrap();
    assert_eq!(report.submitted, 50);
    assert_eq!(report.verdict, Verdict::FullyReclaimed);
    assert_eq!(report.released, 50);
    assert!(report.retries <= 1);
}

#[test]
fn exhausted_retries_report_a_leak_even_when_released() {
    let config = ProbeConfig::new()
        .with_payload_size(1024)
        .with_grace(Duration::from_millis(10))
        .with_max_retries(1)
        .with_expunge(ExpungeStrategy::Sweep);

    let report = lingering::bounded_leak(&config).unwrap();
    assert_eq!(report.released, 50);
    if report.retries == 1 {
        // The only round swept everything, but the budget ran out before a
        // round could confirm it.
        assert_eq!(report.verdict, Verdict::LeakSuspected { outstanding: 0 });
    } else {
        // A sweep from another test released everything before the first
        // round began.
        assert_eq!(report.verdict, Verdict::FullyReclaimed);
    }
}
