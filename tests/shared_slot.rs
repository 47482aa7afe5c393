use std::time::Duration;

use lingering::{ProbeConfig, Scenario, Verdict};

fn config(workers: usize, total: usize) -> ProbeConfig {
    ProbeConfig::new()
        .with_workers(workers)
        .with_total(total)
        .with_payload_size(1024)
        .with_grace(Duration::from_millis(10))
}

#[test]
fn at_most_one_payload_per_worker() {
    let report = lingering::shared_slot(&config(5, 50)).unwrap();
    assert_eq!(report.scenario, Scenario::SharedSlot);
    assert_eq!(report.submitted, 50);
    assert!((1..=5).contains(&report.outstanding));
    assert_eq!(report.released, 50 - report.outstanding);
    assert_eq!(
        report.verdict,
        Verdict::PartiallyReclaimed {
            outstanding: report.outstanding
        }
    );
}

#[test]
fn single_worker_keeps_only_the_latest() {
    let report = lingering::shared_slot(&config(1, 10)).unwrap();
    assert_eq!(report.outstanding, 1);
    assert_eq!(report.released, 9);
}
