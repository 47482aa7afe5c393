use std::time::Duration;

use lingering::{ExpungeStrategy, ProbeConfig, Scenario, Verdict};

fn config(strategy: ExpungeStrategy) -> ProbeConfig {
    ProbeConfig::new()
        .with_payload_size(1024)
        .with_grace(Duration::from_millis(10))
        .with_max_retries(3)
        .with_probe_reads(20)
        .with_expunge(strategy)
}

#[test]
fn shared_probe_leaves_entries_behind() {
    let report = lingering::bounded_leak(&config(ExpungeStrategy::SharedProbe)).unwrap();
    assert_eq!(report.scenario, Scenario::BoundedLeak);
    assert_eq!(report.submitted, 50);
    // The last entry stored on each worker is never reached before the
    // first observation.
    assert!((1..=50).contains(&report.initially_outstanding));
    assert!(report.outstanding <= report.initially_outstanding);
    assert_eq!(report.released + report.outstanding, report.submitted);
    if report.outstanding > 0 {
        assert_eq!(
            report.verdict,
            Verdict::LeakSuspected {
                outstanding: report.outstanding
            }
        );
        assert_eq!(report.retries, 3);
    }
}

#[test]
fn fresh_probes_never_increase_retention() {
    let report = lingering::bounded_leak(&config(ExpungeStrategy::FreshProbe)).unwrap();
    assert!(report.initially_outstanding >= 1);
    assert!(report.outstanding <= report.initially_outstanding);
    assert_eq!(report.verdict.outstanding(), report.outstanding);
}

#[test]
fn collecting_alone_releases_nothing() {
    let report = lingering::bounded_leak(&config(ExpungeStrategy::None)).unwrap();
    assert!(report.initially_outstanding >= 1);
    assert_eq!(report.outstanding, report.initially_outstanding);
    assert_eq!(
        report.verdict,
        Verdict::LeakSuspected {
            outstanding: report.initially_outstanding
        }
    );
    assert_eq!(report.retries, 3);
}

#[test]
fn invalid_configuration_is_rejected() {
    let err = lingering::bounded_leak(&config(ExpungeStrategy::None).with_workers(0)).unwrap_err();
    assert!(matches!(err, lingering::Error::InvalidConfig(_)));
}
