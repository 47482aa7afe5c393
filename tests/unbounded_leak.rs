use lingering::{ProbeConfig, Scenario, Verdict};

#[test]
fn limited_run_reports_retained_payloads() {
    let config = ProbeConfig::new().with_workers(3).with_payload_size(1024);
    let report = lingering::unbounded_leak(&config, Some(200)).unwrap();

    assert_eq!(report.scenario, Scenario::UnboundedLeak);
    assert_eq!(report.submitted, 200);
    assert!(report.outstanding >= 1);
    assert!(report.outstanding <= 200);
    assert_eq!(
        report.verdict,
        Verdict::LeakSuspected {
            outstanding: report.outstanding
        }
    );
}
