use std::io::Cursor;
use std::time::Duration;

use lingering::{ProbeConfig, Scenario, Verdict};

#[test]
fn payload_outlives_its_thread_until_the_table_is_dropped() {
    let config = ProbeConfig::new()
        .with_payload_size(1024)
        .with_settle_delay(Duration::ZERO);
    let report = lingering::interactive(&config, Cursor::new("\n")).unwrap();

    assert_eq!(report.scenario, Scenario::Interactive);
    assert_eq!(report.submitted, 1);
    assert_eq!(report.outstanding, 1);
    assert_eq!(report.verdict, Verdict::PartiallyReclaimed { outstanding: 1 });
    assert_eq!(report.released, 1);
}

#[test]
fn closed_input_still_completes() {
    let config = ProbeConfig::new()
        .with_payload_size(1024)
        .with_settle_delay(Duration::ZERO);
    let report = lingering::interactive(&config, Cursor::new("")).unwrap();
    assert_eq!(report.outstanding, 1);
    assert_eq!(report.released, 1);
}
