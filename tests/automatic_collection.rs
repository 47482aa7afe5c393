//! Runs alone: a pass already underway when the slot is dropped could
//! swallow the collection request this test depends on.

use std::thread;
use std::time::{Duration, Instant};

use lingering::{local_stats, Slot};

#[test]
fn dropping_a_slot_schedules_a_collection() {
    let slot = Slot::<u32>::new();
    slot.set(1);
    drop(slot);

    let deadline = Instant::now() + Duration::from_secs(10);
    while local_stats().stale == 0 {
        assert!(Instant::now() < deadline, "no collection ran");
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(local_stats().entries, 1);
    assert_eq!(lingering::expunge_stale(), 1);
}
