use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use lingering::{local_stats, Payload, RetentionCounter, Slot, TableHandle};

#[test]
fn collection_marks_without_releasing() {
    let counter = RetentionCounter::new();
    let slot = Slot::new();
    slot.set(Arc::new(Payload::new(64, &counter)));
    let live = Slot::new();
    live.set(Arc::new(Payload::new(64, &counter)));
    drop(slot);

    let stats = lingering::collect().unwrap();
    assert!(stats.tables >= 1);
    assert_eq!(stats.values_expunged, 0);
    assert_eq!(local_stats().stale, 1);
    assert_eq!(counter.outstanding(), 2);

    assert_eq!(lingering::expunge_stale(), 1);
    assert_eq!(counter.outstanding(), 1);
    assert!(live.get().is_some());
}

#[test]
fn handle_sweeps_its_own_table() {
    let counter = RetentionCounter::new();
    let handle = thread::spawn({
        let counter = counter.clone();
        move || {
            for _ in 0..3 {
                let slot = Slot::new();
                slot.set(Arc::new(Payload::new(64, &counter)));
            }
            TableHandle::current()
        }
    })
    .join()
    .unwrap();

    // A pass running while the thread was still storing may already have
    // let later inserts expunge some of the earlier entries.
    lingering::collect().unwrap();
    let stats = handle.stats();
    assert!(stats.stale <= 3);
    assert_eq!(stats.entries, stats.stale);
    assert_eq!(u64::try_from(stats.stale).unwrap(), counter.outstanding());
    assert_eq!(handle.expunge_stale(), stats.stale);
    assert_eq!(counter.outstanding(), 0);
}

/// Sleeps inside `clone`, which `Slot::get` runs with the table locked.
#[derive(Default)]
struct SlowClone {
    entered: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
}

impl Clone for SlowClone {
    fn clone(&self) -> Self {
        self.entered.store(true, Ordering::Release);
        thread::sleep(Duration::from_millis(200));
        self.finished.store(true, Ordering::Release);
        Self {
            entered: self.entered.clone(),
            finished: self.finished.clone(),
        }
    }
}

#[test]
fn collection_waits_for_a_busy_table() {
    let value = SlowClone::default();
    let entered = value.entered.clone();
    let finished = value.finished.clone();

    let busy = thread::spawn(move || {
        let slot = Slot::new();
        slot.set(value);
        slot.get().is_some()
    });
    while !entered.load(Ordering::Acquire) {
        thread::yield_now();
    }

    // The table stays locked for the rest of the clone, longer than every
    // timed locking round, so the pass has to fall back to waiting for it.
    let stats = lingering::collect().unwrap();
    assert!(stats.tables >= 1);
    assert!(finished.load(Ordering::Acquire));
    assert!(busy.join().unwrap());
}
