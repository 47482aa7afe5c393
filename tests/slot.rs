use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use lingering::{local_stats, Payload, RetentionCounter, Slot, TableHandle};

#[test]
fn set_get_clear() {
    let slot = Slot::<u32>::new();
    assert_eq!(slot.get(), None);
    assert!(!slot.is_set());

    assert_eq!(slot.set(1), None);
    assert_eq!(slot.set(2), Some(1));
    assert_eq!(slot.get(), Some(2));
    assert!(slot.is_set());

    assert_eq!(slot.clear(), Some(2));
    assert_eq!(slot.clear(), None);
    assert_eq!(slot.clear(), None);
    assert!(!slot.is_set());
}

#[test]
fn values_are_per_thread() {
    let slot = Slot::<&'static str>::new();
    slot.set("main");

    let other = slot.clone();
    let seen = thread::spawn(move || {
        let before = other.get();
        other.set("spawned");
        (before, other.get())
    })
    .join()
    .unwrap();

    assert_eq!(seen, (None, Some("spawned")));
    assert_eq!(slot.get(), Some("main"));
}

#[test]
fn clones_share_identity() {
    let slot = Slot::<u32>::new();
    let clone = slot.clone();
    slot.set(7);
    assert_eq!(clone.get(), Some(7));
    clone.clear();
    assert_eq!(slot.get(), None);

    let unrelated = Slot::<u32>::new();
    slot.set(1);
    assert_eq!(unrelated.get(), None);
}

#[test]
fn get_or_init_only_initializes_once() {
    let slot = Slot::<u32>::new();
    assert_eq!(slot.get_or_init(|| 3), 3);
    assert_eq!(slot.get_or_init(|| 4), 3);
    assert_eq!(slot.get(), Some(3));
}

#[test]
fn replaced_and_cleared_values_are_released() {
    let counter = RetentionCounter::new();
    let slot = Slot::new();
    slot.set(Arc::new(Payload::new(64, &counter)));
    drop(slot.set(Arc::new(Payload::new(64, &counter))));
    assert_eq!(counter.created(), 2);
    assert_eq!(counter.released(), 1);

    drop(slot.clear());
    assert_eq!(counter.released(), 2);
}

#[test]
fn scoped_clears_even_when_unwinding() {
    let counter = RetentionCounter::new();
    let slot = Slot::<Arc<Payload>>::new();

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let guard = slot.scoped(Arc::new(Payload::new(64, &counter)));
        assert!(guard.get().is_some());
        panic!("unit of work failed");
    }));

    assert!(result.is_err());
    assert!(!slot.is_set());
    assert_eq!(counter.outstanding(), 0);
}

#[test]
fn dropped_slot_retains_value_until_expunged() {
    thread::spawn(|| {
        let counter = RetentionCounter::new();
        let slot = Slot::new();
        slot.set(Arc::new(Payload::new(64, &counter)));
        drop(slot);

        assert_eq!(counter.outstanding(), 1);
        assert_eq!(local_stats().entries, 1);

        lingering::collect().unwrap();
        let stats = local_stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.stale, 1);
        assert_eq!(stats.capacity, 16);
        assert_eq!(counter.outstanding(), 1);

        assert_eq!(lingering::expunge_stale(), 1);
        assert_eq!(counter.outstanding(), 0);
        assert_eq!(local_stats().entries, 0);
        assert_eq!(lingering::expunge_stale(), 0);
    })
    .join()
    .unwrap();
}

#[test]
fn thread_exit_releases_values() {
    let counter = RetentionCounter::new();
    let slot = Slot::<Arc<Payload>>::new();

    thread::spawn({
        let slot = slot.clone();
        let counter = counter.clone();
        move || {
            slot.set(Arc::new(Payload::new(64, &counter)));
        }
    })
    .join()
    .unwrap();

    assert_eq!(counter.created(), 1);
    assert_eq!(counter.outstanding(), 0);
}

#[test]
fn table_handle_outlives_its_thread() {
    let counter = RetentionCounter::new();
    let slot = Slot::<Arc<Payload>>::new();

    let handle = thread::Builder::new()
        .name(String::from("short-lived"))
        .spawn({
            let slot = slot.clone();
            let counter = counter.clone();
            move || {
                slot.set(Arc::new(Payload::new(64, &counter)));
                TableHandle::current()
            }
        })
        .unwrap()
        .join()
        .unwrap();

    assert_eq!(handle.owner_name(), "short-lived");
    assert_eq!(handle.stats().entries, 1);
    assert_eq!(counter.outstanding(), 1);

    drop(handle);
    assert_eq!(counter.outstanding(), 0);
}
