//! Values must be gone as soon as their thread is joined, even while the
//! collector is busy locking that thread's table.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use lingering::{Payload, RetentionCounter, Slot, TableHandle};

const THREADS: usize = 2_000;

fn collect_until(stop: &Arc<AtomicBool>) -> thread::JoinHandle<u64> {
    let stop = stop.clone();
    thread::spawn(move || {
        let mut passes = 0;
        while !stop.load(Ordering::Acquire) {
            lingering::collect().unwrap();
            passes += 1;
        }
        passes
    })
}

#[test]
fn exiting_threads_release_values_during_collections() {
    let stop = Arc::new(AtomicBool::new(false));
    let collecting = collect_until(&stop);
    let counter = RetentionCounter::new();
    let slot = Slot::<Arc<Payload>>::new();

    for _ in 0..THREADS {
        thread::spawn({
            let slot = slot.clone();
            let counter = counter.clone();
            move || {
                slot.set(Arc::new(Payload::new(64, &counter)));
            }
        })
        .join()
        .unwrap();
        assert_eq!(counter.outstanding(), 0);
    }

    stop.store(true, Ordering::Release);
    assert!(collecting.join().unwrap() > 0);
    assert_eq!(counter.created(), THREADS as u64);
}

#[test]
fn last_handle_releases_values_during_collections() {
    let stop = Arc::new(AtomicBool::new(false));
    let collecting = collect_until(&stop);
    let counter = RetentionCounter::new();

    for _ in 0..THREADS / 4 {
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
        assert_eq!(counter.outstanding(), 1);

        let clone = handle.clone();
        drop(handle);
        assert_eq!(counter.outstanding(), 1);
        drop(clone);
        assert_eq!(counter.outstanding(), 0);
    }

    stop.store(true, Ordering::Release);
    collecting.join().unwrap();
}
