use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use flume::{Receiver, Sender};
use lingering::{Payload, RetentionCounter, Slot};

const WORK_ITERS: usize = 100;
const WORK_ITEMS: usize = 100;

#[test]
fn round_robin() {
    let threads = thread::available_parallelism()
        .map_or(1, NonZeroUsize::get)
        .max(2);
    let channels = (0..threads).map(|_| flume::unbounded()).collect::<Vec<_>>();
    let outstanding = OutstandingWork::new(WORK_ITEMS);
    let counter = RetentionCounter::new();
    let slot = Slot::<Arc<Payload>>::new();

    let mut workers = Vec::with_capacity(threads);
    for (index, (_, receiver)) in channels.iter().enumerate() {
        let next = channels.get(index + 1).unwrap_or(&channels[0]);
        let next_sender = next.0.clone();
        let receiver = receiver.clone();
        let outstanding = outstanding.clone();
        let slot = slot.clone();
        workers.push(thread::spawn(move || {
            thread_worker(&slot, &receiver, &next_sender, &outstanding);
        }));
    }

    for i in 0..WORK_ITEMS {
        channels[i % channels.len()]
            .0
            .send(Command::Pass {
                payload: Arc::new(Payload::new(64, &counter)),
                hops_left: WORK_ITERS,
            })
            .expect("worker disconnected early");
    }

    // Collections run concurrently with the workers' table accesses.
    while outstanding.count() > 0 {
        lingering::collect().unwrap();
    }

    for (sender, _) in &channels {
        sender.send(Command::Stop).expect("worker disconnected early");
    }
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(counter.created(), WORK_ITEMS as u64);
    assert_eq!(counter.outstanding(), 0);
}

fn thread_worker(
    slot: &Slot<Arc<Payload>>,
    task_receiver: &Receiver<Command>,
    next_thread: &Sender<Command>,
    outstanding: &OutstandingWork,
) {
    while let Ok(command) = task_receiver.recv() {
        match command {
            Command::Pass { payload, hops_left } => {
                let id = payload.id();
                // The previous payload this thread finished with, if any, is
                // released here.
                drop(slot.set(payload));
                assert_eq!(slot.get().map(|payload| payload.id()), Some(id));

                if hops_left > 0 {
                    let payload = slot.clear().expect("payload vanished");
                    next_thread
                        .send(Command::Pass {
                            payload,
                            hops_left: hops_left - 1,
                        })
                        .expect("next thread disconnected");
                } else {
                    outstanding.complete_one();
                }
            }
            Command::Stop => break,
        }
    }
}

enum Command {
    Pass {
        payload: Arc<Payload>,
        hops_left: usize,
    },
    Stop,
}

#[derive(Clone)]
struct OutstandingWork(Arc<AtomicUsize>);

impl OutstandingWork {
    fn new(count: usize) -> Self {
        Self(Arc::new(AtomicUsize::new(count)))
    }

    fn count(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    fn complete_one(&self) {
        self.0.fetch_sub(1, Ordering::Release);
    }
}
