//! The five retention probes.
//!
//! Each probe owns a fresh worker pool and [`RetentionCounter`], drives one
//! usage pattern of [`Slot`], and reports how many payloads it could observe
//! being released. The pool is kept alive until the report has been taken:
//! shutting it down ends the worker threads and releases everything their
//! tables hold.

use std::fmt;
use std::io::BufRead;
use std::sync::Arc;
use std::thread;

use lingering_pool::WorkerPool;

use crate::config::{ExpungeStrategy, ProbeConfig};
use crate::observer::{RetentionObserver, Verdict};
use crate::{collector, Error, Payload, RetentionCounter, Slot, TableHandle};

/// Identifies a probe.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Scenario {
    /// [`unbounded_leak`]
    UnboundedLeak,
    /// [`bounded_leak`]
    BoundedLeak,
    /// [`shared_slot`]
    SharedSlot,
    /// [`best_practice`]
    BestPractice,
    /// [`interactive`]
    Interactive,
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::UnboundedLeak => "unbounded leak",
            Self::BoundedLeak => "bounded leak",
            Self::SharedSlot => "shared slot",
            Self::BestPractice => "best practice",
            Self::Interactive => "interactive",
        })
    }
}

/// What a probe observed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ProbeReport {
    /// The probe that produced this report.
    pub scenario: Scenario,
    /// Payloads created by the probe's work units.
    pub submitted: u64,
    /// Payloads released when the report was taken.
    pub released: u64,
    /// Payloads still retained at the probe's first observation.
    pub initially_outstanding: u64,
    /// Payloads still retained at the probe's final observation.
    pub outstanding: u64,
    /// The probe's conclusion.
    pub verdict: Verdict,
    /// Retry rounds performed after the first observation.
    pub retries: u32,
}

impl ProbeReport {
    fn new(scenario: Scenario, counter: &RetentionCounter, verdict: Verdict, retries: u32) -> Self {
        Self {
            scenario,
            submitted: counter.created(),
            released: counter.released(),
            initially_outstanding: verdict.outstanding(),
            outstanding: verdict.outstanding(),
            verdict,
            retries,
        }
    }
}

impl fmt::Display for ProbeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} of {} payloads released, {}",
            self.scenario, self.released, self.submitted, self.verdict
        )
    }
}

fn spawn_pool(config: &ProbeConfig) -> Result<WorkerPool, Error> {
    config.validate()?;
    Ok(WorkerPool::builder(config.workers())
        .name_prefix("worker")
        .build()?)
}

fn thread_name() -> String {
    thread::current()
        .name()
        .map_or_else(|| format!("{:?}", thread::current().id()), String::from)
}

/// Stores a new payload in a slot that is dropped without being cleared.
fn store_and_forget(size: usize, counter: &RetentionCounter) {
    let local = Slot::<Arc<Payload>>::new();
    drop(local.set(Arc::new(Payload::new(size, counter))));
    if let Some(payload) = local.get() {
        tracing::info!(thread = %thread_name(), %payload, "stored payload in a private slot");
    }
}

/// Submits work forever, or `limit` times, each unit storing a payload in a
/// private slot it never clears.
///
/// With `limit` set, waits for the pool to drain and reports how many
/// payloads are still retained: at least the most recent one of every worker
/// that ran a unit, since nothing on those threads touches their tables
/// afterwards.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the pool fails.
pub fn unbounded_leak(config: &ProbeConfig, limit: Option<u64>) -> Result<ProbeReport, Error> {
    let pool = spawn_pool(config)?;
    let counter = RetentionCounter::new();
    let backlog = config.workers() * 2;

    let mut submitted = 0_u64;
    while limit.map_or(true, |limit| submitted < limit) {
        if pool.queued() > backlog {
            thread::sleep(config.drain_poll());
            continue;
        }
        let counter = counter.clone();
        let size = config.payload_size();
        pool.execute(move || {
            store_and_forget(size, &counter);
            tracing::info!(unreleased = counter.outstanding(), "has unused data");
        })?;
        submitted += 1;
    }

    pool.wait_idle();
    let outstanding = counter.outstanding();
    tracing::warn!(outstanding, "payloads still retained after the pool drained");
    Ok(ProbeReport::new(
        Scenario::UnboundedLeak,
        &counter,
        Verdict::LeakSuspected { outstanding },
        0,
    ))
}

/// Submits `total` units, each storing a payload in a private slot it never
/// clears, then tries to get the stale entries expunged using the configured
/// [`ExpungeStrategy`], observing after every round.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, the pool fails, or the
/// collector has stopped.
pub fn bounded_leak(config: &ProbeConfig) -> Result<ProbeReport, Error> {
    let pool = spawn_pool(config)?;
    let counter = RetentionCounter::new();
    let observer = RetentionObserver::new(counter.clone(), config.grace());
    let total = config.total() as u64;

    for _ in 0..config.total() {
        let counter = counter.clone();
        let size = config.payload_size();
        pool.execute(move || store_and_forget(size, &counter))?;
    }
    pool.wait_idle();

    let first = observer.observe(total)?;
    tracing::info!(
        unused = first.outstanding,
        strategy = %config.expunge(),
        "begin to expunge stale entries indirectly"
    );

    // Sharing one probe slot makes every read land on the same table
    // positions, so some stale entries may never be scanned.
    let probe = Slot::<u32>::new();
    let mut retries = 0;
    while retries < config.max_retries() {
        let cleaned_before = counter.released();
        if cleaned_before == total {
            tracing::info!("all payloads released by expunging stale entries, no leak");
            return Ok(ProbeReport {
                initially_outstanding: first.outstanding,
                ..ProbeReport::new(
                    Scenario::BoundedLeak,
                    &counter,
                    Verdict::FullyReclaimed,
                    retries,
                )
            });
        }

        match config.expunge() {
            ExpungeStrategy::SharedProbe => {
                for _ in 0..config.probe_reads() {
                    let probe = probe.clone();
                    pool.execute(move || {
                        probe.get_or_init(u32::default);
                    })?;
                }
            }
            ExpungeStrategy::FreshProbe => {
                for _ in 0..config.probe_reads() {
                    pool.execute(|| {
                        Slot::<u32>::new().get_or_init(u32::default);
                    })?;
                }
            }
            ExpungeStrategy::Sweep => {
                collector::sweep_all()?;
            }
            ExpungeStrategy::None => {}
        }
        pool.wait_idle();

        let observation = observer.observe(total)?;
        retries += 1;
        tracing::info!(
            left = config.max_retries() - retries,
            cleaned = observation.released - cleaned_before,
            unused = observation.outstanding,
            "tried to expunge stale entries indirectly"
        );
    }

    // Running out of retries is a suspected leak even if the last round
    // happened to release everything; only the check at the start of a
    // round reports full reclamation.
    let observation = observer.read(total);
    tracing::warn!(unused = observation.outstanding, "memory leaked");
    let verdict = Verdict::LeakSuspected {
        outstanding: observation.outstanding,
    };
    Ok(ProbeReport {
        initially_outstanding: first.outstanding,
        ..ProbeReport::new(Scenario::BoundedLeak, &counter, verdict, retries)
    })
}

/// Submits `total` units that all store their payload in one shared slot.
///
/// Each store replaces the worker's previous value, so once the pool drains
/// at most one payload per worker is retained.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, the pool fails, or the
/// collector has stopped.
pub fn shared_slot(config: &ProbeConfig) -> Result<ProbeReport, Error> {
    let pool = spawn_pool(config)?;
    let counter = RetentionCounter::new();
    let observer = RetentionObserver::new(counter.clone(), config.grace());
    let slot = Slot::<Arc<Payload>>::new();

    for _ in 0..config.total() {
        let counter = counter.clone();
        let slot = slot.clone();
        let size = config.payload_size();
        pool.execute(move || {
            drop(slot.set(Arc::new(Payload::new(size, &counter))));
            if let Some(payload) = slot.get() {
                tracing::info!(thread = %thread_name(), %payload, "stored payload in the shared slot");
            }
        })?;
    }
    pool.wait_idle();

    let observation = observer.settle(config.total() as u64, config.max_retries())?;
    tracing::info!(
        cached = observation.outstanding,
        workers = pool.size(),
        "payloads cached by the shared slot, at most one per worker"
    );
    Ok(ProbeReport::new(
        Scenario::SharedSlot,
        &counter,
        observation.verdict,
        0,
    ))
}

/// Submits `total` units that store their payload in a shared slot through
/// [`Slot::scoped`], clearing it when they finish.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, the pool fails, or the
/// collector has stopped.
pub fn best_practice(config: &ProbeConfig) -> Result<ProbeReport, Error> {
    let pool = spawn_pool(config)?;
    let counter = RetentionCounter::new();
    let observer = RetentionObserver::new(counter.clone(), config.grace());
    let slot = Slot::<Arc<Payload>>::new();
    let total = config.total() as u64;

    for _ in 0..config.total() {
        let counter = counter.clone();
        let slot = slot.clone();
        let size = config.payload_size();
        pool.execute(move || {
            let guard = slot.scoped(Arc::new(Payload::new(size, &counter)));
            if let Some(payload) = guard.get() {
                tracing::info!(thread = %thread_name(), %payload, "working with a scoped payload");
            }
        })?;
    }

    let mut retries = 0;
    loop {
        if pool.queued() > 0 {
            thread::sleep(config.drain_poll());
            continue;
        }

        let observation = observer.observe(total)?;
        retries += 1;
        if observation.verdict == Verdict::FullyReclaimed {
            tracing::info!("all payloads released by explicit clearing");
            return Ok(ProbeReport::new(
                Scenario::BestPractice,
                &counter,
                Verdict::FullyReclaimed,
                retries - 1,
            ));
        }
        if retries >= config.max_retries() {
            tracing::warn!(unused = observation.outstanding, "memory leaked");
            return Ok(ProbeReport::new(
                Scenario::BestPractice,
                &counter,
                Verdict::LeakSuspected {
                    outstanding: observation.outstanding,
                },
                retries - 1,
            ));
        }
    }
}

/// Stores one payload from a short-lived thread that hands out an external
/// reference to its table, then waits for one line of operator input.
///
/// The payload outlives its thread for as long as the table is referenced.
/// The report's `outstanding` is the count read after the operator
/// responded, while the reference was still held; `released` is read after
/// the reference was dropped.
///
/// # Errors
///
/// Returns an error if the thread cannot be spawned or panics, the collector
/// has stopped, or reading `input` fails.
pub fn interactive(config: &ProbeConfig, mut input: impl BufRead) -> Result<ProbeReport, Error> {
    let counter = RetentionCounter::new();
    let slot = Slot::<Arc<Payload>>::new();

    let owner = thread::Builder::new()
        .name(String::from("probe-thread"))
        .spawn({
            let slot = slot.clone();
            let counter = counter.clone();
            let size = config.payload_size();
            move || {
                drop(slot.set(Arc::new(Payload::new(size, &counter))));
                if let Some(payload) = slot.get() {
                    tracing::info!(thread = %thread_name(), %payload, "stored payload in the shared slot");
                }
                TableHandle::current()
            }
        })?;
    let table = owner.join().map_err(|_| Error::ThreadPanicked)?;

    thread::sleep(config.settle_delay());
    collector::collect()?;
    tracing::info!("collection requested, press enter to continue");
    input.read_line(&mut String::new())?;

    let retained = counter.outstanding();
    tracing::info!(
        owner = table.owner_name(),
        entries = table.stats().entries,
        retained,
        "payload retained by a table whose thread has exited"
    );
    drop(table);

    Ok(ProbeReport {
        scenario: Scenario::Interactive,
        submitted: counter.created(),
        released: counter.released(),
        initially_outstanding: retained,
        outstanding: retained,
        verdict: if retained == 0 {
            Verdict::FullyReclaimed
        } else {
            Verdict::PartiallyReclaimed {
                outstanding: retained,
            }
        },
        retries: 0,
    })
}
