//! The background collector.
//!
//! Every thread that touches a [`Slot`](crate::Slot) registers its table with
//! a single process-wide collector thread. A collection pass locks every
//! registered table and clears the keys of entries whose slot has no live
//! handle left, turning them stale. It does not release their values: that
//! only happens when a stale entry is expunged, either opportunistically by
//! the owning thread or by an explicit sweep.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread;
use std::time::{Duration, Instant};

use flume::{Receiver, RecvError, RecvTimeoutError, Sender};
use kempt::Map;
use nanorand::{Rng, WyRand};
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Condvar, Mutex, RawMutex};

use crate::table::SlotTable;
use crate::Error;

/// After this many rounds of timed lock attempts, the collector waits for
/// each remaining table unconditionally.
const FORCE_LOCK_ROUNDS: u8 = 5;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) struct OwnerId(u64);

impl OwnerId {
    pub(crate) fn unique() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(0);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Statistics about one collection pass.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CollectionStats {
    /// The number of tables that were inspected.
    pub tables: usize,
    /// The number of entries whose keys were cleared, making them stale.
    pub keys_cleared: usize,
    /// The number of stale entries removed. Always zero unless the pass was a
    /// sweep.
    pub values_expunged: usize,
    /// How long the pass took.
    pub duration: Duration,
}

enum CollectorCommand {
    Attach {
        owner: OwnerId,
        name: String,
        table: Weak<Mutex<SlotTable>>,
    },
    Detach {
        owner: OwnerId,
        externally_held: bool,
    },
    Collect {
        requested_at: Instant,
        sweep: bool,
    },
    ScheduleCollect,
}

impl CollectorCommand {
    fn send(self) -> Result<(), Error> {
        GlobalCollector::get()
            .sender
            .send(self)
            .map_err(|_| Error::CollectorStopped)
    }
}

struct TrackedTable {
    name: String,
    alive: bool,
    table: Weak<Mutex<SlotTable>>,
}

struct CollectorInfo {
    info: Mutex<CollectorInfoData>,
    sync: Condvar,
    signalled_collector: AtomicBool,
}

impl CollectorInfo {
    fn wait_for_collection(&self, requested_at: Instant, sweep: bool) -> CollectionStats {
        let mut info = self.info.lock();
        loop {
            let last = if sweep {
                info.last_sweep
            } else {
                info.last_run
            };
            if let Some((started, stats)) = last {
                if started >= requested_at {
                    return stats;
                }
            }
            self.sync.wait(&mut info);
        }
    }
}

#[derive(Default)]
struct CollectorInfoData {
    /// Start time and outcome of the most recent pass of any kind.
    last_run: Option<(Instant, CollectionStats)>,
    /// Start time and outcome of the most recent sweeping pass.
    last_sweep: Option<(Instant, CollectionStats)>,
}

impl CollectorInfoData {
    fn satisfies(&self, requested_at: Instant, sweep: bool) -> bool {
        let last = if sweep { self.last_sweep } else { self.last_run };
        last.map_or(false, |(started, _)| started >= requested_at)
    }
}

struct Collector {
    shared: Arc<CollectorInfo>,
    receiver: Receiver<CollectorCommand>,
    tables: Map<OwnerId, TrackedTable>,
    next_gc: Option<Instant>,
    rng: WyRand,
    average_collection: Duration,
    average_collection_locking: Duration,
}

impl Collector {
    fn new(receiver: Receiver<CollectorCommand>, shared: Arc<CollectorInfo>) -> Self {
        Self {
            shared,
            receiver,
            tables: Map::new(),
            next_gc: None,
            rng: WyRand::new(),
            average_collection: Duration::from_millis(1),
            average_collection_locking: Duration::from_millis(1),
        }
    }

    fn next_command(&self) -> Result<Option<CollectorCommand>, RecvError> {
        if let Some(next_gc) = self.next_gc {
            match self.receiver.recv_deadline(next_gc) {
                Ok(value) => Ok(Some(value)),
                Err(RecvTimeoutError::Timeout) => Ok(None),
                Err(RecvTimeoutError::Disconnected) => Err(RecvError::Disconnected),
            }
        } else {
            self.receiver.recv().map(Some)
        }
    }

    fn schedule_gc(&mut self, target: Instant) {
        if self.next_gc.map_or(true, |next_gc| target < next_gc) {
            self.next_gc = Some(target);
        }
    }

    fn run(mut self) {
        loop {
            let command = match self.next_command() {
                Ok(Some(command)) => command,
                Ok(None) => {
                    self.collect_and_notify(false);
                    continue;
                }
                Err(_) => break,
            };
            match command {
                CollectorCommand::Attach { owner, name, table } => {
                    tracing::debug!(thread = %name, "slot table attached");
                    let new_table = self
                        .tables
                        .insert(
                            owner,
                            TrackedTable {
                                name,
                                alive: true,
                                table,
                            },
                        )
                        .is_none();
                    debug_assert!(new_table);
                }
                CollectorCommand::Detach {
                    owner,
                    externally_held,
                } => {
                    if externally_held {
                        if let Some(tracked) = self.tables.get_mut(&owner) {
                            tracked.alive = false;
                            tracing::debug!(
                                thread = %tracked.name,
                                "thread exited while its slot table is still referenced"
                            );
                        }
                    } else {
                        self.tables.remove(&owner);
                    }
                }
                CollectorCommand::Collect {
                    requested_at,
                    sweep,
                } => {
                    let info = self.shared.info.lock();
                    if !info.satisfies(requested_at, sweep) {
                        drop(info);
                        self.collect_and_notify(sweep);
                    }
                }
                CollectorCommand::ScheduleCollect => {
                    self.schedule_gc(Instant::now() + self.average_collection * 5);
                }
            }
        }
    }

    fn collect_and_notify(&mut self, sweep: bool) {
        self.next_gc = None;
        let started = Instant::now();
        let stats = self.collect(sweep);

        // Keep track of the average collection duration as a moving average,
        // weighted towards the current average.
        self.average_collection = (stats.duration + self.average_collection * 2) / 3;
        tracing::debug!(
            tables = stats.tables,
            keys_cleared = stats.keys_cleared,
            values_expunged = stats.values_expunged,
            duration = ?stats.duration,
            sweep,
            "collection finished"
        );

        let mut info = self.shared.info.lock();
        info.last_run = Some((started, stats));
        if sweep {
            info.last_sweep = Some((started, stats));
        }
        drop(info);
        self.shared.sync.notify_all();
        self.shared
            .signalled_collector
            .store(false, Ordering::Relaxed);
    }

    fn live_tables(&mut self) -> Vec<(OwnerId, Arc<Mutex<SlotTable>>)> {
        let mut live = Vec::with_capacity(self.tables.len());
        let mut dropped = Vec::new();
        for field in self.tables.iter() {
            match field.value.table.upgrade() {
                Some(table) => live.push((*field.key(), table)),
                None => dropped.push(*field.key()),
            }
        }
        for owner in dropped {
            if let Some(field) = self.tables.remove(&owner) {
                let tracked = field.value;
                tracing::debug!(thread = %tracked.name, alive = tracked.alive, "slot table released");
            }
        }
        live
    }

    fn collect(&mut self, sweep: bool) -> CollectionStats {
        let start = Instant::now();
        let mut pending = self.live_tables();
        let mut locked: Vec<ArcMutexGuard<RawMutex, SlotTable>> =
            Vec::with_capacity(pending.len());

        let mut lock_wait = (self.average_collection_locking / 8).max(Duration::from_millis(2));
        let mut rounds = 0_u8;
        while !pending.is_empty() {
            let force = rounds >= FORCE_LOCK_ROUNDS;
            let lock_deadline = Instant::now() + lock_wait;
            let mut index = pending.len();
            while index > 0 {
                index -= 1;
                let guard = if force {
                    Some(pending[index].1.lock_arc())
                } else {
                    pending[index].1.try_lock_arc_until(lock_deadline)
                };
                if let Some(guard) = guard {
                    pending.swap_remove(index);
                    locked.push(guard);
                }
            }
            if !pending.is_empty() {
                rounds += 1;
                lock_wait *= 2;
                self.rng.shuffle(&mut pending);
            }
        }

        let locking_time = start.elapsed();
        self.average_collection_locking = (locking_time + self.average_collection_locking * 2) / 3;

        let mut stats = CollectionStats {
            tables: locked.len(),
            ..CollectionStats::default()
        };
        let mut evicted = Vec::new();
        for table in &mut locked {
            stats.keys_cleared += table.clear_dead_keys();
            if sweep {
                stats.values_expunged += table.expunge_stale(&mut evicted);
            }
        }
        drop(locked);
        // Values may run arbitrary drop code, which must never happen while a
        // table is locked.
        drop(evicted);

        stats.duration = start.elapsed();
        stats
    }
}

struct GlobalCollector {
    sender: Sender<CollectorCommand>,
    info: Arc<CollectorInfo>,
}

impl GlobalCollector {
    fn get() -> &'static GlobalCollector {
        COLLECTOR.get_or_init(|| {
            let (sender, receiver) = flume::unbounded();
            let info = Arc::new(CollectorInfo {
                info: Mutex::new(CollectorInfoData::default()),
                sync: Condvar::new(),
                signalled_collector: AtomicBool::new(false),
            });
            thread::Builder::new()
                .name(String::from("collector"))
                .spawn({
                    let info = info.clone();
                    move || Collector::new(receiver, info).run()
                })
                .expect("error starting collector thread");
            GlobalCollector { sender, info }
        })
    }
}

static COLLECTOR: OnceLock<GlobalCollector> = OnceLock::new();

pub(crate) fn attach(owner: OwnerId, name: String, table: Weak<Mutex<SlotTable>>) {
    if let Err(err) = (CollectorCommand::Attach { owner, name, table }).send() {
        tracing::warn!(%err, "slot table could not be registered");
    }
}

pub(crate) fn detach(owner: OwnerId, externally_held: bool) {
    if let Some(collector) = COLLECTOR.get() {
        let _result = collector.sender.send(CollectorCommand::Detach {
            owner,
            externally_held,
        });
    }
}

/// Asks the collector to run a pass soon, unless one was already requested.
/// Does nothing if no table has ever been registered.
pub(crate) fn schedule_collect_if_needed() {
    let Some(collector) = COLLECTOR.get() else {
        return;
    };
    if collector
        .info
        .signalled_collector
        .compare_exchange(false, true, Ordering::Release, Ordering::Relaxed)
        .is_ok()
    {
        let _result = collector.sender.send(CollectorCommand::ScheduleCollect);
    }
}

fn request(sweep: bool) -> Result<CollectionStats, Error> {
    let collector = GlobalCollector::get();
    let requested_at = Instant::now();
    (CollectorCommand::Collect {
        requested_at,
        sweep,
    })
    .send()?;
    Ok(collector.info.wait_for_collection(requested_at, sweep))
}

/// Runs a collection pass and waits for it to finish.
///
/// The pass clears the keys of entries whose slot has been dropped on every
/// thread, making them stale. Their values stay retained until the entries
/// are expunged.
///
/// # Errors
///
/// Returns [`Error::CollectorStopped`] if the collector thread is gone.
pub fn collect() -> Result<CollectionStats, Error> {
    request(false)
}

/// Runs a collection pass that also expunges every stale entry of every
/// table, and waits for it to finish.
///
/// # Errors
///
/// Returns [`Error::CollectorStopped`] if the collector thread is gone.
pub fn sweep_all() -> Result<CollectionStats, Error> {
    request(true)
}
