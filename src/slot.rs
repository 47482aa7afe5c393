use std::cell::OnceCell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

use crate::collector::{self, OwnerId};
use crate::table::{SlotIdentity, SlotTable, Value};

thread_local! {
    static LOCAL_TABLE: OnceCell<LocalTable> = const { OnceCell::new() };
}

/// A slot table together with the name of the thread that created it.
///
/// Only the owning thread and [`TableHandle`]s hold this; the collector only
/// ever upgrades the inner table. Whoever drops the last reference releases
/// every value right away, even if a collection pass still holds the table.
struct SharedTable {
    name: String,
    table: Arc<Mutex<SlotTable>>,
}

impl Drop for SharedTable {
    fn drop(&mut self) {
        let mut evicted = Vec::new();
        self.table.lock().drain(&mut evicted);
        drop(evicted);
    }
}

/// The calling thread's table, created and registered on first use.
struct LocalTable {
    owner: OwnerId,
    shared: Arc<SharedTable>,
}

impl LocalTable {
    fn attach() -> Self {
        let current = thread::current();
        let name = current
            .name()
            .map_or_else(|| format!("{:?}", current.id()), String::from);
        let owner = OwnerId::unique();
        let table = Arc::new(Mutex::new(SlotTable::default()));
        collector::attach(owner, name.clone(), Arc::downgrade(&table));
        Self {
            owner,
            shared: Arc::new(SharedTable { name, table }),
        }
    }

    fn with<R>(f: impl FnOnce(&LocalTable) -> R) -> R {
        LOCAL_TABLE.with(|cell| f(cell.get_or_init(Self::attach)))
    }
}

impl Drop for LocalTable {
    fn drop(&mut self) {
        // Handles can only be created on this thread, so no new one can
        // appear while it exits.
        collector::detach(self.owner, Arc::strong_count(&self.shared) > 1);
    }
}

/// Runs `f` against the calling thread's table. Values evicted while the
/// table is locked are dropped after the lock is released.
fn with_local_table<R>(f: impl FnOnce(&mut SlotTable, &mut Vec<Value>) -> R) -> R {
    let mut evicted = Vec::new();
    let result = LocalTable::with(|local| {
        let mut table = local.shared.table.lock();
        f(&mut *table, &mut evicted)
    });
    drop(evicted);
    result
}

fn unbox<T: 'static>(value: Value) -> Option<T> {
    value.downcast::<T>().ok().map(|value| *value)
}

/// A storage cell holding one value per thread.
///
/// Every thread sees its own value: [`Slot::set`] on one thread never affects
/// what [`Slot::get`] returns on another. Clones of a slot share its identity,
/// the same way a shared `static` thread-local would.
///
/// Values are kept in a table owned by the thread that stored them. Dropping
/// every handle to a slot does *not* release the values it stored: they stay
/// in their threads' tables until a collection marks them stale and they are
/// then expunged, or until the owning thread exits. Use [`Slot::clear`] or
/// [`Slot::scoped`] to release a value deterministically.
pub struct Slot<T> {
    identity: Arc<SlotIdentity>,
    _t: PhantomData<fn() -> T>,
}

impl<T> Slot<T>
where
    T: Send + 'static,
{
    /// Returns a slot with a fresh identity.
    #[must_use]
    pub fn new() -> Self {
        Self {
            identity: Arc::new(SlotIdentity::unique()),
            _t: PhantomData,
        }
    }

    /// Stores `value` for the calling thread, returning the value it
    /// replaced.
    pub fn set(&self, value: T) -> Option<T> {
        with_local_table(|table, evicted| table.set(&self.identity, Box::new(value), evicted))
            .and_then(unbox)
    }

    /// Returns a clone of the calling thread's value.
    ///
    /// This never inserts. The clone is taken while the thread's table is
    /// locked, so `T::clone` must not access any slot.
    #[must_use]
    pub fn get(&self) -> Option<T>
    where
        T: Clone,
    {
        with_local_table(|table, evicted| {
            table
                .get(&self.identity, evicted)
                .and_then(|value| value.downcast_ref::<T>())
                .cloned()
        })
    }

    /// Returns the calling thread's value, storing `init()` first if the slot
    /// is empty.
    pub fn get_or_init(&self, init: impl FnOnce() -> T) -> T
    where
        T: Clone,
    {
        if let Some(value) = self.get() {
            return value;
        }
        let value = init();
        drop(self.set(value.clone()));
        value
    }

    /// Returns true if the calling thread has a value stored.
    #[must_use]
    pub fn is_set(&self) -> bool {
        with_local_table(|table, evicted| table.get(&self.identity, evicted).is_some())
    }

    /// Removes and returns the calling thread's value. Clearing an empty slot
    /// returns `None`.
    pub fn clear(&self) -> Option<T> {
        with_local_table(|table, evicted| table.remove(&self.identity, evicted)).and_then(unbox)
    }

    /// Stores `value` for the calling thread until the returned guard is
    /// dropped, at which point the slot is cleared, even when unwinding.
    pub fn scoped(&self, value: T) -> SlotGuard<'_, T> {
        drop(self.set(value));
        SlotGuard { slot: self }
    }
}

impl<T> Default for Slot<T>
where
    T: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self {
            identity: self.identity.clone(),
            _t: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("handles", &Arc::strong_count(&self.identity))
            .finish_non_exhaustive()
    }
}

/// Clears its [`Slot`] for the current thread when dropped.
#[must_use = "the slot is cleared as soon as the guard is dropped"]
pub struct SlotGuard<'a, T>
where
    T: Send + 'static,
{
    slot: &'a Slot<T>,
}

impl<T> SlotGuard<'_, T>
where
    T: Send + 'static,
{
    /// Returns a clone of the guarded value.
    #[must_use]
    pub fn get(&self) -> Option<T>
    where
        T: Clone,
    {
        self.slot.get()
    }
}

impl<T> Drop for SlotGuard<'_, T>
where
    T: Send + 'static,
{
    fn drop(&mut self) {
        drop(self.slot.clear());
    }
}

/// A snapshot of a slot table's occupancy.
///
/// `stale` only counts entries whose keys a collection has already cleared.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TableStats {
    /// Entries currently retained, stale or not.
    pub entries: usize,
    /// Entries whose slot is gone but whose value is still retained.
    pub stale: usize,
    /// Number of cells in the table.
    pub capacity: usize,
}

impl TableStats {
    fn of(table: &SlotTable) -> Self {
        Self {
            entries: table.len(),
            stale: table.stale_len(),
            capacity: table.capacity(),
        }
    }
}

/// Expunges every stale entry of the calling thread's table, returning how
/// many values were released.
pub fn expunge_stale() -> usize {
    with_local_table(|table, evicted| table.expunge_stale(evicted))
}

/// Returns the occupancy of the calling thread's table.
#[must_use]
pub fn local_stats() -> TableStats {
    with_local_table(|table, _| TableStats::of(table))
}

/// An external reference to one thread's slot table.
///
/// While a handle exists, the table and every value in it stay alive, even
/// after the thread that owns it has exited. Dropping the last handle of an
/// exited thread releases the values.
#[derive(Clone)]
pub struct TableHandle {
    shared: Arc<SharedTable>,
}

impl TableHandle {
    /// Returns a handle to the calling thread's table.
    #[must_use]
    pub fn current() -> Self {
        LocalTable::with(|local| Self {
            shared: local.shared.clone(),
        })
    }

    /// The name of the thread that created the table.
    #[must_use]
    pub fn owner_name(&self) -> &str {
        &self.shared.name
    }

    /// Returns the table's occupancy.
    #[must_use]
    pub fn stats(&self) -> TableStats {
        TableStats::of(&self.shared.table.lock())
    }

    /// Expunges every stale entry of the table, returning how many values
    /// were released.
    pub fn expunge_stale(&self) -> usize {
        let mut evicted = Vec::new();
        let expunged = self.shared.table.lock().expunge_stale(&mut evicted);
        drop(evicted);
        expunged
    }
}

impl fmt::Debug for TableHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableHandle")
            .field("owner", &self.shared.name)
            .field("stats", &self.stats())
            .finish()
    }
}
