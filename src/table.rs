//! The per-thread store behind [`Slot`](crate::Slot).
//!
//! A [`SlotTable`] is an open-addressing hash table with linear probing. Each
//! entry holds a weak reference to the identity of the slot that owns it and
//! a strong reference to the stored value. Once every handle to a slot is
//! dropped and a collection pass has run, the entry's key is cleared and the
//! entry becomes *stale*: its value is still retained, and is only released
//! when the entry is expunged.
//!
//! Expunging happens:
//!
//! - along the probe run whenever a lookup, insert or removal walks past a
//!   stale entry,
//! - during the short opportunistic scan that follows every insert,
//! - during a rehash, and
//! - on an explicit [`SlotTable::expunge_stale`] sweep.
//!
//! The opportunistic scan starts at the inserted key's home index and only
//! inspects about log2(n) cells, so stale entries far from where live slots
//! hash to may never be reached.

use std::any::Any;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use crate::collector;

pub(crate) type Value = Box<dyn Any + Send>;

const INITIAL_CAPACITY: usize = 16;

/// The identity shared by all clones of one slot.
pub(crate) struct SlotIdentity {
    hash: u32,
}

impl SlotIdentity {
    /// Consecutive hashes are spaced by the golden-ratio increment, spreading
    /// consecutively created slots across power-of-two tables.
    const HASH_INCREMENT: u32 = 0x61c8_8647;

    pub(crate) fn unique() -> Self {
        static NEXT_HASH: AtomicU32 = AtomicU32::new(0);
        Self {
            hash: NEXT_HASH.fetch_add(Self::HASH_INCREMENT, Ordering::Relaxed),
        }
    }

    #[cfg(test)]
    fn with_hash(hash: u32) -> Self {
        Self { hash }
    }
}

impl Drop for SlotIdentity {
    fn drop(&mut self) {
        collector::schedule_collect_if_needed();
    }
}

struct Entry {
    key: Option<Weak<SlotIdentity>>,
    hash: u32,
    value: Value,
}

impl Entry {
    fn is_stale(&self) -> bool {
        self.key.is_none()
    }

    fn is_key(&self, key: &Arc<SlotIdentity>) -> bool {
        self.key
            .as_ref()
            .is_some_and(|weak| ptr::eq(weak.as_ptr(), Arc::as_ptr(key)))
    }
}

enum Probe {
    Empty,
    Found,
    Stale,
    Occupied,
}

enum Located {
    Found(usize),
    Vacant(usize),
}

pub(crate) struct SlotTable {
    cells: Vec<Option<Entry>>,
    len: usize,
    threshold: usize,
}

impl Default for SlotTable {
    fn default() -> Self {
        Self::with_capacity(INITIAL_CAPACITY)
    }
}

impl SlotTable {
    fn with_capacity(capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two());
        Self {
            cells: (0..capacity).map(|_| None).collect(),
            len: 0,
            threshold: capacity * 2 / 3,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn stale_len(&self) -> usize {
        self.cells
            .iter()
            .flatten()
            .filter(|entry| entry.is_stale())
            .count()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.cells.len()
    }

    fn home(&self, hash: u32) -> usize {
        hash as usize & (self.cells.len() - 1)
    }

    fn next(&self, index: usize) -> usize {
        (index + 1) & (self.cells.len() - 1)
    }

    fn probe(&self, index: usize, key: &Arc<SlotIdentity>) -> Probe {
        match &self.cells[index] {
            None => Probe::Empty,
            Some(entry) if entry.is_key(key) => Probe::Found,
            Some(entry) if entry.is_stale() => Probe::Stale,
            Some(_) => Probe::Occupied,
        }
    }

    /// Walks the probe run of `key`, expunging any stale entry met on the way
    /// and restarting from the home index afterwards, since expunging may
    /// have moved entries of the run.
    fn locate(&mut self, key: &Arc<SlotIdentity>, evicted: &mut Vec<Value>) -> Located {
        'restart: loop {
            let mut index = self.home(key.hash);
            loop {
                match self.probe(index, key) {
                    Probe::Empty => return Located::Vacant(index),
                    Probe::Found => return Located::Found(index),
                    Probe::Stale => {
                        self.expunge_stale_entry(index, evicted);
                        continue 'restart;
                    }
                    Probe::Occupied => index = self.next(index),
                }
            }
        }
    }

    pub(crate) fn get(
        &mut self,
        key: &Arc<SlotIdentity>,
        evicted: &mut Vec<Value>,
    ) -> Option<&Value> {
        match self.locate(key, evicted) {
            Located::Found(index) => self.cells[index].as_ref().map(|entry| &entry.value),
            Located::Vacant(_) => None,
        }
    }

    /// Stores `value` for `key`, returning the value it replaced.
    pub(crate) fn set(
        &mut self,
        key: &Arc<SlotIdentity>,
        value: Value,
        evicted: &mut Vec<Value>,
    ) -> Option<Value> {
        match self.locate(key, evicted) {
            Located::Found(index) => self.cells[index]
                .as_mut()
                .map(|entry| mem::replace(&mut entry.value, value)),
            Located::Vacant(index) => {
                self.cells[index] = Some(Entry {
                    key: Some(Arc::downgrade(key)),
                    hash: key.hash,
                    value,
                });
                self.len += 1;
                if !self.clean_some_slots(index, self.len, evicted) && self.len >= self.threshold {
                    self.rehash(evicted);
                }
                None
            }
        }
    }

    pub(crate) fn remove(
        &mut self,
        key: &Arc<SlotIdentity>,
        evicted: &mut Vec<Value>,
    ) -> Option<Value> {
        let Located::Found(index) = self.locate(key, evicted) else {
            return None;
        };
        let entry = self.cells[index].take()?;
        self.len -= 1;
        self.reseat_run(index, evicted);
        Some(entry.value)
    }

    /// Clears the key of every entry whose slot has no live handle left,
    /// returning how many keys were cleared.
    pub(crate) fn clear_dead_keys(&mut self) -> usize {
        let mut cleared = 0;
        for entry in self.cells.iter_mut().flatten() {
            if entry.key.as_ref().is_some_and(|key| key.strong_count() == 0) {
                entry.key = None;
                cleared += 1;
            }
        }
        cleared
    }

    /// Expunges every stale entry, returning how many were removed.
    pub(crate) fn expunge_stale(&mut self, evicted: &mut Vec<Value>) -> usize {
        let before = evicted.len();
        for index in 0..self.cells.len() {
            if matches!(&self.cells[index], Some(entry) if entry.is_stale()) {
                self.expunge_stale_entry(index, evicted);
            }
        }
        evicted.len() - before
    }

    /// Removes the stale entry at `stale` and re-places the rest of its run.
    /// Returns the index of the empty cell that ended the run.
    fn expunge_stale_entry(&mut self, stale: usize, evicted: &mut Vec<Value>) -> usize {
        if let Some(entry) = self.cells[stale].take() {
            evicted.push(entry.value);
            self.len -= 1;
        }
        self.reseat_run(stale, evicted)
    }

    /// Walks the run following the now-empty cell at `vacated`, dropping stale
    /// entries and moving live ones closer to their home index.
    fn reseat_run(&mut self, vacated: usize, evicted: &mut Vec<Value>) -> usize {
        let mut index = self.next(vacated);
        while let Some(entry) = &self.cells[index] {
            let (stale, hash) = (entry.is_stale(), entry.hash);
            if stale {
                if let Some(entry) = self.cells[index].take() {
                    evicted.push(entry.value);
                    self.len -= 1;
                }
            } else {
                let home = self.home(hash);
                if home != index {
                    let moved = self.cells[index].take();
                    let mut target = home;
                    while self.cells[target].is_some() {
                        target = self.next(target);
                    }
                    self.cells[target] = moved;
                }
            }
            index = self.next(index);
        }
        index
    }

    /// Scans about log2(`scan`) cells after `index`, widening the scan to the
    /// full capacity whenever a stale entry is found. Returns true if any
    /// entry was expunged.
    fn clean_some_slots(
        &mut self,
        mut index: usize,
        mut scan: usize,
        evicted: &mut Vec<Value>,
    ) -> bool {
        let mut removed = false;
        loop {
            index = self.next(index);
            if matches!(&self.cells[index], Some(entry) if entry.is_stale()) {
                scan = self.cells.len();
                removed = true;
                index = self.expunge_stale_entry(index, evicted);
            }
            scan >>= 1;
            if scan == 0 {
                break;
            }
        }
        removed
    }

    /// Empties the table, moving every value, stale or not, into `evicted`.
    pub(crate) fn drain(&mut self, evicted: &mut Vec<Value>) {
        let old = mem::take(self);
        evicted.extend(old.cells.into_iter().flatten().map(|entry| entry.value));
    }

    fn rehash(&mut self, evicted: &mut Vec<Value>) {
        self.expunge_stale(evicted);
        if self.len >= self.threshold - self.threshold / 4 {
            self.resize(evicted);
        }
    }

    fn resize(&mut self, evicted: &mut Vec<Value>) {
        let capacity = self.cells.len() * 2;
        let old = mem::replace(self, Self::with_capacity(capacity));
        for entry in old.cells.into_iter().flatten() {
            if entry.is_stale() {
                evicted.push(entry.value);
                continue;
            }
            let mut index = self.home(entry.hash);
            while self.cells[index].is_some() {
                index = self.next(index);
            }
            self.cells[index] = Some(entry);
            self.len += 1;
        }
    }
}

#[cfg(test)]
fn key(hash: u32) -> Arc<SlotIdentity> {
    Arc::new(SlotIdentity::with_hash(hash))
}

#[cfg(test)]
fn stored(table: &mut SlotTable, key: &Arc<SlotIdentity>) -> Option<u32> {
    let mut evicted = Vec::new();
    table
        .get(key, &mut evicted)
        .and_then(|value| value.downcast_ref::<u32>())
        .copied()
}

#[test]
fn set_get_replace_remove() {
    let mut table = SlotTable::default();
    let mut evicted = Vec::new();
    let slot = key(3);

    assert!(table.set(&slot, Box::new(1_u32), &mut evicted).is_none());
    assert_eq!(stored(&mut table, &slot), Some(1));

    let previous = table.set(&slot, Box::new(2_u32), &mut evicted).unwrap();
    assert_eq!(previous.downcast_ref::<u32>(), Some(&1));
    assert_eq!(stored(&mut table, &slot), Some(2));
    assert_eq!(table.len(), 1);

    let removed = table.remove(&slot, &mut evicted).unwrap();
    assert_eq!(removed.downcast_ref::<u32>(), Some(&2));
    assert!(table.remove(&slot, &mut evicted).is_none());
    assert_eq!(table.len(), 0);
    assert!(evicted.is_empty());
}

#[test]
fn dead_keys_become_stale_only_after_clearing() {
    let mut table = SlotTable::default();
    let mut evicted = Vec::new();
    let slot = key(5);
    table.set(&slot, Box::new(7_u32), &mut evicted);
    drop(slot);

    assert_eq!(table.stale_len(), 0);
    assert_eq!(table.expunge_stale(&mut evicted), 0);
    assert_eq!(table.len(), 1);

    assert_eq!(table.clear_dead_keys(), 1);
    assert_eq!(table.stale_len(), 1);
    assert_eq!(table.len(), 1);

    assert_eq!(table.expunge_stale(&mut evicted), 1);
    assert_eq!(table.len(), 0);
    assert_eq!(evicted.len(), 1);
}

#[test]
fn removal_keeps_colliding_entries_reachable() {
    let mut table = SlotTable::default();
    let mut evicted = Vec::new();
    // All three share home index 1 in a 16-cell table.
    let keys = [key(1), key(17), key(33)];
    for (value, slot) in (0_u32..).zip(&keys) {
        table.set(slot, Box::new(value), &mut evicted);
    }

    table.remove(&keys[0], &mut evicted);
    assert_eq!(stored(&mut table, &keys[1]), Some(1));
    assert_eq!(stored(&mut table, &keys[2]), Some(2));
    assert_eq!(table.len(), 2);
}

#[test]
fn lookup_miss_expunges_its_run() {
    let mut table = SlotTable::default();
    let mut evicted = Vec::new();
    let dead = key(2);
    let live = key(18);
    table.set(&dead, Box::new(0_u32), &mut evicted);
    table.set(&live, Box::new(1_u32), &mut evicted);
    drop(dead);
    table.clear_dead_keys();

    assert_eq!(stored(&mut table, &live), Some(1));
    assert_eq!(table.stale_len(), 0);
    assert_eq!(table.len(), 1);
}

#[test]
fn shared_probe_never_reaches_distant_stale_entries() {
    let mut table = SlotTable::default();
    let mut evicted = Vec::new();
    let dead = (1..=8).map(key).collect::<Vec<_>>();
    for slot in &dead {
        table.set(slot, Box::new(0_u32), &mut evicted);
    }
    drop(dead);
    assert_eq!(table.clear_dead_keys(), 8);

    // The probe's scan after inserting at 12 only covers cells 13, 14, 15
    // and 0.
    let probe = key(12);
    table.set(&probe, Box::new(0_u32), &mut evicted);
    for _ in 0..50 {
        assert_eq!(stored(&mut table, &probe), Some(0));
    }
    assert_eq!(table.stale_len(), 8);
    assert!(evicted.is_empty());

    // A fresh slot landing right before the stale run reaches all of it.
    let fresh = key(16);
    table.set(&fresh, Box::new(0_u32), &mut evicted);
    assert_eq!(table.stale_len(), 0);
    assert_eq!(evicted.len(), 8);
    assert_eq!(table.len(), 2);
}

#[test]
fn table_grows_past_threshold() {
    let mut table = SlotTable::default();
    let mut evicted = Vec::new();
    let keys = (0..20).map(|_| Arc::new(SlotIdentity::unique())).collect::<Vec<_>>();
    for (value, slot) in (0_u32..).zip(&keys) {
        table.set(slot, Box::new(value), &mut evicted);
    }
    assert_eq!(table.capacity(), 32);
    assert_eq!(table.len(), 20);
    for (value, slot) in (0_u32..).zip(&keys) {
        assert_eq!(stored(&mut table, slot), Some(value));
    }
}

#[test]
fn rehash_expunges_before_growing() {
    let mut table = SlotTable::default();
    let mut evicted = Vec::new();
    let dead = (1..=9).map(key).collect::<Vec<_>>();
    for slot in &dead {
        table.set(slot, Box::new(0_u32), &mut evicted);
    }
    drop(dead);
    assert_eq!(table.clear_dead_keys(), 9);

    // Inserting at 11 reaches the threshold of 10, and the scan that follows
    // only covers cells 12 to 15. The rehash expunges the stale run and
    // leaves too few entries to grow.
    let live = key(11);
    table.set(&live, Box::new(1_u32), &mut evicted);
    assert_eq!(evicted.len(), 9);
    assert_eq!(table.capacity(), 16);
    assert_eq!(table.len(), 1);
    assert_eq!(table.stale_len(), 0);
    assert_eq!(stored(&mut table, &live), Some(1));
}

#[test]
fn drain_moves_out_every_value() {
    let mut table = SlotTable::default();
    let mut evicted = Vec::new();
    let live = key(1);
    let dead = key(2);
    table.set(&live, Box::new(0_u32), &mut evicted);
    table.set(&dead, Box::new(1_u32), &mut evicted);
    drop(dead);
    table.clear_dead_keys();

    table.drain(&mut evicted);
    assert_eq!(evicted.len(), 2);
    assert_eq!(table.len(), 0);
    assert_eq!(stored(&mut table, &live), None);
}
