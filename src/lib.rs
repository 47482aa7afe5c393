//! Observes how values stored in per-thread slots linger on pooled worker
//! threads.
//!
//! A [`Slot`] holds one value per thread. Values live in a table owned by the
//! thread that stored them, keyed by a weak reference to the slot. Dropping a
//! slot therefore does not release its values: a background collection first
//! has to notice the slot is gone and mark its entries stale, and the stale
//! entries then have to be expunged, which normally only happens as a side
//! effect of later slot accesses on the same thread. On long-lived pool
//! workers that may be never.
//!
//! [`Payload`]s record their creation and release on a [`RetentionCounter`],
//! which is what the probes in [`scenario`] observe:
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use lingering::{Payload, RetentionCounter, Slot};
//!
//! let counter = RetentionCounter::new();
//! let slot = Slot::new();
//! slot.set(Arc::new(Payload::new(1024, &counter)));
//! assert_eq!(counter.outstanding(), 1);
//!
//! // Clearing releases the value immediately.
//! slot.clear();
//! assert_eq!(counter.outstanding(), 0);
//! ```

mod collector;
pub mod config;
mod error;
pub mod observer;
mod payload;
pub mod scenario;
mod slot;
mod table;

pub use collector::{collect, sweep_all, CollectionStats};
pub use config::{ExpungeStrategy, ProbeConfig};
pub use error::Error;
pub use lingering_pool::{PoolBuilder, PoolError, WorkerPool};
pub use observer::{Observation, RetentionObserver, Verdict};
pub use payload::{Payload, RetentionCounter, DEFAULT_PAYLOAD_SIZE};
pub use scenario::{
    best_practice, bounded_leak, interactive, shared_slot, unbounded_leak, ProbeReport, Scenario,
};
pub use slot::{expunge_stale, local_stats, Slot, SlotGuard, TableHandle, TableStats};
