use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;

/// The default size of a [`Payload`]: 5 MiB.
pub const DEFAULT_PAYLOAD_SIZE: usize = 5 << 20;

#[derive(Default)]
struct Counts {
    created: CachePadded<AtomicU64>,
    released: CachePadded<AtomicU64>,
}

/// Tallies payload creations and releases.
///
/// Clones share the same tallies. The released count never decreases and is
/// incremented exactly once per dropped [`Payload`].
#[derive(Clone, Default)]
pub struct RetentionCounter(Arc<Counts>);

impl RetentionCounter {
    /// Returns a counter with both tallies at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one creation, returning the new total.
    pub fn record_created(&self) -> u64 {
        self.0.created.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Records one release, returning the new total.
    pub fn record_released(&self) -> u64 {
        self.0.released.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// The number of payloads created so far.
    #[must_use]
    pub fn created(&self) -> u64 {
        self.0.created.load(Ordering::Acquire)
    }

    /// The number of payloads released so far.
    #[must_use]
    pub fn released(&self) -> u64 {
        self.0.released.load(Ordering::Acquire)
    }

    /// The number of payloads created but not yet released.
    #[must_use]
    pub fn outstanding(&self) -> u64 {
        // Read released first: a release observed here always belongs to a
        // creation that is visible afterwards.
        let released = self.released();
        self.created().saturating_sub(released)
    }
}

impl fmt::Debug for RetentionCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetentionCounter")
            .field("created", &self.created())
            .field("released", &self.released())
            .finish()
    }
}

/// A large buffer standing in for arbitrary per-thread cached data.
///
/// Dropping a payload records its release on the [`RetentionCounter`] it was
/// created with.
pub struct Payload {
    id: u64,
    data: Box<[u8]>,
    counter: RetentionCounter,
}

impl Payload {
    /// Allocates a zeroed payload of `size` bytes and records its creation.
    #[must_use]
    pub fn new(size: usize, counter: &RetentionCounter) -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);

        let payload = Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            data: vec![0; size].into_boxed_slice(),
            counter: counter.clone(),
        };
        payload.counter.record_created();
        payload
    }

    /// The process-unique id of this payload.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// The size of the buffer in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The buffer contents.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("id", &self.id)
            .field("len", &self.data.len())
            .finish()
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "payload#{}", self.id)
    }
}

impl Drop for Payload {
    fn drop(&mut self) {
        let released = self.counter.record_released();
        tracing::debug!(payload = self.id, released, "payload released");
    }
}

#[test]
fn counter_tracks_payload_lifetimes() {
    let counter = RetentionCounter::new();
    let first = Payload::new(16, &counter);
    let second = Payload::new(16, &counter);
    assert_ne!(first.id(), second.id());
    assert_eq!(first.len(), 16);
    assert!(first.as_bytes().iter().all(|byte| *byte == 0));
    assert_eq!(counter.created(), 2);
    assert_eq!(counter.outstanding(), 2);

    drop(first);
    assert_eq!(counter.released(), 1);
    assert_eq!(counter.outstanding(), 1);

    drop(second);
    assert_eq!(counter.released(), 2);
    assert_eq!(counter.outstanding(), 0);
}

#[test]
fn shared_payload_is_released_once() {
    let counter = RetentionCounter::new();
    let payload = Arc::new(Payload::new(8, &counter));
    let clones = (0..4).map(|_| payload.clone()).collect::<Vec<_>>();
    drop(payload);
    assert_eq!(counter.released(), 0);
    drop(clones);
    assert_eq!(counter.released(), 1);
    assert_eq!(counter.created(), 1);
}
