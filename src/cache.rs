//! Process-wide caches shared by every evaluation of a [`Runtime`](crate::Runtime).

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::{Condvar, Mutex};

use crate::cell::CellId;
use crate::error::GraphError;
use crate::fingerprint::Fingerprint;
use crate::graph::GraphId;
use crate::tracer::Tracer;
use crate::value::Value;

/// How a value was obtained from the [`ValueCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Found ready in the cache.
    Hit,
    /// Another thread was computing it; this thread waited for the result.
    Coalesced,
    /// Computed by this thread.
    Computed,
}

enum SlotState {
    Pending,
    Ready(Value),
    Failed(GraphError),
}

/// Rendezvous between the thread computing a fingerprint and the threads waiting for it.
struct Slot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl Slot {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Pending),
            ready: Condvar::new(),
        }
    }

    fn fulfil(&self, state: SlotState) {
        *self.state.lock() = state;
        self.ready.notify_all();
    }

    fn wait(&self) -> Result<Value, GraphError> {
        let mut state = self.state.lock();
        loop {
            match &*state {
                SlotState::Pending => self.ready.wait(&mut state),
                SlotState::Ready(value) => return Ok(value.clone()),
                SlotState::Failed(err) => return Err(err.clone()),
            }
        }
    }
}

enum Entry {
    Pending(Arc<Slot>),
    Ready { value: Value, cost: usize },
}

struct ValueCacheInner {
    entries: LruCache<Fingerprint, Entry>,
    memory_usage: usize,
}

/// Fingerprint-keyed value cache with at most one computation per fingerprint in flight.
///
/// Lookups and insertions are atomic insert-or-wait: the first thread to miss a fingerprint
/// computes it while later threads block until the result is published. Ready values are
/// evicted least-recently-used first once their total footprint exceeds the memory limit;
/// in-flight entries are never evicted.
pub struct ValueCache {
    inner: Mutex<ValueCacheInner>,
    memory_limit: usize,
    tracer: Arc<dyn Tracer>,
}

/// Marks a pending slot as abandoned if the computing thread unwinds.
struct PendingGuard<'a> {
    cache: &'a ValueCache,
    fingerprint: Fingerprint,
    slot: Arc<Slot>,
    armed: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.slot.fulfil(SlotState::Failed(GraphError::Abandoned));
            self.cache.remove_pending(self.fingerprint, &self.slot);
        }
    }
}

impl ValueCache {
    pub(crate) fn new(memory_limit: usize, tracer: Arc<dyn Tracer>) -> Self {
        Self {
            inner: Mutex::new(ValueCacheInner {
                entries: LruCache::unbounded(),
                memory_usage: 0,
            }),
            memory_limit,
            tracer,
        }
    }

    /// Return the value stored under `fingerprint`, computing it with `compute` on a miss.
    ///
    /// Failures are handed to every waiting thread and are not cached.
    pub fn get_or_compute(
        &self,
        fingerprint: Fingerprint,
        compute: impl FnOnce() -> Result<Value, GraphError>,
    ) -> Result<(Value, CacheOutcome), GraphError> {
        let slot = {
            let mut inner = self.inner.lock();
            let existing = match inner.entries.get(&fingerprint) {
                Some(Entry::Ready { value, .. }) => Some(Ok(value.clone())),
                Some(Entry::Pending(slot)) => Some(Err(Arc::clone(slot))),
                None => None,
            };
            match existing {
                Some(Ok(value)) => return Ok((value, CacheOutcome::Hit)),
                Some(Err(pending)) => {
                    drop(inner);
                    return pending.wait().map(|value| (value, CacheOutcome::Coalesced));
                }
                None => {
                    let slot = Arc::new(Slot::new());
                    inner
                        .entries
                        .put(fingerprint, Entry::Pending(Arc::clone(&slot)));
                    slot
                }
            }
        };

        let mut guard = PendingGuard {
            cache: self,
            fingerprint,
            slot: Arc::clone(&slot),
            armed: true,
        };
        let result = compute();
        guard.armed = false;

        match &result {
            Ok(value) => {
                slot.fulfil(SlotState::Ready(value.clone()));
                self.store(fingerprint, &slot, value.clone());
            }
            Err(err) => {
                slot.fulfil(SlotState::Failed(err.clone()));
                self.remove_pending(fingerprint, &slot);
            }
        }

        result.map(|value| (value, CacheOutcome::Computed))
    }

    fn store(&self, fingerprint: Fingerprint, slot: &Arc<Slot>, value: Value) {
        if self.memory_limit == 0 {
            self.remove_pending(fingerprint, slot);
            return;
        }

        let mut inner = self.inner.lock();
        let ours = matches!(
            inner.entries.peek(&fingerprint),
            Some(Entry::Pending(pending)) if Arc::ptr_eq(pending, slot)
        );
        if !ours {
            return;
        }

        let cost = value.memory_usage();
        inner.entries.put(fingerprint, Entry::Ready { value, cost });
        inner.memory_usage += cost;
        self.evict(&mut inner);
    }

    fn remove_pending(&self, fingerprint: Fingerprint, slot: &Arc<Slot>) {
        let mut inner = self.inner.lock();
        if matches!(
            inner.entries.peek(&fingerprint),
            Some(Entry::Pending(pending)) if Arc::ptr_eq(pending, slot)
        ) {
            inner.entries.pop(&fingerprint);
        }
    }

    fn evict(&self, inner: &mut ValueCacheInner) {
        while inner.memory_usage > self.memory_limit {
            let victim = inner
                .entries
                .iter()
                .rev()
                .find(|(_, entry)| matches!(entry, Entry::Ready { .. }))
                .map(|(fingerprint, _)| *fingerprint);
            let Some(victim) = victim else {
                break;
            };
            if let Some(Entry::Ready { cost, .. }) = inner.entries.pop(&victim) {
                inner.memory_usage -= cost;
                tracing::debug!(%victim, cost, "evicted cached value");
                self.tracer.on_evicted(victim, cost);
            }
        }
    }

    /// Returns true if a ready value is stored under `fingerprint`.
    pub fn contains(&self, fingerprint: Fingerprint) -> bool {
        matches!(
            self.inner.lock().entries.peek(&fingerprint),
            Some(Entry::Ready { .. })
        )
    }

    /// Number of ready values.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|(_, entry)| matches!(entry, Entry::Ready { .. }))
            .count()
    }

    /// Returns true if no value is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total footprint of stored values in bytes.
    pub fn memory_usage(&self) -> usize {
        self.inner.lock().memory_usage
    }

    /// Configured memory budget in bytes.
    pub fn memory_limit(&self) -> usize {
        self.memory_limit
    }

    /// Drop every ready value. In-flight computations are unaffected.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        let ready: Vec<Fingerprint> = inner
            .entries
            .iter()
            .filter(|(_, entry)| matches!(entry, Entry::Ready { .. }))
            .map(|(fingerprint, _)| *fingerprint)
            .collect();
        for fingerprint in ready {
            inner.entries.pop(&fingerprint);
        }
        inner.memory_usage = 0;
    }
}

/// Key of a memoized fingerprint: the cell, its edit count and the evaluation context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct HashKey {
    pub graph: GraphId,
    pub cell: CellId,
    pub dirty_count: u64,
    pub context: Fingerprint,
}

/// Bounded memo of cell fingerprints. Edits invalidate entries by bumping dirty counts.
pub(crate) struct HashCache {
    entries: Option<Mutex<LruCache<HashKey, Fingerprint>>>,
}

impl HashCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity).map(|capacity| Mutex::new(LruCache::new(capacity))),
        }
    }

    pub fn get(&self, key: &HashKey) -> Option<Fingerprint> {
        self.entries.as_ref()?.lock().get(key).copied()
    }

    pub fn insert(&self, key: HashKey, fingerprint: Fingerprint) {
        if let Some(entries) = &self.entries {
            entries.lock().put(key, fingerprint);
        }
    }

    pub fn clear(&self) {
        if let Some(entries) = &self.entries {
            entries.lock().clear();
        }
    }
}
