//! Tracer trait for observing graph evaluation.
//!
//! This module defines the [`Tracer`] trait and related types. The default [`NoopTracer`]
//! costs nothing when observation is not needed, and [`LogTracer`] forwards every event to
//! the `tracing` crate.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use plug_flow::{ComputeResult, Runtime, SpanId, Tracer, TracerCellKey};
//!
//! #[derive(Default)]
//! struct ComputeCounter(AtomicUsize);
//!
//! impl Tracer for ComputeCounter {
//!     fn new_span_id(&self) -> SpanId {
//!         SpanId(0)
//!     }
//!
//!     fn on_compute_end(&self, _: SpanId, _: TracerCellKey, result: ComputeResult) {
//!         if result == ComputeResult::Computed {
//!             self.0.fetch_add(1, Ordering::Relaxed);
//!         }
//!     }
//! }
//!
//! let runtime = Runtime::builder().tracer(Arc::new(ComputeCounter::default())).build();
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use crate::cell::CellId;
use crate::fingerprint::Fingerprint;

/// Unique identifier for one value request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId(pub u64);

/// Identifies the cell and context an event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TracerCellKey {
    /// The cell.
    pub cell: CellId,
    /// Type name of the node owning the cell.
    pub node_type: &'static str,
    /// Fingerprint of the evaluation context.
    pub context: Fingerprint,
}

/// How a value request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComputeResult {
    /// The node computed the value on this thread.
    Computed,
    /// The value was already cached.
    CacheHit,
    /// Another thread computed the value while this one waited.
    Coalesced,
    /// The output is not cacheable and was computed directly.
    Uncached,
    /// The request failed.
    Error {
        /// Display form of the error.
        message: String,
    },
}

/// Observer of graph evaluation events.
///
/// All methods but [`new_span_id`](Tracer::new_span_id) have empty default implementations.
/// Implementations must be `Send + Sync`, as evaluation happens on many threads at once.
pub trait Tracer: Send + Sync + 'static {
    /// Generate a span id for a new value request.
    fn new_span_id(&self) -> SpanId;

    /// Called when a cell fingerprint has been produced (not for hash-cache hits).
    #[inline]
    fn on_hash(&self, _cell: TracerCellKey, _fingerprint: Fingerprint) {}

    /// Called once the value cache has been consulted for a cacheable output.
    #[inline]
    fn on_cache_check(&self, _span_id: SpanId, _cell: TracerCellKey, _hit: bool) {}

    /// Called before a node's compute runs.
    #[inline]
    fn on_compute_start(&self, _span_id: SpanId, _cell: TracerCellKey) {}

    /// Called when a value request ends.
    #[inline]
    fn on_compute_end(&self, _span_id: SpanId, _cell: TracerCellKey, _result: ComputeResult) {}

    /// Called when evaluation re-enters a cell it is already evaluating.
    #[inline]
    fn on_cycle_detected(&self, _path: Vec<TracerCellKey>) {}

    /// Called when the value cache evicts an entry to stay within its memory limit.
    #[inline]
    fn on_evicted(&self, _fingerprint: Fingerprint, _cost: usize) {}
}

static SPAN_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Tracer that discards all events. This is the default for [`Runtime`](crate::Runtime).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl Tracer for NoopTracer {
    #[inline(always)]
    fn new_span_id(&self) -> SpanId {
        SpanId(SPAN_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Tracer forwarding events to `tracing` at trace level, cycles at warn.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTracer;

impl Tracer for LogTracer {
    fn new_span_id(&self) -> SpanId {
        SpanId(SPAN_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    fn on_hash(&self, cell: TracerCellKey, fingerprint: Fingerprint) {
        tracing::trace!(cell = ?cell.cell, node_type = cell.node_type, %fingerprint, "hashed");
    }

    fn on_cache_check(&self, span_id: SpanId, cell: TracerCellKey, hit: bool) {
        tracing::trace!(span = span_id.0, cell = ?cell.cell, node_type = cell.node_type, hit, "cache check");
    }

    fn on_compute_start(&self, span_id: SpanId, cell: TracerCellKey) {
        tracing::trace!(span = span_id.0, cell = ?cell.cell, node_type = cell.node_type, "compute start");
    }

    fn on_compute_end(&self, span_id: SpanId, cell: TracerCellKey, result: ComputeResult) {
        match result {
            ComputeResult::Error { message } => {
                tracing::warn!(span = span_id.0, cell = ?cell.cell, node_type = cell.node_type, error = %message, "compute failed")
            }
            result => {
                tracing::trace!(span = span_id.0, cell = ?cell.cell, node_type = cell.node_type, ?result, "compute end")
            }
        }
    }

    fn on_cycle_detected(&self, path: Vec<TracerCellKey>) {
        let cells: Vec<CellId> = path.iter().map(|key| key.cell).collect();
        tracing::warn!(?cells, "evaluation cycle detected");
    }

    fn on_evicted(&self, fingerprint: Fingerprint, cost: usize) {
        tracing::trace!(%fingerprint, cost, "evicted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    struct CountingTracer {
        start_count: AtomicUsize,
        end_count: AtomicUsize,
    }

    impl Tracer for CountingTracer {
        fn new_span_id(&self) -> SpanId {
            SpanId(1)
        }

        fn on_compute_start(&self, _span_id: SpanId, _cell: TracerCellKey) {
            self.start_count.fetch_add(1, Ordering::Relaxed);
        }

        fn on_compute_end(&self, _span_id: SpanId, _cell: TracerCellKey, _result: ComputeResult) {
            self.end_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn key() -> TracerCellKey {
        TracerCellKey {
            cell: CellId { index: 0, serial: 1 },
            node_type: "Test",
            context: Fingerprint::default(),
        }
    }

    #[test]
    fn test_noop_tracer_span_id() {
        let tracer = NoopTracer;
        assert_ne!(tracer.new_span_id(), tracer.new_span_id());
    }

    #[test]
    fn test_counting_tracer() {
        let tracer = CountingTracer {
            start_count: AtomicUsize::new(0),
            end_count: AtomicUsize::new(0),
        };

        tracer.on_compute_start(SpanId(1), key());
        tracer.on_compute_start(SpanId(2), key());
        tracer.on_compute_end(SpanId(1), key(), ComputeResult::Computed);

        assert_eq!(tracer.start_count.load(Ordering::Relaxed), 2);
        assert_eq!(tracer.end_count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_tracer_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NoopTracer>();
        assert_send_sync::<LogTracer>();
        assert_send_sync::<Arc<dyn Tracer>>();
    }
}
