//! # Update Metrics
//!
//! Three counters describing a column's mutation history:
//!
//! - `no_used_bytes_size`: bytes abandoned by expand updates (old delta
//!   blocks are never reclaimed, only measured; this is the measurement)
//! - `inplace_update_count`
//! - `expand_update_count`
//!
//! The counters live *inside the growth arena* as its very first record
//! (offset 0, 24 bytes, three LE `u64`s), so they persist with the arena
//! and survive reopen. The record is materialized lazily the first time
//! any counter has to move; if the arena already holds data when first
//! probed, the record at offset 0 *is* the metrics: by contract the
//! metrics record is always the arena's first allocation, or absent.
//!
//! Counters are mutated through `AtomicU64` views into the arena chunk
//! (chunk bases are 8-aligned, and offset 0 sits at a chunk base), so the
//! single updating thread and any number of snapshot readers need no lock.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use eyre::Result;

use crate::arena::ExpandArena;
use crate::config::METRICS_RECORD_SIZE;

const NO_USED_BYTES: usize = 0;
const INPLACE_COUNT: usize = 1;
const EXPAND_COUNT: usize = 2;

/// A point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateMetrics {
    /// Bytes abandoned in the main blob or the arena by expand updates.
    pub no_used_bytes_size: u64,
    /// Updates satisfied by rewriting a single packed field.
    pub inplace_update_count: u64,
    /// Updates that allocated a replacement block in the arena.
    pub expand_update_count: u64,
}

/// Live view of the metrics record at arena offset 0.
pub(crate) struct MetricsHandle {
    counters: NonNull<AtomicU64>,
}

// SAFETY: the handle points at three AtomicU64 slots inside arena chunk
// storage, which is 8-aligned, never moved, and never freed while the
// owning reader holds its Arc to the arena. All access goes through
// atomic operations.
unsafe impl Send for MetricsHandle {}
unsafe impl Sync for MetricsHandle {}

impl MetricsHandle {
    /// Materialize (or adopt) the record at arena offset 0.
    pub(crate) fn attach(arena: &ExpandArena) -> Result<Self> {
        if arena.is_empty() {
            let offset = arena.append(&[0u8; METRICS_RECORD_SIZE])?;
            debug_assert_eq!(offset, 0, "metrics must be the arena's first allocation");
        }
        let ptr = arena.resolve(0, METRICS_RECORD_SIZE)?;
        Ok(Self { counters: ptr.cast() })
    }

    #[inline]
    fn counter(&self, index: usize) -> &AtomicU64 {
        debug_assert!(index < METRICS_RECORD_SIZE / 8);
        // SAFETY: see the Send/Sync justification; index is within the
        // 24-byte record.
        unsafe { &*self.counters.as_ptr().add(index) }
    }

    pub(crate) fn add_no_used_bytes(&self, bytes: u64) {
        self.counter(NO_USED_BYTES).fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn inc_inplace(&self) {
        self.counter(INPLACE_COUNT).fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_expand(&self) {
        self.counter(EXPAND_COUNT).fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> UpdateMetrics {
        UpdateMetrics {
            no_used_bytes_size: self.counter(NO_USED_BYTES).load(Ordering::Relaxed),
            inplace_update_count: self.counter(INPLACE_COUNT).load(Ordering::Relaxed),
            expand_update_count: self.counter(EXPAND_COUNT).load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_is_first_arena_allocation() {
        let arena = ExpandArena::default();
        let handle = MetricsHandle::attach(&arena).unwrap();
        assert_eq!(arena.len(), METRICS_RECORD_SIZE as u64);

        handle.inc_inplace();
        handle.inc_expand();
        handle.add_no_used_bytes(100);
        assert_eq!(
            handle.snapshot(),
            UpdateMetrics {
                no_used_bytes_size: 100,
                inplace_update_count: 1,
                expand_update_count: 1
            }
        );
        // Materialization happens once; the arena does not grow again.
        assert_eq!(arena.len(), METRICS_RECORD_SIZE as u64);
    }

    #[test]
    fn attach_adopts_existing_record() {
        let arena = ExpandArena::default();
        let first = MetricsHandle::attach(&arena).unwrap();
        first.inc_expand();
        first.add_no_used_bytes(42);
        drop(first);

        let second = MetricsHandle::attach(&arena).unwrap();
        let snap = second.snapshot();
        assert_eq!(snap.expand_update_count, 1);
        assert_eq!(snap.no_used_bytes_size, 42);
    }
}
