// ========================================================================================
//                      Per-worker slot: published buffer + freshness
// ========================================================================================
//
// One slot per worker, owned by the aggregator and cache-padded so each worker's
// handshake lives on its own line. The slot holds the worker's published buffer and
// a freshness flag, and those two fields carry the whole single-producer /
// single-consumer protocol:
//
//   - the owning worker writes the buffer only while `fresh == false`, then
//     stores `fresh = true` with Release;
//   - the merge owner reads the buffer only after loading `fresh == true` with
//     Acquire, then stores `fresh = false` with Release.
//
// The Release store is ordered after the buffer access on each side and the
// Acquire load before it, so the buffer is never touched by both sides at once.
// Freshness doubles as backpressure: a worker whose slot is still fresh cannot
// publish again and keeps folding into its active buffer instead.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::value::AggValue;

pub(crate) struct Slot<A> {
    buf: UnsafeCell<A>,
    fresh: AtomicBool,
    bound: AtomicBool,
}

// SAFETY: `buf` is guarded by the `fresh` handshake described above. Exactly one
// worker owns the write side (registration is exactly-once per slot) and exactly
// one merge owner at a time holds the read side (the phase flag in the
// aggregator), so no `&mut` aliasing can occur through a shared `Slot`.
unsafe impl<A: Send> Sync for Slot<A> {}

impl<A: AggValue> Slot<A> {
    pub(crate) fn new() -> Self {
        Self {
            buf: UnsafeCell::new(A::default()),
            fresh: AtomicBool::new(false),
            bound: AtomicBool::new(false),
        }
    }

    /// True iff the published buffer has already been drained, i.e. the owning
    /// worker may publish again.
    #[inline]
    pub(crate) fn stale(&self) -> bool {
        !self.fresh.load(Ordering::Acquire)
    }

    /// Marks this slot as registered. Returns `false` if it already was.
    pub(crate) fn bind(&self) -> bool {
        self.bound
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// Swaps `active` with the published buffer and marks it fresh. The old
    /// published contents (already drained) become the new active buffer and
    /// are reset to identity.
    ///
    /// # Safety
    ///
    /// The caller must be the slot's owning worker and must have observed
    /// `stale() == true` with no intervening publish. Only then is the buffer
    /// write side exclusively theirs.
    #[inline]
    pub(crate) unsafe fn publish(&self, active: &mut A) {
        // SAFETY: per the function contract, `fresh` was observed false with
        // Acquire, so the merge owner's last read of this buffer
        // happens-before us and nobody else holds a reference to it.
        unsafe {
            std::mem::swap(active, &mut *self.buf.get());
        }
        active.reset();
        self.fresh.store(true, Ordering::Release);
    }

    /// Merges the published buffer into `global` and clears freshness,
    /// permitting the owning worker to publish again.
    ///
    /// # Safety
    ///
    /// The caller must hold merge ownership and must have observed
    /// `stale() == false`. Only then is the buffer read side exclusively
    /// theirs.
    #[inline]
    pub(crate) unsafe fn drain_into(&self, global: &mut A) {
        // SAFETY: per the function contract, `fresh` was observed true with
        // Acquire, so the worker's publish happens-before us and the worker
        // will not write again until it observes the store below.
        unsafe {
            global.merge(&*self.buf.get());
        }
        self.fresh.store(false, Ordering::Release);
    }

    /// Resets the published buffer to identity.
    ///
    /// # Safety
    ///
    /// Same contract as [`Slot::publish`]: owning worker, slot observed stale.
    pub(crate) unsafe fn reset_buffer(&self) {
        // SAFETY: see `publish`.
        unsafe {
            (*self.buf.get()).reset();
        }
    }
}
