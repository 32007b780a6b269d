// ========================================================================================
//
//                  Worker handle: the per-worker side of the protocol
//
// ========================================================================================
//
// Each worker folds into a private `active` buffer and periodically offers it to
// the aggregator through `submit`. The offer only goes through when the worker's
// slot is stale (the previous publication has been drained); otherwise the data
// simply keeps accumulating locally and rides along with the next successful
// publish. That single check is the whole flow-control story: a fast worker is
// throttled to the merge owner's consumption rate, and memory stays bounded at
// two buffers per worker no matter how far behind the drain falls.

use std::sync::Arc;

use crate::aggregator::Aggregator;
use crate::barrier::Barrier;
use crate::output::{OutputChannel, OutputFormat};
use crate::policy::{
    AtTheEnd, Emit, NoOutput, NonStoppable, OutputPolicy, StopPolicy, Stoppable, UpdatePolicy,
};
use crate::value::{AggValue, Viewer};

/// The per-worker front-end of an [`Aggregator`]. Obtained from
/// [`Aggregator::register_handle`], exactly one per worker id.
///
/// All aggregation methods take `&mut self`: a handle is meant to live on its
/// worker's thread and never be shared. That exclusivity is also what
/// [`Aggregator::get_result`] leans on for its final drain.
pub struct WorkerHandle<A, F, U = AtTheEnd, S = NonStoppable, O = NoOutput>
where
    A: AggValue,
    F: Viewer<A>,
    U: UpdatePolicy,
    S: StopPolicy,
    O: OutputPolicy,
{
    id: usize,
    active: A,
    agg: Arc<Aggregator<A, F, U, S, O>>,
    stop: S::Signal,
    channel: O::Channel,
}

impl<A, F, U, S, O> WorkerHandle<A, F, U, S, O>
where
    A: AggValue,
    F: Viewer<A>,
    U: UpdatePolicy,
    S: StopPolicy,
    O: OutputPolicy,
{
    /// Called by [`Aggregator::register_handle`] once the slot is bound.
    pub(crate) fn bind(
        id: usize,
        agg: Arc<Aggregator<A, F, U, S, O>>,
        stop: S::Signal,
        mut channel: O::Channel,
    ) -> Self {
        O::reset(&mut channel, id);
        Self {
            id,
            active: A::default(),
            agg,
            stop,
            channel,
        }
    }

    /// Folds `value` into the active buffer. `_matched` is the context the
    /// value was derived from; the merge path ignores it.
    ///
    /// Never blocks, never publishes. Data becomes visible to readers only
    /// after a later `submit` lands and a merge pass drains it.
    #[inline]
    pub fn map(&mut self, _matched: &[u32], value: &A) {
        self.active.merge(value);
    }

    /// Offers the active buffer to the aggregator.
    ///
    /// If the previous publication has been drained, the active buffer is
    /// swapped into the slot, marked fresh, and replaced with a reset one. If
    /// not, this is a no-op for the merge path and the worker keeps folding
    /// into the same buffer. Buffered output is flushed either way, once per
    /// call.
    pub fn submit(&mut self) {
        let slot = self.agg.slot(self.id);
        if slot.stale() {
            // SAFETY: this handle is the slot's sole registered owner
            // (registration is exactly-once) and `stale()` was just observed
            // true, so the buffer write side is exclusively ours.
            unsafe { slot.publish(&mut self.active) };
        }
        O::flush(&mut self.channel);
    }

    /// Lock-free read of the most recently completed merge's snapshot. Never
    /// returns a torn value and never observes a half-finished pass.
    #[inline]
    pub fn read_value(&self) -> F::View {
        self.agg.latest()
    }

    /// Returns both buffers to identity and clears output buffering; called
    /// at epoch boundaries, after the final drain.
    ///
    /// Panics if the published buffer is still awaiting a drain. At that
    /// point the merge owner may be reading it, so resetting it here would
    /// break the handshake.
    pub fn reset(&mut self) {
        let slot = self.agg.slot(self.id);
        assert!(
            slot.stale(),
            "reset() on worker {} with a publication still pending",
            self.id
        );
        self.active.reset();
        // SAFETY: sole registered owner, slot observed stale just above.
        unsafe { slot.reset_buffer() };
        O::reset(&mut self.channel, self.id);
    }

    /// The worker id this handle was registered under.
    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    /// True iff this handle was registered on `agg`.
    pub(crate) fn belongs_to(&self, agg: &Aggregator<A, F, U, S, O>) -> bool {
        std::ptr::eq(Arc::as_ptr(&self.agg), agg)
    }
}

impl<A, F, U, B, O> WorkerHandle<A, F, U, Stoppable<B>, O>
where
    A: AggValue,
    F: Viewer<A>,
    U: UpdatePolicy,
    B: Barrier,
    O: OutputPolicy,
{
    /// Broadcasts a global halt through the shared [`Barrier`]. Fire-and-forget:
    /// aggregation state is untouched, and other workers keep running until
    /// each observes the signal on its own.
    pub fn stop(&self) {
        self.stop.stop_all();
    }
}

impl<A, F, U, S, C> WorkerHandle<A, F, U, S, Emit<C>>
where
    A: AggValue,
    F: Viewer<A>,
    U: UpdatePolicy,
    S: StopPolicy,
    C: OutputChannel + Send,
{
    /// Buffers one match for emission. Independent of the aggregation path;
    /// the batch leaves on the next `submit`'s flush.
    #[inline]
    pub fn output(&mut self, format: OutputFormat, matched: &[u32]) {
        self.channel.emit(format, matched);
    }
}
