// ========================================================================================
//
//                  The global aggregator: merge ownership and the drain
//
// ========================================================================================
//
// One shared accumulator, one slot per worker, one tri-state ownership flag. Any
// thread may call `update`; whoever wins the Armed -> Merging claim becomes the merge
// owner for exactly one pass, drains every fresh slot into the shared accumulator,
// refreshes the cached view, and re-arms. Losers return immediately. `get_result`
// seals the epoch instead (Armed -> Done), which blocks out all further `update`
// claims, and then drains in two phases: merge, force every handle to publish its
// active buffer, merge again. A single pass would under-count whatever workers had
// mapped but not yet published.

use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;
use crossbeam_utils::atomic::AtomicCell;
use thiserror::Error;

use crate::handle::WorkerHandle;
use crate::phase::{MergePhase, PhaseFlag};
use crate::policy::{AtTheEnd, NoOutput, NonStoppable, OutputPolicy, StopPolicy, UpdatePolicy};
use crate::slot::Slot;
use crate::value::{AggValue, Viewer};

/// Rejected aggregator configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("worker count must be at least 1")]
    ZeroWorkers,
}

/// Configures and validates an [`Aggregator`]. The worker count defaults to
/// the number of logical CPUs.
pub struct Builder<F> {
    workers: Option<usize>,
    viewer: F,
}

impl<F> Builder<F> {
    pub fn new(viewer: F) -> Self {
        Self {
            workers: None,
            viewer,
        }
    }

    /// Overrides the default worker count.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn build<A, U, S, O>(self) -> Result<Aggregator<A, F, U, S, O>, ConfigError>
    where
        A: AggValue,
        F: Viewer<A>,
        U: UpdatePolicy,
        S: StopPolicy,
        O: OutputPolicy,
    {
        let workers = match self.workers {
            Some(0) => return Err(ConfigError::ZeroWorkers),
            Some(n) => n,
            None => num_cpus::get().max(1),
        };
        log::debug!("aggregator configured for {workers} worker(s)");
        Ok(Aggregator::new(workers, self.viewer))
    }
}

/// The shared side of the scatter/gather pair. See the module header for the
/// ownership protocol; see [`WorkerHandle`] for the per-worker side.
pub struct Aggregator<A, F, U = AtTheEnd, S = NonStoppable, O = NoOutput>
where
    A: AggValue,
    F: Viewer<A>,
    U: UpdatePolicy,
    S: StopPolicy,
    O: OutputPolicy,
{
    global: UnsafeCell<A>,
    slots: Box<[CachePadded<Slot<A>>]>,
    phase: PhaseFlag,
    viewer: F,
    latest: AtomicCell<F::View>,
    registered: AtomicUsize,
    _policies: PhantomData<fn() -> (U, S, O)>,
}

// SAFETY: `global` is mutated only by the thread that currently holds merge
// ownership, enforced by the CAS transitions of `phase` (Armed -> Merging for a
// pass, Armed -> Done for the drain); successive owners are chained by the
// AcqRel transitions. Each `Slot` carries its own single-producer /
// single-consumer handshake. `latest` is an atomic cell. `viewer` is only ever
// used through `&F` and `F: Viewer` requires `Sync`.
unsafe impl<A, F, U, S, O> Sync for Aggregator<A, F, U, S, O>
where
    A: AggValue,
    F: Viewer<A>,
    U: UpdatePolicy,
    S: StopPolicy,
    O: OutputPolicy,
{
}

impl<A, F, U, S, O> Aggregator<A, F, U, S, O>
where
    A: AggValue,
    F: Viewer<A>,
    U: UpdatePolicy,
    S: StopPolicy,
    O: OutputPolicy,
{
    /// Whether this configuration expects mid-epoch view reads. Intent for
    /// the caller's scheduling layer; the aggregator's mechanics are
    /// identical either way.
    pub const ON_THE_FLY: bool = U::ON_THE_FLY;

    /// Creates an aggregator with `workers` empty slots, an armed flag, and
    /// an identity cached view.
    ///
    /// Panics if `workers` is zero; use [`Builder`] for validated
    /// construction.
    pub fn new(workers: usize, viewer: F) -> Self {
        assert!(workers > 0, "worker count must be at least 1");
        Self {
            global: UnsafeCell::new(A::default()),
            slots: (0..workers).map(|_| CachePadded::new(Slot::new())).collect(),
            phase: PhaseFlag::new(),
            latest: AtomicCell::new(F::View::default()),
            viewer,
            registered: AtomicUsize::new(0),
            _policies: PhantomData,
        }
    }

    /// Binds slot `id` and returns the worker front-end for it. Must be
    /// called exactly once per id, before any merge activity for that
    /// worker; `stop` and `channel` are dictated by the stop/output policies
    /// (unit for disabled axes).
    ///
    /// Panics on an out-of-range id or a second registration of the same id.
    pub fn register_handle(
        self: &Arc<Self>,
        id: usize,
        stop: S::Signal,
        channel: O::Channel,
    ) -> WorkerHandle<A, F, U, S, O> {
        assert!(
            id < self.slots.len(),
            "worker id {id} out of range for {} slots",
            self.slots.len()
        );
        assert!(self.slots[id].bind(), "worker id {id} registered twice");
        self.registered.fetch_add(1, Ordering::AcqRel);
        WorkerHandle::bind(id, Arc::clone(self), stop, channel)
    }

    /// True iff slot `id`'s publication has already been drained, i.e. the
    /// owning worker is clear to publish again.
    #[inline]
    pub fn stale(&self, id: usize) -> bool {
        self.slots[id].stale()
    }

    /// Non-blocking merge attempt. Returns `false` with no effect when
    /// another thread is already merging or the epoch is sealed; this is
    /// best-effort by design, not a retry loop.
    pub fn update(&self) -> bool {
        if !self
            .phase
            .try_transition(MergePhase::Armed, MergePhase::Merging)
        {
            return false;
        }
        // SAFETY: the claim above makes this thread the sole merge owner
        // until the transition back to Armed below.
        unsafe { self.update_unchecked() };
        let rearmed = self
            .phase
            .try_transition(MergePhase::Merging, MergePhase::Armed);
        debug_assert!(rearmed, "merge ownership lost mid-pass");
        true
    }

    /// One merge pass: drains every fresh slot into the shared accumulator,
    /// clearing each slot's freshness as it goes, then recomputes the cached
    /// view.
    ///
    /// # Safety
    ///
    /// The caller must hold exclusive merge ownership for the full duration
    /// of the call. The safe entry points are [`Aggregator::update`] and
    /// [`Aggregator::get_result`].
    pub unsafe fn update_unchecked(&self) {
        // SAFETY: merge ownership (function contract) is the only license to
        // touch `global`.
        let global = unsafe { &mut *self.global.get() };
        let mut drained = 0usize;
        for slot in &self.slots {
            if !slot.stale() {
                // SAFETY: the slot was observed fresh and we are the merge
                // owner, so the read side of its handshake is ours.
                unsafe { slot.drain_into(global) };
                drained += 1;
            }
        }
        self.latest.store(self.viewer.project(global));
        log::trace!("merge pass drained {drained} slot(s)");
    }

    /// Exclusive, complete drain for epoch finalization.
    ///
    /// Spins until the epoch can be sealed (blocking out all further
    /// `update` claims), then merges, forces every handle to publish its
    /// active buffer, and merges again. The `&mut` borrow of every
    /// registered handle is the proof that no worker is mid-call, which is
    /// what makes the forced publish sound.
    ///
    /// Panics if a handle belongs to a different aggregator or the iterator
    /// does not cover every registered handle.
    pub fn get_result<'a, I>(&self, handles: I) -> F::View
    where
        I: IntoIterator<Item = &'a mut WorkerHandle<A, F, U, S, O>>,
        A: 'a,
        F: 'a,
        U: 'a,
        S: 'a,
        O: 'a,
    {
        self.phase.seal();
        log::debug!(
            "epoch sealed; final drain over {} registered worker(s)",
            self.registered()
        );
        // SAFETY: the seal (Armed -> Done) blocks every other claimant, so
        // this thread holds merge ownership until reset() re-arms.
        unsafe { self.update_unchecked() };

        let mut forced = 0usize;
        for handle in handles {
            assert!(
                handle.belongs_to(self),
                "get_result was passed a handle of a different aggregator"
            );
            handle.submit();
            forced += 1;
        }
        assert_eq!(
            forced,
            self.registered(),
            "get_result must be passed every registered handle"
        );

        // Second pass: consume what the forced submits just published.
        // SAFETY: as above; the epoch is still sealed.
        unsafe { self.update_unchecked() };
        self.latest.load()
    }

    /// Begins a new epoch: shared accumulator and cached view back to
    /// identity, flag re-armed. Must not race a concurrent `update` or
    /// `get_result` of the old epoch; the claim below turns that misuse into
    /// a panic rather than corruption.
    pub fn reset(&self) {
        assert!(
            self.phase
                .try_transition(MergePhase::Done, MergePhase::Merging),
            "reset() requires a sealed epoch (get_result first) with no merge in flight"
        );
        // SAFETY: the claim above makes this thread the sole owner of
        // `global` until the re-arm below.
        unsafe { (*self.global.get()).reset() };
        self.latest.store(F::View::default());
        let rearmed = self
            .phase
            .try_transition(MergePhase::Merging, MergePhase::Armed);
        debug_assert!(rearmed, "merge ownership lost during reset");
        log::debug!("aggregator re-armed for a new epoch");
    }

    /// Lock-free load of the most recently completed merge's snapshot.
    #[inline]
    pub fn latest(&self) -> F::View {
        self.latest.load()
    }

    /// The fixed worker count this aggregator was built for.
    pub fn workers(&self) -> usize {
        self.slots.len()
    }

    /// How many worker ids have been registered so far.
    pub fn registered(&self) -> usize {
        self.registered.load(Ordering::Acquire)
    }

    pub(crate) fn slot(&self, id: usize) -> &Slot<A> {
        &self.slots[id]
    }
}

impl<A, F, U> Aggregator<A, F, U, NonStoppable, NoOutput>
where
    A: AggValue,
    F: Viewer<A>,
    U: UpdatePolicy,
{
    /// [`Aggregator::register_handle`] without the policy plumbing, for the
    /// default all-disabled configuration.
    pub fn attach(self: &Arc<Self>, id: usize) -> WorkerHandle<A, F, U, NonStoppable, NoOutput> {
        self.register_handle(id, (), ())
    }
}
