// ========================================================================================
//                  Compile-time configuration axes (zero-sized markers)
// ========================================================================================
//
// Three independent axes, each a marker type bound by a policy trait. A disabled
// axis contributes a unit field and no methods: the handle for a `NoOutput`
// configuration carries no channel at all, and `stop` simply does not exist on a
// `NonStoppable` handle. Nothing is checked at runtime.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::barrier::Barrier;
use crate::output::OutputChannel;

// --- On-the-fly axis ---

/// Whether the cached view is expected to be read during an active epoch.
///
/// This is intent, not mechanics: the aggregator behaves identically either
/// way, and the const exists so the caller's scheduling layer can decide
/// whether to drive `update` from a background poller or only at the end.
pub trait UpdatePolicy {
    const ON_THE_FLY: bool;
}

/// Readers consume the cached view while workers are still mapping; drive
/// `update` periodically.
pub struct OnTheFly;

/// The view is only wanted after the final drain.
pub struct AtTheEnd;

impl UpdatePolicy for OnTheFly {
    const ON_THE_FLY: bool = true;
}

impl UpdatePolicy for AtTheEnd {
    const ON_THE_FLY: bool = false;
}

// --- Stoppable axis ---

/// Determines whether handles can broadcast a global halt.
pub trait StopPolicy {
    /// What each handle carries to do it: `Arc<B>` when stoppable, unit when
    /// not.
    type Signal: Send;
}

/// Handles expose `stop()`, wired to a [`Barrier`].
pub struct Stoppable<B>(PhantomData<fn() -> B>);

/// No halt broadcast; `stop()` does not exist.
pub struct NonStoppable;

impl<B: Barrier> StopPolicy for Stoppable<B> {
    type Signal = Arc<B>;
}

impl StopPolicy for NonStoppable {
    type Signal = ();
}

// --- Output axis ---

/// Determines whether handles carry a buffered output channel.
pub trait OutputPolicy {
    /// The per-handle channel state: a real channel when enabled, unit when
    /// not.
    type Channel: Send;

    /// Flushes buffered output; called once per `submit`.
    fn flush(channel: &mut Self::Channel);

    /// Clears output buffering state at an epoch boundary.
    fn reset(channel: &mut Self::Channel, worker: usize);
}

/// Handles expose `output()` and flush a channel of type `C` on every submit.
pub struct Emit<C>(PhantomData<fn() -> C>);

/// No output path: no channel field, no flush, no `output()` method.
pub struct NoOutput;

impl<C: OutputChannel + Send> OutputPolicy for Emit<C> {
    type Channel = C;

    #[inline]
    fn flush(channel: &mut C) {
        channel.flush();
    }

    #[inline]
    fn reset(channel: &mut C, worker: usize) {
        channel.reset(worker);
    }
}

impl OutputPolicy for NoOutput {
    type Channel = ();

    #[inline]
    fn flush(_channel: &mut ()) {}

    #[inline]
    fn reset(_channel: &mut (), _worker: usize) {}
}
