// ========================================================================================
//                            Stop-broadcast collaborator
// ========================================================================================
//
// How workers observe the halt is their runtime's business, not this crate's; the
// aggregator only ever calls `stop_all` and never reads the signal back.

use std::sync::atomic::{AtomicBool, Ordering};

/// A broadcast stop signal shared by all workers of a run.
pub trait Barrier: Send + Sync {
    /// Signals every worker to halt. Fire-and-forget: aggregation state is
    /// unaffected, and in-flight `map`/`submit` calls stay valid until each
    /// worker observes the signal on its own.
    fn stop_all(&self);
}

/// A minimal barrier: one atomic flag that workers poll between units of work.
#[derive(Debug, Default)]
pub struct StopFlag {
    stopped: AtomicBool,
}

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once any handle has broadcast a halt.
    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl Barrier for StopFlag {
    fn stop_all(&self) {
        self.stopped.store(true, Ordering::Release);
    }
}
