// ========================================================================================
//                          The tri-state merge-ownership flag
// ========================================================================================
//
// Mutual exclusion for merge passes without blocking non-owners. The flag forms a
// single linear chain per epoch:
//
//     Armed --(update claims)--> Merging --(pass done)--> Armed
//     Armed --(get_result seals)--> Done --(reset re-arms)--> Armed
//
// `update` gives up immediately when the claim fails; only the epoch seal spins.
// Successful transitions use AcqRel so each merge owner observes the previous
// owner's writes to the shared accumulator.

use std::sync::atomic::{AtomicU8, Ordering};

/// The three ownership states of the shared accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum MergePhase {
    /// No merge pass in flight; the next claimant may merge.
    Armed = 0,
    /// A merge pass is running; all other claims fail.
    Merging = 1,
    /// The epoch is sealed by a final drain; only `reset` re-arms.
    Done = 2,
}

pub(crate) struct PhaseFlag(AtomicU8);

impl PhaseFlag {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(MergePhase::Armed as u8))
    }

    /// Attempts the transition `from -> to`. Returns `false`, with no effect,
    /// when the flag is not in `from`.
    pub(crate) fn try_transition(&self, from: MergePhase, to: MergePhase) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// Spins until the `Armed -> Done` seal succeeds. The caller must
    /// guarantee no thread holds `Merging` indefinitely, or this never
    /// terminates.
    pub(crate) fn seal(&self) {
        while self
            .0
            .compare_exchange_weak(
                MergePhase::Armed as u8,
                MergePhase::Done as u8,
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_err()
        {
            std::hint::spin_loop();
        }
    }
}
