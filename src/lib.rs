// ========================================================================================
//
//              Tributary: lock-free scatter/gather aggregation for workers
//
// ========================================================================================
//
// N worker threads fold partial results into private buffers and periodically publish
// them through a per-worker slot handshake. Whichever thread opportunistically claims
// merge ownership drains the fresh slots into one shared accumulator and refreshes a
// lock-free snapshot any reader can load. At the end of an epoch an exclusive
// two-phase drain collects everything still in flight. There are no locks anywhere:
// a worker that outruns the merge owner is throttled by its own slot, so memory
// stays bounded at one published buffer per worker.

pub mod aggregator;
pub mod barrier;
pub mod handle;
pub mod output;
mod phase;
pub mod policy;
mod slot;
pub mod value;
