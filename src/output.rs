// ========================================================================================
//                          Buffered per-worker output channel
// ========================================================================================
//
// The aggregation path and the output path are independent: `output` records a
// match, `submit` flushes whatever has been buffered since the last flush. The
// aggregator guarantees exactly one `flush` per `submit` and otherwise treats the
// channel as opaque.

use crossbeam_channel::Sender;

/// Wire shape requested for an emitted record. Interpretation belongs to the
/// consumer; the channel only carries it alongside the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Csv,
    Binary,
}

/// One emitted match, tagged with the worker that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRecord {
    pub worker: usize,
    pub format: OutputFormat,
    pub matched: Vec<u32>,
}

/// A per-worker buffered result emitter.
pub trait OutputChannel {
    /// Clears buffering state and re-tags the channel with its worker id;
    /// called at epoch boundaries.
    fn reset(&mut self, worker: usize);

    /// Emits everything buffered since the last flush. Called exactly once
    /// per `submit`.
    fn flush(&mut self);

    /// Buffers one match for later emission.
    fn emit(&mut self, format: OutputFormat, matched: &[u32]);
}

/// Buffers records locally and hands complete batches to a consumer thread on
/// `flush`. The worker path never blocks on the consumer and never fails: a
/// disconnected consumer drops the batch with a warning.
pub struct BufferedChannel {
    worker: usize,
    buf: Vec<OutputRecord>,
    tx: Sender<Vec<OutputRecord>>,
}

impl BufferedChannel {
    pub fn new(worker: usize, tx: Sender<Vec<OutputRecord>>) -> Self {
        Self {
            worker,
            buf: Vec::new(),
            tx,
        }
    }

    /// Number of records buffered and not yet flushed.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

impl OutputChannel for BufferedChannel {
    fn reset(&mut self, worker: usize) {
        self.worker = worker;
        self.buf.clear();
    }

    fn flush(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.buf);
        if self.tx.send(batch).is_err() {
            log::warn!(
                "output consumer disconnected; worker {} dropped a batch",
                self.worker
            );
        }
    }

    fn emit(&mut self, format: OutputFormat, matched: &[u32]) {
        self.buf.push(OutputRecord {
            worker: self.worker,
            format,
            matched: matched.to_vec(),
        });
    }
}
