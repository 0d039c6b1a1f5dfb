use crate::serialized::DeserializedLogRecord;
use crate::sink::{BufferedSink, SinkError};
use parking_lot::Mutex;

/// A sink that simply drops every batch.
///
/// Useful for measuring the overhead of buffering itself, and for unit
/// tests that don't care about the released records.
#[derive(Clone, Copy, Default)]
pub struct NoopSink;

impl BufferedSink for NoopSink {
    fn log_records(&self, _batch: &[DeserializedLogRecord]) -> Result<(), SinkError> {
        Ok(())
    }
}

/// A sink that keeps everything it receives in memory.
#[derive(Default)]
pub struct CollectingSink {
    records: Mutex<Vec<DeserializedLogRecord>>,
    batch_sizes: Mutex<Vec<usize>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        CollectingSink::default()
    }

    /// All records received so far, in delivery order.
    pub fn records(&self) -> Vec<DeserializedLogRecord> {
        self.records.lock().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.records.lock().iter().map(|r| r.message.clone()).collect()
    }

    /// Sizes of the batches delivered so far.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl BufferedSink for CollectingSink {
    fn log_records(&self, batch: &[DeserializedLogRecord]) -> Result<(), SinkError> {
        self.batch_sizes.lock().push(batch.len());
        self.records.lock().extend_from_slice(batch);
        Ok(())
    }
}
