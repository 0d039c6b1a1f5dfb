use crate::serialized::{self, DeserializedLogRecord, SerializedLogRecord};
use crate::sink::{BufferedSink, SinkError};
use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};

/// Upper bound on the number of records decoded into one batch, so a big
/// flush never materializes the whole buffer as deserialized records at
/// once.
pub const MAX_BATCH_SIZE: usize = 256;

/// How many idle batches a pool keeps around for reuse.
const MAX_POOLED_BATCHES: usize = 4;

/// Error surfaced by a flush after all batches were attempted.
#[derive(thiserror::Error, Debug)]
pub enum FlushError {
    /// The sink rejected one or more batches. Earlier batches may have
    /// been delivered; this is at-most-once per batch, not a transaction.
    #[error("sink failed on {failed_batches} of {total_batches} batches (last failure at batch {last_failed}): {source}")]
    Sink {
        last_failed: usize,
        failed_batches: usize,
        total_batches: usize,
        #[source]
        source: SinkError,
    },
}

/// Pool of decode batches used during flush.
///
/// Acquisition is scoped: the guard hands the batch back on every exit
/// path, including panics and early returns, so reuse never depends on
/// call-site discipline.
pub struct BatchPool {
    idle: Mutex<Vec<Vec<DeserializedLogRecord>>>,
}

impl Default for BatchPool {
    fn default() -> Self {
        BatchPool::new()
    }
}

impl BatchPool {
    pub fn new() -> Self {
        BatchPool { idle: Mutex::new(Vec::new()) }
    }

    pub fn acquire(&self) -> PooledBatch<'_> {
        let batch = self
            .idle
            .lock()
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(MAX_BATCH_SIZE));
        PooledBatch { pool: self, batch }
    }

    fn release(&self, mut batch: Vec<DeserializedLogRecord>) {
        batch.clear();
        let mut idle = self.idle.lock();
        if idle.len() < MAX_POOLED_BATCHES {
            idle.push(batch);
        }
    }
}

/// A batch checked out from a [`BatchPool`]; returned on drop.
pub struct PooledBatch<'a> {
    pool: &'a BatchPool,
    batch: Vec<DeserializedLogRecord>,
}

impl Deref for PooledBatch<'_> {
    type Target = Vec<DeserializedLogRecord>;

    fn deref(&self) -> &Self::Target {
        &self.batch
    }
}

impl DerefMut for PooledBatch<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.batch
    }
}

impl Drop for PooledBatch<'_> {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.batch));
    }
}

/// Decode detached records into fixed-size batches and hand each batch to
/// the sink, preserving enqueue order.
///
/// A sink failure on one batch does not stop the remaining batches; the
/// last error is returned once everything has been attempted.
pub fn emit_in_batches(
    records: &[SerializedLogRecord],
    sink: &dyn BufferedSink,
    pool: &BatchPool,
) -> Result<(), FlushError> {
    if records.is_empty() {
        return Ok(());
    }

    let total_batches = records.len().div_ceil(MAX_BATCH_SIZE);
    let mut failed_batches = 0;
    let mut last_error: Option<(usize, SinkError)> = None;

    for (index, chunk) in records.chunks(MAX_BATCH_SIZE).enumerate() {
        let mut batch = pool.acquire();
        batch.extend(chunk.iter().map(serialized::deserialize));
        if let Err(error) = sink.log_records(&batch) {
            failed_batches += 1;
            last_error = Some((index, error));
        }
    }

    match last_error {
        None => Ok(()),
        Some((last_failed, source)) => Err(FlushError::Sink {
            last_failed,
            failed_batches,
            total_batches,
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noop_sink::CollectingSink;
    use crate::record::{EventId, LogLevel, LogRecord, LogState};
    use chrono::Utc;

    fn serialized(message: &str) -> SerializedLogRecord {
        let record = LogRecord::new(
            "app.flush",
            LogLevel::Error,
            EventId::new(1),
            LogState::plain(message),
        );
        serialized::serialize(&record, Utc::now()).unwrap()
    }

    #[test]
    fn batches_are_chunked_and_ordered() {
        let records: Vec<_> = (0..600).map(|i| serialized(&format!("r{i}"))).collect();
        let sink = CollectingSink::new();
        let pool = BatchPool::new();

        emit_in_batches(&records, &sink, &pool).unwrap();

        assert_eq!(sink.batch_sizes(), vec![256, 256, 88]);
        let messages = sink.messages();
        assert_eq!(messages.len(), 600);
        assert_eq!(messages[0], "r0");
        assert_eq!(messages[599], "r599");
    }

    #[test]
    fn sink_failure_does_not_stop_later_batches() {
        struct FailSecond {
            inner: CollectingSink,
            calls: Mutex<usize>,
        }

        impl BufferedSink for FailSecond {
            fn log_records(&self, batch: &[DeserializedLogRecord]) -> Result<(), SinkError> {
                let mut calls = self.calls.lock();
                *calls += 1;
                if *calls == 2 {
                    return Err("second batch rejected".into());
                }
                self.inner.log_records(batch)
            }
        }

        let records: Vec<_> = (0..600).map(|i| serialized(&format!("r{i}"))).collect();
        let sink = FailSecond { inner: CollectingSink::new(), calls: Mutex::new(0) };
        let pool = BatchPool::new();

        let err = emit_in_batches(&records, &sink, &pool).unwrap_err();
        let FlushError::Sink { last_failed, failed_batches, total_batches, .. } = err;
        assert_eq!(last_failed, 1);
        assert_eq!(failed_batches, 1);
        assert_eq!(total_batches, 3);

        // First and third batches were still delivered.
        assert_eq!(sink.inner.batch_sizes(), vec![256, 88]);
    }

    #[test]
    fn pool_reuses_batches() {
        let pool = BatchPool::new();
        {
            let mut batch = pool.acquire();
            batch.push(serialized::deserialize(&serialized("x")));
        }
        assert_eq!(pool.idle.lock().len(), 1);

        let batch = pool.acquire();
        assert!(batch.is_empty());
        drop(batch);
        assert_eq!(pool.idle.lock().len(), 1);
    }

    #[test]
    fn empty_input_is_a_no_op() {
        let sink = CollectingSink::new();
        let pool = BatchPool::new();
        emit_in_batches(&[], &sink, &pool).unwrap();
        assert!(sink.batch_sizes().is_empty());
    }
}
