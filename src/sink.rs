use crate::serialized::DeserializedLogRecord;
use std::error::Error;

/// Error type sinks report; opaque to the buffer, propagated to the
/// flush caller without retries.
pub type SinkError = Box<dyn Error + Send + Sync>;

/// Destination for decoded log records released from a buffer.
///
/// Implementations transport records to a concrete backend (a logger
/// provider, a network shipper, a test collector). The flush path calls
/// `log_records` once per decoded batch, in enqueue order.
///
/// Calls are synchronous by design: flushing swaps in-memory structures
/// and must not await I/O, so implementations that ship over the network
/// should hand the batch to their own worker instead of blocking here.
pub trait BufferedSink: Send + Sync {
    /// Accept one batch of records.
    ///
    /// **Returns**
    /// - `Ok(())` if the batch was accepted.
    /// - `Err(..)` on backend failure. The flush keeps going with the
    ///   remaining batches and surfaces the error to its caller.
    fn log_records(&self, batch: &[DeserializedLogRecord]) -> Result<(), SinkError>;
}
