use crate::clock::Clock;
use crate::config::ConfigHandle;
use crate::filter::RuleSelector;
use crate::flush::{self, BatchPool, FlushError};
use crate::record::{AttributeList, EventId, LogLevel, LogRecord};
use crate::serialized::{self, SerializedLogRecord};
use crate::sink::BufferedSink;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Shared machinery of the global and per-scope buffer variants: the
/// swap-locked queue, the atomic size counter, the lazy suspension window
/// and the batched flush path.
///
/// The queue lock is the single point that makes flush atomic with
/// respect to concurrent enqueues: a record lands either in the queue
/// being detached or in its replacement, never nowhere and never twice.
/// The size counter is updated outside that lock, so counter and queue
/// can disagree across a race window; capacity is a soft bound and
/// trimming converges afterwards.
pub(crate) struct BufferCore {
    config: ConfigHandle,
    sink: Arc<dyn BufferedSink>,
    clock: Arc<dyn Clock>,
    selector: RuleSelector,
    queue: Mutex<VecDeque<SerializedLogRecord>>,
    // Signed on purpose: a concurrent trim can subtract a record's size
    // before the producing thread has added it.
    size_bytes: AtomicI64,
    last_flush: RwLock<Option<DateTime<Utc>>>,
    pool: BatchPool,
}

impl BufferCore {
    pub(crate) fn new(
        config: ConfigHandle,
        sink: Arc<dyn BufferedSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        BufferCore {
            config,
            sink,
            clock,
            selector: RuleSelector::new(),
            queue: Mutex::new(VecDeque::new()),
            size_bytes: AtomicI64::new(0),
            last_flush: RwLock::new(None),
            pool: BatchPool::new(),
        }
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub(crate) fn config(&self) -> &ConfigHandle {
        &self.config
    }

    /// Whether the suspension window that started at the last flush is
    /// still open. Evaluated lazily from timestamps; nothing stores the
    /// suspended state itself.
    pub(crate) fn suspended(&self, now: DateTime<Utc>) -> bool {
        match *self.last_flush.read() {
            Some(last_flush) => now < last_flush + self.config.current().suspend_after_flush,
            None => false,
        }
    }

    pub(crate) fn rule_matches(
        &self,
        category: &str,
        level: LogLevel,
        event_id: &EventId,
        attributes: &AttributeList,
    ) -> bool {
        let rules = self.config.rule_set();
        self.selector
            .select(&rules, category, level, event_id, attributes)
            .is_some()
    }

    pub(crate) fn is_enabled(
        &self,
        category: &str,
        level: LogLevel,
        event_id: &EventId,
        attributes: &AttributeList,
    ) -> bool {
        !self.suspended(self.clock.now()) && self.rule_matches(category, level, event_id, attributes)
    }

    /// Serialize and append a record, then trim back to capacity.
    ///
    /// Returns `false` without touching the queue when the buffer is
    /// suspended, no rule matches, or the record is over the per-record
    /// size limit.
    ///
    /// # Panics
    ///
    /// If the record carries an `Opaque` state. That state never comes
    /// out of this crate's own capture path, so hitting it means the
    /// caller handed over state it never normalized.
    pub(crate) fn try_enqueue(&self, record: &LogRecord) -> bool {
        let now = self.clock.now();
        if self.suspended(now) {
            return false;
        }

        let attributes = record.state.attributes();
        if !self.rule_matches(&record.category, record.level, &record.event_id, &attributes) {
            return false;
        }

        let serialized = match serialized::serialize(record, now) {
            Ok(serialized) => serialized,
            Err(error) => panic!("log buffering contract breach: {error}"),
        };

        let config = self.config.current();
        if serialized.size_bytes() > config.max_record_size_bytes {
            return false;
        }

        let added = serialized.size_bytes() as i64;
        self.queue.lock().push_back(serialized);
        self.size_bytes.fetch_add(added, Ordering::AcqRel);

        self.trim(config.per_buffer_capacity_bytes);
        true
    }

    /// Drop oldest records until the running size is back under capacity.
    /// Unconditional FIFO eviction, no priorities.
    pub(crate) fn trim(&self, capacity_bytes: usize) {
        while self.size_bytes.load(Ordering::Acquire) > capacity_bytes as i64 {
            let evicted = self.queue.lock().pop_front();
            match evicted {
                Some(record) => {
                    self.size_bytes
                        .fetch_sub(record.size_bytes() as i64, Ordering::AcqRel);
                }
                None => break,
            }
        }
    }

    /// Detach the queue, stamp the flush time and emit everything in
    /// enqueue order. An empty buffer still gets the stamp and the size
    /// reset.
    pub(crate) fn flush(&self) -> Result<(), FlushError> {
        let now = self.clock.now();
        *self.last_flush.write() = Some(now);

        let detached = {
            let mut queue = self.queue.lock();
            std::mem::take(&mut *queue)
        };
        self.size_bytes.store(0, Ordering::Release);

        let records: Vec<SerializedLogRecord> = detached.into();
        flush::emit_in_batches(&records, self.sink.as_ref(), &self.pool)
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub(crate) fn current_size_bytes(&self) -> i64 {
        self.size_bytes.load(Ordering::Acquire)
    }
}

/// The process-wide buffer. One instance is shared by every log call that
/// runs outside any scope.
pub struct GlobalBuffer {
    core: BufferCore,
}

impl GlobalBuffer {
    pub fn new(config: ConfigHandle, sink: Arc<dyn BufferedSink>, clock: Arc<dyn Clock>) -> Self {
        GlobalBuffer { core: BufferCore::new(config, sink, clock) }
    }

    /// Pure query used by upstream dispatch to decide whether buffering
    /// is even worth attempting. No side effects.
    pub fn is_enabled(
        &self,
        category: &str,
        level: LogLevel,
        event_id: &EventId,
        attributes: &AttributeList,
    ) -> bool {
        self.core.is_enabled(category, level, event_id, attributes)
    }

    /// Returns `true` iff the record was accepted into the buffer.
    /// `false` means the caller should log the record normally.
    pub fn try_enqueue(&self, record: &LogRecord) -> bool {
        self.core.try_enqueue(record)
    }

    /// Release everything buffered so far to the sink and start the
    /// suspension window.
    pub fn flush(&self) -> Result<(), FlushError> {
        self.core.flush()
    }

    /// Number of records currently held. Diagnostic only; racy by nature.
    pub fn len(&self) -> usize {
        self.core.len()
    }

    pub fn is_empty(&self) -> bool {
        self.core.len() == 0
    }

    /// Running byte size. May transiently exceed capacity or dip negative
    /// under contention.
    pub fn current_size_bytes(&self) -> i64 {
        self.core.current_size_bytes()
    }
}
