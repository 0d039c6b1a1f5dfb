use crate::buffer::BufferCore;
use crate::clock::Clock;
use crate::config::ConfigHandle;
use crate::flush::FlushError;
use crate::record::{AttributeList, EventId, LogLevel, LogRecord};
use crate::sink::BufferedSink;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;

/// Buffer scoped to a single request (or any other unit of work).
///
/// Same semantics as [`GlobalBuffer`](crate::buffer::GlobalBuffer), with
/// one addition: a rolling truncation deadline. Whenever an enqueue finds
/// the deadline has passed, the deadline advances by the configured
/// window and a trim pass runs, so a long-lived scope converges back to
/// capacity even when no flush ever fires.
pub struct RequestBuffer {
    core: BufferCore,
    truncate_after: Mutex<DateTime<Utc>>,
}

impl RequestBuffer {
    pub fn new(config: ConfigHandle, sink: Arc<dyn BufferedSink>, clock: Arc<dyn Clock>) -> Self {
        let start = clock.now();
        RequestBuffer {
            core: BufferCore::new(config, sink, clock),
            truncate_after: Mutex::new(start),
        }
    }

    pub fn is_enabled(
        &self,
        category: &str,
        level: LogLevel,
        event_id: &EventId,
        attributes: &AttributeList,
    ) -> bool {
        self.core.is_enabled(category, level, event_id, attributes)
    }

    pub fn try_enqueue(&self, record: &LogRecord) -> bool {
        if !self.core.try_enqueue(record) {
            return false;
        }

        let now = self.core.clock().now();
        let window_elapsed = {
            let mut deadline = self.truncate_after.lock();
            if now >= *deadline {
                *deadline = now + self.core.config().current().truncate_after;
                true
            } else {
                false
            }
        };
        if window_elapsed {
            self.core
                .trim(self.core.config().current().per_buffer_capacity_bytes);
        }

        true
    }

    pub fn flush(&self) -> Result<(), FlushError> {
        self.core.flush()
    }

    pub fn len(&self) -> usize {
        self.core.len()
    }

    pub fn is_empty(&self) -> bool {
        self.core.len() == 0
    }

    pub fn current_size_bytes(&self) -> i64 {
        self.core.current_size_bytes()
    }
}
