use crate::buffer::GlobalBuffer;
use crate::clock::Clock;
use crate::config::ConfigHandle;
use crate::flush::FlushError;
use crate::record::{AttributeList, EventId, LogLevel, LogRecord};
use crate::request_buffer::RequestBuffer;
use crate::sink::BufferedSink;
use parking_lot::RwLock;
use std::cell::Cell;
use std::collections::HashMap;
use std::sync::Arc;

/// Object-safe surface shared by the buffer variants, so providers can
/// hand out either one behind a single type.
pub trait LoggingBuffer: Send + Sync {
    /// Pure query with no side effects.
    fn is_enabled(
        &self,
        category: &str,
        level: LogLevel,
        event_id: &EventId,
        attributes: &AttributeList,
    ) -> bool;

    /// Returns `true` iff the record was accepted into the buffer.
    fn try_enqueue(&self, record: &LogRecord) -> bool;

    /// Release buffered records to the sink.
    fn flush(&self) -> Result<(), FlushError>;
}

impl LoggingBuffer for GlobalBuffer {
    fn is_enabled(
        &self,
        category: &str,
        level: LogLevel,
        event_id: &EventId,
        attributes: &AttributeList,
    ) -> bool {
        GlobalBuffer::is_enabled(self, category, level, event_id, attributes)
    }

    fn try_enqueue(&self, record: &LogRecord) -> bool {
        GlobalBuffer::try_enqueue(self, record)
    }

    fn flush(&self) -> Result<(), FlushError> {
        GlobalBuffer::flush(self)
    }
}

impl LoggingBuffer for RequestBuffer {
    fn is_enabled(
        &self,
        category: &str,
        level: LogLevel,
        event_id: &EventId,
        attributes: &AttributeList,
    ) -> bool {
        RequestBuffer::is_enabled(self, category, level, event_id, attributes)
    }

    fn try_enqueue(&self, record: &LogRecord) -> bool {
        RequestBuffer::try_enqueue(self, record)
    }

    fn flush(&self) -> Result<(), FlushError> {
        RequestBuffer::flush(self)
    }
}

/// Picks the buffer a log call should target.
pub trait BufferProvider: Send + Sync {
    fn current_buffer(&self) -> Arc<dyn LoggingBuffer>;
}

/// Provider that always answers with the single shared global buffer.
pub struct GlobalBufferProvider {
    buffer: Arc<GlobalBuffer>,
}

impl GlobalBufferProvider {
    pub fn new(buffer: Arc<GlobalBuffer>) -> Self {
        GlobalBufferProvider { buffer }
    }

    pub fn buffer(&self) -> &Arc<GlobalBuffer> {
        &self.buffer
    }
}

impl BufferProvider for GlobalBufferProvider {
    fn current_buffer(&self) -> Arc<dyn LoggingBuffer> {
        Arc::clone(&self.buffer) as Arc<dyn LoggingBuffer>
    }
}

/// Identity of an active scope (a request, a job, a unit of work).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub u64);

/// Tells the provider which scope, if any, the calling context is in.
pub trait ScopeAccessor: Send + Sync {
    fn current_scope(&self) -> Option<ScopeId>;
}

thread_local! {
    static CURRENT_SCOPE: Cell<Option<u64>> = const { Cell::new(None) };
}

/// Scope accessor backed by a thread-local, for hosts that pin a unit of
/// work to a thread. Entering returns a guard that restores the previous
/// scope on drop, so nesting behaves.
#[derive(Clone, Copy, Default)]
pub struct ThreadScope;

impl ThreadScope {
    pub fn enter(id: ScopeId) -> ScopeGuard {
        let previous = CURRENT_SCOPE.with(|current| current.replace(Some(id.0)));
        ScopeGuard { previous }
    }
}

impl ScopeAccessor for ThreadScope {
    fn current_scope(&self) -> Option<ScopeId> {
        CURRENT_SCOPE.with(|current| current.get()).map(ScopeId)
    }
}

/// Restores the previously active scope when dropped.
pub struct ScopeGuard {
    previous: Option<u64>,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        CURRENT_SCOPE.with(|current| current.set(self.previous));
    }
}

/// Provider that keeps one [`RequestBuffer`] per active scope and falls
/// back to the global buffer when no scope is active.
///
/// Buffer creation is idempotent under concurrent first access: two
/// threads racing on a fresh scope key both end up with the same
/// instance.
pub struct ScopedBufferProvider {
    global: Arc<GlobalBuffer>,
    accessor: Arc<dyn ScopeAccessor>,
    scopes: RwLock<HashMap<ScopeId, Arc<RequestBuffer>>>,
    config: ConfigHandle,
    sink: Arc<dyn BufferedSink>,
    clock: Arc<dyn Clock>,
}

impl ScopedBufferProvider {
    pub fn new(
        global: Arc<GlobalBuffer>,
        accessor: Arc<dyn ScopeAccessor>,
        config: ConfigHandle,
        sink: Arc<dyn BufferedSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        ScopedBufferProvider {
            global,
            accessor,
            scopes: RwLock::new(HashMap::new()),
            config,
            sink,
            clock,
        }
    }

    /// The buffer for a scope, created lazily on first access.
    pub fn buffer_for(&self, id: ScopeId) -> Arc<RequestBuffer> {
        if let Some(buffer) = self.scopes.read().get(&id) {
            return Arc::clone(buffer);
        }

        let mut scopes = self.scopes.write();
        let buffer = scopes.entry(id).or_insert_with(|| {
            Arc::new(RequestBuffer::new(
                self.config.clone(),
                Arc::clone(&self.sink),
                Arc::clone(&self.clock),
            ))
        });
        Arc::clone(buffer)
    }

    /// Flush a scope's buffer and retire it. Missing scopes are a no-op.
    pub fn flush_scope(&self, id: ScopeId) -> Result<(), FlushError> {
        let buffer = self.scopes.write().remove(&id);
        match buffer {
            Some(buffer) => buffer.flush(),
            None => Ok(()),
        }
    }

    /// Retire a scope's buffer without emitting anything. The usual end
    /// of a scope whose trigger never fired.
    pub fn drop_scope(&self, id: ScopeId) {
        let _ = self.scopes.write().remove(&id);
    }

    pub fn global(&self) -> &Arc<GlobalBuffer> {
        &self.global
    }

    pub fn active_scopes(&self) -> usize {
        self.scopes.read().len()
    }
}

impl BufferProvider for ScopedBufferProvider {
    fn current_buffer(&self) -> Arc<dyn LoggingBuffer> {
        match self.accessor.current_scope() {
            Some(id) => self.buffer_for(id) as Arc<dyn LoggingBuffer>,
            None => Arc::clone(&self.global) as Arc<dyn LoggingBuffer>,
        }
    }
}
