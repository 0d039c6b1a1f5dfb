//! Bounded, concurrent log buffering for `tracing`.
//!
//! Instead of emitting every log line immediately, a [`BufferingLayer`]
//! holds records in a bounded buffer (globally or per scope) and releases
//! them to a [`BufferedSink`] only when the host triggers a flush,
//! typically because an error made the withheld context interesting.
//! Buffers trim oldest-first past a soft byte capacity, reject enqueues
//! for a suspension window after each flush, and decide what to buffer
//! through hot-swappable filter rules.

pub mod buffer;
pub mod clock;
pub mod config;
pub mod filter;
pub mod flush;
pub mod init;
pub mod layer;
pub mod noop_sink;
pub mod provider;
pub mod record;
pub mod request_buffer;
pub mod serialized;
pub mod sink;

pub use buffer::GlobalBuffer;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BufferingConfig, ConfigHandle};
pub use filter::{FilterRule, RuleSelector, RuleSet};
pub use flush::{BatchPool, FlushError, MAX_BATCH_SIZE};
pub use init::{
    build_buffering, build_buffering_with_clock, init_buffering, init_buffering_with_config,
    BufferingHandle,
};
pub use layer::BufferingLayer;
pub use noop_sink::{CollectingSink, NoopSink};
pub use provider::{
    BufferProvider, GlobalBufferProvider, LoggingBuffer, ScopeAccessor, ScopeGuard, ScopeId,
    ScopedBufferProvider, ThreadScope,
};
pub use record::{AttributeList, EventId, LogLevel, LogRecord, LogState};
pub use request_buffer::RequestBuffer;
pub use serialized::{DeserializedLogRecord, SerializedLogRecord};
pub use sink::{BufferedSink, SinkError};
