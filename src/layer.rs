use crate::clock::Clock;
use crate::provider::BufferProvider;
use crate::record::{AttributeList, EventId, LogLevel, LogRecord, LogState};
use crate::serialized::DeserializedLogRecord;
use crate::sink::BufferedSink;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// `tracing_subscriber` layer that routes events through the buffering
/// subsystem instead of emitting them straight away.
///
/// Every event is normalized into a [`LogRecord`] (target as category,
/// fields as attributes) and offered to the buffer picked by the
/// provider. When the buffer declines (suspension window, no matching
/// rule, oversized record) the event is logged normally: it goes to the
/// sink immediately as a single-record batch.
pub struct BufferingLayer {
    provider: Arc<dyn BufferProvider>,
    sink: Arc<dyn BufferedSink>,
    clock: Arc<dyn Clock>,
    /// Total events seen by the layer.
    pub total_events: Arc<AtomicU64>,
    /// Accepted into a buffer.
    pub buffered_events: Arc<AtomicU64>,
    /// Declined by the buffer and emitted immediately.
    pub passthrough_events: Arc<AtomicU64>,
}

impl BufferingLayer {
    pub fn new(
        provider: Arc<dyn BufferProvider>,
        sink: Arc<dyn BufferedSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        BufferingLayer {
            provider,
            sink,
            clock,
            total_events: Arc::new(AtomicU64::new(0)),
            buffered_events: Arc::new(AtomicU64::new(0)),
            passthrough_events: Arc::new(AtomicU64::new(0)),
        }
    }
}

fn map_level(level: &tracing::Level) -> LogLevel {
    if *level == tracing::Level::ERROR {
        LogLevel::Error
    } else if *level == tracing::Level::WARN {
        LogLevel::Warn
    } else if *level == tracing::Level::INFO {
        LogLevel::Info
    } else if *level == tracing::Level::DEBUG {
        LogLevel::Debug
    } else {
        LogLevel::Trace
    }
}

impl<S> Layer<S> for BufferingLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event, _ctx: Context<'_, S>) {
        self.total_events.fetch_add(1, Ordering::Relaxed);

        let mut attributes = AttributeList::new();
        let mut message: Option<String> = None;
        let mut event_id: Option<i64> = None;

        let mut visitor = FieldVisitor {
            attributes: &mut attributes,
            message: &mut message,
            event_id: &mut event_id,
        };
        event.record(&mut visitor);

        let meta = event.metadata();
        let level = map_level(meta.level());
        let event_id = EventId::new(event_id.unwrap_or(0));
        let state = LogState::structured(attributes);

        let mut record = LogRecord::new(meta.target(), level, event_id, state);
        if let Some(text) = message {
            let text: Arc<str> = Arc::from(text.as_str());
            record = record.with_formatter(Arc::new(move |_, _| text.to_string()));
        }

        let buffer = self.provider.current_buffer();
        if buffer.try_enqueue(&record) {
            self.buffered_events.fetch_add(1, Ordering::Relaxed);
            return;
        }

        // Log normally: straight to the sink, bypassing the buffer.
        self.passthrough_events.fetch_add(1, Ordering::Relaxed);
        let immediate = DeserializedLogRecord {
            timestamp: self.clock.now(),
            level: record.level,
            event_id: record.event_id.clone(),
            exception: record.exception.clone(),
            message: record.format_message(),
            attributes: record.state.attributes(),
        };
        if let Err(error) = self.sink.log_records(std::slice::from_ref(&immediate)) {
            eprintln!("log sink rejected passthrough record: {error}");
        }
    }
}

struct FieldVisitor<'a> {
    attributes: &'a mut AttributeList,
    message: &'a mut Option<String>,
    event_id: &'a mut Option<i64>,
}

impl Visit for FieldVisitor<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            *self.message = Some(value.to_string());
        } else {
            self.attributes.push(field.name(), value);
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        if field.name() == "event_id" {
            *self.event_id = Some(value);
        } else {
            self.attributes.push(field.name(), value);
        }
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        if field.name() == "event_id" {
            *self.event_id = Some(i64::try_from(value).unwrap_or(i64::MAX));
        } else {
            self.attributes.push(field.name(), value);
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.attributes.push(field.name(), value);
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.attributes.push(field.name(), value);
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            *self.message = Some(format!("{value:?}"));
        } else {
            self.attributes.push(field.name(), format!("{value:?}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::GlobalBuffer;
    use crate::clock::SystemClock;
    use crate::config::{BufferingConfig, ConfigHandle};
    use crate::filter::FilterRule;
    use crate::noop_sink::CollectingSink;
    use crate::provider::GlobalBufferProvider;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::Registry;

    fn wired(
        rules: Vec<FilterRule>,
    ) -> (BufferingLayer, Arc<GlobalBuffer>, Arc<CollectingSink>) {
        let config = ConfigHandle::new(BufferingConfig {
            rules,
            ..BufferingConfig::default()
        });
        let sink = Arc::new(CollectingSink::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let buffer = Arc::new(GlobalBuffer::new(
            config,
            Arc::clone(&sink) as Arc<dyn BufferedSink>,
            Arc::clone(&clock),
        ));
        let provider = Arc::new(GlobalBufferProvider::new(Arc::clone(&buffer)));
        let layer = BufferingLayer::new(
            provider,
            Arc::clone(&sink) as Arc<dyn BufferedSink>,
            clock,
        );
        (layer, buffer, sink)
    }

    #[test]
    fn matching_events_are_buffered_until_flush() {
        let (layer, buffer, sink) = wired(vec![FilterRule::new()]);
        let buffered = Arc::clone(&layer.buffered_events);
        let subscriber = Registry::default().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(user = "alice", "quota exceeded");
        });

        assert_eq!(buffered.load(Ordering::Relaxed), 1);
        assert!(sink.is_empty());

        buffer.flush().unwrap();
        assert_eq!(sink.messages(), vec!["quota exceeded"]);
        let attrs = &sink.records()[0].attributes;
        assert!(attrs.iter().any(|(k, _)| k == "user"));
    }

    #[test]
    fn non_matching_events_pass_through_immediately() {
        let (layer, buffer, sink) = wired(vec![FilterRule::new().with_category("other.*")]);
        let passthrough = Arc::clone(&layer.passthrough_events);
        let subscriber = Registry::default().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::error!("went straight out");
        });

        assert_eq!(passthrough.load(Ordering::Relaxed), 1);
        assert!(buffer.is_empty());
        assert_eq!(sink.messages(), vec!["went straight out"]);
    }

    #[test]
    fn unsigned_event_id_beyond_i64_saturates() {
        let (layer, buffer, sink) = wired(vec![FilterRule::new()]);
        let subscriber = Registry::default().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(event_id = u64::MAX, "saturated");
        });

        buffer.flush().unwrap();
        let records = sink.records();
        assert_eq!(records[0].event_id, EventId::new(i64::MAX));
        assert!(records[0].attributes.iter().all(|(k, _)| k != "event_id"));
    }

    #[test]
    fn event_id_field_is_lifted_out_of_attributes() {
        let (layer, buffer, sink) = wired(vec![FilterRule::new()]);
        let subscriber = Registry::default().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(event_id = 1234_i64, "tagged");
        });

        buffer.flush().unwrap();
        let records = sink.records();
        assert_eq!(records[0].event_id, EventId::new(1234));
        assert!(records[0].attributes.iter().all(|(k, _)| k != "event_id"));
    }
}
