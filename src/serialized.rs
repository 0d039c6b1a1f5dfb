use crate::record::{AttributeList, EventId, LogLevel, LogRecord, LogState};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::error::Error;
use std::sync::Arc;

/// Fixed accounting overhead charged to every record, covering the
/// timestamp, level, event id and queue bookkeeping.
pub const RECORD_OVERHEAD_BYTES: usize = 64;

/// Fixed accounting overhead charged per attribute pair.
pub const PAIR_OVERHEAD_BYTES: usize = 16;

/// Error returned by [`serialize`] when the record state is not one of the
/// shapes the codec understands. Reaching this from a buffer is a contract
/// breach by the upstream dispatch, not a recoverable condition.
#[derive(thiserror::Error, Debug)]
pub enum SerializeError {
    #[error("unsupported log state reached the serializer; expected a structured or plain state")]
    UnsupportedState,
}

/// Compact, size-accounted form of a log record held inside a buffer.
///
/// The attribute list is shared with the live state it was created from,
/// and the exception travels as the same opaque reference. `size_bytes` is
/// computed once at creation and never changes; it is the unit all
/// capacity accounting works in.
pub struct SerializedLogRecord {
    timestamp: DateTime<Utc>,
    level: LogLevel,
    event_id: EventId,
    message: String,
    exception: Option<Arc<dyn Error + Send + Sync>>,
    attributes: Arc<AttributeList>,
    size_bytes: usize,
}

impl SerializedLogRecord {
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn event_id(&self) -> &EventId {
        &self.event_id
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }
}

/// The re-expanded record handed to the sink at flush time. Built on
/// demand, never stored.
#[derive(Debug, Clone)]
pub struct DeserializedLogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub event_id: EventId,
    pub exception: Option<Arc<dyn Error + Send + Sync>>,
    pub message: String,
    pub attributes: Arc<AttributeList>,
}

/// Convert a live record into its buffered form.
///
/// The formatted message is produced by the record's formatter, the
/// attribute list is captured by reference, and the byte size is a
/// deterministic function of the message, attribute strings and the fixed
/// overhead constants. Never fails for `Structured` or `Plain` states.
pub fn serialize(
    record: &LogRecord,
    timestamp: DateTime<Utc>,
) -> Result<SerializedLogRecord, SerializeError> {
    let attributes = match &record.state {
        LogState::Structured(_) | LogState::Plain(_) => record.state.attributes(),
        LogState::Opaque(_) => return Err(SerializeError::UnsupportedState),
    };

    let message = record.format_message();

    let mut size_bytes = RECORD_OVERHEAD_BYTES + message.len();
    for (key, value) in attributes.iter() {
        size_bytes += key.len() + value_len(value) + PAIR_OVERHEAD_BYTES;
    }

    Ok(SerializedLogRecord {
        timestamp,
        level: record.level,
        event_id: record.event_id.clone(),
        message,
        exception: record.exception.clone(),
        attributes,
        size_bytes,
    })
}

/// Expand a buffered record into the form the sink consumes. Pure and
/// side-effect free; allocates only the message copy.
pub fn deserialize(record: &SerializedLogRecord) -> DeserializedLogRecord {
    DeserializedLogRecord {
        timestamp: record.timestamp,
        level: record.level,
        event_id: record.event_id.clone(),
        exception: record.exception.clone(),
        message: record.message.clone(),
        attributes: Arc::clone(&record.attributes),
    }
}

fn value_len(value: &Value) -> usize {
    match value {
        Value::String(s) => s.len(),
        other => other.to_string().len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn structured_record(message: &str, attrs: Vec<(&str, Value)>) -> LogRecord {
        let mut list = AttributeList::new();
        for (k, v) in attrs {
            list.push(k, v);
        }
        let text: Arc<str> = Arc::from(message);
        LogRecord::new(
            "app.test",
            LogLevel::Warn,
            EventId::new(11),
            LogState::Structured(Arc::new(list)),
        )
        .with_formatter(Arc::new(move |_, _| text.to_string()))
    }

    #[test]
    fn size_accounting_is_deterministic() {
        let record = structured_record(
            "disk almost full",
            vec![("mount", Value::from("/var")), ("pct", Value::from(97))],
        );
        let serialized = serialize(&record, Utc::now()).unwrap();

        let expected = RECORD_OVERHEAD_BYTES
            + "disk almost full".len()
            + ("mount".len() + "/var".len() + PAIR_OVERHEAD_BYTES)
            + ("pct".len() + "97".len() + PAIR_OVERHEAD_BYTES);
        assert_eq!(serialized.size_bytes(), expected);

        // Same input, same size.
        let again = serialize(&record, Utc::now()).unwrap();
        assert_eq!(again.size_bytes(), expected);
    }

    #[test]
    fn round_trip_preserves_fields() {
        let record = structured_record("m", vec![("k", Value::from("v"))]);
        let ts = Utc::now();
        let serialized = serialize(&record, ts).unwrap();
        let out = deserialize(&serialized);

        assert_eq!(out.timestamp, ts);
        assert_eq!(out.level, LogLevel::Warn);
        assert_eq!(out.event_id, EventId::new(11));
        assert_eq!(out.message, "m");
        let pairs: Vec<(&str, &Value)> = out.attributes.iter().collect();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0, "k");
    }

    #[test]
    fn attributes_are_shared_not_copied() {
        let record = structured_record("m", vec![("k", Value::from("v"))]);
        let serialized = serialize(&record, Utc::now()).unwrap();
        let out = deserialize(&serialized);

        if let LogState::Structured(original) = &record.state {
            assert!(Arc::ptr_eq(original, &out.attributes));
        } else {
            unreachable!();
        }
    }

    #[test]
    fn opaque_state_is_rejected() {
        let record = LogRecord::new(
            "app.test",
            LogLevel::Error,
            EventId::default(),
            LogState::Opaque(Arc::new(42_u32)),
        );
        assert!(matches!(
            serialize(&record, Utc::now()),
            Err(SerializeError::UnsupportedState)
        ));
    }
}
