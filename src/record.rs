use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::error::Error;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Severity of a log record, ordered from least to most severe.
///
/// The derived `Ord` gives `Trace < Debug < Info < Warn < Error < Critical`,
/// which is the ordering filter rules compare against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Numeric identifier of a log event, with an optional human-readable name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct EventId {
    pub id: i64,
    pub name: Option<String>,
}

impl EventId {
    pub fn new(id: i64) -> Self {
        EventId { id, name: None }
    }

    pub fn named(id: i64, name: impl Into<String>) -> Self {
        EventId { id, name: Some(name.into()) }
    }
}

impl From<i64> for EventId {
    fn from(id: i64) -> Self {
        EventId::new(id)
    }
}

/// Ordered list of key/value attribute pairs attached to a log record.
///
/// Keys are not required to be unique and iteration order is insertion
/// order, so repeated keys survive round-trips through the buffer intact.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AttributeList {
    pairs: Vec<(String, Value)>,
}

impl AttributeList {
    pub fn new() -> Self {
        AttributeList { pairs: Vec::new() }
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.pairs.push((key.into(), value.into()));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Render the pairs as a `key=value` line, the fallback message format
    /// when a record carries no explicit message.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, (key, value)) in self.pairs.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            out.push_str(key);
            out.push('=');
            match value {
                Value::String(s) => out.push_str(s),
                other => out.push_str(&other.to_string()),
            }
        }
        out
    }
}

impl From<Vec<(String, Value)>> for AttributeList {
    fn from(pairs: Vec<(String, Value)>) -> Self {
        AttributeList { pairs }
    }
}

fn empty_attributes() -> Arc<AttributeList> {
    static EMPTY: OnceLock<Arc<AttributeList>> = OnceLock::new();
    Arc::clone(EMPTY.get_or_init(|| Arc::new(AttributeList::new())))
}

/// The state captured from a live log call.
///
/// This is a closed set of shapes rather than an open-ended `dyn` value:
/// every variant the codec understands can iterate attribute pairs and
/// render itself to a string. `Opaque` exists for host dispatch layers that
/// hand over state they never normalized; the codec refuses it, and a
/// buffer treats that as a contract breach by the caller.
#[derive(Clone)]
pub enum LogState {
    /// Structured attribute pairs, shared with the serialized record.
    Structured(Arc<AttributeList>),
    /// A pre-formatted message with no structured attributes.
    Plain(Arc<str>),
    /// Host-specific state that was never normalized into one of the
    /// shapes above. Rejected by the serializer.
    Opaque(Arc<dyn Any + Send + Sync>),
}

impl LogState {
    pub fn structured(attributes: AttributeList) -> Self {
        LogState::Structured(Arc::new(attributes))
    }

    pub fn plain(message: impl Into<Arc<str>>) -> Self {
        LogState::Plain(message.into())
    }

    /// Attribute pairs carried by this state; empty for `Plain`.
    ///
    /// The returned list is shared, not copied: a serialized record holds
    /// the same allocation as the live state it was created from.
    pub fn attributes(&self) -> Arc<AttributeList> {
        match self {
            LogState::Structured(attrs) => Arc::clone(attrs),
            _ => empty_attributes(),
        }
    }

    /// Default textual rendering, used when no explicit formatter is set.
    pub fn render(&self) -> String {
        match self {
            LogState::Structured(attrs) => attrs.render(),
            LogState::Plain(message) => message.to_string(),
            LogState::Opaque(_) => String::new(),
        }
    }
}

impl fmt::Debug for LogState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogState::Structured(attrs) => f.debug_tuple("Structured").field(attrs).finish(),
            LogState::Plain(message) => f.debug_tuple("Plain").field(message).finish(),
            LogState::Opaque(_) => f.write_str("Opaque(..)"),
        }
    }
}

/// Produces the formatted message for a record from its state and
/// optional exception.
pub type Formatter =
    Arc<dyn Fn(&LogState, Option<&(dyn Error + Send + Sync)>) -> String + Send + Sync>;

/// A live log record, immutable once captured.
///
/// The exception is an opaque shared reference; it travels through the
/// buffer untouched and is never re-serialized.
#[derive(Clone)]
pub struct LogRecord {
    pub category: String,
    pub level: LogLevel,
    pub event_id: EventId,
    pub state: LogState,
    pub exception: Option<Arc<dyn Error + Send + Sync>>,
    pub formatter: Formatter,
}

impl LogRecord {
    /// Create a record with the default formatter, which renders the state
    /// and appends the exception display when one is present.
    pub fn new(
        category: impl Into<String>,
        level: LogLevel,
        event_id: EventId,
        state: LogState,
    ) -> Self {
        LogRecord {
            category: category.into(),
            level,
            event_id,
            state,
            exception: None,
            formatter: default_formatter(),
        }
    }

    pub fn with_exception(mut self, exception: Arc<dyn Error + Send + Sync>) -> Self {
        self.exception = Some(exception);
        self
    }

    pub fn with_formatter(mut self, formatter: Formatter) -> Self {
        self.formatter = formatter;
        self
    }

    /// Run the formatter against the captured state.
    pub fn format_message(&self) -> String {
        (self.formatter)(&self.state, self.exception.as_deref())
    }
}

impl fmt::Debug for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogRecord")
            .field("category", &self.category)
            .field("level", &self.level)
            .field("event_id", &self.event_id)
            .field("state", &self.state)
            .field("exception", &self.exception.as_ref().map(|e| e.to_string()))
            .finish_non_exhaustive()
    }
}

fn default_formatter() -> Formatter {
    static DEFAULT: OnceLock<Formatter> = OnceLock::new();
    Arc::clone(DEFAULT.get_or_init(|| {
        Arc::new(|state: &LogState, exception: Option<&(dyn Error + Send + Sync)>| {
            let rendered = state.render();
            match exception {
                Some(err) if rendered.is_empty() => err.to_string(),
                Some(err) => format!("{rendered}: {err}"),
                None => rendered,
            }
        })
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_ordering_matches_severity() {
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Error);
        assert!(LogLevel::Error < LogLevel::Critical);
    }

    #[test]
    fn attribute_list_preserves_order_and_duplicates() {
        let mut attrs = AttributeList::new();
        attrs.push("user", "alice");
        attrs.push("attempt", 1);
        attrs.push("user", "bob");

        let keys: Vec<&str> = attrs.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["user", "attempt", "user"]);
        assert_eq!(attrs.render(), "user=alice attempt=1 user=bob");
    }

    #[test]
    fn default_formatter_appends_exception() {
        let err: Arc<dyn Error + Send + Sync> =
            Arc::from(Box::<dyn Error + Send + Sync>::from("boom"));
        let record = LogRecord::new(
            "app.db",
            LogLevel::Error,
            EventId::new(7),
            LogState::plain("query failed"),
        )
        .with_exception(err);

        assert_eq!(record.format_message(), "query failed: boom");
    }

    #[test]
    fn plain_state_has_no_attributes() {
        let state = LogState::plain("hello");
        assert!(state.attributes().is_empty());
        assert_eq!(state.render(), "hello");
    }
}
