use indexmap::IndexMap;
use std::fmt;

/// Attribute map of a `start` event. Insertion order is preserved:
/// producers emit attributes in document order and sheet semantics
/// depend on it.
pub type Attrs = IndexMap<String, String>;

/// Severity carried by `message` events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Info => write!(f, "info"),
            Level::Warn => write!(f, "warn"),
            Level::Error => write!(f, "error"),
        }
    }
}

/// The shared vocabulary exchanged between decoders, processors and
/// serializers. Immutable once emitted; `start`/`end` nest strictly and
/// depth is tracked by consumers, not carried on the event.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Start { name: String, attributes: Attrs },
    Text { content: String },
    End,
    Comment { value: String },
    Message { level: Level, text: String },
}

impl Event {
    pub fn start(name: &str) -> Event {
        Event::Start {
            name: name.to_string(),
            attributes: Attrs::new(),
        }
    }

    pub fn start_with(name: &str, attributes: &[(&str, &str)]) -> Event {
        Event::Start {
            name: name.to_string(),
            attributes: attributes
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    pub fn text(content: &str) -> Event {
        Event::Text {
            content: content.to_string(),
        }
    }

    pub fn comment(value: &str) -> Event {
        Event::Comment {
            value: value.to_string(),
        }
    }

    pub fn message(level: Level, text: impl Into<String>) -> Event {
        Event::Message {
            level,
            text: text.into(),
        }
    }

    pub fn warn(text: impl Into<String>) -> Event {
        Event::message(Level::Warn, text)
    }

    pub fn is_start(&self) -> bool {
        matches!(self, Event::Start { .. })
    }

    pub fn is_end(&self) -> bool {
        matches!(self, Event::End)
    }
}
