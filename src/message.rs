//! Protocol messages emitted by `auto-coder.rag run --output_format stream-json`.
//!
//! Each line of output is one JSON object:
//!
//! ```json
//! {"event_type": "content", "timestamp": "2025-01-01T12:00:00Z", "data": {"content": "Hello"}}
//! ```
//!
//! The payload under `data` depends on `event_type`; [`MessageEvent`] models
//! one variant per kind. Unknown keys are kept in each payload's `extra` map so
//! a message survives a serialize/parse round trip unchanged.

use std::fmt;
use std::ops::{Add, AddAssign};

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Token counts reported by the generation pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input: u64,
    #[serde(default)]
    pub generated: u64,
}

impl TokenUsage {
    pub fn new(input: u64, generated: u64) -> Self {
        Self { input, generated }
    }

    pub fn total(&self) -> u64 {
        self.input + self.generated
    }
}

impl Add for TokenUsage {
    type Output = TokenUsage;

    fn add(self, rhs: Self) -> Self {
        Self {
            input: self.input + rhs.input,
            generated: self.generated + rhs.generated,
        }
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

/// Token counts of an unexpected shape are dropped rather than failing the message.
fn lenient_tokens<'de, D>(deserializer: D) -> Result<Option<TokenUsage>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|value| match serde_json::from_value(value.clone()) {
        Ok(tokens) => Some(tokens),
        Err(e) => {
            debug!(error = %e, tokens = %value, "ignoring malformed token counts");
            None
        }
    }))
}

/// Discriminant of a protocol message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Start,
    Stage,
    Content,
    Contexts,
    End,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Start => "start",
            EventType::Stage => "stage",
            EventType::Content => "content",
            EventType::Contexts => "contexts",
            EventType::End => "end",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a `start` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, deserialize_with = "lenient_tokens", skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenUsage>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Payload of a `stage` event (retrieval, filtering, chunking, generation...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageData {
    #[serde(rename = "type", default)]
    pub stage_type: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, deserialize_with = "lenient_tokens", skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenUsage>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Payload of a `content` event: one fragment of the answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentData {
    pub content: String,
    #[serde(default, deserialize_with = "lenient_tokens", skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenUsage>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Payload of a `contexts` event: retrieved document contexts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextsData {
    pub contexts: Vec<String>,
    #[serde(default, deserialize_with = "lenient_tokens", skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenUsage>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Payload of the final `end` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndData {
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default, deserialize_with = "lenient_tokens", skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenUsage>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Kind-specific payload of a protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageEvent {
    Start(StartData),
    Stage(StageData),
    Content(ContentData),
    Contexts(ContextsData),
    End(EndData),
}

impl MessageEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            MessageEvent::Start(_) => EventType::Start,
            MessageEvent::Stage(_) => EventType::Stage,
            MessageEvent::Content(_) => EventType::Content,
            MessageEvent::Contexts(_) => EventType::Contexts,
            MessageEvent::End(_) => EventType::End,
        }
    }
}

/// One decoded line of the stream-json protocol.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolMessage {
    /// Timestamp as emitted by the tool (RFC 3339, or ISO 8601 without offset).
    pub timestamp: String,
    pub event: MessageEvent,
}

#[derive(Serialize, Deserialize)]
struct WireMessage {
    event_type: String,
    #[serde(default)]
    timestamp: String,
    #[serde(default)]
    data: Map<String, Value>,
}

impl ProtocolMessage {
    /// Create a message stamped with the current time.
    pub fn new(event: MessageEvent) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            event,
        }
    }

    /// Parse a single JSON line.
    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        let wire: WireMessage = serde_json::from_str(line)?;
        let data = Value::Object(wire.data);
        let event = match wire.event_type.as_str() {
            "start" => MessageEvent::Start(serde_json::from_value(data)?),
            "stage" => MessageEvent::Stage(serde_json::from_value(data)?),
            "content" => MessageEvent::Content(serde_json::from_value(data)?),
            "contexts" => MessageEvent::Contexts(serde_json::from_value(data)?),
            "end" => MessageEvent::End(serde_json::from_value(data)?),
            other => {
                return Err(serde_json::Error::custom(format!(
                    "unknown event_type: {other}"
                )))
            }
        };

        Ok(Self {
            timestamp: wire.timestamp,
            event,
        })
    }

    /// Serialize back to the single-line wire form.
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        let data = match &self.event {
            MessageEvent::Start(d) => serde_json::to_value(d)?,
            MessageEvent::Stage(d) => serde_json::to_value(d)?,
            MessageEvent::Content(d) => serde_json::to_value(d)?,
            MessageEvent::Contexts(d) => serde_json::to_value(d)?,
            MessageEvent::End(d) => serde_json::to_value(d)?,
        };
        let data = match data {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        serde_json::to_string(&WireMessage {
            event_type: self.event_type().as_str().to_string(),
            timestamp: self.timestamp.clone(),
            data,
        })
    }

    pub fn event_type(&self) -> EventType {
        self.event.event_type()
    }

    pub fn is_content(&self) -> bool {
        matches!(self.event, MessageEvent::Content(_))
    }

    pub fn is_contexts(&self) -> bool {
        matches!(self.event, MessageEvent::Contexts(_))
    }

    pub fn is_end(&self) -> bool {
        matches!(self.event, MessageEvent::End(_))
    }

    /// Answer fragment carried by a `content` event.
    pub fn content(&self) -> Option<&str> {
        match &self.event {
            MessageEvent::Content(d) => Some(&d.content),
            _ => None,
        }
    }

    pub fn contexts(&self) -> Option<&[String]> {
        match &self.event {
            MessageEvent::Contexts(d) => Some(&d.contexts),
            _ => None,
        }
    }

    /// Stage type and human-readable message of a `stage` event.
    pub fn stage(&self) -> Option<(&str, &str)> {
        match &self.event {
            MessageEvent::Stage(d) => Some((&d.stage_type, &d.message)),
            _ => None,
        }
    }

    pub fn metadata(&self) -> Option<&Map<String, Value>> {
        match &self.event {
            MessageEvent::End(d) => Some(&d.metadata),
            _ => None,
        }
    }

    /// Token counts, for any kind of event that carries them.
    pub fn tokens(&self) -> Option<TokenUsage> {
        match &self.event {
            MessageEvent::Start(d) => d.tokens,
            MessageEvent::Stage(d) => d.tokens,
            MessageEvent::Content(d) => d.tokens,
            MessageEvent::Contexts(d) => d.tokens,
            MessageEvent::End(d) => d.tokens,
        }
    }

    /// Parsed timestamp. Offset-less timestamps are taken as UTC.
    pub fn parsed_timestamp(&self) -> Option<DateTime<FixedOffset>> {
        DateTime::parse_from_rfc3339(&self.timestamp).ok().or_else(|| {
            NaiveDateTime::parse_from_str(&self.timestamp, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc().fixed_offset())
        })
    }
}

/// Decode one output line. `None` for blank lines.
pub fn parse_line(line: &str) -> Option<Result<ProtocolMessage, serde_json::Error>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    Some(ProtocolMessage::from_json_line(line))
}
