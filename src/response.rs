//! Folding a protocol message stream into a single response.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::message::{MessageEvent, ProtocolMessage, TokenUsage};

/// Final result of a collected query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RagResponse {
    pub success: bool,

    /// Concatenation of all content fragments, in arrival order.
    pub answer: String,

    /// Every retrieved context, in arrival order.
    #[serde(default)]
    pub contexts: Vec<String>,

    /// Metadata of the final `end` event.
    #[serde(default)]
    pub metadata: Map<String, Value>,

    /// Token counts summed over every message.
    #[serde(default)]
    pub tokens: TokenUsage,

    #[serde(default)]
    pub error: Option<String>,
}

impl RagResponse {
    /// Get the answer text.
    pub fn text(&self) -> &str {
        &self.answer
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Accumulates messages in arrival order.
#[derive(Debug, Default)]
pub struct ResponseAggregator {
    answer: String,
    contexts: Vec<String>,
    metadata: Option<Map<String, Value>>,
    tokens: TokenUsage,
    messages: usize,
}

impl ResponseAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: &ProtocolMessage) {
        self.messages += 1;

        if let Some(tokens) = message.tokens() {
            self.tokens += tokens;
        }

        match &message.event {
            MessageEvent::Content(d) => self.answer.push_str(&d.content),
            MessageEvent::Contexts(d) => self.contexts.extend(d.contexts.iter().cloned()),
            MessageEvent::End(d) => self.metadata = Some(d.metadata.clone()),
            MessageEvent::Start(_) | MessageEvent::Stage(_) => {}
        }
    }

    /// Number of messages folded so far.
    pub fn message_count(&self) -> usize {
        self.messages
    }

    pub fn finish(self) -> RagResponse {
        RagResponse {
            success: true,
            answer: self.answer,
            contexts: self.contexts,
            metadata: self.metadata.unwrap_or_default(),
            tokens: self.tokens,
            error: None,
        }
    }
}

impl Extend<ProtocolMessage> for ResponseAggregator {
    fn extend<T: IntoIterator<Item = ProtocolMessage>>(&mut self, iter: T) {
        for message in iter {
            self.push(&message);
        }
    }
}
