//! The streamed assistant message.
//!
//! A [`Message`] is an ordered, append-only list of [`Part`]s. The job
//! executor publishes the whole message each time it grows, wrapped in a
//! [`ChannelPayload`], and subscribers replace their copy with it.

use serde::{Deserialize, Serialize};

use crate::tool::ToolOutcome;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// An atomic, renderable unit of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    /// Generated prose.
    Text { content: String },

    /// A tool call. `output` is `None` while pending and set exactly once.
    ToolInvocation {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        name: String,
        input: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<ToolOutcome>,
    },

    /// A part type this build does not know. Only produced when decoding
    /// payloads from a newer publisher.
    #[serde(other)]
    Unknown,
}

impl Part {
    pub fn text(content: impl Into<String>) -> Self {
        Part::Text {
            content: content.into(),
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Part::Text { .. })
    }

    /// True for a tool invocation that has received its output.
    pub fn is_resolved(&self) -> bool {
        matches!(self, Part::ToolInvocation { output: Some(_), .. })
    }
}

/// A conversation message made of ordered parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Message {
    /// An empty assistant message.
    pub fn assistant(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: MessageRole::Assistant,
            parts: Vec::new(),
        }
    }

    pub fn last_part(&self) -> Option<&Part> {
        self.parts.last()
    }

    /// All text parts joined with blank lines.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { content } => Some(content.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Tool invocations in the order they were made.
    pub fn tool_invocations(&self) -> impl Iterator<Item = &Part> {
        self.parts
            .iter()
            .filter(|p| matches!(p, Part::ToolInvocation { .. }))
    }
}

/// What travels over a channel topic: one full message snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelPayload {
    pub data: Message,
}

impl From<Message> for ChannelPayload {
    fn from(data: Message) -> Self {
        Self { data }
    }
}
