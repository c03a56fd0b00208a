//! Incremental construction of the streamed assistant message.

use std::sync::Mutex;

use orderdesk_core::message::{Message, Part};
use orderdesk_core::tool::ToolOutcome;

/// Receives the full message every time it grows.
///
/// `emit` must not block; the job executor's sink fans out to broker
/// subscribers and returns immediately.
pub trait SnapshotSink: Send + Sync {
    fn emit(&self, message: &Message);
}

/// Discards snapshots.
pub struct NoopSink;

impl SnapshotSink for NoopSink {
    fn emit(&self, _message: &Message) {}
}

/// Keeps every snapshot in order. Handy for CLI one-shots and tests.
#[derive(Default)]
pub struct CollectingSink {
    snapshots: Mutex<Vec<Message>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshots(&self) -> Vec<Message> {
        self.snapshots.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl SnapshotSink for CollectingSink {
    fn emit(&self, message: &Message) {
        if let Ok(mut snapshots) = self.snapshots.lock() {
            snapshots.push(message.clone());
        }
    }
}

/// Builds a [`Message`] whose parts only ever grow.
///
/// Text deltas extend the open text part; a tool call or [`end_text`]
/// closes it so later text starts a new part. Tool invocations are
/// resolved at most once.
///
/// [`end_text`]: MessageBuilder::end_text
pub struct MessageBuilder {
    message: Message,
    open_text: Option<usize>,
}

impl MessageBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            message: Message::assistant(id),
            open_text: None,
        }
    }

    pub fn push_text(&mut self, delta: &str) {
        if delta.is_empty() {
            return;
        }
        match self.open_text.and_then(|i| self.message.parts.get_mut(i)) {
            Some(Part::Text { content }) => content.push_str(delta),
            _ => {
                self.message.parts.push(Part::text(delta));
                self.open_text = Some(self.message.parts.len() - 1);
            }
        }
    }

    pub fn end_text(&mut self) {
        self.open_text = None;
    }

    /// Append a pending tool invocation.
    pub fn begin_tool(&mut self, tool_call_id: &str, name: &str, input: serde_json::Value) {
        self.end_text();
        self.message.parts.push(Part::ToolInvocation {
            tool_call_id: tool_call_id.to_string(),
            name: name.to_string(),
            input,
            output: None,
        });
    }

    /// Set the output of a pending invocation. Returns false when no pending
    /// invocation has that id.
    pub fn resolve_tool(&mut self, tool_call_id: &str, outcome: ToolOutcome) -> bool {
        for part in self.message.parts.iter_mut() {
            if let Part::ToolInvocation {
                tool_call_id: id,
                output,
                ..
            } = part
            {
                if id.as_str() == tool_call_id && output.is_none() {
                    *output = Some(outcome);
                    return true;
                }
            }
        }
        false
    }

    pub fn snapshot(&self) -> &Message {
        &self.message
    }

    pub fn finish(self) -> Message {
        self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_grows_within_a_step() {
        let mut b = MessageBuilder::new("m1");
        b.push_text("Your order ");
        b.push_text("was delivered.");
        assert_eq!(b.snapshot().parts, vec![Part::text("Your order was delivered.")]);
    }

    #[test]
    fn tool_call_closes_text_part() {
        let mut b = MessageBuilder::new("m1");
        b.push_text("Let me check.");
        b.begin_tool("call_1", "findOrderById", json!({"orderId": "abc"}));
        b.push_text("Found it.");
        let parts = &b.snapshot().parts;
        assert_eq!(parts.len(), 3);
        assert!(parts[0].is_text());
        assert!(matches!(parts[1], Part::ToolInvocation { .. }));
        assert_eq!(parts[2], Part::text("Found it."));
    }

    #[test]
    fn resolves_at_most_once() {
        let mut b = MessageBuilder::new("m1");
        b.begin_tool("call_1", "findOrderById", json!({}));
        assert!(b.resolve_tool("call_1", ToolOutcome::failure("Order with ID abc not found")));
        assert!(!b.resolve_tool("call_1", ToolOutcome::success("late")));
        assert!(!b.resolve_tool("call_2", ToolOutcome::success("unknown")));
        match &b.snapshot().parts[0] {
            Part::ToolInvocation { output: Some(o), .. } => assert!(!o.success),
            other => panic!("unexpected part {other:?}"),
        }
    }

    #[test]
    fn collecting_sink_keeps_order() {
        let sink = CollectingSink::new();
        let mut b = MessageBuilder::new("m1");
        b.push_text("a");
        sink.emit(b.snapshot());
        b.push_text("b");
        sink.emit(b.snapshot());
        let snaps = sink.snapshots();
        assert_eq!(snaps.len(), 2);
        assert_eq!(snaps[1].text(), "ab");
    }
}
