//! Incremental terminal rendering of message snapshots.

use orderdesk_core::message::{Message, Part};

/// Turns a sequence of full snapshots into the text not yet printed.
///
/// Parts before `cursor` are finished; the part at `cursor` may be a text
/// part that is still growing, of which `printed` bytes are already out.
#[derive(Debug, Default)]
pub struct Renderer {
    message_id: Option<String>,
    cursor: usize,
    printed: usize,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Output for `message` given everything rendered so far.
    pub fn update(&mut self, message: &Message) -> String {
        let mut out = String::new();

        if self.message_id.as_deref() != Some(message.id.as_str()) {
            out.push_str(&self.finish());
            self.message_id = Some(message.id.clone());
            self.cursor = 0;
            self.printed = 0;
        }

        let last = message.parts.len().saturating_sub(1);
        while let Some(part) = message.parts.get(self.cursor) {
            match part {
                Part::Text { content } => {
                    if self.printed > content.len() || !content.is_char_boundary(self.printed) {
                        out.push('\n');
                        self.printed = 0;
                    }
                    out.push_str(&content[self.printed..]);
                    self.printed = content.len();
                    if self.cursor == last {
                        break;
                    }
                    out.push('\n');
                }
                Part::ToolInvocation { name, output, .. } => {
                    let Some(output) = output else { break };
                    let mark = if output.success { "ok" } else { "miss" };
                    out.push_str(&format!("[{name}: {mark}] {}\n", output.message));
                }
                Part::Unknown => {}
            }
            self.cursor += 1;
            self.printed = 0;
        }

        out
    }

    /// Close the line of a text part still in progress.
    pub fn finish(&mut self) -> String {
        if self.printed > 0 {
            self.printed = 0;
            self.cursor += 1;
            "\n".into()
        } else {
            String::new()
        }
    }
}
