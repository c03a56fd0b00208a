//! The order-assistant agent loop.
//!
//! 1. **Prompt**: system instruction plus the customer's question
//! 2. **Call the model**, streaming text into the message as it arrives
//! 3. **If tool calls**: run them one by one, recording each as a part
//!    that resolves in place, then call the model again
//! 4. **If text only**: done
//!
//! Every change to the message is handed to a [`SnapshotSink`] as a full
//! snapshot. The loop stops after a configurable number of model calls.

pub mod loop_runner;
pub mod prompt;
pub mod snapshot;

pub use loop_runner::{AgentLoop, AgentOutcome, DEFAULT_MAX_STEPS};
pub use prompt::{SYSTEM_PROMPT, user_prompt};
pub use snapshot::{CollectingSink, MessageBuilder, NoopSink, SnapshotSink};
