//! The agent reasoning loop implementation.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use orderdesk_core::chat::{ChatMessage, ChatToolCall};
use orderdesk_core::event::{DomainEvent, EventBus};
use orderdesk_core::message::Message;
use orderdesk_core::provider::{Provider, ProviderRequest, default_temperature};
use orderdesk_core::tool::{ToolCall, ToolRegistry};
use tracing::{debug, info, warn};

use crate::prompt::SYSTEM_PROMPT;
use crate::snapshot::{MessageBuilder, SnapshotSink};

/// Default cap on model round-trips per run.
pub const DEFAULT_MAX_STEPS: usize = 10;

/// What a run produced.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    /// The final snapshot
    pub message: Message,

    /// Model calls made
    pub steps: usize,

    /// False when the step cap cut the run short
    pub finished: bool,
}

/// Drives model calls and tool execution for one question.
pub struct AgentLoop {
    /// The model provider to use
    provider: Arc<dyn Provider>,

    /// The model to use
    model: String,

    /// Sampling temperature
    temperature: f32,

    /// Max tokens per response
    max_tokens: Option<u32>,

    /// Tool registry
    tools: Arc<ToolRegistry>,

    /// Fixed system instruction
    system_prompt: String,

    /// Maximum model calls per run
    max_steps: usize,

    /// Event bus for domain events
    event_bus: Option<Arc<EventBus>>,
}

impl AgentLoop {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: default_temperature(),
            max_tokens: None,
            tools,
            system_prompt: SYSTEM_PROMPT.to_string(),
            max_steps: DEFAULT_MAX_STEPS,
            event_bus: None,
        }
    }

    /// Build from the `[agent]` config section.
    pub fn from_config(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        tools: Arc<ToolRegistry>,
        config: &orderdesk_config::AgentConfig,
    ) -> Self {
        let agent = Self::new(provider, model, tools)
            .with_temperature(config.temperature)
            .with_max_steps(config.max_steps);
        match config.max_tokens {
            Some(max) => agent.with_max_tokens(max),
            None => agent,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the step cap. Values below 1 are raised to 1.
    pub fn with_max_steps(mut self, max: usize) -> Self {
        self.max_steps = max.max(1);
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Answer `prompt`, emitting a snapshot of message `message_id` to
    /// `sink` after every text delta, tool start and tool resolution.
    ///
    /// Stops when the model replies without tool calls or after
    /// `max_steps` model calls; hitting the cap is not an error and the
    /// partial message is returned. Provider errors abort the run.
    pub async fn run(
        &self,
        prompt: &str,
        message_id: &str,
        sink: &dyn SnapshotSink,
    ) -> orderdesk_core::Result<AgentOutcome> {
        let mut transcript = vec![ChatMessage::system(&self.system_prompt), ChatMessage::user(prompt)];
        let mut builder = MessageBuilder::new(message_id);
        let definitions = self.tools.definitions();
        let mut steps = 0;
        let mut finished = false;

        info!(message_id, max_steps = self.max_steps, "Agent run started");

        while steps < self.max_steps {
            steps += 1;
            debug!(message_id, step = steps, "Agent loop step");

            let request = ProviderRequest {
                model: self.model.clone(),
                messages: transcript.clone(),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                tools: definitions.clone(),
                stream: true,
            };

            let mut rx = self.provider.stream(request).await?;
            let mut text = String::new();
            let mut calls: Vec<ChatToolCall> = Vec::new();

            while let Some(chunk) = rx.recv().await {
                let chunk = chunk?;
                if let Some(delta) = chunk.content.as_deref().filter(|d| !d.is_empty()) {
                    text.push_str(delta);
                    builder.push_text(delta);
                    sink.emit(builder.snapshot());
                }
                calls.extend(chunk.tool_calls);
                if chunk.done {
                    break;
                }
            }
            builder.end_text();

            if calls.is_empty() {
                transcript.push(ChatMessage::assistant(text));
                finished = true;
                break;
            }

            for (i, call) in calls.iter_mut().enumerate() {
                if call.id.is_empty() {
                    call.id = format!("call_{steps}_{i}");
                }
            }
            debug!(message_id, tool_count = calls.len(), "Executing tool calls");
            transcript.push(ChatMessage::assistant_with_calls(text, calls.clone()));

            // Parts must appear in call order
            for call in calls {
                let arguments = serde_json::from_str(&call.arguments)
                    .unwrap_or_else(|_| serde_json::Value::String(call.arguments.clone()));

                builder.begin_tool(&call.id, &call.name, arguments.clone());
                sink.emit(builder.snapshot());

                let started = Instant::now();
                let outcome = self
                    .tools
                    .execute(&ToolCall {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        arguments,
                    })
                    .await;
                let duration_ms = started.elapsed().as_millis() as u64;

                debug!(tool = %call.name, success = outcome.success, duration_ms, "Tool resolved");
                if let Some(bus) = &self.event_bus {
                    bus.publish(DomainEvent::ToolExecuted {
                        tool_name: call.name.clone(),
                        success: outcome.success,
                        duration_ms,
                        timestamp: Utc::now(),
                    });
                }

                transcript.push(ChatMessage::tool_result(&call.id, outcome.to_model_content()));
                builder.resolve_tool(&call.id, outcome);
                sink.emit(builder.snapshot());
            }
        }

        if !finished {
            warn!(message_id, steps, "Step limit reached before a final text response");
        }
        let message = builder.finish();
        if !message.last_part().is_some_and(|p| p.is_text()) {
            debug!(message_id, "Message does not end with a text part");
        }

        info!(message_id, steps, finished, parts = message.parts.len(), "Agent run finished");
        Ok(AgentOutcome {
            message,
            steps,
            finished,
        })
    }
}
