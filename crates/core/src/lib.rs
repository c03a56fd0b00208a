//! # orderdesk core
//!
//! Domain types, traits, and error definitions for the orderdesk order
//! assistant. This crate carries no framework dependencies; the HTTP,
//! storage and model-client crates all implement against it.
//!
//! ## Layout
//!
//! - [`message`]: the streamed, part-based assistant message
//! - [`chat`]: the model-facing transcript
//! - [`provider`]: the language-model abstraction
//! - [`tool`]: tool contract and registry
//! - [`order`]: order records and the read-only store trait
//! - [`request`]: inbound query validation and the queued event
//! - [`event`]: operational domain events

pub mod error;
pub mod chat;
pub mod message;
pub mod provider;
pub mod tool;
pub mod order;
pub mod request;
pub mod event;

// Re-export key types at crate root for ergonomics
pub use error::{AuthError, Error, ProviderError, Result, StoreError, ToolError, ValidationError};
pub use chat::{ChatMessage, ChatRole, ChatToolCall};
pub use message::{ChannelPayload, Message, MessageRole, Part};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolDefinition};
pub use tool::{Tool, ToolCall, ToolOutcome, ToolRegistry};
pub use order::{Order, OrderStore, OrderSummary};
pub use request::{QueryEvent, SubmitQuery};
pub use event::{DomainEvent, EventBus};
