//! Domain event system: operational signals from the pipeline.
//!
//! The executor and agent publish here; the gateway exposes the stream to
//! operators. Nothing on the request path depends on anyone listening.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A query was accepted and queued
    JobQueued {
        job_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A worker picked the job up
    JobStarted {
        job_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A step failed transiently and will run again
    StepRetrying {
        job_id: String,
        step: String,
        attempt: u32,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// The job finished and its final snapshot was published
    JobCompleted {
        job_id: String,
        steps: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The job gave up after exhausting retries
    JobFailed {
        job_id: String,
        attempts: u32,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed
    ToolExecuted {
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A subscription credential was refused
    TokenRejected {
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Short, stable name for the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::JobQueued { .. } => "job_queued",
            DomainEvent::JobStarted { .. } => "job_started",
            DomainEvent::StepRetrying { .. } => "step_retrying",
            DomainEvent::JobCompleted { .. } => "job_completed",
            DomainEvent::JobFailed { .. } => "job_failed",
            DomainEvent::ToolExecuted { .. } => "tool_executed",
            DomainEvent::TokenRejected { .. } => "token_rejected",
        }
    }
}

/// A broadcast-based event bus for domain events.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
