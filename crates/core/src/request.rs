//! Inbound order questions and the event queued for the executor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Name under which query events are queued.
pub const EVENT_NAME: &str = "order-ai/query";

/// Marker used when the caller did not identify themselves.
pub const ANONYMOUS_USER: &str = "anonymous";

const MIN_ORDER_ID_LEN: usize = 3;

/// A question as submitted by the caller, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitQuery {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl SubmitQuery {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Default::default()
        }
    }

    pub fn with_order_id(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    /// Check the input and build the immutable event to enqueue.
    ///
    /// A blank `orderId` counts as absent. `userId` falls back to
    /// [`ANONYMOUS_USER`] and `sessionId` to a generated value.
    pub fn validate(self) -> std::result::Result<QueryEvent, ValidationError> {
        let question = self.question.trim();
        if question.is_empty() {
            return Err(ValidationError::new("question", "Please enter your question."));
        }

        let order_id = self
            .order_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());
        if let Some(id) = &order_id {
            if id.chars().count() < MIN_ORDER_ID_LEN {
                return Err(ValidationError::new(
                    "orderId",
                    "Order ID must be at least 3 characters long.",
                ));
            }
        }

        let submitted_at = Utc::now();
        let user_id = self
            .user_id
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| ANONYMOUS_USER.to_string());
        let session_id = self
            .session_id
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| format!("session_{}", submitted_at.timestamp_millis()));

        Ok(QueryEvent {
            id: Uuid::new_v4().to_string(),
            question: question.to_string(),
            order_id,
            user_id,
            session_id,
            submitted_at,
        })
    }
}

/// A validated question, consumed exactly once by the job executor.
///
/// The `id` doubles as the job id and the published message id, so a
/// redelivered event maps onto the same checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryEvent {
    pub id: String,
    pub question: String,
    pub order_id: Option<String>,
    pub user_id: String,
    pub session_id: String,
    pub submitted_at: DateTime<Utc>,
}
