//! Connection lifecycle and the snapshot reducer.

use orderdesk_core::message::{ChannelPayload, Message};
use serde::{Deserialize, Serialize};

/// Where a [`SubscriptionClient`](crate::SubscriptionClient) is in its lifecycle.
///
/// `Connecting -> Active <-> RefreshingToken`; any state can move to
/// `Closing -> Closed`, or to `Error` on a failure it cannot recover from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Active,
    RefreshingToken,
    Closing,
    Closed,
    Error,
}

impl ConnectionState {
    pub fn label(self) -> &'static str {
        match self {
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Active => "Connected",
            ConnectionState::RefreshingToken => "Refreshing Token",
            ConnectionState::Closing => "Closing",
            ConnectionState::Closed => "Disconnected",
            ConnectionState::Error => "Error",
        }
    }

    /// Whether [`retry`](crate::SubscriptionClient::retry) is offered.
    pub fn can_retry(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Error)
    }

    pub fn is_live(self) -> bool {
        matches!(self, ConnectionState::Active | ConnectionState::RefreshingToken)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Folds received payloads into the latest message.
///
/// Every payload is a full snapshot, so applying one simply replaces the
/// previous message.
#[derive(Debug, Default, Clone)]
pub struct MessageReducer {
    latest: Option<Message>,
    received: usize,
}

impl MessageReducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, payload: ChannelPayload) -> &Message {
        self.received += 1;
        self.latest.insert(payload.data)
    }

    pub fn latest(&self) -> Option<&Message> {
        self.latest.as_ref()
    }

    /// Payloads applied so far.
    pub fn received(&self) -> usize {
        self.received
    }
}
