//! # orderdesk client
//!
//! Follows the realtime answer stream: fetches a scoped token, attaches
//! to the broker (over HTTP or in-process), and reduces incoming message
//! snapshots into the latest message plus a [`ConnectionState`].

pub mod client;
pub mod state;
pub mod transport;

pub use client::SubscriptionClient;
pub use state::{ConnectionState, MessageReducer};
pub use transport::{
    BrokerTransport, ClientError, Feed, HttpTokenSource, LocalTokenSource, SseFeed, SseTransport, TokenSource,
    Transport,
};
