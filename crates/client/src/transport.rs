//! Where tokens come from and how the client attaches to the broker.
//!
//! Two pairs are provided: HTTP against a running gateway
//! ([`HttpTokenSource`], [`SseTransport`]) and in-process against a
//! [`ChannelBroker`] ([`LocalTokenSource`], [`BrokerTransport`]).

use async_trait::async_trait;
use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures::StreamExt;
use futures::stream::BoxStream;
use orderdesk_core::error::AuthError;
use orderdesk_core::message::ChannelPayload;
use orderdesk_realtime::{BrokerError, ChannelBroker, Subscription, SubscriptionError, SubscriptionToken, TokenService};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// SSE event name the gateway sends before closing an expired subscription.
pub const TOKEN_EXPIRED_EVENT: &str = "token_expired";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClientError {
    #[error("Token fetch failed: {0}")]
    TokenFetch(String),

    #[error("Subscription refused: {0}")]
    Unauthorized(#[from] AuthError),

    #[error("Subscription token expired")]
    TokenExpired,

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Issues subscription tokens.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch(&self) -> Result<SubscriptionToken, ClientError>;
}

/// Attaches to the broker with a token.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn attach(&self, token: &SubscriptionToken) -> Result<Box<dyn Feed>, ClientError>;
}

/// A live stream of payloads.
///
/// `Some(Err(TokenExpired))` asks the client to refresh; `None` means the
/// other side went away.
#[async_trait]
pub trait Feed: Send {
    async fn next(&mut self) -> Option<Result<ChannelPayload, ClientError>>;
}

// ── In-process ────────────────────────────────────────────────────────────

pub struct LocalTokenSource {
    tokens: Arc<TokenService>,
    channel: String,
    topic: String,
}

impl LocalTokenSource {
    pub fn new(tokens: Arc<TokenService>, channel: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            tokens,
            channel: channel.into(),
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl TokenSource for LocalTokenSource {
    async fn fetch(&self) -> Result<SubscriptionToken, ClientError> {
        Ok(self.tokens.issue(&self.channel, [self.topic.as_str()]))
    }
}

pub struct BrokerTransport {
    broker: Arc<ChannelBroker>,
}

impl BrokerTransport {
    pub fn new(broker: Arc<ChannelBroker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl Transport for BrokerTransport {
    async fn attach(&self, token: &SubscriptionToken) -> Result<Box<dyn Feed>, ClientError> {
        let topics: Vec<String> = token.topics.iter().cloned().collect();
        let subscription = self
            .broker
            .subscribe(&token.channel, topics, token)
            .map_err(|e| match e {
                BrokerError::Unauthorized(auth) => ClientError::Unauthorized(auth),
                BrokerError::NoTopics => ClientError::Transport(e.to_string()),
            })?;
        Ok(Box::new(BrokerFeed { subscription }))
    }
}

struct BrokerFeed {
    subscription: Subscription,
}

#[async_trait]
impl Feed for BrokerFeed {
    async fn next(&mut self) -> Option<Result<ChannelPayload, ClientError>> {
        match self.subscription.next().await? {
            Ok(delivery) => Some(Ok(delivery.payload.as_ref().clone())),
            Err(SubscriptionError::TokenExpired) => Some(Err(ClientError::TokenExpired)),
        }
    }
}

// ── HTTP ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct IssuedToken {
    token: String,
}

#[derive(Deserialize)]
struct GatewayError {
    #[serde(default)]
    error: String,
    #[serde(default)]
    code: String,
}

/// `GET {base_url}/v1/realtime/token`
pub struct HttpTokenSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTokenSource {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl TokenSource for HttpTokenSource {
    async fn fetch(&self) -> Result<SubscriptionToken, ClientError> {
        let url = format!("{}/v1/realtime/token", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ClientError::TokenFetch(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ClientError::TokenFetch(format!("{url} returned {}", response.status())));
        }
        let issued: IssuedToken = response
            .json()
            .await
            .map_err(|e| ClientError::TokenFetch(e.to_string()))?;
        Ok(SubscriptionToken::decode(&issued.token)?)
    }
}

/// `GET {base_url}/v1/realtime/subscribe?token=…` as server-sent events.
pub struct SseTransport {
    client: reqwest::Client,
    base_url: String,
}

impl SseTransport {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

/// Turn a gateway refusal back into the authorization failure behind it.
fn refusal(status: reqwest::StatusCode, body: &str, token: &SubscriptionToken) -> ClientError {
    let parsed: Option<GatewayError> = serde_json::from_str(body).ok();
    let (code, message) = match &parsed {
        Some(e) => (e.code.as_str(), e.error.clone()),
        None => ("", body.to_string()),
    };
    match (status.as_u16(), code) {
        (_, "token_expired") => AuthError::Expired.into(),
        (403, _) => AuthError::OutOfScope {
            channel: token.channel.clone(),
            topic: token.topics.iter().next().cloned().unwrap_or_default(),
        }
        .into(),
        (401, "token_invalid") => AuthError::BadSignature.into(),
        (401, _) => AuthError::Malformed(message).into(),
        _ => ClientError::Transport(format!("subscribe returned {status}: {message}")),
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn attach(&self, token: &SubscriptionToken) -> Result<Box<dyn Feed>, ClientError> {
        let url = format!("{}/v1/realtime/subscribe", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("token", token.encode())])
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(refusal(status, &body, token));
        }

        debug!(url = %url, "SSE subscription attached");
        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(|e| e.to_string()))
            .boxed();
        Ok(Box::new(SseFeed::new(bytes)))
    }
}

/// Decodes an SSE byte stream into payloads.
pub struct SseFeed {
    events: BoxStream<'static, Result<Event, EventStreamError<String>>>,
    ended: bool,
}

impl SseFeed {
    pub fn new(bytes: BoxStream<'static, Result<Vec<u8>, String>>) -> Self {
        Self {
            events: bytes.eventsource().boxed(),
            ended: false,
        }
    }
}

#[async_trait]
impl Feed for SseFeed {
    async fn next(&mut self) -> Option<Result<ChannelPayload, ClientError>> {
        while !self.ended {
            let event = match self.events.next().await? {
                Ok(event) => event,
                Err(EventStreamError::Transport(e)) => {
                    self.ended = true;
                    return Some(Err(ClientError::Transport(e)));
                }
                Err(e) => {
                    self.ended = true;
                    return Some(Err(ClientError::Transport(e.to_string())));
                }
            };

            if event.event == TOKEN_EXPIRED_EVENT {
                return Some(Err(ClientError::TokenExpired));
            }
            if event.data.is_empty() {
                continue;
            }
            match serde_json::from_str::<ChannelPayload>(&event.data) {
                Ok(payload) => return Some(Ok(payload)),
                Err(e) => warn!(event = %event.event, "Skipping undecodable payload: {e}"),
            }
        }
        None
    }
}
