//! In-process channel/topic fan-out.
//!
//! Each `(channel, topic)` pair owns a `tokio::sync::broadcast` sender that
//! is created on first subscribe and dropped once no receiver is left.
//! There is no replay: a subscriber sees only messages published after it
//! attached. A subscriber that falls behind skips the overwritten messages;
//! every payload is a full snapshot so the next one supersedes them.

use crate::token::{SubscriptionToken, TokenService};
use chrono::Utc;
use orderdesk_core::error::AuthError;
use orderdesk_core::event::{DomainEvent, EventBus};
use orderdesk_core::message::ChannelPayload;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_stream::StreamExt;
use tokio_stream::StreamMap;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, warn};

type TopicKey = (String, String);

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error(transparent)]
    Unauthorized(#[from] AuthError),

    #[error("Subscription must name at least one topic")]
    NoTopics,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    #[error("Subscription token expired")]
    TokenExpired,
}

/// One message as seen by a subscriber.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub topic: String,
    pub payload: Arc<ChannelPayload>,
}

pub struct ChannelBroker {
    tokens: Arc<TokenService>,
    senders: RwLock<HashMap<TopicKey, broadcast::Sender<Arc<ChannelPayload>>>>,
    capacity: usize,
    event_bus: Option<Arc<EventBus>>,
}

impl ChannelBroker {
    pub fn new(tokens: Arc<TokenService>, capacity: usize) -> Self {
        Self {
            tokens,
            senders: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            event_bus: None,
        }
    }

    /// Report token refusals on `bus`.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn tokens(&self) -> &Arc<TokenService> {
        &self.tokens
    }

    /// Deliver `payload` to every current subscriber of `(channel, topic)`.
    ///
    /// Never blocks and never fails; returns how many subscribers received it.
    pub fn publish(&self, channel: &str, topic: &str, payload: ChannelPayload) -> usize {
        let key = (channel.to_string(), topic.to_string());
        let sent = {
            let senders = self.senders.read().unwrap_or_else(PoisonError::into_inner);
            match senders.get(&key) {
                Some(sender) => sender.send(Arc::new(payload)).ok(),
                None => return 0,
            }
        };

        match sent {
            Some(receivers) => receivers,
            None => {
                let mut senders = self.senders.write().unwrap_or_else(PoisonError::into_inner);
                if senders.get(&key).is_some_and(|s| s.receiver_count() == 0) {
                    senders.remove(&key);
                    debug!(channel, topic, "Dropped idle topic");
                }
                0
            }
        }
    }

    /// Attach to `topics` on `channel`. Every topic must be covered by `token`.
    pub fn subscribe<I, S>(
        &self,
        channel: &str,
        topics: I,
        token: &SubscriptionToken,
    ) -> Result<Subscription, BrokerError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let topics: Vec<String> = topics.into_iter().map(Into::into).collect();
        if topics.is_empty() {
            return Err(BrokerError::NoTopics);
        }
        for topic in &topics {
            if let Err(e) = self.tokens.validate(token, channel, topic) {
                warn!(channel, topic = %topic, "Subscription refused: {e}");
                if let Some(bus) = &self.event_bus {
                    bus.publish(DomainEvent::TokenRejected {
                        reason: e.to_string(),
                        timestamp: Utc::now(),
                    });
                }
                return Err(e.into());
            }
        }

        let mut streams = StreamMap::new();
        {
            let mut senders = self.senders.write().unwrap_or_else(PoisonError::into_inner);
            for topic in topics {
                let sender = senders
                    .entry((channel.to_string(), topic.clone()))
                    .or_insert_with(|| broadcast::channel(self.capacity).0);
                streams.insert(topic, BroadcastStream::new(sender.subscribe()));
            }
        }

        debug!(channel, topics = streams.len(), "Subscriber attached");
        Ok(Subscription {
            channel: channel.to_string(),
            streams,
            deadline: Instant::now() + token.remaining(),
            expired: false,
        })
    }

    pub fn subscriber_count(&self, channel: &str, topic: &str) -> usize {
        let senders = self.senders.read().unwrap_or_else(PoisonError::into_inner);
        senders
            .get(&(channel.to_string(), topic.to_string()))
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

/// A live attachment to one or more topics. Dropping it unsubscribes.
pub struct Subscription {
    channel: String,
    streams: StreamMap<String, BroadcastStream<Arc<ChannelPayload>>>,
    deadline: Instant,
    expired: bool,
}

impl Subscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next delivery in publish order per topic.
    ///
    /// Yields `Err(TokenExpired)` once when the token runs out, then `None`.
    pub async fn next(&mut self) -> Option<Result<Delivery, SubscriptionError>> {
        if self.expired {
            return None;
        }
        loop {
            tokio::select! {
                biased;
                _ = tokio::time::sleep_until(self.deadline) => {
                    self.expired = true;
                    self.streams.clear();
                    return Some(Err(SubscriptionError::TokenExpired));
                }
                item = self.streams.next() => match item {
                    Some((topic, Ok(payload))) => return Some(Ok(Delivery { topic, payload })),
                    Some((topic, Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                        warn!(channel = %self.channel, topic = %topic, skipped, "Subscriber lagged");
                    }
                    None => return None,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderdesk_core::message::{Message, Part};
    use std::time::Duration;

    fn broker(ttl: Duration) -> ChannelBroker {
        let tokens = TokenService::new("broker-secret", ttl).unwrap();
        ChannelBroker::new(Arc::new(tokens), 16)
    }

    fn snapshot(text: &str) -> ChannelPayload {
        let mut message = Message::assistant("job-1");
        message.parts.push(Part::text(text));
        message.into()
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_dropped() {
        let broker = broker(Duration::from_secs(60));
        assert_eq!(broker.publish("ai", "ai", snapshot("lost")), 0);

        let token = broker.tokens().issue("ai", ["ai"]);
        let mut sub = broker.subscribe("ai", ["ai"], &token).unwrap();
        broker.publish("ai", "ai", snapshot("seen"));
        let delivery = sub.next().await.unwrap().unwrap();
        assert_eq!(delivery.topic, "ai");
        assert_eq!(delivery.payload.data.text(), "seen");
    }

    #[tokio::test]
    async fn every_subscriber_gets_every_message_in_order() {
        let broker = Arc::new(broker(Duration::from_secs(60)));
        let token = broker.tokens().issue("ai", ["ai"]);
        let mut subs: Vec<_> = (0..3)
            .map(|_| broker.subscribe("ai", ["ai"], &token).unwrap())
            .collect();
        assert_eq!(broker.subscriber_count("ai", "ai"), 3);

        let publisher = {
            let broker = broker.clone();
            tokio::spawn(async move {
                for i in 0..5 {
                    broker.publish("ai", "ai", snapshot(&format!("v{i}")));
                }
            })
        };
        publisher.await.unwrap();

        for sub in &mut subs {
            for i in 0..5 {
                let d = sub.next().await.unwrap().unwrap();
                assert_eq!(d.payload.data.text(), format!("v{i}"));
            }
        }
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let broker = broker(Duration::from_secs(60));
        let token = broker.tokens().issue("ai", ["ai", "other"]);
        let mut sub = broker.subscribe("ai", ["ai"], &token).unwrap();
        assert_eq!(broker.publish("ai", "other", snapshot("elsewhere")), 0);
        assert_eq!(broker.publish("ops", "ai", snapshot("elsewhere")), 0);
        broker.publish("ai", "ai", snapshot("here"));
        assert_eq!(sub.next().await.unwrap().unwrap().payload.data.text(), "here");
    }

    #[tokio::test]
    async fn out_of_scope_subscription_is_refused() {
        let broker = broker(Duration::from_secs(60));
        let bus = Arc::new(EventBus::new(8));
        let mut events = bus.subscribe();
        let broker = broker.with_event_bus(bus);

        let token = broker.tokens().issue("ai", ["ai"]);
        let err = broker.subscribe("ai", ["ai", "billing"], &token).err().unwrap();
        assert!(matches!(err, BrokerError::Unauthorized(AuthError::OutOfScope { .. })));
        assert_eq!(broker.subscriber_count("ai", "ai"), 0);
        assert_eq!(events.recv().await.unwrap().kind(), "token_rejected");

        assert!(matches!(
            broker.subscribe("ai", Vec::<String>::new(), &token),
            Err(BrokerError::NoTopics)
        ));
    }

    #[tokio::test]
    async fn subscription_ends_when_token_expires() {
        let broker = broker(Duration::from_millis(50));
        let token = broker.tokens().issue("ai", ["ai"]);
        let mut sub = broker.subscribe("ai", ["ai"], &token).unwrap();

        let next = tokio::time::timeout(Duration::from_secs(2), sub.next()).await.unwrap();
        assert!(matches!(next, Some(Err(SubscriptionError::TokenExpired))));
        assert!(sub.next().await.is_none());

        let late = broker.subscribe("ai", ["ai"], &token).err().unwrap();
        assert!(matches!(late, BrokerError::Unauthorized(AuthError::Expired)));
    }

    #[tokio::test]
    async fn dropped_subscribers_release_the_topic() {
        let broker = broker(Duration::from_secs(60));
        let token = broker.tokens().issue("ai", ["ai"]);
        let sub = broker.subscribe("ai", ["ai"], &token).unwrap();
        assert_eq!(broker.publish("ai", "ai", snapshot("one")), 1);
        drop(sub);
        assert_eq!(broker.publish("ai", "ai", snapshot("two")), 0);
        assert_eq!(broker.subscriber_count("ai", "ai"), 0);
    }

    #[tokio::test]
    async fn slow_subscriber_skips_to_newer_snapshots() {
        let tokens = TokenService::new("broker-secret", Duration::from_secs(60)).unwrap();
        let broker = ChannelBroker::new(Arc::new(tokens), 2);
        let token = broker.tokens().issue("ai", ["ai"]);
        let mut sub = broker.subscribe("ai", ["ai"], &token).unwrap();
        for i in 0..5 {
            broker.publish("ai", "ai", snapshot(&format!("v{i}")));
        }
        assert_eq!(sub.next().await.unwrap().unwrap().payload.data.text(), "v3");
        assert_eq!(sub.next().await.unwrap().unwrap().payload.data.text(), "v4");
    }
}
