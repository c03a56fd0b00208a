//! The subscription state machine.

use std::sync::Arc;

use orderdesk_core::message::Message;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::state::{ConnectionState, MessageReducer};
use crate::transport::{ClientError, Feed, TokenSource, Transport};

/// Follows one channel topic and keeps the latest message snapshot.
///
/// Expired tokens are refreshed transparently; any other failure parks the
/// client in [`ConnectionState::Error`] until [`retry`](Self::retry).
pub struct SubscriptionClient {
    tokens: Arc<dyn TokenSource>,
    transport: Arc<dyn Transport>,
    feed: Option<Box<dyn Feed>>,
    reducer: MessageReducer,
    state: watch::Sender<ConnectionState>,
    last_error: Option<ClientError>,
    refreshes: u32,
}

impl SubscriptionClient {
    /// Fetch a token and attach. Never fails; check [`state`](Self::state).
    pub async fn connect(tokens: Arc<dyn TokenSource>, transport: Arc<dyn Transport>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let mut client = Self {
            tokens,
            transport,
            feed: None,
            reducer: MessageReducer::new(),
            state,
            last_error: None,
            refreshes: 0,
        };
        client.establish().await;
        client
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Observe state changes, e.g. to render a status line.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn latest(&self) -> Option<&Message> {
        self.reducer.latest()
    }

    pub fn received(&self) -> usize {
        self.reducer.received()
    }

    pub fn last_error(&self) -> Option<&ClientError> {
        self.last_error.as_ref()
    }

    /// Token refreshes performed since connecting.
    pub fn refreshes(&self) -> u32 {
        self.refreshes
    }

    /// Wait for the next snapshot and return the updated latest message.
    ///
    /// Returns `None` once the client is closed or has failed. Cancel-safe:
    /// a token refresh interrupted by dropping this future is picked up
    /// again by the next call.
    pub async fn next_message(&mut self) -> Option<&Message> {
        loop {
            if !self.state().is_live() {
                return None;
            }
            if self.feed.is_none() {
                // A refresh whose future was dropped mid-attach.
                if self.state() == ConnectionState::RefreshingToken {
                    self.refresh().await;
                    continue;
                }
                self.fail(ClientError::Transport("not attached".into()));
                return None;
            }
            let Some(feed) = self.feed.as_mut() else {
                return None;
            };

            match feed.next().await {
                Some(Ok(payload)) => {
                    return Some(self.reducer.apply(payload));
                }
                Some(Err(ClientError::TokenExpired)) => {
                    self.refresh().await;
                }
                Some(Err(e)) => {
                    self.fail(e);
                    return None;
                }
                None => {
                    self.fail(ClientError::Transport("connection closed by server".into()));
                    return None;
                }
            }
        }
    }

    /// Start over from `Connecting`. Only offered in `Closed` and `Error`.
    ///
    /// Returns whether the client is active afterwards.
    pub async fn retry(&mut self) -> bool {
        if !self.state().can_retry() {
            return self.state() == ConnectionState::Active;
        }
        info!("Retrying subscription");
        self.establish().await;
        self.state() == ConnectionState::Active
    }

    /// Detach. The latest message stays readable.
    pub fn close(&mut self) {
        self.set_state(ConnectionState::Closing);
        self.feed = None;
        self.set_state(ConnectionState::Closed);
    }

    async fn establish(&mut self) {
        self.set_state(ConnectionState::Connecting);
        self.feed = None;
        match self.attach().await {
            Ok(feed) => {
                self.feed = Some(feed);
                self.last_error = None;
                self.set_state(ConnectionState::Active);
            }
            Err(e) => self.fail(e),
        }
    }

    async fn refresh(&mut self) {
        self.set_state(ConnectionState::RefreshingToken);
        self.feed = None;
        match self.attach().await {
            Ok(feed) => {
                self.refreshes += 1;
                self.feed = Some(feed);
                debug!(refreshes = self.refreshes, "Subscription token refreshed");
                self.set_state(ConnectionState::Active);
            }
            Err(e) => self.fail(e),
        }
    }

    async fn attach(&self) -> Result<Box<dyn Feed>, ClientError> {
        let token = self.tokens.fetch().await?;
        self.transport.attach(&token).await
    }

    fn fail(&mut self, error: ClientError) {
        warn!("Subscription failed: {error}");
        self.feed = None;
        self.last_error = Some(error);
        self.set_state(ConnectionState::Error);
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Connection state changed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{BrokerTransport, LocalTokenSource};
    use async_trait::async_trait;
    use orderdesk_core::error::AuthError;
    use orderdesk_core::message::{ChannelPayload, Part};
    use orderdesk_realtime::{ChannelBroker, SubscriptionToken, TokenService};
    use std::sync::Mutex;
    use std::time::Duration;

    fn snapshot(text: &str) -> ChannelPayload {
        let mut message = Message::assistant("job-1");
        message.parts.push(Part::text(text));
        message.into()
    }

    fn local(ttl: Duration) -> (Arc<TokenService>, Arc<ChannelBroker>) {
        let tokens = Arc::new(TokenService::new("client-secret", ttl).unwrap());
        let broker = Arc::new(ChannelBroker::new(tokens.clone(), 64));
        (tokens, broker)
    }

    /// Feed that replays scripted results, then ends.
    struct ScriptedFeed(Vec<Result<ChannelPayload, ClientError>>);

    #[async_trait]
    impl Feed for ScriptedFeed {
        async fn next(&mut self) -> Option<Result<ChannelPayload, ClientError>> {
            if self.0.is_empty() { None } else { Some(self.0.remove(0)) }
        }
    }

    /// Hands out scripted feeds, one per attach.
    struct ScriptedTransport(Mutex<Vec<Vec<Result<ChannelPayload, ClientError>>>>);

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn attach(&self, _token: &SubscriptionToken) -> Result<Box<dyn Feed>, ClientError> {
            let mut feeds = self.0.lock().unwrap();
            if feeds.is_empty() {
                return Err(ClientError::Transport("no more feeds".into()));
            }
            Ok(Box::new(ScriptedFeed(feeds.remove(0))))
        }
    }

    #[tokio::test]
    async fn connects_and_reduces_snapshots() {
        let (tokens, broker) = local(Duration::from_secs(60));
        let mut client = SubscriptionClient::connect(
            Arc::new(LocalTokenSource::new(tokens, "ai", "ai")),
            Arc::new(BrokerTransport::new(broker.clone())),
        )
        .await;
        assert_eq!(client.state(), ConnectionState::Active);

        broker.publish("ai", "ai", snapshot("Your"));
        broker.publish("ai", "ai", snapshot("Your order shipped."));
        assert_eq!(client.next_message().await.unwrap().text(), "Your");
        assert_eq!(client.next_message().await.unwrap().text(), "Your order shipped.");
        assert_eq!(client.received(), 2);

        client.close();
        assert_eq!(client.state(), ConnectionState::Closed);
        assert!(client.next_message().await.is_none());
        assert_eq!(client.latest().unwrap().text(), "Your order shipped.");
        assert_eq!(broker.subscriber_count("ai", "ai"), 0);
    }

    /// Issues tokens that have already run out.
    struct StaleTokenSource(Arc<TokenService>);

    #[async_trait]
    impl crate::transport::TokenSource for StaleTokenSource {
        async fn fetch(&self) -> Result<SubscriptionToken, ClientError> {
            let issued = chrono::Utc::now() - chrono::Duration::hours(1);
            Ok(self.0.issue_at("ai", ["ai"], issued))
        }
    }

    #[tokio::test]
    async fn rejected_tokens_park_the_client_in_error() {
        let (tokens, broker) = local(Duration::from_secs(60));
        let foreign = Arc::new(TokenService::new("other", Duration::from_secs(60)).unwrap());
        let client = SubscriptionClient::connect(
            Arc::new(LocalTokenSource::new(foreign, "ai", "ai")),
            Arc::new(BrokerTransport::new(broker.clone())),
        )
        .await;
        assert_eq!(client.state(), ConnectionState::Error);
        assert_eq!(
            client.last_error(),
            Some(&ClientError::Unauthorized(AuthError::BadSignature))
        );
        assert!(client.state().can_retry());

        let stale = SubscriptionClient::connect(
            Arc::new(StaleTokenSource(tokens)),
            Arc::new(BrokerTransport::new(broker)),
        )
        .await;
        assert_eq!(stale.state(), ConnectionState::Error);
        assert_eq!(stale.last_error(), Some(&ClientError::Unauthorized(AuthError::Expired)));
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_mid_stream() {
        let (tokens, broker) = local(Duration::from_millis(150));
        let mut client = SubscriptionClient::connect(
            Arc::new(LocalTokenSource::new(tokens, "ai", "ai")),
            Arc::new(BrokerTransport::new(broker.clone())),
        )
        .await;
        let mut states = client.watch_state();

        broker.publish("ai", "ai", snapshot("before"));
        assert_eq!(client.next_message().await.unwrap().text(), "before");

        let publisher = {
            let broker = broker.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                for _ in 0..50 {
                    broker.publish("ai", "ai", snapshot("after"));
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
            })
        };

        let next = tokio::time::timeout(Duration::from_secs(3), client.next_message())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.text(), "after");
        assert!(client.refreshes() >= 1);
        assert_eq!(client.state(), ConnectionState::Active);
        assert!(states.has_changed().unwrap());
        publisher.abort();
    }

    /// Delegates to a local source, sleeping before every fetch but the first.
    struct SlowTokenSource {
        inner: LocalTokenSource,
        delay: Duration,
        fetches: Mutex<u32>,
    }

    #[async_trait]
    impl crate::transport::TokenSource for SlowTokenSource {
        async fn fetch(&self) -> Result<SubscriptionToken, ClientError> {
            let first = {
                let mut fetches = self.fetches.lock().unwrap();
                *fetches += 1;
                *fetches == 1
            };
            if !first {
                tokio::time::sleep(self.delay).await;
            }
            self.inner.fetch().await
        }
    }

    #[tokio::test]
    async fn interrupted_refresh_resumes_on_next_call() {
        let (tokens, broker) = local(Duration::from_millis(100));
        let source = SlowTokenSource {
            inner: LocalTokenSource::new(tokens, "ai", "ai"),
            delay: Duration::from_millis(200),
            fetches: Mutex::new(0),
        };
        let mut client = SubscriptionClient::connect(
            Arc::new(source),
            Arc::new(BrokerTransport::new(broker.clone())),
        )
        .await;
        assert_eq!(client.state(), ConnectionState::Active);

        // Nothing is published: the token expires, and the refresh is still
        // sleeping in the token source when the caller gives up.
        let waited = tokio::time::timeout(Duration::from_millis(200), client.next_message()).await;
        assert!(waited.is_err());
        assert_eq!(client.state(), ConnectionState::RefreshingToken);

        let publisher = {
            let broker = broker.clone();
            tokio::spawn(async move {
                for _ in 0..100 {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    broker.publish("ai", "ai", snapshot("after refresh"));
                }
            })
        };

        let next = tokio::time::timeout(Duration::from_secs(3), client.next_message())
            .await
            .unwrap()
            .map(|m| m.text());
        assert_eq!(next.as_deref(), Some("after refresh"));
        assert_eq!(client.state(), ConnectionState::Active);
        assert!(client.last_error().is_none());
        assert!(client.refreshes() >= 1);
        publisher.abort();
    }

    #[tokio::test]
    async fn transport_failure_offers_retry() {
        let (tokens, _) = local(Duration::from_secs(60));
        let transport = ScriptedTransport(Mutex::new(vec![
            vec![Ok(snapshot("first")), Err(ClientError::Transport("connection reset".into()))],
            vec![Ok(snapshot("second"))],
        ]));
        let mut client = SubscriptionClient::connect(
            Arc::new(LocalTokenSource::new(tokens, "ai", "ai")),
            Arc::new(transport),
        )
        .await;

        assert_eq!(client.next_message().await.unwrap().text(), "first");
        assert!(client.next_message().await.is_none());
        assert_eq!(client.state(), ConnectionState::Error);
        assert_eq!(client.state().label(), "Error");
        assert!(matches!(client.last_error(), Some(ClientError::Transport(_))));

        assert!(client.retry().await);
        assert_eq!(client.next_message().await.unwrap().text(), "second");

        // Server hang-up is a failure too.
        assert!(client.next_message().await.is_none());
        assert_eq!(client.state(), ConnectionState::Error);
        assert!(!client.retry().await);
    }
}
