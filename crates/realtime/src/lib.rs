//! # orderdesk realtime
//!
//! Signed subscription tokens and the in-process channel broker that fans
//! assistant message snapshots out to subscribers.

pub mod broker;
pub mod token;

pub use broker::{BrokerError, ChannelBroker, Delivery, Subscription, SubscriptionError};
pub use token::{SubscriptionToken, TokenService};

use orderdesk_config::RealtimeConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Build the token service described by `config`.
///
/// Without a configured secret a random one is generated, so issued tokens
/// stop validating after a restart.
pub fn token_service(config: &RealtimeConfig) -> orderdesk_core::Result<Arc<TokenService>> {
    let ttl = Duration::from_secs(config.token_ttl_secs);
    let tokens = match config.token_secret.as_deref().filter(|s| !s.is_empty()) {
        Some(secret) => TokenService::new(secret, ttl)?,
        None => {
            warn!("No realtime.token_secret configured, generating an ephemeral one");
            TokenService::random(ttl)?
        }
    };
    Ok(Arc::new(tokens))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_secret_is_stable() {
        let config = RealtimeConfig {
            token_secret: Some("shared".into()),
            ..RealtimeConfig::default()
        };
        let token = token_service(&config).unwrap().issue("ai", ["ai"]);
        assert!(token_service(&config).unwrap().is_valid(&token, "ai", "ai"));
    }

    #[test]
    fn generated_secrets_differ() {
        let config = RealtimeConfig::default();
        let token = token_service(&config).unwrap().issue("ai", ["ai"]);
        assert!(!token_service(&config).unwrap().is_valid(&token, "ai", "ai"));
    }
}
