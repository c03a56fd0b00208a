//! Signed, scoped, short-lived subscription tokens.
//!
//! A token names one channel, a set of topics, and an expiry instant. The
//! three are signed with HMAC-SHA256 under a server secret; the wire form
//! is URL-safe base64 of the JSON body so it can ride in a query string.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use orderdesk_core::error::AuthError;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeSet;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// Bytes of entropy in a generated signing secret.
const GENERATED_SECRET_LEN: usize = 32;

/// Capability to subscribe to `topics` on `channel` until `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionToken {
    pub channel: String,
    pub topics: BTreeSet<String>,
    pub expires_at: DateTime<Utc>,
    /// Hex HMAC-SHA256 over the canonical scope string
    pub signature: String,
}

impl SubscriptionToken {
    /// Opaque string form handed to clients.
    pub fn encode(&self) -> String {
        // Serializing plain strings and a timestamp cannot fail.
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(raw: &str) -> Result<Self, AuthError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(raw.trim())
            .map_err(|e| AuthError::Malformed(format!("not base64url: {e}")))?;
        serde_json::from_slice(&bytes).map_err(|e| AuthError::Malformed(format!("bad token body: {e}")))
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn allows(&self, channel: &str, topic: &str) -> bool {
        self.channel == channel && self.topics.contains(topic)
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining(&self) -> Duration {
        (self.expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Length-prefixed so no choice of channel or topic names can collide.
fn canonical(channel: &str, topics: &BTreeSet<String>, expires_at: DateTime<Utc>) -> String {
    let mut out = format!("{}:{channel}\n{}", channel.len(), topics.len());
    for topic in topics {
        out.push_str(&format!("\n{}:{topic}", topic.len()));
    }
    out.push_str(&format!("\n{}", expires_at.timestamp_millis()));
    out
}

/// Issues and verifies [`SubscriptionToken`]s.
pub struct TokenService {
    mac: HmacSha256,
    ttl: Duration,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("mac", &"[REDACTED]")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl TokenService {
    pub fn new(secret: impl AsRef<[u8]>, ttl: Duration) -> orderdesk_core::Result<Self> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(orderdesk_core::Error::Config {
                message: "token signing secret must not be empty".into(),
            });
        }
        let mac = HmacSha256::new_from_slice(secret).map_err(|e| orderdesk_core::Error::Config {
            message: format!("invalid token signing secret: {e}"),
        })?;
        Ok(Self { mac, ttl })
    }

    /// Service keyed with a fresh random secret. Tokens do not survive a restart.
    pub fn random(ttl: Duration) -> orderdesk_core::Result<Self> {
        use rand::Rng;
        let mut secret = [0u8; GENERATED_SECRET_LEN];
        rand::rng().fill(&mut secret[..]);
        Self::new(secret, ttl)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a token for `topics` on `channel`, valid for the configured TTL.
    pub fn issue<I, S>(&self, channel: &str, topics: I) -> SubscriptionToken
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.issue_at(channel, topics, Utc::now())
    }

    pub fn issue_at<I, S>(&self, channel: &str, topics: I, now: DateTime<Utc>) -> SubscriptionToken
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let topics: BTreeSet<String> = topics.into_iter().map(Into::into).collect();
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        let expires_at = now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
        let signature = self.sign(&canonical(channel, &topics, expires_at));
        SubscriptionToken {
            channel: channel.to_string(),
            topics,
            expires_at,
            signature,
        }
    }

    /// Check signature, expiry and scope, in that order.
    pub fn validate(&self, token: &SubscriptionToken, channel: &str, topic: &str) -> Result<(), AuthError> {
        self.validate_at(token, channel, topic, Utc::now())
    }

    pub fn validate_at(
        &self,
        token: &SubscriptionToken,
        channel: &str,
        topic: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        self.verify_signature(token)?;
        if token.is_expired_at(now) {
            return Err(AuthError::Expired);
        }
        if !token.allows(channel, topic) {
            return Err(AuthError::OutOfScope {
                channel: channel.to_string(),
                topic: topic.to_string(),
            });
        }
        Ok(())
    }

    pub fn is_valid(&self, token: &SubscriptionToken, channel: &str, topic: &str) -> bool {
        self.validate(token, channel, topic).is_ok()
    }

    /// Decode the wire form and validate it in one go.
    pub fn validate_encoded(&self, raw: &str, channel: &str, topic: &str) -> Result<SubscriptionToken, AuthError> {
        let token = SubscriptionToken::decode(raw)?;
        self.validate(&token, channel, topic)?;
        Ok(token)
    }

    fn sign(&self, canonical: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(canonical.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn verify_signature(&self, token: &SubscriptionToken) -> Result<(), AuthError> {
        let provided = hex::decode(&token.signature).map_err(|_| AuthError::BadSignature)?;
        let mut mac = self.mac.clone();
        mac.update(canonical(&token.channel, &token.topics, token.expires_at).as_bytes());
        mac.verify_slice(&provided).map_err(|_| AuthError::BadSignature)
    }
}
