//! Coordination store shared by all replicas.
//!
//! Each runtime consumer keeps two keys per finding fingerprint:
//! - `{consumer}:finding:{key}:count`: number of replica observations
//! - `{consumer}:finding:{key}:status`: `not_send` | `sending` | `sent`
//!
//! The only multi-key transition is the send claim, which implementations
//! must execute atomically on the server. Every other operation touches a
//! single key.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

pub mod mock;
pub mod redis;

pub use mock::{MockCoordinationStore, StoreOp};
pub use self::redis::RedisCoordinationStore;

/// Lifetime of an observation count after its first increment.
pub const COUNT_TTL: Duration = Duration::from_secs(10 * 60);
/// Lifetime of a `sending` claim. Outlives the count so a crashed sender's
/// claim expires only after the fingerprint is forgotten.
pub const SENDING_TTL: Duration = Duration::from_secs(12 * 60);
/// Lifetime of a `sent` marker.
pub const SENT_TTL: Duration = Duration::from_secs(10 * 60);
/// Lifetime of both keys once a replica has observed `sent`.
pub const SETTLED_TTL: Duration = Duration::from_secs(60);

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during coordination store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Unexpected store response: {0}")]
    UnexpectedResponse(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store operation cancelled")]
    Cancelled,
}

/// Delivery status of a finding for one runtime consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    NotSend,
    Sending,
    Sent,
}

impl SendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SendStatus::NotSend => "not_send",
            SendStatus::Sending => "sending",
            SendStatus::Sent => "sent",
        }
    }
}

impl fmt::Display for SendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SendStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "not_send" => Ok(SendStatus::NotSend),
            "sending" => Ok(SendStatus::Sending),
            "sent" => Ok(SendStatus::Sent),
            other => Err(StoreError::UnexpectedResponse(format!(
                "unknown send status '{}'",
                other
            ))),
        }
    }
}

/// Outcome of the atomic send claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Status moved to `sending`; the caller owns the send.
    Claimed,
    /// The count is below quorum.
    NotYet,
    /// Another replica holds or completed the send.
    Lost,
}

/// Count and status keys for one (runtime consumer, fingerprint) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindingKeys {
    pub count: String,
    pub status: String,
}

impl FindingKeys {
    pub fn new(consumer_name: &str, unique_key: &str) -> Self {
        Self {
            count: format!("{}:finding:{}:count", consumer_name, unique_key),
            status: format!("{}:finding:{}:status", consumer_name, unique_key),
        }
    }
}

/// Typed operations over the shared key/value store.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Atomically increment a counter, returning the new value.
    async fn incr(&self, key: &str) -> Result<i64>;

    /// Atomically decrement a counter, returning the new value.
    async fn decr(&self, key: &str) -> Result<i64>;

    /// Set a key's time-to-live. Missing keys are not an error.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Read a counter; absent keys read as zero.
    async fn get_count(&self, key: &str) -> Result<i64>;

    /// Read a status; absent keys read as `not_send`.
    async fn get_status(&self, key: &str) -> Result<SendStatus>;

    /// Claim the send when `count >= quorum` and the status is unset or
    /// `not_send`, setting `sending` with [`SENDING_TTL`]. Must be atomic
    /// across both keys.
    async fn try_claim_send(
        &self,
        count_key: &str,
        status_key: &str,
        quorum: u32,
    ) -> Result<ClaimOutcome>;

    /// Record a completed send with [`SENT_TTL`].
    async fn mark_sent(&self, status_key: &str) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Increment a counter and give it `ttl` when this call created it.
    ///
    /// If setting the TTL fails the increment is undone so that failed
    /// bookkeeping never inflates the count. Implementations that can run
    /// both steps as one server-side operation should override this.
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64> {
        let count = self.incr(key).await?;
        if count == 1 {
            if let Err(e) = self.expire(key, ttl).await {
                if let Err(undo) = self.decr(key).await {
                    warn!(key = %key, error = %undo, "Failed to undo increment after TTL error");
                }
                return Err(e);
            }
        }
        Ok(count)
    }
}
