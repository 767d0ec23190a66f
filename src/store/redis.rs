//! Redis CoordinationStore implementation.
//!
//! Counters and statuses are plain string keys with per-key expiry. The send
//! claim runs as a Lua script so the count check and status write happen in a
//! single server-side step. The first increment of a count sets its TTL in the
//! same script, so a count never exists without an expiry.

use std::time::Duration;

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client, Script};
use tracing::{debug, info};

use super::{
    ClaimOutcome, CoordinationStore, Result, SendStatus, StoreError, SENDING_TTL, SENT_TTL,
};

/// KEYS[1] = count key, KEYS[2] = status key, ARGV[1] = quorum,
/// ARGV[2] = sending TTL in seconds.
///
/// Returns 1 when claimed, 0 when the count is below quorum, -1 when the
/// status is already past `not_send`.
const CLAIM_SCRIPT: &str = r#"
local count = tonumber(redis.call('GET', KEYS[1]) or '0')
if count < tonumber(ARGV[1]) then
    return 0
end
local status = redis.call('GET', KEYS[2])
if status and status ~= 'not_send' then
    return -1
end
redis.call('SET', KEYS[2], 'sending', 'EX', ARGV[2])
return 1
"#;

/// KEYS[1] = count key, ARGV[1] = TTL in seconds.
///
/// Returns the incremented count.
const INCR_WITH_TTL_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

/// Redis implementation of CoordinationStore.
#[derive(Clone)]
pub struct RedisCoordinationStore {
    conn: ConnectionManager,
    claim_script: Script,
    incr_script: Script,
}

impl RedisCoordinationStore {
    /// Connect to Redis.
    ///
    /// # Arguments
    /// * `url` - Redis connection URL (e.g., redis://localhost:6379)
    pub async fn new(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;

        info!(url = %url, "Connected to Redis coordination store");

        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self {
            conn,
            claim_script: Script::new(CLAIM_SCRIPT),
            incr_script: Script::new(INCR_WITH_TTL_SCRIPT),
        }
    }
}

#[async_trait]
impl CoordinationStore for RedisCoordinationStore {
    async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        let value: i64 = conn.incr(key, 1).await?;
        Ok(value)
    }

    async fn decr(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        let value: i64 = conn.decr(key, 1).await?;
        Ok(value)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let applied: bool = conn.expire(key, ttl.as_secs() as i64).await?;
        if !applied {
            debug!(key = %key, "Expire on missing key");
        }
        Ok(())
    }

    async fn get_count(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        let value: Option<i64> = conn.get(key).await?;
        Ok(value.unwrap_or(0))
    }

    async fn get_status(&self, key: &str) -> Result<SendStatus> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        match value {
            None => Ok(SendStatus::NotSend),
            Some(raw) => raw.parse(),
        }
    }

    async fn try_claim_send(
        &self,
        count_key: &str,
        status_key: &str,
        quorum: u32,
    ) -> Result<ClaimOutcome> {
        let mut conn = self.conn.clone();
        let result: i64 = self
            .claim_script
            .key(count_key)
            .key(status_key)
            .arg(quorum)
            .arg(SENDING_TTL.as_secs())
            .invoke_async(&mut conn)
            .await?;

        match result {
            1 => Ok(ClaimOutcome::Claimed),
            0 => Ok(ClaimOutcome::NotYet),
            -1 => Ok(ClaimOutcome::Lost),
            other => Err(StoreError::UnexpectedResponse(format!(
                "claim script returned {}",
                other
            ))),
        }
    }

    async fn mark_sent(&self, status_key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(status_key, SendStatus::Sent.as_str(), SENT_TTL.as_secs())
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(key).await?;
        Ok(())
    }

    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64> {
        let mut conn = self.conn.clone();
        let value: i64 = self
            .incr_script
            .key(key)
            .arg(ttl.as_secs())
            .invoke_async(&mut conn)
            .await?;
        Ok(value)
    }
}
