//! In-memory CoordinationStore for testing.
//!
//! Mirrors the Redis semantics (string values, per-key expiry, atomic claim)
//! and lets tests force individual operations to fail.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    ClaimOutcome, CoordinationStore, Result, SendStatus, StoreError, SENDING_TTL, SENT_TTL,
};

/// Store operations that can be forced to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Incr,
    Decr,
    Expire,
    GetCount,
    GetStatus,
    Claim,
    MarkSent,
    Delete,
}

struct Entry {
    value: String,
    ttl: Option<Duration>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Mock coordination store that keeps keys in memory.
#[derive(Default)]
pub struct MockCoordinationStore {
    entries: RwLock<HashMap<String, Entry>>,
    failing: RwLock<HashSet<StoreOp>>,
    calls: RwLock<HashMap<StoreOp, usize>>,
}

impl MockCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail(&self, op: StoreOp, fail: bool) {
        let mut failing = self.failing.write().await;
        if fail {
            failing.insert(op);
        } else {
            failing.remove(&op);
        }
    }

    /// Number of times an operation was invoked (including failed calls).
    pub async fn calls(&self, op: StoreOp) -> usize {
        self.calls.read().await.get(&op).copied().unwrap_or(0)
    }

    /// Raw value of a live key.
    pub async fn value(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone())
    }

    /// TTL most recently applied to a live key.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .get(key)
            .filter(|e| e.is_live(now))
            .and_then(|e| e.ttl)
    }

    /// Seed a key directly, bypassing failure injection.
    pub async fn set_value(&self, key: &str, value: impl Into<String>, ttl: Option<Duration>) {
        self.entries.write().await.insert(
            key.to_string(),
            Entry {
                value: value.into(),
                ttl,
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
    }

    async fn enter(&self, op: StoreOp) -> Result<()> {
        *self.calls.write().await.entry(op).or_insert(0) += 1;
        if self.failing.read().await.contains(&op) {
            return Err(StoreError::Unavailable(format!("mock {:?} failure", op)));
        }
        Ok(())
    }

    fn live_value<'a>(entries: &'a HashMap<String, Entry>, key: &str) -> Option<&'a str> {
        let now = Instant::now();
        entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.as_str())
    }

    fn parse_count(raw: Option<&str>) -> Result<i64> {
        match raw {
            None => Ok(0),
            Some(v) => v.parse().map_err(|_| {
                StoreError::UnexpectedResponse(format!("value '{}' is not an integer", v))
            }),
        }
    }

    async fn add(&self, key: &str, delta: i64) -> Result<i64> {
        let mut entries = self.entries.write().await;
        let current = Self::parse_count(Self::live_value(&entries, key))?;
        let next = current + delta;

        let now = Instant::now();
        match entries.get_mut(key).filter(|e| e.is_live(now)) {
            Some(entry) => entry.value = next.to_string(),
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: next.to_string(),
                        ttl: None,
                        expires_at: None,
                    },
                );
            }
        }
        Ok(next)
    }
}

#[async_trait]
impl CoordinationStore for MockCoordinationStore {
    async fn incr(&self, key: &str) -> Result<i64> {
        self.enter(StoreOp::Incr).await?;
        self.add(key, 1).await
    }

    async fn decr(&self, key: &str) -> Result<i64> {
        self.enter(StoreOp::Decr).await?;
        self.add(key, -1).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.enter(StoreOp::Expire).await?;
        let now = Instant::now();
        if let Some(entry) = self
            .entries
            .write()
            .await
            .get_mut(key)
            .filter(|e| e.is_live(now))
        {
            entry.ttl = Some(ttl);
            entry.expires_at = Some(now + ttl);
        }
        Ok(())
    }

    async fn get_count(&self, key: &str) -> Result<i64> {
        self.enter(StoreOp::GetCount).await?;
        let entries = self.entries.read().await;
        Self::parse_count(Self::live_value(&entries, key))
    }

    async fn get_status(&self, key: &str) -> Result<SendStatus> {
        self.enter(StoreOp::GetStatus).await?;
        let entries = self.entries.read().await;
        match Self::live_value(&entries, key) {
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
        self.enter(StoreOp::Claim).await?;
        // Holding the write lock for the whole check-and-set keeps it atomic.
        let mut entries = self.entries.write().await;

        let count = Self::parse_count(Self::live_value(&entries, count_key))?;
        if count < i64::from(quorum) {
            return Ok(ClaimOutcome::NotYet);
        }
        match Self::live_value(&entries, status_key) {
            Some(status) if status != SendStatus::NotSend.as_str() => {
                return Ok(ClaimOutcome::Lost)
            }
            _ => {}
        }

        entries.insert(
            status_key.to_string(),
            Entry {
                value: SendStatus::Sending.as_str().to_string(),
                ttl: Some(SENDING_TTL),
                expires_at: Some(Instant::now() + SENDING_TTL),
            },
        );
        Ok(ClaimOutcome::Claimed)
    }

    async fn mark_sent(&self, status_key: &str) -> Result<()> {
        self.enter(StoreOp::MarkSent).await?;
        self.entries.write().await.insert(
            status_key.to_string(),
            Entry {
                value: SendStatus::Sent.as_str().to_string(),
                ttl: Some(SENT_TTL),
                expires_at: Some(Instant::now() + SENT_TTL),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.enter(StoreOp::Delete).await?;
        self.entries.write().await.remove(key);
        Ok(())
    }
}
