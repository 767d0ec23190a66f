//! Per-binding finding handler: quorum dedup and delivery.
//!
//! Every replica runs the same consumers. A finding published by N bot
//! instances reaches every replica N times; the shared coordination store
//! counts observations so that a finding is forwarded only after `quorum`
//! observations, and the atomic claim makes sure exactly one replica sends it.
//!
//! ```text
//! decode ──✗──→ term
//!   │
//! severity filtered ──→ ack
//!   │
//! by_quorum? ──no──→ send ──→ ack | nak
//!   │yes
//! count observation (cache + store)
//!   │
//! count < quorum ──→ ack
//!   │
//! status ──sending──→ (leave pending)
//!   │    ──sent─────→ ack, shorten key TTLs
//!   │not_send
//! claim ──not yet / lost──→ (leave pending)
//!   │claimed
//! send ──ok──→ ack, mark sent
//!      ──✗───→ undo count, release claim, nak
//! ```
//!
//! Store failures never mutate the status key; the message is nak'd and the
//! bus redelivers it.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::Delivery;
use crate::cache::{SeenCache, DEFAULT_CAPACITY, DEFAULT_TTL};
use crate::finding::{Finding, Severity};
use crate::formatter::short_key;
use crate::metrics::{Metrics, STATUS_FAIL, STATUS_OK};
use crate::routing::{RoutingError, RoutingTable, RuntimeConsumerDef};
use crate::sender::{Channel, FindingSender, SenderContext};
use crate::store::{
    ClaimOutcome, CoordinationStore, FindingKeys, SendStatus, StoreError, COUNT_TTL, SETTLED_TTL,
};

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Processed or deliberately dropped.
    Ack,
    /// Failed; the bus will redeliver.
    Nak,
    /// Undecodable; never redelivered.
    Term,
    /// Left unsettled; the bus redelivers after the ack wait.
    Pending,
}

enum Step {
    Done(Disposition),
    /// Claimed and delivered; ack, then record the send.
    Sent(FindingKeys),
}

impl From<Disposition> for Step {
    fn from(disposition: Disposition) -> Self {
        Step::Done(disposition)
    }
}

/// Handles findings for one runtime consumer.
pub struct Consumer {
    name: String,
    subject: String,
    severities: HashSet<Severity>,
    by_quorum: bool,
    quorum: u32,
    sender: Arc<dyn FindingSender>,
    store: Arc<dyn CoordinationStore>,
    metrics: Arc<Metrics>,
    cache: Mutex<SeenCache>,
}

impl Consumer {
    pub fn new(
        def: &RuntimeConsumerDef,
        quorum: u32,
        sender: Arc<dyn FindingSender>,
        store: Arc<dyn CoordinationStore>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            name: def.name.clone(),
            subject: def.subject.clone(),
            severities: def.severities.clone(),
            by_quorum: def.by_quorum,
            quorum,
            sender,
            store,
            metrics,
            cache: Mutex::new(SeenCache::new(DEFAULT_CAPACITY, DEFAULT_TTL)),
        }
    }

    /// Runtime consumer name; also the durable binding name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Process one delivery and settle it on the bus.
    pub async fn handle(&self, delivery: &dyn Delivery, cancel: &CancellationToken) -> Disposition {
        let (disposition, sent) = match self.process(delivery, cancel).await {
            Step::Done(disposition) => (disposition, None),
            Step::Sent(keys) => (Disposition::Ack, Some(keys)),
        };
        self.settle(delivery, disposition).await;

        // Ack lands before the status; a crash in between can cause one
        // duplicate send on redelivery.
        if let Some(keys) = sent {
            if let Err(e) = self.store.mark_sent(&keys.status).await {
                self.metrics.record_store_error();
                warn!(
                    consumer = %self.name,
                    key = %keys.status,
                    error = %e,
                    "Failed to mark finding sent"
                );
            }
        }
        disposition
    }

    async fn settle(&self, delivery: &dyn Delivery, disposition: Disposition) {
        let result = match disposition {
            Disposition::Ack => delivery.ack().await,
            Disposition::Nak => delivery.nak().await,
            Disposition::Term => delivery.term().await,
            Disposition::Pending => return,
        };
        if let Err(e) = result {
            warn!(
                consumer = %self.name,
                subject = %delivery.subject(),
                disposition = ?disposition,
                error = %e,
                "Failed to settle delivery"
            );
        }
    }

    async fn process(&self, delivery: &dyn Delivery, cancel: &CancellationToken) -> Step {
        let finding = match Finding::from_slice(delivery.payload()) {
            Ok(finding) => finding,
            Err(e) => {
                self.metrics.record_delivery(&self.name, STATUS_FAIL);
                warn!(
                    consumer = %self.name,
                    subject = %delivery.subject(),
                    error = %e,
                    "Undecodable finding, terminating"
                );
                return Disposition::Term.into();
            }
        };
        self.metrics.record_finding(&self.name, finding.block_number);

        if !self.severities.contains(&finding.severity) {
            debug!(
                consumer = %self.name,
                key = %short_key(&finding.unique_key),
                severity = %finding.severity,
                "Severity not routed to this consumer"
            );
            return Disposition::Ack.into();
        }

        if !self.by_quorum {
            return self.send_direct(&finding, cancel).await.into();
        }

        let keys = FindingKeys::new(&self.name, &finding.unique_key);

        let count = match self.observe(&keys, cancel).await {
            Ok(count) => count,
            Err(e) => {
                self.metrics.record_delivery(&self.name, STATUS_FAIL);
                warn!(
                    consumer = %self.name,
                    key = %short_key(&finding.unique_key),
                    error = %e,
                    "Failed to count observation"
                );
                return Disposition::Nak.into();
            }
        };

        if count < i64::from(self.quorum) {
            info!(
                consumer = %self.name,
                key = %short_key(&finding.unique_key),
                count = count,
                quorum = self.quorum,
                "Observation recorded, quorum not reached"
            );
            return Disposition::Ack.into();
        }

        let status = match self.guarded(cancel, self.store.get_status(&keys.status)).await {
            Ok(status) => status,
            Err(e) => {
                self.metrics.record_delivery(&self.name, STATUS_FAIL);
                warn!(consumer = %self.name, error = %e, "Failed to read send status");
                return Disposition::Nak.into();
            }
        };

        match status {
            SendStatus::Sending => {
                debug!(
                    consumer = %self.name,
                    key = %short_key(&finding.unique_key),
                    "Another replica is sending"
                );
                Disposition::Pending.into()
            }
            SendStatus::Sent => {
                self.settle_sent(&keys, &finding).await;
                Disposition::Ack.into()
            }
            SendStatus::NotSend => self.claim_and_send(&keys, &finding, cancel).await,
        }
    }

    async fn send_direct(&self, finding: &Finding, cancel: &CancellationToken) -> Disposition {
        match self.sender.send_finding(finding, cancel).await {
            Ok(()) => {
                self.metrics.record_delivery(&self.name, STATUS_OK);
                info!(
                    consumer = %self.name,
                    key = %short_key(&finding.unique_key),
                    alert_id = %finding.alert_id,
                    "Finding sent"
                );
                Disposition::Ack
            }
            Err(e) => {
                self.metrics.record_delivery(&self.name, STATUS_FAIL);
                warn!(
                    consumer = %self.name,
                    key = %short_key(&finding.unique_key),
                    error = %e,
                    "Failed to send finding"
                );
                Disposition::Nak
            }
        }
    }

    /// Count this replica's observation and return the shared count.
    ///
    /// The first observation increments the store; repeats only read it.
    /// Once started, the increment runs to completion even if `cancel` fires.
    async fn observe(
        &self,
        keys: &FindingKeys,
        cancel: &CancellationToken,
    ) -> Result<i64, StoreError> {
        let seen = {
            let mut cache = self.cache.lock().await;
            let seen = cache.get(&keys.count);
            cache.add(keys.count.clone(), seen.map_or(1, |n| n.saturating_add(1)));
            seen
        };

        match seen {
            Some(_) => self.guarded(cancel, self.store.get_count(&keys.count)).await,
            None if cancel.is_cancelled() => {
                self.cache.lock().await.remove(&keys.count);
                Err(StoreError::Cancelled)
            }
            None => {
                // Not raced against cancellation: an increment dropped between
                // its steps could leave a count without a TTL.
                let result = self.store.incr_with_ttl(&keys.count, COUNT_TTL).await;
                if result.is_err() {
                    self.metrics.record_store_error();
                    // Not counted, so the next delivery must increment again.
                    self.cache.lock().await.remove(&keys.count);
                }
                result
            }
        }
    }

    async fn settle_sent(&self, keys: &FindingKeys, finding: &Finding) {
        self.metrics.record_delivery(&self.name, STATUS_OK);
        self.cache.lock().await.remove(&keys.count);

        for key in [&keys.count, &keys.status] {
            if let Err(e) = self.store.expire(key, SETTLED_TTL).await {
                self.metrics.record_store_error();
                warn!(key = %key, error = %e, "Failed to shorten key TTL");
            }
        }
        debug!(
            consumer = %self.name,
            key = %short_key(&finding.unique_key),
            "Finding already sent"
        );
    }

    async fn claim_and_send(
        &self,
        keys: &FindingKeys,
        finding: &Finding,
        cancel: &CancellationToken,
    ) -> Step {
        let outcome = self
            .guarded(
                cancel,
                self.store
                    .try_claim_send(&keys.count, &keys.status, self.quorum),
            )
            .await;

        match outcome {
            Ok(ClaimOutcome::Claimed) => {}
            Ok(outcome) => {
                debug!(
                    consumer = %self.name,
                    key = %short_key(&finding.unique_key),
                    outcome = ?outcome,
                    "Send not claimed"
                );
                return Disposition::Pending.into();
            }
            Err(e) => {
                self.metrics.record_delivery(&self.name, STATUS_FAIL);
                warn!(consumer = %self.name, error = %e, "Failed to claim send");
                return Disposition::Nak.into();
            }
        }

        match self.sender.send_finding(finding, cancel).await {
            Ok(()) => {
                self.metrics.record_delivery(&self.name, STATUS_OK);
                info!(
                    consumer = %self.name,
                    key = %short_key(&finding.unique_key),
                    alert_id = %finding.alert_id,
                    "Finding sent by quorum"
                );
                Step::Sent(keys.clone())
            }
            Err(e) => {
                self.metrics.record_delivery(&self.name, STATUS_FAIL);
                warn!(
                    consumer = %self.name,
                    key = %short_key(&finding.unique_key),
                    error = %e,
                    "Failed to send finding, releasing claim"
                );
                self.release_claim(keys).await;
                Disposition::Nak.into()
            }
        }
    }

    /// Undo this replica's observation and drop the claim.
    ///
    /// Runs to completion even after cancellation so the claim is not left
    /// held until its TTL.
    async fn release_claim(&self, keys: &FindingKeys) {
        match self.store.decr(&keys.count).await {
            Ok(remaining) if remaining <= 0 => {
                if let Err(e) = self.store.delete(&keys.count).await {
                    self.metrics.record_store_error();
                    warn!(key = %keys.count, error = %e, "Failed to delete count");
                }
            }
            Ok(_) => {}
            Err(e) => {
                self.metrics.record_store_error();
                warn!(key = %keys.count, error = %e, "Failed to decrement count");
            }
        }

        if let Err(e) = self.store.delete(&keys.status).await {
            self.metrics.record_store_error();
            warn!(key = %keys.status, error = %e, "Failed to release claim");
        }

        self.cache.lock().await.remove(&keys.count);
    }

    /// Race a store call against cancellation, counting store failures.
    async fn guarded<T, F>(&self, cancel: &CancellationToken, op: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StoreError::Cancelled),
            result = op => result,
        };
        if let Err(e) = &result {
            if !matches!(e, StoreError::Cancelled) {
                self.metrics.record_store_error();
            }
        }
        result
    }
}

/// Build one consumer per runtime consumer of the routing table.
pub fn build_consumers(
    table: &RoutingTable,
    quorum: u32,
    ctx: &SenderContext,
    store: Arc<dyn CoordinationStore>,
    metrics: Arc<Metrics>,
) -> Result<Vec<Arc<Consumer>>, RoutingError> {
    table
        .runtime_consumers()
        .iter()
        .map(|def| {
            let channel = table
                .channel(def.channel_kind, &def.channel_id)
                .ok_or_else(|| RoutingError::UnknownChannel {
                    consumer: def.consumer_name.clone(),
                    kind: def.channel_kind,
                    channel_id: def.channel_id.clone(),
                })?;
            let sender: Arc<dyn FindingSender> = Arc::new(Channel::from_target(&channel.target, ctx));
            Ok(Arc::new(Consumer::new(
                def,
                quorum,
                sender,
                store.clone(),
                metrics.clone(),
            )))
        })
        .collect()
}

#[cfg(test)]
mod tests;
