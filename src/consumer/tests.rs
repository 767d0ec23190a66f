use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::*;
use crate::bus::{DeliveryAction, MockDelivery};
use crate::sender::{ChannelKind, MockSender};
use crate::store::{MockCoordinationStore, StoreOp, SENT_TTL};

const SUBJECT: &str = "findings.protocol.steth";
const NAME: &str = "protocol_discord_steth";

fn definition(by_quorum: bool, severities: &[Severity]) -> RuntimeConsumerDef {
    RuntimeConsumerDef {
        name: NAME.to_string(),
        consumer_name: "discord".to_string(),
        subject: SUBJECT.to_string(),
        channel_id: "dc".to_string(),
        channel_kind: ChannelKind::Discord,
        severities: severities.iter().copied().collect(),
        by_quorum,
    }
}

fn payload(unique_key: &str, severity: &str) -> Vec<u8> {
    serde_json::json!({
        "unique_key": unique_key,
        "alert_id": "X",
        "name": "N",
        "description": "D",
        "severity": severity,
        "bot_name": "b",
        "team": "Protocol",
        "block_number": 100,
    })
    .to_string()
    .into_bytes()
}

/// One replica: its own sender and cache, sharing the store and metrics.
struct Replica {
    consumer: Consumer,
    sender: Arc<MockSender>,
}

impl Replica {
    fn new(
        def: &RuntimeConsumerDef,
        quorum: u32,
        store: Arc<dyn CoordinationStore>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let sender = Arc::new(MockSender::new(ChannelKind::Discord));
        let consumer = Consumer::new(def, quorum, sender.clone(), store, metrics);
        Self { consumer, sender }
    }

    async fn deliver(&self, bytes: &[u8]) -> (Disposition, Option<DeliveryAction>) {
        let delivery = MockDelivery::new(SUBJECT, bytes.to_vec());
        let disposition = self
            .consumer
            .handle(&delivery, &CancellationToken::new())
            .await;
        (disposition, delivery.action().await)
    }
}

struct Harness {
    store: Arc<MockCoordinationStore>,
    metrics: Arc<Metrics>,
}

impl Harness {
    fn new() -> Self {
        Self {
            store: Arc::new(MockCoordinationStore::new()),
            metrics: Arc::new(Metrics::new().unwrap()),
        }
    }

    fn replica(&self, by_quorum: bool, quorum: u32) -> Replica {
        let def = definition(by_quorum, &[Severity::High, Severity::Critical]);
        Replica::new(&def, quorum, self.store.clone(), self.metrics.clone())
    }

    fn ok(&self) -> u64 {
        self.metrics.delivery_count(NAME, STATUS_OK)
    }

    fn fail(&self) -> u64 {
        self.metrics.delivery_count(NAME, STATUS_FAIL)
    }
}

fn keys(unique_key: &str) -> FindingKeys {
    FindingKeys::new(NAME, unique_key)
}

// ============================================================================
// Decode, filter, fast path
// ============================================================================

#[tokio::test]
async fn test_undecodable_payload_is_terminated() {
    let h = Harness::new();
    let replica = h.replica(true, 1);

    let (disposition, action) = replica.deliver(b"not json").await;

    assert_eq!(disposition, Disposition::Term);
    assert_eq!(action, Some(DeliveryAction::Term));
    assert_eq!(h.fail(), 1);
    assert_eq!(replica.sender.attempts().await, 0);
    assert_eq!(h.store.calls(StoreOp::Incr).await, 0);
}

#[tokio::test]
async fn test_filtered_severity_is_acked_without_send() {
    let h = Harness::new();
    let replica = h.replica(true, 1);

    let (disposition, action) = replica.deliver(&payload("abcdefgh", "low")).await;

    assert_eq!(disposition, Disposition::Ack);
    assert_eq!(action, Some(DeliveryAction::Ack));
    assert_eq!(replica.sender.attempts().await, 0);
    assert_eq!(h.store.calls(StoreOp::Incr).await, 0);
    assert_eq!(h.ok() + h.fail(), 0);
}

#[tokio::test]
async fn test_fast_path_sends_and_acks() {
    let h = Harness::new();
    let replica = h.replica(false, 3);

    let (disposition, action) = replica.deliver(&payload("abcdefgh", "high")).await;

    assert_eq!(disposition, Disposition::Ack);
    assert_eq!(action, Some(DeliveryAction::Ack));
    assert_eq!(replica.sender.sent_count().await, 1);
    assert_eq!(replica.sender.sent().await[0].alert_id, "X");
    assert_eq!(h.ok(), 1);
    // The fast path never touches the store.
    assert_eq!(h.store.calls(StoreOp::Incr).await, 0);
    assert_eq!(h.store.calls(StoreOp::GetStatus).await, 0);
}

#[tokio::test]
async fn test_fast_path_failure_naks() {
    let h = Harness::new();
    let replica = h.replica(false, 1);
    replica.sender.set_fail(true).await;

    let (disposition, action) = replica.deliver(&payload("abcdefgh", "critical")).await;

    assert_eq!(disposition, Disposition::Nak);
    assert_eq!(action, Some(DeliveryAction::Nak));
    assert_eq!(h.fail(), 1);
    assert_eq!(h.ok(), 0);
}

#[tokio::test]
async fn test_fast_path_replays_each_send() {
    let h = Harness::new();
    let replica = h.replica(false, 1);
    let bytes = payload("abcdefgh", "high");

    for _ in 0..3 {
        assert_eq!(replica.deliver(&bytes).await.0, Disposition::Ack);
    }

    assert_eq!(replica.sender.sent_count().await, 3);
    assert_eq!(h.ok(), 3);
}

// ============================================================================
// Quorum path
// ============================================================================

#[tokio::test]
async fn test_quorum_of_one_sends_and_marks_sent() {
    let h = Harness::new();
    let replica = h.replica(true, 1);
    let k = keys("abcdefgh");

    let (disposition, action) = replica.deliver(&payload("abcdefgh", "high")).await;

    assert_eq!(disposition, Disposition::Ack);
    assert_eq!(action, Some(DeliveryAction::Ack));
    assert_eq!(replica.sender.sent_count().await, 1);
    assert_eq!(h.store.value(&k.count).await.as_deref(), Some("1"));
    assert_eq!(h.store.ttl(&k.count).await, Some(COUNT_TTL));
    assert_eq!(h.store.value(&k.status).await.as_deref(), Some("sent"));
    assert_eq!(h.store.ttl(&k.status).await, Some(SENT_TTL));
    assert_eq!(h.ok(), 1);
}

#[tokio::test]
async fn test_below_quorum_is_acked_without_send() {
    let h = Harness::new();
    let replica = h.replica(true, 2);
    let k = keys("abcdefgh");

    let (disposition, action) = replica.deliver(&payload("abcdefgh", "high")).await;

    assert_eq!(disposition, Disposition::Ack);
    assert_eq!(action, Some(DeliveryAction::Ack));
    assert_eq!(replica.sender.attempts().await, 0);
    assert_eq!(h.store.value(&k.count).await.as_deref(), Some("1"));
    assert_eq!(h.store.value(&k.status).await, None);
    assert_eq!(h.store.calls(StoreOp::Claim).await, 0);
}

#[tokio::test]
async fn test_replayed_finding_is_counted_once_per_replica() {
    let h = Harness::new();
    let replica = h.replica(true, 5);
    let bytes = payload("abcdefgh", "high");

    for _ in 0..4 {
        assert_eq!(replica.deliver(&bytes).await.0, Disposition::Ack);
    }

    assert_eq!(h.store.calls(StoreOp::Incr).await, 1);
    assert_eq!(h.store.calls(StoreOp::GetCount).await, 3);
    assert_eq!(h.store.value(&keys("abcdefgh").count).await.as_deref(), Some("1"));
    assert_eq!(replica.sender.attempts().await, 0);
}

#[tokio::test]
async fn test_three_replicas_reach_quorum_and_send_once() {
    let h = Harness::new();
    let replicas: Vec<Replica> = (0..3).map(|_| h.replica(true, 3)).collect();
    let unique_key = "k1".repeat(32);
    let bytes = payload(&unique_key, "critical");
    let k = keys(&unique_key);

    assert_eq!(replicas[0].deliver(&bytes).await.0, Disposition::Ack);
    assert_eq!(replicas[1].deliver(&bytes).await.0, Disposition::Ack);
    assert_eq!(replicas[2].deliver(&bytes).await.0, Disposition::Ack);

    assert_eq!(replicas[0].sender.attempts().await, 0);
    assert_eq!(replicas[1].sender.attempts().await, 0);
    assert_eq!(replicas[2].sender.sent_count().await, 1);
    assert_eq!(h.store.value(&k.status).await.as_deref(), Some("sent"));

    // A duplicate delivery to the first replica observes the sent status.
    assert_eq!(replicas[0].deliver(&bytes).await.0, Disposition::Ack);
    assert_eq!(replicas[0].sender.attempts().await, 0);
    assert_eq!(h.store.ttl(&k.count).await, Some(SETTLED_TTL));
    assert_eq!(h.store.ttl(&k.status).await, Some(SETTLED_TTL));
    assert_eq!(h.ok(), 2);

    let total: usize = futures::future::join_all(replicas.iter().map(|r| r.sender.sent_count()))
        .await
        .into_iter()
        .sum();
    assert_eq!(total, 1);
}

#[tokio::test]
async fn test_concurrent_replicas_send_once() {
    let h = Harness::new();
    let replicas: Vec<Replica> = (0..5).map(|_| h.replica(true, 3)).collect();
    let bytes = payload("0123456789abcdef", "high");

    let handles = replicas.iter().map(|r| r.deliver(&bytes));
    futures::future::join_all(handles).await;

    let total: usize = futures::future::join_all(replicas.iter().map(|r| r.sender.sent_count()))
        .await
        .into_iter()
        .sum();
    assert_eq!(total, 1);
}

#[tokio::test]
async fn test_sent_status_clears_cache_entry() {
    let h = Harness::new();
    let replica = h.replica(true, 1);
    let bytes = payload("abcdefgh", "high");
    let k = keys("abcdefgh");

    replica.deliver(&bytes).await;
    assert_eq!(h.store.calls(StoreOp::Incr).await, 1);

    // Cache hit: reads the count, sees sent, drops the entry.
    assert_eq!(replica.deliver(&bytes).await.0, Disposition::Ack);
    assert_eq!(h.store.calls(StoreOp::GetCount).await, 1);
    assert!(!replica.consumer.cache.lock().await.contains(&k.count));

    // Next delivery is a cache miss again.
    replica.deliver(&bytes).await;
    assert_eq!(h.store.calls(StoreOp::Incr).await, 2);
    assert_eq!(replica.sender.sent_count().await, 1);
}

#[tokio::test]
async fn test_transient_send_failure_then_recovery() {
    let h = Harness::new();
    let replica = h.replica(true, 1);
    replica.sender.script([false, true]).await;
    let bytes = payload("abcdefgh", "high");
    let k = keys("abcdefgh");

    let (disposition, action) = replica.deliver(&bytes).await;
    assert_eq!(disposition, Disposition::Nak);
    assert_eq!(action, Some(DeliveryAction::Nak));
    // Count dropped to zero and was deleted; the claim was released.
    assert_eq!(h.store.value(&k.count).await, None);
    assert_eq!(h.store.value(&k.status).await, None);
    assert!(!replica.consumer.cache.lock().await.contains(&k.count));

    let (disposition, action) = replica.deliver(&bytes).await;
    assert_eq!(disposition, Disposition::Ack);
    assert_eq!(action, Some(DeliveryAction::Ack));
    assert_eq!(replica.sender.sent_count().await, 1);
    assert_eq!(h.ok(), 1);
    assert_eq!(h.fail(), 1);
}

#[tokio::test]
async fn test_send_failure_keeps_other_observations() {
    let h = Harness::new();
    let replica = h.replica(true, 2);
    replica.sender.set_fail(true).await;
    let k = keys("abcdefgh");
    // Another replica already counted the finding.
    h.store.set_value(&k.count, "1", Some(COUNT_TTL)).await;

    let (disposition, _) = replica.deliver(&payload("abcdefgh", "high")).await;

    assert_eq!(disposition, Disposition::Nak);
    assert_eq!(h.store.value(&k.count).await.as_deref(), Some("1"));
    assert_eq!(h.store.value(&k.status).await, None);
    assert_eq!(h.store.calls(StoreOp::Delete).await, 1);
}

#[tokio::test]
async fn test_sending_status_leaves_delivery_pending() {
    let h = Harness::new();
    let replica = h.replica(true, 1);
    let k = keys("abcdefgh");
    h.store.set_value(&k.status, "sending", None).await;

    let (disposition, action) = replica.deliver(&payload("abcdefgh", "high")).await;

    assert_eq!(disposition, Disposition::Pending);
    assert_eq!(action, None);
    assert_eq!(replica.sender.attempts().await, 0);
    assert_eq!(h.store.calls(StoreOp::Claim).await, 0);
}

/// Lets another "replica" win the claim between the status read and the claim.
struct RacingStore {
    inner: Arc<MockCoordinationStore>,
}

#[async_trait]
impl CoordinationStore for RacingStore {
    async fn incr(&self, key: &str) -> crate::store::Result<i64> {
        self.inner.incr(key).await
    }

    async fn decr(&self, key: &str) -> crate::store::Result<i64> {
        self.inner.decr(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> crate::store::Result<()> {
        self.inner.expire(key, ttl).await
    }

    async fn get_count(&self, key: &str) -> crate::store::Result<i64> {
        self.inner.get_count(key).await
    }

    async fn get_status(&self, key: &str) -> crate::store::Result<SendStatus> {
        self.inner.get_status(key).await
    }

    async fn try_claim_send(
        &self,
        count_key: &str,
        status_key: &str,
        quorum: u32,
    ) -> crate::store::Result<ClaimOutcome> {
        let rival = self
            .inner
            .try_claim_send(count_key, status_key, quorum)
            .await?;
        assert_eq!(rival, ClaimOutcome::Claimed);
        self.inner
            .try_claim_send(count_key, status_key, quorum)
            .await
    }

    async fn mark_sent(&self, status_key: &str) -> crate::store::Result<()> {
        self.inner.mark_sent(status_key).await
    }

    async fn delete(&self, key: &str) -> crate::store::Result<()> {
        self.inner.delete(key).await
    }
}

#[tokio::test]
async fn test_lost_claim_leaves_delivery_pending() {
    let h = Harness::new();
    let racing: Arc<dyn CoordinationStore> = Arc::new(RacingStore {
        inner: h.store.clone(),
    });
    let def = definition(true, &[Severity::High]);
    let loser = Replica::new(&def, 2, racing, h.metrics.clone());
    let k = keys("abcdefgh");
    h.store.set_value(&k.count, "1", Some(COUNT_TTL)).await;
    let bytes = payload("abcdefgh", "high");

    let (disposition, action) = loser.deliver(&bytes).await;
    assert_eq!(disposition, Disposition::Pending);
    assert_eq!(action, None);
    assert_eq!(loser.sender.attempts().await, 0);
    assert_eq!(h.store.value(&k.status).await.as_deref(), Some("sending"));

    // The winner finishes; the redelivery observes it.
    h.store.mark_sent(&k.status).await.unwrap();
    let (disposition, action) = loser.deliver(&bytes).await;
    assert_eq!(disposition, Disposition::Ack);
    assert_eq!(action, Some(DeliveryAction::Ack));
    assert_eq!(loser.sender.attempts().await, 0);
}

// ============================================================================
// Store failures
// ============================================================================

#[tokio::test]
async fn test_incr_failure_naks_and_allows_recount() {
    let h = Harness::new();
    let replica = h.replica(true, 1);
    let bytes = payload("abcdefgh", "high");
    h.store.set_fail(StoreOp::Incr, true).await;

    let (disposition, action) = replica.deliver(&bytes).await;
    assert_eq!(disposition, Disposition::Nak);
    assert_eq!(action, Some(DeliveryAction::Nak));
    assert_eq!(h.fail(), 1);
    assert_eq!(h.metrics.store_error_count(), 1);
    assert_eq!(h.store.value(&keys("abcdefgh").status).await, None);

    h.store.set_fail(StoreOp::Incr, false).await;
    let (disposition, _) = replica.deliver(&bytes).await;
    assert_eq!(disposition, Disposition::Ack);
    assert_eq!(h.store.calls(StoreOp::Incr).await, 2);
    assert_eq!(replica.sender.sent_count().await, 1);
}

#[tokio::test]
async fn test_ttl_failure_undoes_increment() {
    let h = Harness::new();
    let replica = h.replica(true, 1);
    h.store.set_fail(StoreOp::Expire, true).await;

    let (disposition, _) = replica.deliver(&payload("abcdefgh", "high")).await;

    assert_eq!(disposition, Disposition::Nak);
    assert_eq!(h.store.calls(StoreOp::Decr).await, 1);
    assert_eq!(
        h.store.value(&keys("abcdefgh").count).await.as_deref(),
        Some("0")
    );
    assert_eq!(replica.sender.attempts().await, 0);
    assert_eq!(h.fail(), 1);
}

#[tokio::test]
async fn test_status_read_failure_naks() {
    let h = Harness::new();
    let replica = h.replica(true, 1);
    h.store.set_fail(StoreOp::GetStatus, true).await;

    let (disposition, _) = replica.deliver(&payload("abcdefgh", "high")).await;

    assert_eq!(disposition, Disposition::Nak);
    assert_eq!(replica.sender.attempts().await, 0);
    assert_eq!(h.metrics.store_error_count(), 1);
}

#[tokio::test]
async fn test_claim_failure_naks_without_status_change() {
    let h = Harness::new();
    let replica = h.replica(true, 1);
    h.store.set_fail(StoreOp::Claim, true).await;

    let (disposition, _) = replica.deliver(&payload("abcdefgh", "high")).await;

    assert_eq!(disposition, Disposition::Nak);
    assert_eq!(h.store.value(&keys("abcdefgh").status).await, None);
    assert_eq!(replica.sender.attempts().await, 0);
    assert_eq!(h.fail(), 1);
}

#[tokio::test]
async fn test_mark_sent_failure_still_acks() {
    let h = Harness::new();
    let replica = h.replica(true, 1);
    h.store.set_fail(StoreOp::MarkSent, true).await;

    let (disposition, action) = replica.deliver(&payload("abcdefgh", "high")).await;

    assert_eq!(disposition, Disposition::Ack);
    assert_eq!(action, Some(DeliveryAction::Ack));
    assert_eq!(replica.sender.sent_count().await, 1);
    assert_eq!(h.ok(), 1);
    assert_eq!(h.metrics.store_error_count(), 1);
    // The claim stays until it expires.
    assert_eq!(
        h.store.value(&keys("abcdefgh").status).await.as_deref(),
        Some("sending")
    );
}

#[tokio::test]
async fn test_cancelled_store_call_naks_without_store_error() {
    let h = Harness::new();
    let replica = h.replica(true, 1);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let delivery = MockDelivery::new(SUBJECT, payload("abcdefgh", "high"));

    let disposition = replica.consumer.handle(&delivery, &cancel).await;

    assert_eq!(disposition, Disposition::Nak);
    assert_eq!(h.metrics.store_error_count(), 0);
    assert_eq!(h.store.calls(StoreOp::Incr).await, 0);
}

/// Holds the first `expire` long enough for shutdown to land between the
/// increment and its TTL.
struct SlowExpireStore {
    inner: Arc<MockCoordinationStore>,
    delayed: AtomicBool,
}

#[async_trait]
impl CoordinationStore for SlowExpireStore {
    async fn incr(&self, key: &str) -> crate::store::Result<i64> {
        self.inner.incr(key).await
    }

    async fn decr(&self, key: &str) -> crate::store::Result<i64> {
        self.inner.decr(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> crate::store::Result<()> {
        if !self.delayed.swap(true, Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        self.inner.expire(key, ttl).await
    }

    async fn get_count(&self, key: &str) -> crate::store::Result<i64> {
        self.inner.get_count(key).await
    }

    async fn get_status(&self, key: &str) -> crate::store::Result<SendStatus> {
        self.inner.get_status(key).await
    }

    async fn try_claim_send(
        &self,
        count_key: &str,
        status_key: &str,
        quorum: u32,
    ) -> crate::store::Result<ClaimOutcome> {
        self.inner
            .try_claim_send(count_key, status_key, quorum)
            .await
    }

    async fn mark_sent(&self, status_key: &str) -> crate::store::Result<()> {
        self.inner.mark_sent(status_key).await
    }

    async fn delete(&self, key: &str) -> crate::store::Result<()> {
        self.inner.delete(key).await
    }
}

#[tokio::test]
async fn test_cancel_during_increment_leaves_count_with_ttl() {
    let h = Harness::new();
    let slow: Arc<dyn CoordinationStore> = Arc::new(SlowExpireStore {
        inner: h.store.clone(),
        delayed: AtomicBool::new(false),
    });
    let def = definition(true, &[Severity::High]);
    let replica = Replica::new(&def, 2, slow, h.metrics.clone());
    let k = keys("abcdefgh");
    let bytes = payload("abcdefgh", "high");

    let cancel = CancellationToken::new();
    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        })
    };
    let delivery = MockDelivery::new(SUBJECT, bytes.clone());
    let disposition = replica.consumer.handle(&delivery, &cancel).await;
    canceller.await.unwrap();

    assert!(cancel.is_cancelled());
    assert_eq!(disposition, Disposition::Ack);
    assert_eq!(h.store.value(&k.count).await.as_deref(), Some("1"));
    assert_eq!(h.store.ttl(&k.count).await, Some(COUNT_TTL));

    // The redelivery reads the count instead of adding to it.
    let (disposition, _) = replica.deliver(&bytes).await;
    assert_eq!(disposition, Disposition::Ack);
    assert_eq!(h.store.value(&k.count).await.as_deref(), Some("1"));
    assert_eq!(h.store.calls(StoreOp::Incr).await, 1);
    assert_eq!(replica.sender.attempts().await, 0);
}

#[tracing_test::traced_test]
#[tokio::test]
async fn test_undecodable_payload_logs_subject() {
    let h = Harness::new();
    let replica = h.replica(true, 1);

    replica.deliver(b"not json").await;

    assert!(logs_contain("subject=findings.protocol.steth"));
    assert!(logs_contain("Undecodable finding"));
}

#[tokio::test]
async fn test_ack_failure_is_reported_but_not_fatal() {
    let h = Harness::new();
    let replica = h.replica(false, 1);
    let delivery = MockDelivery::new(SUBJECT, payload("abcdefgh", "high"));
    delivery.set_fail_on_ack(true).await;

    let disposition = replica
        .consumer
        .handle(&delivery, &CancellationToken::new())
        .await;

    assert_eq!(disposition, Disposition::Ack);
    assert!(delivery.actions().await.is_empty());
    assert_eq!(replica.sender.sent_count().await, 1);
}

#[tokio::test]
async fn test_short_unique_key_does_not_panic() {
    let h = Harness::new();
    let replica = h.replica(true, 1);

    let (disposition, _) = replica.deliver(&payload("abc", "high")).await;
    assert_eq!(disposition, Disposition::Ack);

    let (disposition, _) = replica.deliver(&payload("abcdefgh", "high")).await;
    assert_eq!(disposition, Disposition::Ack);
}

#[test]
fn test_accessors() {
    let h = Harness::new();
    let replica = h.replica(true, 1);
    assert_eq!(replica.consumer.name(), NAME);
    assert_eq!(replica.consumer.subject(), SUBJECT);
}

#[test]
fn test_build_consumers_from_routing_table() {
    let table = crate::routing::RoutingTable::from_yaml_str_with_env(
        r#"
severity_levels: [Low, High, Critical]
discord_channels:
  - id: dc
    webhook_url: http://127.0.0.1:9/hook
opsgenie_channels:
  - id: og
    api_key: key
consumers:
  - consumerName: discord
    type: Discord
    channel_id: dc
    severities: [High]
    by_quorum: true
    subjects: [findings.protocol.steth, findings.dao.voting]
  - consumerName: oncall
    type: OpsGenie
    channel_id: og
    severities: [Critical]
    subjects: [findings.protocol.steth]
"#,
        |_| None,
    )
    .unwrap();
    let metrics = Arc::new(Metrics::new().unwrap());
    let ctx = crate::sender::SenderContext {
        client: reqwest::Client::new(),
        formatter: Arc::new(crate::formatter::Formatter::new("test", "https://etherscan.io")),
        metrics: metrics.clone(),
        endpoints: crate::sender::ChannelEndpoints::default(),
    };

    let consumers = build_consumers(
        &table,
        2,
        &ctx,
        Arc::new(MockCoordinationStore::new()),
        metrics,
    )
    .unwrap();

    let bindings: Vec<(&str, &str)> = consumers.iter().map(|c| (c.name(), c.subject())).collect();
    assert_eq!(
        bindings,
        vec![
            ("protocol_discord_steth", "findings.protocol.steth"),
            ("dao_discord_voting", "findings.dao.voting"),
            ("protocol_oncall_steth", "findings.protocol.steth"),
        ]
    );
    assert_eq!(consumers[0].sender.kind(), ChannelKind::Discord);
    assert_eq!(consumers[2].sender.kind(), ChannelKind::OpsGenie);
    assert_eq!(consumers[0].quorum, 2);
}
