//! NATS JetStream binding.
//!
//! Each runtime consumer gets one durable pull consumer on the findings
//! stream, filtered to its subject:
//!
//! ```text
//! findings stream (discard old, max age 10m, 3 MiB messages)
//!   ├── protocol_telegram_steth   filter: findings.protocol.steth
//!   ├── protocol_discord_steth    filter: findings.protocol.steth
//!   └── dao_discord_voting        filter: findings.dao.voting
//! ```
//!
//! Bindings use explicit acks with one message in flight, so each binding
//! processes findings strictly one at a time.

use std::time::Duration;

use async_nats::jetstream::consumer::{pull, AckPolicy, DeliverPolicy};
use async_nats::jetstream::stream::{self, DiscardPolicy};
use async_nats::jetstream::{self, AckKind, Context};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use super::{BusError, Delivery, Result};

/// Retention of findings on the stream.
pub const STREAM_MAX_AGE: Duration = Duration::from_secs(10 * 60);
/// Largest accepted finding payload.
pub const STREAM_MAX_MESSAGE_SIZE: i32 = 3 * 1024 * 1024;
/// Findings in flight per binding.
pub const MAX_ACK_PENDING: i64 = 1;
/// Deliveries before the bus gives up on a finding.
pub const MAX_DELIVER: i64 = 10;
/// Idle time after which the server removes an unused binding.
pub const INACTIVE_THRESHOLD: Duration = Duration::from_secs(2 * 60 * 60);

/// Stream the findings are published to.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    pub name: String,
    pub subjects: Vec<String>,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            name: "FINDINGS".to_string(),
            subjects: vec!["findings.>".to_string()],
        }
    }
}

/// Connect to a NATS server.
pub async fn connect(url: &str) -> Result<async_nats::Client> {
    async_nats::connect(url)
        .await
        .map_err(|e| BusError::Connection(e.to_string()))
}

/// Look up the findings stream, creating it when missing.
///
/// An existing stream is used as is.
pub async fn ensure_stream(js: &Context, settings: &StreamSettings) -> Result<stream::Stream> {
    let stream = js
        .get_or_create_stream(stream::Config {
            name: settings.name.clone(),
            subjects: settings.subjects.clone(),
            discard: DiscardPolicy::Old,
            max_age: STREAM_MAX_AGE,
            max_message_size: STREAM_MAX_MESSAGE_SIZE,
            ..Default::default()
        })
        .await
        .map_err(|e| BusError::Stream {
            stream: settings.name.clone(),
            message: e.to_string(),
        })?;

    info!(stream = %settings.name, subjects = ?settings.subjects, "Stream ready");
    Ok(stream)
}

/// Durable pull consumer configuration for one runtime consumer.
pub fn binding_config(name: &str, subject: &str) -> pull::Config {
    pull::Config {
        durable_name: Some(name.to_string()),
        ack_policy: AckPolicy::Explicit,
        max_ack_pending: MAX_ACK_PENDING,
        filter_subjects: vec![subject.to_string()],
        deliver_policy: DeliverPolicy::New,
        max_deliver: MAX_DELIVER,
        inactive_threshold: INACTIVE_THRESHOLD,
        ..Default::default()
    }
}

/// A JetStream message.
pub struct NatsDelivery {
    message: jetstream::Message,
}

impl NatsDelivery {
    pub fn new(message: jetstream::Message) -> Self {
        Self { message }
    }
}

#[async_trait]
impl Delivery for NatsDelivery {
    fn subject(&self) -> &str {
        self.message.subject.as_str()
    }

    fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    async fn ack(&self) -> Result<()> {
        self.message
            .ack()
            .await
            .map_err(|e| BusError::Ack(e.to_string()))
    }

    async fn nak(&self) -> Result<()> {
        self.message
            .ack_with(AckKind::Nak(None))
            .await
            .map_err(|e| BusError::Ack(e.to_string()))
    }

    async fn term(&self) -> Result<()> {
        self.message
            .ack_with(AckKind::Term)
            .await
            .map_err(|e| BusError::Ack(e.to_string()))
    }
}
