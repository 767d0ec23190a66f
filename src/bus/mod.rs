//! Message bus plumbing.
//!
//! This module contains:
//! - `Delivery` trait: one in-flight message and its ack protocol
//! - NATS JetStream binding: stream provisioning, durable pull consumers
//! - `MockDelivery`: records the final disposition for tests

use async_trait::async_trait;

pub mod mock;
pub mod nats;

pub use mock::{DeliveryAction, MockDelivery};
pub use nats::{
    binding_config, connect, ensure_stream, NatsDelivery, StreamSettings, INACTIVE_THRESHOLD,
    MAX_ACK_PENDING, MAX_DELIVER, STREAM_MAX_AGE, STREAM_MAX_MESSAGE_SIZE,
};

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Stream '{stream}' unavailable: {message}")]
    Stream { stream: String, message: String },

    #[error("Consumer '{name}' could not be bound: {message}")]
    Consumer { name: String, message: String },

    #[error("Message stream failed: {0}")]
    Messages(String),

    #[error("Acknowledgement failed: {0}")]
    Ack(String),
}

/// A message received from the bus, awaiting its disposition.
///
/// Exactly one of `ack`, `nak` or `term` should be called; dropping the
/// delivery without any leaves it to the bus ack timeout.
#[async_trait]
pub trait Delivery: Send + Sync {
    fn subject(&self) -> &str;

    fn payload(&self) -> &[u8];

    /// Processed; never redeliver.
    async fn ack(&self) -> Result<()>;

    /// Failed; redeliver (bounded by the binding's max deliveries).
    async fn nak(&self) -> Result<()>;

    /// Poison; never redeliver.
    async fn term(&self) -> Result<()>;
}
