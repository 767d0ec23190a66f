//! Finding forwarder.
//!
//! Consumes monitoring findings from NATS JetStream and forwards each one to
//! Telegram, Discord or Opsgenie according to a routing table. Replicas agree
//! through Redis so a finding observed by a quorum of replicas is sent once
//! per destination.

pub mod bus;
pub mod cache;
pub mod config;
pub mod consumer;
pub mod finding;
pub mod formatter;
pub mod metrics;
pub mod routing;
pub mod sender;
pub mod server;
pub mod store;
pub mod utils;
pub mod worker;
