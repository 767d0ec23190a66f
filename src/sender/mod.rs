//! Delivery of formatted findings to external notification channels.
//!
//! # Architecture
//!
//! ```text
//!                         ┌── Telegram  (GET  bot API,        expects 200)
//! Finding ──→ [Channel] ──┼── Discord   (POST webhook JSON,   expects 204)
//!                         └── Opsgenie  (POST alerts API,     expects 202)
//! ```
//!
//! The set of channel kinds is closed: [`Channel`] is an enum with one
//! variant per kind. [`FindingSender`] exists as the seam the consumer is
//! written against so it can be driven by [`MockSender`] in tests.
//!
//! Every non-success response is reported as an error; the channel APIs do not
//! distinguish permanent from transient rejections, so redelivery is left to
//! the bus.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::finding::Finding;
use crate::formatter::{truncate_chars, Formatter};
use crate::metrics::Metrics;
use crate::routing::ChannelTarget;

mod discord;
pub mod mock;
mod opsgenie;
mod telegram;

pub use discord::DiscordSender;
pub use mock::MockSender;
pub use opsgenie::{opsgenie_priority, OpsGenieSender};
pub use telegram::TelegramSender;

/// Default Telegram Bot API base URL.
pub const TELEGRAM_API_URL: &str = "https://api.telegram.org";
/// Default Opsgenie alerts endpoint.
pub const OPSGENIE_API_URL: &str = "https://api.opsgenie.com/v2/alerts";
/// Upper bound for a single channel request.
pub const MAX_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Result type for send operations.
pub type Result<T> = std::result::Result<T, SendError>;

/// Errors that can occur while delivering a finding.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{channel} returned HTTP {status}: {body}")]
    UnexpectedStatus {
        channel: ChannelKind,
        status: StatusCode,
        body: String,
    },

    #[error("Send cancelled")]
    Cancelled,

    #[error("Send rejected: {0}")]
    Rejected(String),
}

/// Kind of notification channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Telegram,
    Discord,
    OpsGenie,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Telegram => "telegram",
            ChannelKind::Discord => "discord",
            ChannelKind::OpsGenie => "opsgenie",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "telegram" => Ok(ChannelKind::Telegram),
            "discord" => Ok(ChannelKind::Discord),
            "opsgenie" => Ok(ChannelKind::OpsGenie),
            _ => Err(format!("unrecognized channel type '{}'", s)),
        }
    }
}

/// Delivers one finding to one destination.
#[async_trait]
pub trait FindingSender: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Deliver the finding. Returning `Ok` without any request is allowed
    /// when the channel deliberately ignores the finding.
    async fn send_finding(&self, finding: &Finding, cancel: &CancellationToken) -> Result<()>;
}

/// Base URLs of the channel APIs, overridable for proxies and tests.
#[derive(Debug, Clone)]
pub struct ChannelEndpoints {
    pub telegram_api_url: String,
    pub opsgenie_api_url: String,
}

impl Default for ChannelEndpoints {
    fn default() -> Self {
        Self {
            telegram_api_url: TELEGRAM_API_URL.to_string(),
            opsgenie_api_url: OPSGENIE_API_URL.to_string(),
        }
    }
}

/// Shared collaborators every sender needs.
#[derive(Clone)]
pub struct SenderContext {
    pub client: Client,
    pub formatter: Arc<Formatter>,
    pub metrics: Arc<Metrics>,
    pub endpoints: ChannelEndpoints,
}

/// Build the HTTP client used for channel delivery.
///
/// The timeout is clamped to [`MAX_REQUEST_TIMEOUT`].
pub fn build_http_client(timeout: Duration) -> Result<Client> {
    let client = Client::builder()
        .timeout(timeout.min(MAX_REQUEST_TIMEOUT))
        .build()?;
    Ok(client)
}

/// A configured notification channel.
pub enum Channel {
    Telegram(TelegramSender),
    Discord(DiscordSender),
    OpsGenie(OpsGenieSender),
}

impl Channel {
    /// Build the sender for a routing-table channel target.
    pub fn from_target(target: &ChannelTarget, ctx: &SenderContext) -> Self {
        match target {
            ChannelTarget::Telegram { bot_token, chat_id } => {
                Channel::Telegram(TelegramSender::new(bot_token, chat_id, ctx.clone()))
            }
            ChannelTarget::Discord { webhook_url } => {
                Channel::Discord(DiscordSender::new(webhook_url, ctx.clone()))
            }
            ChannelTarget::OpsGenie { api_key } => {
                Channel::OpsGenie(OpsGenieSender::new(api_key, ctx.clone()))
            }
        }
    }
}

#[async_trait]
impl FindingSender for Channel {
    fn kind(&self) -> ChannelKind {
        match self {
            Channel::Telegram(_) => ChannelKind::Telegram,
            Channel::Discord(_) => ChannelKind::Discord,
            Channel::OpsGenie(_) => ChannelKind::OpsGenie,
        }
    }

    async fn send_finding(&self, finding: &Finding, cancel: &CancellationToken) -> Result<()> {
        match self {
            Channel::Telegram(sender) => sender.send_finding(finding, cancel).await,
            Channel::Discord(sender) => sender.send_finding(finding, cancel).await,
            Channel::OpsGenie(sender) => sender.send_finding(finding, cancel).await,
        }
    }
}

/// Send a request, racing cancellation and recording latency per channel kind.
pub(crate) async fn execute(
    kind: ChannelKind,
    request: RequestBuilder,
    metrics: &Metrics,
    cancel: &CancellationToken,
) -> Result<Response> {
    let started = Instant::now();
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SendError::Cancelled),
        response = request.send() => response.map_err(SendError::from),
    };
    metrics.observe_channel_latency(kind.as_str(), started.elapsed());
    result
}

/// Check a response against the channel's single success status.
pub(crate) async fn expect_status(
    kind: ChannelKind,
    response: Response,
    expected: StatusCode,
) -> Result<()> {
    let status = response.status();
    if status == expected {
        return Ok(());
    }

    let body = response.text().await.unwrap_or_default();
    let body = truncate_chars(&body, 200);
    warn!(
        channel = %kind,
        status = %status,
        body = %body,
        "Channel returned unexpected status"
    );
    Err(SendError::UnexpectedStatus {
        channel: kind,
        status,
        body,
    })
}
