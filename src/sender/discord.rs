//! Discord webhook sender.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{execute, expect_status, ChannelKind, FindingSender, Result, SenderContext};
use crate::finding::Finding;

/// Discord rejects webhook content longer than this many characters.
pub const MAX_CONTENT_LENGTH: usize = 2000;

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    content: &'a str,
}

pub struct DiscordSender {
    webhook_url: String,
    ctx: SenderContext,
}

impl DiscordSender {
    pub fn new(webhook_url: &str, ctx: SenderContext) -> Self {
        Self {
            webhook_url: webhook_url.to_string(),
            ctx,
        }
    }

    pub fn content(&self, finding: &Finding) -> String {
        self.ctx
            .formatter
            .format(finding)
            .render_within(MAX_CONTENT_LENGTH)
    }
}

#[async_trait]
impl FindingSender for DiscordSender {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Discord
    }

    async fn send_finding(&self, finding: &Finding, cancel: &CancellationToken) -> Result<()> {
        let content = self.content(finding);
        let request = self
            .ctx
            .client
            .post(&self.webhook_url)
            .json(&WebhookPayload { content: &content });

        let response = execute(self.kind(), request, &self.ctx.metrics, cancel).await?;
        expect_status(self.kind(), response, StatusCode::NO_CONTENT).await?;

        debug!(alert_id = %finding.alert_id, "Discord message sent");
        Ok(())
    }
}
