//! Telegram Bot API sender.

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{execute, expect_status, ChannelKind, FindingSender, Result, SenderContext};
use crate::finding::Finding;

/// Telegram rejects messages longer than this many characters.
pub const MAX_MESSAGE_LENGTH: usize = 4096;

pub struct TelegramSender {
    bot_token: String,
    chat_id: String,
    ctx: SenderContext,
}

impl TelegramSender {
    /// `chat_id` is the numeric group id; the leading `-` Telegram expects for
    /// groups is added when missing.
    pub fn new(bot_token: &str, chat_id: &str, ctx: SenderContext) -> Self {
        let chat_id = if chat_id.starts_with('-') {
            chat_id.to_string()
        } else {
            format!("-{}", chat_id)
        };
        Self {
            bot_token: bot_token.to_string(),
            chat_id,
            ctx,
        }
    }

    /// Message text: bold finding name, then the formatted finding capped at
    /// [`MAX_MESSAGE_LENGTH`].
    pub fn message(&self, finding: &Finding) -> String {
        self.ctx
            .formatter
            .format(finding)
            .with_title(format!("*{}*", finding.name))
            .render_within(MAX_MESSAGE_LENGTH)
    }

    fn url(&self) -> String {
        format!(
            "{}/bot{}/sendMessage",
            self.ctx.endpoints.telegram_api_url.trim_end_matches('/'),
            self.bot_token
        )
    }
}

#[async_trait]
impl FindingSender for TelegramSender {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Telegram
    }

    async fn send_finding(&self, finding: &Finding, cancel: &CancellationToken) -> Result<()> {
        let text = self.message(finding);
        let request = self.ctx.client.get(self.url()).query(&[
            ("chat_id", self.chat_id.as_str()),
            ("text", text.as_str()),
            ("parse_mode", "markdown"),
            ("disable_web_page_preview", "true"),
        ]);

        let response = execute(self.kind(), request, &self.ctx.metrics, cancel).await?;
        expect_status(self.kind(), response, StatusCode::OK).await?;

        debug!(alert_id = %finding.alert_id, "Telegram message sent");
        Ok(())
    }
}
