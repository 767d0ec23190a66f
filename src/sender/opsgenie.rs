//! Opsgenie alerts API sender.
//!
//! Only critical and high findings page anyone; everything else is accepted
//! without a request.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{execute, expect_status, ChannelKind, FindingSender, Result, SenderContext};
use crate::finding::{Finding, Severity};
use crate::formatter::truncate_chars;

/// Opsgenie limit for the alert message.
pub const MAX_MESSAGE_LENGTH: usize = 130;
/// Opsgenie limit for the alert description.
pub const MAX_DESCRIPTION_LENGTH: usize = 15000;

/// Opsgenie priority for a severity, `None` when the finding must not page.
pub fn opsgenie_priority(severity: Severity) -> Option<&'static str> {
    match severity {
        Severity::Critical => Some("P2"),
        Severity::High => Some("P3"),
        _ => None,
    }
}

#[derive(Debug, Serialize)]
struct AlertPayload<'a> {
    message: String,
    description: String,
    alias: &'a str,
    priority: &'static str,
}

pub struct OpsGenieSender {
    api_key: String,
    ctx: SenderContext,
}

impl OpsGenieSender {
    pub fn new(api_key: &str, ctx: SenderContext) -> Self {
        Self {
            api_key: api_key.to_string(),
            ctx,
        }
    }
}

#[async_trait]
impl FindingSender for OpsGenieSender {
    fn kind(&self) -> ChannelKind {
        ChannelKind::OpsGenie
    }

    async fn send_finding(&self, finding: &Finding, cancel: &CancellationToken) -> Result<()> {
        let Some(priority) = opsgenie_priority(finding.severity) else {
            debug!(
                alert_id = %finding.alert_id,
                severity = %finding.severity,
                "Severity does not page, skipping Opsgenie"
            );
            return Ok(());
        };

        let payload = AlertPayload {
            message: truncate_chars(&finding.name, MAX_MESSAGE_LENGTH),
            description: self
                .ctx
                .formatter
                .format(finding)
                .render_within(MAX_DESCRIPTION_LENGTH),
            alias: &finding.alert_id,
            priority,
        };

        let request = self
            .ctx
            .client
            .post(&self.ctx.endpoints.opsgenie_api_url)
            .header("Authorization", format!("GenieKey {}", self.api_key))
            .json(&payload);

        let response = execute(self.kind(), request, &self.ctx.metrics, cancel).await?;
        expect_status(self.kind(), response, StatusCode::ACCEPTED).await?;

        debug!(alert_id = %finding.alert_id, priority = priority, "Opsgenie alert created");
        Ok(())
    }
}
