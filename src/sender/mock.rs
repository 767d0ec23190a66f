//! Mock sender for testing.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::{ChannelKind, FindingSender, Result, SendError};
use crate::finding::Finding;

/// Records every finding it is asked to send.
///
/// Outcomes can be scripted per call; once the script is exhausted the
/// default outcome applies.
pub struct MockSender {
    kind: ChannelKind,
    sent: RwLock<Vec<Finding>>,
    attempts: RwLock<usize>,
    scripted: RwLock<VecDeque<bool>>,
    fail_by_default: RwLock<bool>,
}

impl MockSender {
    pub fn new(kind: ChannelKind) -> Self {
        Self {
            kind,
            sent: RwLock::new(Vec::new()),
            attempts: RwLock::new(0),
            scripted: RwLock::new(VecDeque::new()),
            fail_by_default: RwLock::new(false),
        }
    }

    pub async fn set_fail(&self, fail: bool) {
        *self.fail_by_default.write().await = fail;
    }

    /// Queue outcomes for the next calls: `true` succeeds, `false` fails.
    pub async fn script(&self, outcomes: impl IntoIterator<Item = bool>) {
        self.scripted.write().await.extend(outcomes);
    }

    /// Findings delivered successfully.
    pub async fn sent(&self) -> Vec<Finding> {
        self.sent.read().await.clone()
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.read().await.len()
    }

    /// Every call, successful or not.
    pub async fn attempts(&self) -> usize {
        *self.attempts.read().await
    }
}

#[async_trait]
impl FindingSender for MockSender {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn send_finding(&self, finding: &Finding, _cancel: &CancellationToken) -> Result<()> {
        *self.attempts.write().await += 1;

        let succeed = match self.scripted.write().await.pop_front() {
            Some(outcome) => outcome,
            None => !*self.fail_by_default.read().await,
        };
        if !succeed {
            return Err(SendError::Rejected("mock send failure".to_string()));
        }

        self.sent.write().await.push(finding.clone());
        Ok(())
    }
}
