//! Mock delivery for testing.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{BusError, Delivery, Result};

/// Disposition recorded by a [`MockDelivery`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryAction {
    Ack,
    Nak,
    Term,
}

/// In-memory delivery that records every ack protocol call.
pub struct MockDelivery {
    subject: String,
    payload: Vec<u8>,
    actions: RwLock<Vec<DeliveryAction>>,
    fail_on_ack: RwLock<bool>,
}

impl MockDelivery {
    pub fn new(subject: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            subject: subject.into(),
            payload: payload.into(),
            actions: RwLock::new(Vec::new()),
            fail_on_ack: RwLock::new(false),
        }
    }

    pub async fn set_fail_on_ack(&self, fail: bool) {
        *self.fail_on_ack.write().await = fail;
    }

    pub async fn actions(&self) -> Vec<DeliveryAction> {
        self.actions.read().await.clone()
    }

    /// The single recorded action, `None` when untouched.
    ///
    /// Panics if more than one action was recorded.
    pub async fn action(&self) -> Option<DeliveryAction> {
        let actions = self.actions.read().await;
        assert!(
            actions.len() <= 1,
            "delivery settled more than once: {:?}",
            *actions
        );
        actions.first().copied()
    }

    async fn record(&self, action: DeliveryAction) -> Result<()> {
        if *self.fail_on_ack.read().await {
            return Err(BusError::Ack("Mock ack failure".to_string()));
        }
        self.actions.write().await.push(action);
        Ok(())
    }
}

#[async_trait]
impl Delivery for MockDelivery {
    fn subject(&self) -> &str {
        &self.subject
    }

    fn payload(&self) -> &[u8] {
        &self.payload
    }

    async fn ack(&self) -> Result<()> {
        self.record(DeliveryAction::Ack).await
    }

    async fn nak(&self) -> Result<()> {
        self.record(DeliveryAction::Nak).await
    }

    async fn term(&self) -> Result<()> {
        self.record(DeliveryAction::Term).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_actions() {
        let delivery = MockDelivery::new("findings.a.b", b"{}".to_vec());
        assert_eq!(delivery.action().await, None);

        delivery.nak().await.unwrap();
        assert_eq!(delivery.action().await, Some(DeliveryAction::Nak));
        assert_eq!(delivery.subject(), "findings.a.b");
        assert_eq!(delivery.payload(), b"{}");
    }

    #[tokio::test]
    async fn test_fail_on_ack() {
        let delivery = MockDelivery::new("findings.a.b", Vec::new());
        delivery.set_fail_on_ack(true).await;

        assert!(matches!(delivery.ack().await, Err(BusError::Ack(_))));
        assert!(delivery.actions().await.is_empty());
    }
}
