use async_trait::async_trait;

use crate::error::Result;

/// Broker-assigned id of a published notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub message_id: String,
}

/// Outbound topic.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationPublisher: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        body: String,
        attributes: Vec<(String, String)>,
    ) -> Result<PublishedMessage>;
}
