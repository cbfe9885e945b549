use async_trait::async_trait;

use crate::error::Result;

/// A received message. The receipt is what [`MessageQueue::delete`] needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub id: String,
    pub receipt: String,
    pub body: String,
    /// How many times this message has been handed out, including this one.
    pub delivery_count: u64,
}

/// Inbound queue with visibility-timeout semantics: a received message that
/// is not deleted becomes receivable again once the timeout elapses.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Long-polls for up to the configured number of messages. An empty
    /// vector means the wait elapsed without traffic.
    async fn receive(&self) -> Result<Vec<QueueMessage>>;

    async fn delete(&self, message: &QueueMessage) -> Result<()>;

    /// Queue name for logs and metrics labels.
    fn name(&self) -> &str;
}
