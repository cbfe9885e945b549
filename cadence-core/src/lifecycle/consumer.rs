//! Sequential queue consumer shared by the mutation and budget queues.

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::{CampaignError, Result},
    metrics::LifecycleMetrics,
    ports::{MessageQueue, QueueMessage},
};

/// Applies one decoded message body.
///
/// Return [`CampaignError::Decode`] for bodies that can never be processed
/// and [`CampaignError::DoNothing`] when there was nothing to apply; both
/// let the consumer delete the message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &QueueMessage) -> Result<()>;
}

/// What happened to one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Processed,
    Skipped,
    /// Undecodable; deleted so it is not redelivered forever.
    Poison,
    /// Left on the queue for redelivery.
    Retained,
}

impl Disposition {
    pub fn as_str(self) -> &'static str {
        match self {
            Disposition::Processed => "processed",
            Disposition::Skipped => "skipped",
            Disposition::Poison => "poison",
            Disposition::Retained => "retained",
        }
    }
}

/// Polls one queue and hands messages to a handler, one at a time.
pub struct QueueConsumer {
    queue: Arc<dyn MessageQueue>,
    handler: Arc<dyn MessageHandler>,
    metrics: LifecycleMetrics,
    error_backoff: Duration,
}

impl fmt::Debug for QueueConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueConsumer")
            .field("queue", &self.queue.name())
            .field("error_backoff", &self.error_backoff)
            .finish()
    }
}

impl QueueConsumer {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        handler: Arc<dyn MessageHandler>,
        metrics: LifecycleMetrics,
        error_backoff: Duration,
    ) -> Self {
        Self {
            queue,
            handler,
            metrics,
            error_backoff,
        }
    }

    /// Polls until `shutdown` fires. A receive in progress is abandoned on
    /// shutdown; a message in progress is finished first.
    pub async fn run(self: Arc<Self>, poller: String, shutdown: CancellationToken) {
        info!(target: "cadence::reconcile", queue = %self.queue.name(), poller = %poller, "queue poller started");

        loop {
            let received = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                received = self.queue.receive() => received,
            };

            let messages = match received {
                Ok(messages) => messages,
                Err(err) => {
                    warn!(target: "cadence::reconcile", queue = %self.queue.name(), poller = %poller, error = %err, "receive failed");
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.error_backoff) => continue,
                    }
                }
            };

            for message in &messages {
                self.process(message).await;
            }
        }

        debug!(target: "cadence::reconcile", queue = %self.queue.name(), poller = %poller, "queue poller stopped");
    }

    /// Receives once and processes whatever came back.
    pub async fn poll_once(&self) -> Result<Vec<Disposition>> {
        let messages = self.queue.receive().await?;
        let mut dispositions = Vec::with_capacity(messages.len());
        for message in &messages {
            dispositions.push(self.process(message).await);
        }
        Ok(dispositions)
    }

    pub async fn process(&self, message: &QueueMessage) -> Disposition {
        let queue = self.queue.name();
        let disposition = match self.handler.handle(message).await {
            Ok(()) => Disposition::Processed,
            Err(err) if err.is_do_nothing() => {
                debug!(target: "cadence::reconcile", queue = %queue, message_id = %message.id, reason = %err, "nothing to apply");
                Disposition::Skipped
            }
            Err(CampaignError::Decode(err)) => {
                error!(
                    target: "cadence::reconcile",
                    queue = %queue,
                    message_id = %message.id,
                    body = %message.body,
                    error = %err,
                    "undecodable message; deleting"
                );
                Disposition::Poison
            }
            Err(err) => {
                error!(
                    target: "cadence::reconcile",
                    queue = %queue,
                    message_id = %message.id,
                    delivery_count = message.delivery_count,
                    error = %err,
                    "message processing failed; left for redelivery"
                );
                Disposition::Retained
            }
        };

        if disposition != Disposition::Retained
            && let Err(err) = self.queue.delete(message).await
        {
            warn!(target: "cadence::reconcile", queue = %queue, message_id = %message.id, error = %err, "failed to delete message");
        }

        self.metrics.record_queue_message(queue, disposition.as_str());
        disposition
    }
}
