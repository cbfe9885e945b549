use std::fmt;

use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};

use crate::{
    error::{CampaignError, Result},
    ports::{NotificationPublisher, PublishedMessage},
};

/// Publishes control events as entries of a Redis stream. Attributes become
/// extra entry fields next to `body`.
#[derive(Clone)]
pub struct RedisStreamPublisher {
    conn: ConnectionManager,
}

impl fmt::Debug for RedisStreamPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStreamPublisher")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

impl RedisStreamPublisher {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl NotificationPublisher for RedisStreamPublisher {
    async fn publish(
        &self,
        topic: &str,
        body: String,
        attributes: Vec<(String, String)>,
    ) -> Result<PublishedMessage> {
        let mut fields = Vec::with_capacity(attributes.len() + 1);
        fields.push(("body".to_owned(), body));
        fields.extend(attributes);

        let mut conn = self.conn.clone();
        let message_id: String = conn
            .xadd(topic, "*", &fields)
            .await
            .map_err(|e| CampaignError::Publish(format!("XADD {topic} failed: {e}")))?;
        Ok(PublishedMessage { message_id })
    }
}
