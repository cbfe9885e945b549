use std::{collections::HashMap, fmt};

use async_trait::async_trait;
use redis::{
    AsyncCommands, RedisError,
    aio::ConnectionManager,
    streams::{
        StreamAutoClaimReply, StreamId, StreamPendingCountReply, StreamReadOptions,
        StreamReadReply,
    },
};
use tracing::{debug, info};

use crate::{
    error::{CampaignError, Result},
    lifecycle::QueuePollConfig,
    ports::{MessageQueue, QueueMessage},
};

const BODY_FIELD: &str = "body";

/// Inbound queue on a Redis stream consumed through a consumer group.
///
/// Entries read but not acknowledged within the visibility timeout are
/// reclaimed by the next receive of any consumer in the group.
#[derive(Clone)]
pub struct RedisStreamQueue {
    conn: ConnectionManager,
    stream: String,
    group: String,
    consumer: String,
    config: QueuePollConfig,
}

impl fmt::Debug for RedisStreamQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStreamQueue")
            .field("stream", &self.stream)
            .field("group", &self.group)
            .field("consumer", &self.consumer)
            .field("config", &self.config)
            .finish()
    }
}

fn is_busy_group(err: &RedisError) -> bool {
    err.code() == Some("BUSYGROUP")
}

fn message(entry: &StreamId, delivery_count: u64) -> QueueMessage {
    QueueMessage {
        id: entry.id.clone(),
        receipt: entry.id.clone(),
        body: entry.get::<String>(BODY_FIELD).unwrap_or_default(),
        delivery_count,
    }
}

impl RedisStreamQueue {
    /// Opens the queue on its own connection, sized for the blocking read.
    pub async fn connect(
        redis_url: &str,
        stream: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
        config: QueuePollConfig,
    ) -> Result<Self> {
        let conn = super::connect_blocking(redis_url, config.wait_time()).await?;
        Self::open(conn, stream, group, consumer, config).await
    }

    /// Creates the consumer group (and the stream) when missing.
    ///
    /// `conn` must not be shared with other adapters and its response
    /// timeout must exceed the poll wait; see [`super::connect_blocking`].
    pub async fn open(
        conn: ConnectionManager,
        stream: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
        config: QueuePollConfig,
    ) -> Result<Self> {
        let queue = Self {
            conn,
            stream: stream.into(),
            group: group.into(),
            consumer: consumer.into(),
            config,
        };

        let mut conn = queue.conn.clone();
        match conn
            .xgroup_create_mkstream::<_, _, _, ()>(&queue.stream, &queue.group, "$")
            .await
        {
            Ok(()) => {
                info!(target: "cadence::reconcile", stream = %queue.stream, group = %queue.group, "consumer group created");
            }
            Err(err) if is_busy_group(&err) => {}
            Err(err) => return Err(err.into()),
        }
        Ok(queue)
    }

    /// Entries idle past the visibility timeout, moved to this consumer.
    async fn reclaim(&self) -> Result<Vec<QueueMessage>> {
        let mut conn = self.conn.clone();
        let reply: StreamAutoClaimReply = redis::cmd("XAUTOCLAIM")
            .arg(&self.stream)
            .arg(&self.group)
            .arg(&self.consumer)
            .arg(self.config.visibility_timeout_ms)
            .arg("0-0")
            .arg("COUNT")
            .arg(self.config.max_messages)
            .query_async(&mut conn)
            .await?;
        if reply.claimed.is_empty() {
            return Ok(Vec::new());
        }

        let pending: StreamPendingCountReply = conn
            .xpending_consumer_count(
                &self.stream,
                &self.group,
                "-",
                "+",
                self.config.max_messages.max(reply.claimed.len()),
                &self.consumer,
            )
            .await?;
        let counts: HashMap<&str, u64> = pending
            .ids
            .iter()
            .map(|p| (p.id.as_str(), p.times_delivered as u64))
            .collect();

        debug!(target: "cadence::reconcile", stream = %self.stream, reclaimed = reply.claimed.len(), "reclaimed idle entries");
        Ok(reply
            .claimed
            .iter()
            .map(|entry| message(entry, counts.get(entry.id.as_str()).copied().unwrap_or(2)))
            .collect())
    }
}

#[async_trait]
impl MessageQueue for RedisStreamQueue {
    async fn receive(&self) -> Result<Vec<QueueMessage>> {
        let reclaimed = self.reclaim().await?;
        if !reclaimed.is_empty() {
            return Ok(reclaimed);
        }

        let options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(self.config.max_messages)
            .block(self.config.wait_time_ms as usize);
        let mut conn = self.conn.clone();
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.stream], &[">"], &options)
            .await?;

        Ok(reply
            .map(|reply| {
                reply
                    .keys
                    .iter()
                    .flat_map(|key| key.ids.iter())
                    .map(|entry| message(entry, 1))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete(&self, message: &QueueMessage) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .xack(&self.stream, &self.group, &[&message.receipt])
            .xdel(&self.stream, &[&message.receipt])
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| CampaignError::Queue(format!("failed to delete {}: {e}", message.id)))
    }

    fn name(&self) -> &str {
        &self.stream
    }
}
