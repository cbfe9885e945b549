//! Redis-backed delivery store, inbound queue and outbound topic.

mod delivery;
mod publisher;
mod queue;

pub use delivery::{DeliveryKeys, RedisDeliveryStore};
pub use publisher::RedisStreamPublisher;
pub use queue::RedisStreamQueue;

use std::time::Duration;

use redis::{
    Client,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use tracing::info;

use crate::error::{CampaignError, Result};

/// Headroom a blocking stream read gets past its own `BLOCK` interval
/// before the connection gives up on the reply.
pub const BLOCKING_READ_MARGIN: Duration = Duration::from_secs(5);

/// Response timeout for a connection that issues `XREADGROUP ... BLOCK wait`.
pub fn blocking_response_timeout(wait: Duration) -> Duration {
    wait + BLOCKING_READ_MARGIN
}

fn open_client(redis_url: &str) -> Result<Client> {
    Client::open(redis_url).map_err(|e| CampaignError::KeyValue(format!("invalid redis url: {e}")))
}

/// Opens the reconnecting connection shared by the delivery store and the
/// topic publisher. Keeps the client's default response timeout, so it must
/// never carry blocking commands.
pub async fn connect(redis_url: &str) -> Result<ConnectionManager> {
    info!(target: "cadence::runtime", "connecting to redis");
    ConnectionManager::new(open_client(redis_url)?)
        .await
        .map_err(|e| CampaignError::KeyValue(format!("failed to connect to redis: {e}")))
}

/// Opens a connection dedicated to one stream consumer.
///
/// A multiplexed connection answers in order, so a parked `XREADGROUP`
/// holds back every command queued behind it. Consumers therefore never
/// share a connection with the delivery store.
pub async fn connect_blocking(redis_url: &str, wait: Duration) -> Result<ConnectionManager> {
    let response_timeout = blocking_response_timeout(wait);
    info!(
        target: "cadence::runtime",
        response_timeout_ms = response_timeout.as_millis() as u64,
        "connecting to redis for blocking stream reads"
    );
    let config = ConnectionManagerConfig::new().set_response_timeout(Some(response_timeout));
    ConnectionManager::new_with_config(open_client(redis_url)?, config)
        .await
        .map_err(|e| CampaignError::KeyValue(format!("failed to connect to redis: {e}")))
}
