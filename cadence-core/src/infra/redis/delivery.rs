use std::{fmt, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{AsyncCommands, Script, aio::ConnectionManager};
use serde::Serialize;
use tracing::debug;

use cadence_model::{
    CampaignId, CampaignRecord, ContentRecord, CreativeId, CreativeRecord, DeliveryTable, GroupId,
    TouchPointId, TouchPointRecord,
};

use crate::{
    error::{CampaignError, Result},
    ports::DeliveryStore,
};

/// Sets the creative's `ttl` field and mirrors it with `EXPIREAT`, only
/// when the record exists.
fn expire_script() -> Script {
    Script::new(
        r#"
        local raw = redis.call('GET', KEYS[1])
        if not raw then
            return 0
        end
        local record = cjson.decode(raw)
        record['ttl'] = tonumber(ARGV[1])
        redis.call('SET', KEYS[1], cjson.encode(record))
        redis.call('EXPIREAT', KEYS[1], ARGV[1])
        return 1
        "#,
    )
}

/// Key layout of the delivery store.
#[derive(Debug, Clone)]
pub struct DeliveryKeys {
    prefix: Arc<str>,
}

impl DeliveryKeys {
    pub fn new(prefix: impl Into<Arc<str>>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn record(&self, table: DeliveryTable, id: impl fmt::Display) -> String {
        format!("{}{}:{}", self.prefix, table.as_str(), id)
    }

    pub fn campaign(&self, id: CampaignId) -> String {
        self.record(DeliveryTable::Campaign, id)
    }

    pub fn creative(&self, id: CreativeId) -> String {
        self.record(DeliveryTable::Creative, id)
    }

    pub fn content(&self, id: CampaignId) -> String {
        self.record(DeliveryTable::Content, id)
    }

    pub fn touch_point(&self, id: &TouchPointId, group: GroupId) -> String {
        format!(
            "{}{}:{}:{}",
            self.prefix,
            DeliveryTable::TouchPoint.as_str(),
            id,
            group
        )
    }
}

#[derive(Clone)]
pub struct RedisDeliveryStore {
    conn: ConnectionManager,
    keys: DeliveryKeys,
}

impl fmt::Debug for RedisDeliveryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisDeliveryStore")
            .field("connection", &"ConnectionManager")
            .field("keys", &self.keys)
            .finish()
    }
}

impl RedisDeliveryStore {
    pub fn new(conn: ConnectionManager, keys: DeliveryKeys) -> Self {
        Self { conn, keys }
    }

    async fn put<T: Serialize + Sync>(&self, key: String, record: &T) -> Result<()> {
        let json = serde_json::to_string(record)?;
        debug!(target: "cadence::engine", key = %key, "delivery PUT");
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(&key, json).await?;
        Ok(())
    }

    async fn delete(&self, key: String) -> Result<()> {
        debug!(target: "cadence::engine", key = %key, "delivery DELETE");
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(&key).await?;
        Ok(())
    }
}

#[async_trait]
impl DeliveryStore for RedisDeliveryStore {
    async fn put_campaign(&self, record: &CampaignRecord) -> Result<()> {
        self.put(self.keys.campaign(record.id), record).await
    }

    async fn delete_campaign(&self, id: CampaignId) -> Result<()> {
        self.delete(self.keys.campaign(id)).await
    }

    async fn put_creative(&self, record: &CreativeRecord) -> Result<()> {
        let key = self.keys.creative(record.id);
        self.put(key.clone(), record).await?;
        if let Some(ttl) = record.ttl {
            let mut conn = self.conn.clone();
            conn.expire_at::<_, ()>(&key, ttl).await?;
        }
        Ok(())
    }

    async fn expire_creative(&self, id: CreativeId, expires_at: DateTime<Utc>) -> Result<()> {
        let key = self.keys.creative(id);
        let mut conn = self.conn.clone();
        let updated: i64 = expire_script()
            .key(&key)
            .arg(expires_at.timestamp())
            .invoke_async(&mut conn)
            .await?;
        if updated == 0 {
            return Err(CampaignError::ConditionFailed(format!("{key} does not exist")));
        }
        debug!(target: "cadence::reconcile", key = %key, expires_at = %expires_at, "creative expiry set");
        Ok(())
    }

    async fn put_content(&self, record: &ContentRecord) -> Result<()> {
        self.put(self.keys.content(record.campaign_id), record).await
    }

    async fn delete_content(&self, id: CampaignId) -> Result<()> {
        self.delete(self.keys.content(id)).await
    }

    async fn put_touch_point(&self, record: &TouchPointRecord) -> Result<()> {
        self.put(
            self.keys.touch_point(&record.touch_point_id, record.group_id),
            record,
        )
        .await
    }

    async fn delete_touch_point(&self, id: &TouchPointId, group: GroupId) -> Result<()> {
        self.delete(self.keys.touch_point(id, group)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout() {
        let keys = DeliveryKeys::new("dev:");
        assert_eq!(keys.campaign(CampaignId(7)), "dev:campaign:7");
        assert_eq!(keys.creative(CreativeId(3)), "dev:creative:3");
        assert_eq!(keys.content(CampaignId(7)), "dev:content:7");
        assert_eq!(
            keys.touch_point(&TouchPointId::from("tp-1"), GroupId(2)),
            "dev:touch_point:tp-1:2"
        );
    }
}
