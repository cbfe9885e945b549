use async_trait::async_trait;
use chrono::{DateTime, Utc};

use cadence_model::{
    CampaignId, CampaignRecord, ContentRecord, CreativeId, CreativeRecord, GroupId,
    TouchPointId, TouchPointRecord,
};

use crate::error::Result;

/// Materialized view store. No transactions: every call is independent.
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    async fn put_campaign(&self, record: &CampaignRecord) -> Result<()>;

    async fn delete_campaign(&self, id: CampaignId) -> Result<()>;

    async fn put_creative(&self, record: &CreativeRecord) -> Result<()>;

    /// Moves the creative's expiry to `expires_at`. Fails with
    /// [`CampaignError::ConditionFailed`](crate::error::CampaignError::ConditionFailed)
    /// when no record exists, so an update never creates one.
    async fn expire_creative(&self, id: CreativeId, expires_at: DateTime<Utc>) -> Result<()>;

    async fn put_content(&self, record: &ContentRecord) -> Result<()>;

    async fn delete_content(&self, id: CampaignId) -> Result<()>;

    async fn put_touch_point(&self, record: &TouchPointRecord) -> Result<()>;

    async fn delete_touch_point(&self, id: &TouchPointId, group: GroupId) -> Result<()>;
}
