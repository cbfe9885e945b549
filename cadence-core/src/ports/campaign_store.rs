use async_trait::async_trait;
use chrono::{DateTime, Utc};

use cadence_model::{
    Campaign, CampaignId, Coupon, Creative, CreativeId, Gimmick, GroupId, Status, TouchPoint,
};

use crate::{error::Result, lifecycle::LifecycleEdge};

/// One page request of a claim pass.
///
/// Pages are keyed by id: `after` is the last id of the previous page, so a
/// drain never revisits a row even when earlier rows changed status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimCondition {
    pub edge: LifecycleEdge,
    /// Inclusive upper bound on the edge's boundary column.
    pub to: DateTime<Utc>,
    pub statuses: Vec<Status>,
    pub page_size: usize,
    pub after: Option<CampaignId>,
}

impl ClaimCondition {
    pub fn new(
        edge: LifecycleEdge,
        to: DateTime<Utc>,
        statuses: Vec<Status>,
        page_size: usize,
    ) -> Self {
        Self {
            edge,
            to,
            statuses,
            page_size,
            after: None,
        }
    }

    /// Whether a row falls inside this condition, ignoring the cursor.
    pub fn matches(&self, campaign: &Campaign) -> bool {
        self.statuses.contains(&campaign.status)
            && self
                .edge
                .boundary(campaign)
                .is_some_and(|boundary| boundary <= self.to)
    }

    /// Advances the cursor past `last`.
    pub fn next_page(mut self, last: CampaignId) -> Self {
        self.after = Some(last);
        self
    }
}

/// System-of-record access.
#[async_trait]
pub trait CampaignStore: Send + Sync {
    /// Fetches one page of rows matching `condition`, ordered by id.
    async fn claimable(&self, condition: &ClaimCondition) -> Result<Vec<Campaign>>;

    async fn begin(&self) -> Result<Box<dyn CampaignTransaction>>;

    async fn health_check(&self) -> Result<()>;
}

/// An open relational transaction.
///
/// Dropping without [`commit`](Self::commit) rolls back.
#[async_trait]
pub trait CampaignTransaction: Send {
    /// Re-reads the campaign row and locks it until the transaction ends.
    async fn lock_campaign(&mut self, id: CampaignId) -> Result<Option<Campaign>>;

    /// Sets the status if the row still carries `expected_updated_at`.
    ///
    /// Returns the new version token, or
    /// [`CampaignError::VersionConflict`](crate::error::CampaignError::VersionConflict)
    /// when the compare-and-swap matched nothing.
    async fn update_status(
        &mut self,
        id: CampaignId,
        status: Status,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<DateTime<Utc>>;

    async fn creatives(&mut self, id: CampaignId) -> Result<Vec<Creative>>;

    async fn coupons(&mut self, id: CampaignId) -> Result<Vec<Coupon>>;

    async fn gimmick(&mut self, id: CampaignId) -> Result<Option<Gimmick>>;

    async fn touch_points(&mut self, group: GroupId) -> Result<Vec<TouchPoint>>;

    /// Campaigns in `group` other than `excluding` that are still delivering.
    async fn count_delivering(&mut self, group: GroupId, excluding: CampaignId) -> Result<u64>;

    /// Whether any campaign still references the creative.
    async fn creative_in_use(&mut self, id: CreativeId) -> Result<bool>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
