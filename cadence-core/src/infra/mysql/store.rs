use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use sqlx::{MySql, MySqlPool, QueryBuilder, Transaction};
use tracing::debug;

use cadence_model::{
    Campaign, CampaignId, Coupon, Creative, CreativeId, Gimmick, GroupId, Status, TouchPoint,
};

use super::rows::{CAMPAIGN_COLUMNS, CampaignRow, CouponRow, CreativeRow, GimmickRow, TouchPointRow};
use crate::{
    error::{CampaignError, Result},
    lifecycle::LifecycleEdge,
    ports::{CampaignStore, CampaignTransaction, ClaimCondition},
};

/// `DATETIME(6)` keeps microseconds; anything finer would break the
/// compare-and-swap on the next read.
fn version_after(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now()
        .duration_trunc(TimeDelta::microseconds(1))
        .unwrap_or_else(|_| Utc::now());
    now.max(previous + TimeDelta::microseconds(1))
}

fn boundary_column(edge: LifecycleEdge) -> &'static str {
    match edge {
        LifecycleEdge::Start => "c.start_at",
        LifecycleEdge::End => "c.end_at",
    }
}

#[derive(Clone)]
pub struct MySqlCampaignStore {
    pool: MySqlPool,
}

impl fmt::Debug for MySqlCampaignStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MySqlCampaignStore")
            .field("pool_size", &self.pool.size())
            .field("idle", &self.pool.num_idle())
            .finish()
    }
}

impl MySqlCampaignStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

#[async_trait]
impl CampaignStore for MySqlCampaignStore {
    async fn claimable(&self, condition: &ClaimCondition) -> Result<Vec<Campaign>> {
        let mut builder = QueryBuilder::<MySql>::new("SELECT ");
        builder.push(CAMPAIGN_COLUMNS);
        builder.push(
            r#"
            FROM campaign c
            INNER JOIN store_group sg ON c.store_group_id = sg.id
            WHERE "#,
        );
        builder.push(boundary_column(condition.edge));
        builder.push(" <= ");
        builder.push_bind(condition.to);

        builder.push(" AND c.status IN (");
        let mut statuses = builder.separated(", ");
        for status in &condition.statuses {
            statuses.push_bind(status.as_str());
        }
        statuses.push_unseparated(")");

        if let Some(after) = condition.after {
            builder.push(" AND c.id > ");
            builder.push_bind(after.get());
        }
        builder.push(" ORDER BY c.id LIMIT ");
        builder.push_bind(condition.page_size as i64);

        let rows = builder
            .build_query_as::<CampaignRow>()
            .fetch_all(&self.pool)
            .await?;
        debug!(
            target: "cadence::claim",
            edge = %condition.edge,
            rows = rows.len(),
            after = ?condition.after,
            "claim page query"
        );
        rows.into_iter().map(Campaign::try_from).collect()
    }

    async fn begin(&self) -> Result<Box<dyn CampaignTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(MySqlCampaignTransaction { tx }))
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

pub struct MySqlCampaignTransaction {
    tx: Transaction<'static, MySql>,
}

impl fmt::Debug for MySqlCampaignTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MySqlCampaignTransaction").finish_non_exhaustive()
    }
}

#[async_trait]
impl CampaignTransaction for MySqlCampaignTransaction {
    async fn lock_campaign(&mut self, id: CampaignId) -> Result<Option<Campaign>> {
        let query = format!(
            "SELECT {CAMPAIGN_COLUMNS}
            FROM campaign c
            INNER JOIN store_group sg ON c.store_group_id = sg.id
            WHERE c.id = ?
            FOR UPDATE"
        );
        let row = sqlx::query_as::<_, CampaignRow>(&query)
            .bind(id.get())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(Campaign::try_from).transpose()
    }

    async fn update_status(
        &mut self,
        id: CampaignId,
        status: Status,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        let updated_at = version_after(expected_updated_at);
        let result = sqlx::query(
            r#"
            UPDATE campaign
            SET status = ?, updated_at = ?
            WHERE id = ? AND updated_at = ?
            "#,
        )
        .bind(status.as_str())
        .bind(updated_at)
        .bind(id.get())
        .bind(expected_updated_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CampaignError::VersionConflict(id));
        }
        Ok(updated_at)
    }

    async fn creatives(&mut self, id: CampaignId) -> Result<Vec<Creative>> {
        let rows = sqlx::query_as::<_, CreativeRow>(
            r#"
            SELECT
                creative.id AS id,
                CASE
                    WHEN banner.id IS NOT NULL THEN 'banner'
                    ELSE 'video'
                END AS kind,
                COALESCE(banner.img_url, video.video_url) AS url,
                creative.click_url AS link,
                CAST(COALESCE(banner.width, video.width) AS DOUBLE) AS width,
                CAST(COALESCE(banner.height, video.height) AS DOUBLE) AS height,
                COALESCE(banner.extension, video.extension) AS extension,
                video.duration AS duration,
                video.skip_offset AS skip_offset,
                video.endcard_url AS end_card_url,
                CAST(video.endcard_width AS DOUBLE) AS end_card_width,
                CAST(video.endcard_height AS DOUBLE) AS end_card_height,
                video.endcard_extension AS end_card_extension,
                video.endcard_link AS end_card_link
            FROM campaign_creative
            INNER JOIN creative ON campaign_creative.creative_id = creative.id
            LEFT JOIN banner ON creative.banner_id = banner.id
            LEFT JOIN video ON creative.video_id = video.id
            WHERE campaign_creative.campaign_id = ?
              AND (banner.id IS NOT NULL OR video.id IS NOT NULL)
            ORDER BY creative.id
            "#,
        )
        .bind(id.get())
        .fetch_all(&mut *self.tx)
        .await?;
        rows.into_iter().map(Creative::try_from).collect()
    }

    async fn coupons(&mut self, id: CampaignId) -> Result<Vec<Coupon>> {
        let rows = sqlx::query_as::<_, CouponRow>(
            r#"
            SELECT
                coupon.id AS id,
                coupon.name AS name,
                coupon.code AS code,
                coupon.img_url AS image_url,
                campaign_coupon.delivery_rate AS rate
            FROM campaign_coupon
            INNER JOIN coupon ON campaign_coupon.coupon_id = coupon.id
            WHERE campaign_coupon.campaign_id = ?
            ORDER BY coupon.id
            "#,
        )
        .bind(id.get())
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(Coupon::from).collect())
    }

    async fn gimmick(&mut self, id: CampaignId) -> Result<Option<Gimmick>> {
        let row = sqlx::query_as::<_, GimmickRow>(
            r#"
            SELECT gimmick.img_url AS url, gimmick.code AS code
            FROM campaign
            INNER JOIN gimmick ON campaign.gimmick_id = gimmick.id
            WHERE campaign.id = ?
            "#,
        )
        .bind(id.get())
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(Gimmick::from))
    }

    async fn touch_points(&mut self, group: GroupId) -> Result<Vec<TouchPoint>> {
        let rows = sqlx::query_as::<_, TouchPointRow>(
            r#"
            SELECT
                tp.point_unique_id AS id,
                sm.store_group_id AS group_id,
                tp.store_id AS store_id
            FROM store_map sm
            INNER JOIN touch_point tp ON tp.store_id = sm.store_id
            WHERE sm.store_group_id = ?
            ORDER BY tp.point_unique_id
            "#,
        )
        .bind(group.get())
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(TouchPoint::from).collect())
    }

    async fn count_delivering(&mut self, group: GroupId, excluding: CampaignId) -> Result<u64> {
        let mut builder = QueryBuilder::<MySql>::new(
            "SELECT COUNT(*) FROM campaign WHERE store_group_id = ",
        );
        builder.push_bind(group.get());
        builder.push(" AND id <> ");
        builder.push_bind(excluding.get());
        builder.push(" AND status IN (");
        let mut statuses = builder.separated(", ");
        for status in Status::ALL.into_iter().filter(|s| s.is_delivering()) {
            statuses.push_bind(status.as_str());
        }
        statuses.push_unseparated(")");

        let count: i64 = builder
            .build_query_scalar()
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn creative_in_use(&mut self, id: CreativeId) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM campaign_creative WHERE creative_id = ?",
        )
        .bind(id.get())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(count > 0)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let Self { tx } = *self;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let Self { tx } = *self;
        tx.rollback().await?;
        Ok(())
    }
}
