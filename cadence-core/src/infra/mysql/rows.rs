use chrono::{DateTime, Utc};
use sqlx::FromRow;

use cadence_model::{
    Campaign, CampaignId, Coupon, Creative, CreativeId, Gimmick, GroupId, TouchPoint,
    TouchPointId,
};

use crate::error::{CampaignError, Result};

pub(super) const CAMPAIGN_COLUMNS: &str = r#"
    c.id AS id,
    sg.id AS group_id,
    c.organization_code AS org_code,
    c.name AS name,
    c.status AS status,
    c.start_at AS start_at,
    c.end_at AS end_at,
    c.updated_at AS updated_at
"#;

#[derive(Debug, FromRow)]
pub(super) struct CampaignRow {
    id: i64,
    group_id: i64,
    org_code: String,
    name: String,
    status: String,
    start_at: DateTime<Utc>,
    end_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CampaignRow> for Campaign {
    type Error = CampaignError;

    fn try_from(row: CampaignRow) -> Result<Self> {
        Ok(Campaign {
            id: CampaignId(row.id),
            group_id: GroupId(row.group_id),
            org_code: row.org_code,
            name: row.name,
            status: row.status.parse()?,
            start_at: row.start_at,
            end_at: row.end_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub(super) struct CreativeRow {
    id: i64,
    kind: String,
    url: String,
    link: Option<String>,
    width: f64,
    height: f64,
    extension: String,
    duration: Option<i32>,
    skip_offset: Option<i32>,
    end_card_url: Option<String>,
    end_card_width: Option<f64>,
    end_card_height: Option<f64>,
    end_card_extension: Option<String>,
    end_card_link: Option<String>,
}

impl TryFrom<CreativeRow> for Creative {
    type Error = CampaignError;

    fn try_from(row: CreativeRow) -> Result<Self> {
        Ok(Creative {
            id: CreativeId(row.id),
            kind: row.kind.parse()?,
            url: row.url,
            link: row.link.filter(|l| !l.is_empty()),
            width: row.width as f32,
            height: row.height as f32,
            extension: row.extension,
            duration: row.duration,
            skip_offset: row.skip_offset,
            end_card_url: row.end_card_url.filter(|u| !u.is_empty()),
            end_card_width: row.end_card_width.map(|w| w as f32),
            end_card_height: row.end_card_height.map(|h| h as f32),
            end_card_extension: row.end_card_extension.filter(|e| !e.is_empty()),
            end_card_link: row.end_card_link.filter(|l| !l.is_empty()),
        })
    }
}

#[derive(Debug, FromRow)]
pub(super) struct CouponRow {
    id: i64,
    name: String,
    code: String,
    image_url: String,
    rate: f64,
}

impl From<CouponRow> for Coupon {
    fn from(row: CouponRow) -> Self {
        Coupon {
            id: row.id,
            name: row.name,
            code: row.code,
            image_url: row.image_url,
            rate: row.rate,
        }
    }
}

#[derive(Debug, FromRow)]
pub(super) struct GimmickRow {
    url: String,
    code: String,
}

impl From<GimmickRow> for Gimmick {
    fn from(row: GimmickRow) -> Self {
        Gimmick {
            url: row.url,
            code: row.code,
        }
    }
}

#[derive(Debug, FromRow)]
pub(super) struct TouchPointRow {
    id: String,
    group_id: i64,
    store_id: String,
}

impl From<TouchPointRow> for TouchPoint {
    fn from(row: TouchPointRow) -> Self {
        TouchPoint {
            id: TouchPointId(row.id),
            group_id: GroupId(row.group_id),
            store_id: row.store_id,
        }
    }
}
