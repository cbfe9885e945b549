//! Denormalized records kept in the delivery (key-value) store while a
//! campaign is live.

use std::fmt;

use crate::{
    campaign::{Campaign, Coupon, Creative, Gimmick, TouchPoint},
    ids::{CampaignId, CreativeId, GroupId, TouchPointId},
    status::Status,
};

/// The four record families of the delivery store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryTable {
    Campaign,
    Creative,
    Content,
    TouchPoint,
}

impl DeliveryTable {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryTable::Campaign => "campaign",
            DeliveryTable::Creative => "creative",
            DeliveryTable::Content => "content",
            DeliveryTable::TouchPoint => "touch_point",
        }
    }
}

impl fmt::Display for DeliveryTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CampaignRecord {
    pub id: CampaignId,
    pub group_id: GroupId,
    pub org_code: String,
    pub name: String,
    pub status: Status,
    pub creative_ids: Vec<CreativeId>,
}

impl CampaignRecord {
    pub fn new(campaign: &Campaign, creatives: &[Creative]) -> Self {
        Self {
            id: campaign.id,
            group_id: campaign.group_id,
            org_code: campaign.org_code.clone(),
            name: campaign.name.clone(),
            status: campaign.status,
            creative_ids: creatives.iter().map(|c| c.id).collect(),
        }
    }
}

/// Creative payload served to devices. Keyed by creative id so several
/// campaigns can share one record.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CreativeRecord {
    pub id: CreativeId,
    pub campaign_id: CampaignId,
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub kind: String,
    pub url: String,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub link: Option<String>,
    pub width: f32,
    pub height: f32,
    pub extension: String,
    pub duration: Option<i32>,
    pub skip_offset: Option<i32>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub end_card_url: Option<String>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub end_card_width: Option<f32>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub end_card_height: Option<f32>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub end_card_extension: Option<String>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub end_card_link: Option<String>,
    /// Unix seconds after which the store may evict the record. Unset while
    /// any campaign references the creative.
    pub ttl: Option<i64>,
}

impl CreativeRecord {
    pub fn new(campaign: &Campaign, creative: &Creative) -> Self {
        Self {
            id: creative.id,
            campaign_id: campaign.id,
            kind: creative.kind.as_str().to_owned(),
            url: creative.url.clone(),
            link: creative.link.clone(),
            width: creative.width,
            height: creative.height,
            extension: creative.extension.clone(),
            duration: creative.duration,
            skip_offset: creative.skip_offset,
            end_card_url: creative.end_card_url.clone(),
            end_card_width: creative.end_card_width,
            end_card_height: creative.end_card_height,
            end_card_extension: creative.end_card_extension.clone(),
            end_card_link: creative.end_card_link.clone(),
            ttl: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CouponRecord {
    pub id: i64,
    pub name: String,
    pub code: String,
    pub image_url: String,
    pub rate: f64,
}

impl From<&Coupon> for CouponRecord {
    fn from(coupon: &Coupon) -> Self {
        Self {
            id: coupon.id,
            name: coupon.name.clone(),
            code: coupon.code.clone(),
            image_url: coupon.image_url.clone(),
            rate: coupon.rate,
        }
    }
}

/// Coupons plus the optional gimmick reference of one campaign.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ContentRecord {
    pub campaign_id: CampaignId,
    pub coupons: Vec<CouponRecord>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub gimmick_url: Option<String>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub gimmick_code: Option<String>,
}

impl ContentRecord {
    pub fn new(campaign: &Campaign, coupons: &[Coupon], gimmick: Option<&Gimmick>) -> Self {
        Self {
            campaign_id: campaign.id,
            coupons: coupons.iter().map(CouponRecord::from).collect(),
            gimmick_url: gimmick.map(|g| g.url.clone()).filter(|u| !u.is_empty()),
            gimmick_code: gimmick.map(|g| g.code.clone()).filter(|c| !c.is_empty()),
        }
    }
}

/// Shared per group: every live campaign of the group relies on the same
/// touch-point records.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TouchPointRecord {
    pub touch_point_id: TouchPointId,
    pub group_id: GroupId,
    pub store_id: String,
}

impl From<&TouchPoint> for TouchPointRecord {
    fn from(tp: &TouchPoint) -> Self {
        Self {
            touch_point_id: tp.id.clone(),
            group_id: tp.group_id,
            store_id: tp.store_id.clone(),
        }
    }
}

/// Everything the start transition writes for one campaign.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryRecordSet {
    pub campaign: CampaignRecord,
    pub creatives: Vec<CreativeRecord>,
    pub content: ContentRecord,
    pub touch_points: Vec<TouchPointRecord>,
}
