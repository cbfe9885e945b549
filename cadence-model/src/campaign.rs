//! System-of-record rows the lifecycle engine reads.

use chrono::{DateTime, Utc};
use std::{fmt, str::FromStr};

use crate::{
    error::ModelError,
    ids::{CampaignId, CreativeId, GroupId, TouchPointId},
    status::Status,
};

/// A time-bounded delivery window.
///
/// `updated_at` doubles as the optimistic concurrency token: every status
/// change is a compare-and-swap against the value read here.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Campaign {
    pub id: CampaignId,
    pub group_id: GroupId,
    pub org_code: String,
    pub name: String,
    pub status: Status,
    pub start_at: DateTime<Utc>,
    pub end_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// Copy of this row with the status and version token a committed
    /// transition produced.
    pub fn with_status(&self, status: Status, updated_at: DateTime<Utc>) -> Self {
        Self {
            status,
            updated_at,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum CreativeKind {
    Banner,
    Video,
}

impl CreativeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CreativeKind::Banner => "banner",
            CreativeKind::Video => "video",
        }
    }
}

impl fmt::Display for CreativeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CreativeKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "banner" => Ok(CreativeKind::Banner),
            "video" => Ok(CreativeKind::Video),
            other => Err(ModelError::UnknownCreativeKind(other.to_owned())),
        }
    }
}

/// Banner or video asset attached to a campaign.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Creative {
    pub id: CreativeId,
    pub kind: CreativeKind,
    pub url: String,
    pub link: Option<String>,
    pub width: f32,
    pub height: f32,
    pub extension: String,
    pub duration: Option<i32>,
    pub skip_offset: Option<i32>,
    pub end_card_url: Option<String>,
    pub end_card_width: Option<f32>,
    pub end_card_height: Option<f32>,
    pub end_card_extension: Option<String>,
    pub end_card_link: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Coupon {
    pub id: i64,
    pub name: String,
    pub code: String,
    pub image_url: String,
    /// Delivery rate in percent, as configured on `campaign_coupon`.
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Gimmick {
    pub url: String,
    pub code: String,
}

/// A physical delivery point reachable through a store in the campaign's group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TouchPoint {
    pub id: TouchPointId,
    pub group_id: GroupId,
    pub store_id: String,
}
