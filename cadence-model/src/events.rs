//! Control events published to downstream caches when a campaign changes state.

use std::fmt;

use crate::ids::{CampaignId, GroupId, TouchPointId};

/// Semantic name of a lifecycle change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DeliveryEvent {
    Warmup,
    Start,
    Resume,
    Update,
    Stop,
    Pause,
    End,
}

impl DeliveryEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryEvent::Warmup => "warmup",
            DeliveryEvent::Start => "start",
            DeliveryEvent::Resume => "resume",
            DeliveryEvent::Update => "update",
            DeliveryEvent::Stop => "stop",
            DeliveryEvent::Pause => "pause",
            DeliveryEvent::End => "end",
        }
    }
}

impl fmt::Display for DeliveryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a downstream cache should do with its copy of the campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "UPPERCASE"))]
pub enum CacheOperation {
    None,
    Put,
    Delete,
}

impl CacheOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheOperation::None => "NONE",
            CacheOperation::Put => "PUT",
            CacheOperation::Delete => "DELETE",
        }
    }
}

impl fmt::Display for CacheOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Campaign-level notification body.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ControlEvent {
    pub trace_id: String,
    /// RFC 3339 with nanoseconds.
    pub time: String,
    pub version: String,
    pub event: DeliveryEvent,
    pub event_detail: String,
    pub cache_operation: CacheOperation,
    pub organization: String,
    pub service: String,
    pub campaign_id: CampaignId,
    pub group_id: GroupId,
}

/// Emitted once per touch-point record removed from the delivery store.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TouchPointEvent {
    pub trace_id: String,
    pub time: String,
    pub version: String,
    pub event: DeliveryEvent,
    pub cache_operation: CacheOperation,
    pub organization: String,
    pub service: String,
    pub campaign_id: CampaignId,
    pub touch_point_id: TouchPointId,
    pub group_id: GroupId,
    pub store_id: String,
}
