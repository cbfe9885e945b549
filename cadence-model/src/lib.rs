//! Core data model definitions shared across Cadence crates.
#![allow(missing_docs)]

pub use ::chrono;

pub mod campaign;
pub mod delivery;
pub mod error;
pub mod events;
pub mod ids;
pub mod messages;
pub mod status;

// Intentionally curated re-exports for downstream consumers.
pub use campaign::{Campaign, Coupon, Creative, CreativeKind, Gimmick, TouchPoint};
pub use delivery::{
    CampaignRecord, ContentRecord, CouponRecord, CreativeRecord, DeliveryRecordSet,
    DeliveryTable, TouchPointRecord,
};
pub use error::ModelError;
pub use events::{CacheOperation, ControlEvent, DeliveryEvent, TouchPointEvent};
pub use ids::{CampaignId, CreativeId, GroupId, TouchPointId};
pub use messages::{
    BudgetControlMessage, BudgetSignal, CampaignMutation, CreativeMutation, MutationBatch,
    MutationEvent,
};
pub use status::Status;
