//! Capability traits the lifecycle components depend on.
//!
//! Each trait carries exactly the calls its consumers make, so the MySQL and
//! Redis adapters in [`crate::infra`] and the in-memory fakes are
//! interchangeable.

pub mod campaign_store;
pub mod delivery_store;
pub mod notification;
pub mod queue;

pub use campaign_store::{CampaignStore, CampaignTransaction, ClaimCondition};
pub use delivery_store::DeliveryStore;
pub use notification::{NotificationPublisher, PublishedMessage};
pub use queue::{MessageQueue, QueueMessage};
