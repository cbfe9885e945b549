//! In-memory adapters for tests and local runs.

mod campaign_store;
mod delivery_store;
mod publisher;
mod queue;
mod timer;

pub use campaign_store::InMemoryCampaignStore;
pub use delivery_store::InMemoryDeliveryStore;
pub use publisher::{RecordedMessage, RecordingPublisher};
pub use queue::InMemoryQueue;
pub use timer::ManualTimer;
