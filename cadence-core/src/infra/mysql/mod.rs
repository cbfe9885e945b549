//! MySQL system of record.

mod rows;
mod store;

pub use store::{MySqlCampaignStore, MySqlCampaignTransaction};
