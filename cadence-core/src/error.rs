use cadence_model::{CampaignId, ModelError, Status};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CampaignError {
    /// The row is no longer in the pre-state this transition expects.
    #[error("campaign {campaign_id} is {actual}, expected {expected}")]
    StaleState {
        campaign_id: CampaignId,
        expected: Status,
        actual: Status,
    },

    /// The compare-and-swap on `updated_at` matched no row.
    #[error("campaign {0} was modified concurrently")]
    VersionConflict(CampaignId),

    #[error("campaign {0} not found")]
    NotFound(CampaignId),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Delivery store error: {0}")]
    KeyValue(String),

    /// A conditional write in the delivery store found its precondition unmet.
    #[error("Delivery store condition failed: {0}")]
    ConditionFailed(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid model value: {0}")]
    Model(#[from] ModelError),

    /// Nothing actionable; callers discard the triggering input without
    /// treating it as a failure.
    #[error("nothing to do: {0}")]
    DoNothing(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Work item panicked: {0}")]
    Panicked(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CampaignError {
    pub fn do_nothing(reason: impl Into<String>) -> Self {
        CampaignError::DoNothing(reason.into())
    }

    /// Another worker or an operator moved the row first.
    pub fn is_race_lost(&self) -> bool {
        matches!(
            self,
            CampaignError::StaleState { .. } | CampaignError::VersionConflict(_)
        )
    }

    pub fn is_do_nothing(&self) -> bool {
        matches!(self, CampaignError::DoNothing(_))
    }

    pub fn is_condition_failed(&self) -> bool {
        matches!(self, CampaignError::ConditionFailed(_))
    }
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for CampaignError {
    fn from(err: sqlx::Error) -> Self {
        CampaignError::Database(err.to_string())
    }
}

#[cfg(feature = "database")]
impl From<redis::RedisError> for CampaignError {
    fn from(err: redis::RedisError) -> Self {
        CampaignError::KeyValue(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CampaignError>;
