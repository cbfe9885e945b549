use std::{fmt, sync::Arc};

use async_trait::async_trait;
use tracing::debug;

use cadence_model::{Campaign, CampaignId};

use crate::{
    error::Result,
    lifecycle::{LifecycleEdge, engine::TransitionEngine, worker_pool::WorkHandler},
};

/// Execution-tier handler: runs the edge's transition for a fired campaign.
pub struct ExecutionHandler {
    edge: LifecycleEdge,
    engine: Arc<TransitionEngine>,
}

impl fmt::Debug for ExecutionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionHandler")
            .field("edge", &self.edge)
            .finish()
    }
}

impl ExecutionHandler {
    pub fn new(edge: LifecycleEdge, engine: Arc<TransitionEngine>) -> Self {
        Self { edge, engine }
    }
}

#[async_trait]
impl WorkHandler<Campaign> for ExecutionHandler {
    async fn handle(&self, worker: &str, campaign: Campaign) -> Result<()> {
        debug!(
            target: "cadence::engine",
            worker = %worker,
            edge = %self.edge,
            campaign_id = %campaign.id,
            "executing transition"
        );
        self.engine.execute(self.edge, campaign.id).await?;
        Ok(())
    }

    fn campaign_id(&self, campaign: &Campaign) -> Option<CampaignId> {
        Some(campaign.id)
    }
}
