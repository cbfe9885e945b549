//! Applies externally computed budget verdicts.

use std::{fmt, sync::Arc, time::Instant};

use async_trait::async_trait;
use tracing::{debug, info};

use cadence_model::{BudgetControlMessage, BudgetSignal, CampaignId, Status};

use crate::{
    error::{CampaignError, Result},
    lifecycle::{
        consumer::MessageHandler,
        engine::{Plan, TransitionEngine, TransitionOutcome, WriteLog},
    },
    ports::QueueMessage,
};

pub fn budget_plan(signal: BudgetSignal) -> Plan {
    match signal {
        BudgetSignal::Expended => Plan::Halt {
            to: Status::Ended,
            detail: BudgetSignal::Expended.as_str(),
        },
        BudgetSignal::Shortage => Plan::Halt {
            to: Status::Paused,
            detail: BudgetSignal::Shortage.as_str(),
        },
    }
}

pub struct BudgetController {
    engine: Arc<TransitionEngine>,
}

impl fmt::Debug for BudgetController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BudgetController").finish_non_exhaustive()
    }
}

impl BudgetController {
    pub fn new(engine: Arc<TransitionEngine>) -> Self {
        Self { engine }
    }

    /// Halts a delivering campaign. Anything not delivering is left alone.
    pub async fn apply(&self, id: CampaignId, signal: BudgetSignal) -> Result<TransitionOutcome> {
        let started = Instant::now();
        let mut tx = self.engine.store().begin().await?;
        let mut log = WriteLog::default();

        let applied = async {
            let campaign = tx
                .lock_campaign(id)
                .await?
                .ok_or_else(|| CampaignError::do_nothing(format!("campaign {id} not found")))?;
            if !campaign.status.is_delivering() {
                return Err(CampaignError::do_nothing(format!(
                    "campaign {id} is {}; {signal} ignored",
                    campaign.status
                )));
            }
            info!(target: "cadence::budget", campaign_id = %id, signal = %signal, status = %campaign.status, "applying budget signal");
            self.engine
                .apply(tx.as_mut(), &campaign, budget_plan(signal), &mut log)
                .await
        }
        .await;

        self.engine
            .settle("budget", id, tx, applied, &log, started)
            .await
    }
}

#[async_trait]
impl MessageHandler for BudgetController {
    async fn handle(&self, message: &QueueMessage) -> Result<()> {
        let control: BudgetControlMessage = serde_json::from_str(&message.body)?;
        debug!(
            target: "cadence::budget",
            message_id = %message.id,
            trace_id = %control.trace_id,
            campaign_id = %control.campaign_id,
            signal = %control.event,
            "budget signal received"
        );
        self.apply(control.campaign_id, control.event).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expended_ends_and_shortage_pauses() {
        assert_eq!(
            budget_plan(BudgetSignal::Expended),
            Plan::Halt {
                to: Status::Ended,
                detail: "expended"
            }
        );
        assert_eq!(
            budget_plan(BudgetSignal::Shortage),
            Plan::Halt {
                to: Status::Paused,
                detail: "shortage"
            }
        );
    }
}
