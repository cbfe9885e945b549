//! Applies operator mutations from the mutation queue.

use std::{fmt, sync::Arc, time::Instant};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use cadence_model::{
    Campaign, CampaignMutation, CreativeMutation, DeliveryTable, MutationBatch, MutationEvent,
    Status,
};

use crate::{
    error::{CampaignError, Result},
    lifecycle::{
        config::ReconcileConfig,
        consumer::MessageHandler,
        engine::{Plan, TransitionEngine, TransitionOutcome, WriteLog},
    },
    metrics::LifecycleMetrics,
    ports::{CampaignTransaction, QueueMessage},
};

/// Picks the transition matching the row's current status.
///
/// Operators move rows into intent statuses (`pause`, `stop`, `resume`)
/// and the mutation only says "look again"; the row decides.
pub fn reconcile_plan(status: Status) -> Option<Plan> {
    match status {
        Status::Started | Status::Resume => Some(Plan::Materialize),
        Status::Pause => Some(Plan::Halt {
            to: Status::Paused,
            detail: "",
        }),
        Status::Stop => Some(Plan::Halt {
            to: Status::Stopped,
            detail: "",
        }),
        Status::Ended => Some(Plan::Teardown),
        _ => None,
    }
}

pub struct MutationReconciler {
    engine: Arc<TransitionEngine>,
    config: ReconcileConfig,
    metrics: LifecycleMetrics,
}

impl fmt::Debug for MutationReconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationReconciler")
            .field("config", &self.config)
            .finish()
    }
}

impl MutationReconciler {
    pub fn new(
        engine: Arc<TransitionEngine>,
        config: ReconcileConfig,
        metrics: LifecycleMetrics,
    ) -> Self {
        Self {
            engine,
            config,
            metrics,
        }
    }

    /// Processes every entry of `batch`. Entries with nothing to apply do
    /// not stop the batch; the first real failure is returned after the
    /// remaining entries ran.
    pub async fn process_batch(&self, batch: &MutationBatch) -> Result<Vec<TransitionOutcome>> {
        let mut outcomes = Vec::with_capacity(batch.campaigns.len());
        let mut first_error = None;

        for entry in &batch.campaigns {
            match self.process_entry(entry).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) if err.is_do_nothing() => {
                    debug!(target: "cadence::reconcile", campaign_id = %entry.id, event = %entry.event, reason = %err, "nothing to reconcile");
                }
                Err(err) => {
                    warn!(target: "cadence::reconcile", campaign_id = %entry.id, event = %entry.event, error = %err, "reconcile failed");
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None if outcomes.is_empty() => Err(CampaignError::do_nothing("no entry applied")),
            None => Ok(outcomes),
        }
    }

    /// Reconciles one campaign against its current row.
    pub async fn process_entry(&self, entry: &CampaignMutation) -> Result<TransitionOutcome> {
        let started = Instant::now();
        let mut tx = self.engine.store().begin().await?;
        let mut log = WriteLog::default();

        let applied = async {
            let campaign = tx
                .lock_campaign(entry.id)
                .await?
                .ok_or_else(|| CampaignError::do_nothing(format!("campaign {} not found", entry.id)))?;

            if entry.event == MutationEvent::Delete {
                self.process_creatives(tx.as_mut(), &campaign, &entry.creatives)
                    .await?;
                return Err(CampaignError::do_nothing("campaign deleted"));
            }

            let Some(plan) = reconcile_plan(campaign.status) else {
                return Err(CampaignError::do_nothing(format!(
                    "status {} needs no reconcile",
                    campaign.status
                )));
            };
            info!(
                target: "cadence::reconcile",
                campaign_id = %campaign.id,
                event = %entry.event,
                status = %campaign.status,
                plan = ?plan,
                "reconciling"
            );

            let transition = self
                .engine
                .apply(tx.as_mut(), &campaign, plan, &mut log)
                .await?;
            self.process_creatives(tx.as_mut(), &campaign, &entry.creatives)
                .await?;
            Ok(transition)
        }
        .await;

        self.engine
            .settle("reconcile", entry.id, tx, applied, &log, started)
            .await
    }

    /// Schedules orphaned creative records for expiry instead of deleting
    /// them, so a late insert for the same creative still finds its record.
    pub async fn process_creatives(
        &self,
        tx: &mut dyn CampaignTransaction,
        campaign: &Campaign,
        creatives: &[CreativeMutation],
    ) -> Result<()> {
        let expires_at = Utc::now() + self.config.creative_expiry();

        for creative in creatives {
            if creative.event != MutationEvent::Delete {
                continue;
            }
            if tx.creative_in_use(creative.id).await? {
                debug!(target: "cadence::reconcile", campaign_id = %campaign.id, creative_id = %creative.id, "creative still referenced");
                continue;
            }

            match self
                .engine
                .delivery()
                .expire_creative(creative.id, expires_at)
                .await
            {
                Ok(()) => {
                    self.metrics
                        .record_delivery_write(DeliveryTable::Creative.as_str(), "expire");
                    info!(
                        target: "cadence::reconcile",
                        campaign_id = %campaign.id,
                        creative_id = %creative.id,
                        expires_at = %expires_at,
                        "orphaned creative scheduled for expiry"
                    );
                }
                Err(err) if err.is_condition_failed() => {
                    debug!(target: "cadence::reconcile", creative_id = %creative.id, "no creative record to expire");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for MutationReconciler {
    async fn handle(&self, message: &QueueMessage) -> Result<()> {
        let batch: MutationBatch = serde_json::from_str(&message.body)?;
        debug!(
            target: "cadence::reconcile",
            message_id = %message.id,
            request_id = ?batch.request_id,
            kind = %batch.kind,
            entries = batch.campaigns.len(),
            "mutation batch received"
        );
        self.process_batch(&batch).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_follows_current_status() {
        assert_eq!(reconcile_plan(Status::Started), Some(Plan::Materialize));
        assert_eq!(reconcile_plan(Status::Resume), Some(Plan::Materialize));
        assert_eq!(
            reconcile_plan(Status::Pause),
            Some(Plan::Halt {
                to: Status::Paused,
                detail: ""
            })
        );
        assert_eq!(
            reconcile_plan(Status::Stop),
            Some(Plan::Halt {
                to: Status::Stopped,
                detail: ""
            })
        );
        assert_eq!(reconcile_plan(Status::Ended), Some(Plan::Teardown));
    }

    #[test]
    fn settled_and_transient_statuses_are_left_alone() {
        for status in [
            Status::Configured,
            Status::Warmup,
            Status::Terminate,
            Status::Paused,
            Status::Stopped,
            Status::Suspend,
        ] {
            assert_eq!(reconcile_plan(status), None, "{status}");
        }
    }
}
