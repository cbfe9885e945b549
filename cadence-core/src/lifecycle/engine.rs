//! State transitions and delivery-store materialization.
//!
//! Every transition runs inside one relational transaction. Delivery-store
//! writes happen while that transaction is open and are not compensated when
//! it later rolls back; the claim marker stays in place in that case, so the
//! next recovery pass re-runs the whole transition.

use std::{fmt, sync::Arc, time::Instant};

use tracing::{error, info, warn};

use cadence_model::{
    CacheOperation, Campaign, CampaignId, CampaignRecord, ContentRecord, CreativeRecord,
    DeliveryEvent, DeliveryRecordSet, DeliveryTable, Status, TouchPointRecord,
};

use crate::{
    error::{CampaignError, Result},
    lifecycle::{LifecycleEdge, control::ControlEventPublisher},
    metrics::{LifecycleMetrics, TransitionOutcomeLabel},
    ports::{CampaignStore, CampaignTransaction, DeliveryStore},
};

/// What a transition does once the row is locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// Compare-and-swap to `started`, then write the full record set.
    Materialize,
    /// Compare-and-swap to `to`, then remove the record set.
    Halt { to: Status, detail: &'static str },
    /// Remove the record set without touching the status.
    Teardown,
}

impl Plan {
    pub fn for_edge(edge: LifecycleEdge) -> Self {
        match edge {
            LifecycleEdge::Start => Plan::Materialize,
            LifecycleEdge::End => Plan::Halt {
                to: Status::Ended,
                detail: "",
            },
        }
    }
}

/// A transition applied inside a still-open transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub before: Status,
    /// The row as the transition left it.
    pub campaign: Campaign,
    pub records: Option<DeliveryRecordSet>,
    pub removed_touch_points: Vec<TouchPointRecord>,
    pub detail: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    Applied(Box<Transition>),
    /// Race lost or row gone; nothing was written.
    Skipped {
        campaign_id: CampaignId,
        reason: String,
    },
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied(_))
    }
}

/// Delivery-store mutations performed by the current transition.
#[derive(Debug, Default)]
pub struct WriteLog {
    writes: usize,
}

impl WriteLog {
    pub fn writes(&self) -> usize {
        self.writes
    }
}

#[derive(Clone)]
pub struct TransitionEngine {
    store: Arc<dyn CampaignStore>,
    delivery: Arc<dyn DeliveryStore>,
    publisher: ControlEventPublisher,
    metrics: LifecycleMetrics,
}

impl fmt::Debug for TransitionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionEngine")
            .field("publisher", &self.publisher)
            .finish()
    }
}

impl TransitionEngine {
    pub fn new(
        store: Arc<dyn CampaignStore>,
        delivery: Arc<dyn DeliveryStore>,
        publisher: ControlEventPublisher,
        metrics: LifecycleMetrics,
    ) -> Self {
        Self {
            store,
            delivery,
            publisher,
            metrics,
        }
    }

    pub fn store(&self) -> &Arc<dyn CampaignStore> {
        &self.store
    }

    pub fn delivery(&self) -> &Arc<dyn DeliveryStore> {
        &self.delivery
    }

    /// Runs the scheduled transition of `edge` for one campaign.
    ///
    /// The row must still carry the edge's claim marker; otherwise the
    /// transition was already handled or cancelled and this is a no-op.
    pub async fn execute(&self, edge: LifecycleEdge, id: CampaignId) -> Result<TransitionOutcome> {
        let started = Instant::now();
        let mut tx = self.store.begin().await?;
        let mut log = WriteLog::default();

        let applied = async {
            let campaign = tx
                .lock_campaign(id)
                .await?
                .ok_or(CampaignError::NotFound(id))?;
            if campaign.status != edge.marker() {
                return Err(CampaignError::StaleState {
                    campaign_id: id,
                    expected: edge.marker(),
                    actual: campaign.status,
                });
            }
            self.apply(tx.as_mut(), &campaign, Plan::for_edge(edge), &mut log)
                .await
        }
        .await;

        self.settle(edge.as_str(), id, tx, applied, &log, started)
            .await
    }

    /// Applies `plan` to a row already locked by `tx`.
    pub async fn apply(
        &self,
        tx: &mut dyn CampaignTransaction,
        campaign: &Campaign,
        plan: Plan,
        log: &mut WriteLog,
    ) -> Result<Transition> {
        match plan {
            Plan::Materialize => {
                let updated_at = tx
                    .update_status(campaign.id, Status::Started, campaign.updated_at)
                    .await?;
                let started = campaign.with_status(Status::Started, updated_at);
                let records = self.materialize(tx, &started, log).await?;
                Ok(Transition {
                    before: campaign.status,
                    campaign: started,
                    records: Some(records),
                    removed_touch_points: Vec::new(),
                    detail: "",
                })
            }
            Plan::Halt { to, detail } => {
                let updated_at = tx
                    .update_status(campaign.id, to, campaign.updated_at)
                    .await?;
                let halted = campaign.with_status(to, updated_at);
                let removed = self.dematerialize(tx, &halted, log).await?;
                Ok(Transition {
                    before: campaign.status,
                    campaign: halted,
                    records: None,
                    removed_touch_points: removed,
                    detail,
                })
            }
            Plan::Teardown => {
                let removed = self.dematerialize(tx, campaign, log).await?;
                Ok(Transition {
                    before: campaign.status,
                    campaign: campaign.clone(),
                    records: None,
                    removed_touch_points: removed,
                    detail: "",
                })
            }
        }
    }

    /// Commits or rolls back `tx` according to `applied`, then publishes the
    /// campaign event for a committed transition.
    ///
    /// Race-lost and missing rows become [`TransitionOutcome::Skipped`]. A
    /// [`CampaignError::DoNothing`] is returned as-is so queue consumers can
    /// discard their message.
    pub async fn settle(
        &self,
        kind: &'static str,
        id: CampaignId,
        tx: Box<dyn CampaignTransaction>,
        applied: Result<Transition>,
        log: &WriteLog,
        started: Instant,
    ) -> Result<TransitionOutcome> {
        let transition = match applied {
            Ok(transition) => transition,
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(target: "cadence::engine", campaign_id = %id, phase = kind, error = %rollback_err, "rollback failed");
                }
                return self.failed(kind, id, err, log, started);
            }
        };

        if let Err(err) = tx.commit().await {
            return self.failed(kind, id, err, log, started);
        }

        let after = transition.campaign.status;
        self.publisher
            .publish_campaign(&transition.campaign, transition.before, after, transition.detail)
            .await;

        info!(
            target: "cadence::engine",
            campaign_id = %id,
            phase = kind,
            before = %transition.before,
            after = %after,
            delivery_writes = log.writes(),
            "transition committed"
        );
        self.metrics
            .record_transition(kind, TransitionOutcomeLabel::Applied, started.elapsed());
        Ok(TransitionOutcome::Applied(Box::new(transition)))
    }

    fn failed(
        &self,
        kind: &'static str,
        id: CampaignId,
        err: CampaignError,
        log: &WriteLog,
        started: Instant,
    ) -> Result<TransitionOutcome> {
        if err.is_race_lost() || matches!(err, CampaignError::NotFound(_)) {
            info!(target: "cadence::engine", campaign_id = %id, phase = kind, reason = %err, "transition skipped");
            self.metrics
                .record_transition(kind, TransitionOutcomeLabel::Skipped, started.elapsed());
            return Ok(TransitionOutcome::Skipped {
                campaign_id: id,
                reason: err.to_string(),
            });
        }

        if err.is_do_nothing() {
            self.metrics
                .record_transition(kind, TransitionOutcomeLabel::Skipped, started.elapsed());
            return Err(err);
        }

        if log.writes() > 0 {
            self.metrics.record_inconsistency(kind);
            error!(
                target: "cadence::inconsistency",
                campaign_id = %id,
                phase = kind,
                delivery_writes = log.writes(),
                error = %err,
                "delivery store changed but the transition rolled back"
            );
        } else {
            warn!(target: "cadence::engine", campaign_id = %id, phase = kind, error = %err, "transition failed; rolled back");
        }
        self.metrics
            .record_transition(kind, TransitionOutcomeLabel::Failed, started.elapsed());
        Err(err)
    }

    async fn materialize(
        &self,
        tx: &mut dyn CampaignTransaction,
        campaign: &Campaign,
        log: &mut WriteLog,
    ) -> Result<DeliveryRecordSet> {
        let creatives = tx.creatives(campaign.id).await?;
        let coupons = tx.coupons(campaign.id).await?;
        let gimmick = tx.gimmick(campaign.id).await?;
        let touch_points = tx.touch_points(campaign.group_id).await?;

        if touch_points.is_empty() {
            warn!(target: "cadence::engine", campaign_id = %campaign.id, group_id = %campaign.group_id, "group has no touch points");
        }

        let records = DeliveryRecordSet {
            campaign: CampaignRecord::new(campaign, &creatives),
            creatives: creatives
                .iter()
                .map(|creative| CreativeRecord::new(campaign, creative))
                .collect(),
            content: ContentRecord::new(campaign, &coupons, gimmick.as_ref()),
            touch_points: touch_points.iter().map(TouchPointRecord::from).collect(),
        };

        self.delivery.put_campaign(&records.campaign).await?;
        self.wrote(log, DeliveryTable::Campaign, "put");

        for creative in &records.creatives {
            self.delivery.put_creative(creative).await?;
            self.wrote(log, DeliveryTable::Creative, "put");
        }

        self.delivery.put_content(&records.content).await?;
        self.wrote(log, DeliveryTable::Content, "put");

        for touch_point in &records.touch_points {
            self.delivery.put_touch_point(touch_point).await?;
            self.wrote(log, DeliveryTable::TouchPoint, "put");
        }

        Ok(records)
    }

    /// Removes the campaign's records. The group's touch points go too when
    /// no other campaign of the group is still delivering; one control event
    /// is published per removed touch point.
    async fn dematerialize(
        &self,
        tx: &mut dyn CampaignTransaction,
        campaign: &Campaign,
        log: &mut WriteLog,
    ) -> Result<Vec<TouchPointRecord>> {
        self.delivery.delete_campaign(campaign.id).await?;
        self.wrote(log, DeliveryTable::Campaign, "delete");

        self.delivery.delete_content(campaign.id).await?;
        self.wrote(log, DeliveryTable::Content, "delete");

        let others = tx.count_delivering(campaign.group_id, campaign.id).await?;
        if others > 0 {
            info!(
                target: "cadence::engine",
                campaign_id = %campaign.id,
                group_id = %campaign.group_id,
                delivering = others,
                "group still delivering; keeping touch points"
            );
            return Ok(Vec::new());
        }

        let touch_points = tx.touch_points(campaign.group_id).await?;
        let mut removed = Vec::with_capacity(touch_points.len());
        for touch_point in &touch_points {
            self.delivery
                .delete_touch_point(&touch_point.id, touch_point.group_id)
                .await?;
            self.wrote(log, DeliveryTable::TouchPoint, "delete");

            let record = TouchPointRecord::from(touch_point);
            self.publisher
                .publish_touch_point(campaign, &record, DeliveryEvent::End, CacheOperation::Delete)
                .await;
            removed.push(record);
        }
        Ok(removed)
    }

    fn wrote(&self, log: &mut WriteLog, table: DeliveryTable, op: &'static str) {
        log.writes += 1;
        self.metrics.record_delivery_write(table.as_str(), op);
    }
}
