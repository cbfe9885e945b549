//! Per-edge batch claim passes.

use std::{fmt, sync::Arc, time::Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cadence_model::{Campaign, CampaignId, Status};

use crate::{
    error::Result,
    lifecycle::{
        ClaimPass, LifecycleEdge,
        config::SchedulerConfig,
        control::ControlEventPublisher,
        reservation::Reserver,
        worker_pool::{PoolHandle, WorkHandler},
    },
    metrics::LifecycleMetrics,
    ports::{CampaignStore, ClaimCondition},
};

/// Result of one page fetch, sent back to the pass that requested it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSummary {
    pub rows: usize,
    pub last: Option<CampaignId>,
}

/// Unit of work of the claim tier: fetch one page and claim its rows.
#[derive(Debug)]
pub struct PageRequest {
    pub pass: ClaimPass,
    pub base_time: DateTime<Utc>,
    pub condition: ClaimCondition,
    pub reply: oneshot::Sender<Result<PageSummary>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub pages: usize,
    pub rows: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub imminent: DrainReport,
    pub recovery: DrainReport,
}

/// Claim-tier handler. Replies with the page summary once every row of the
/// page has been claimed and reserved, or dispatched.
pub struct ClaimPageHandler {
    edge: LifecycleEdge,
    store: Arc<dyn CampaignStore>,
    reserver: Reserver,
    publisher: ControlEventPublisher,
    metrics: LifecycleMetrics,
}

impl fmt::Debug for ClaimPageHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClaimPageHandler")
            .field("edge", &self.edge)
            .field("reserver", &self.reserver)
            .finish()
    }
}

impl ClaimPageHandler {
    pub fn new(
        edge: LifecycleEdge,
        store: Arc<dyn CampaignStore>,
        reserver: Reserver,
        publisher: ControlEventPublisher,
        metrics: LifecycleMetrics,
    ) -> Self {
        Self {
            edge,
            store,
            reserver,
            publisher,
            metrics,
        }
    }

    async fn claim(&self, campaign: Campaign, base_time: DateTime<Utc>) {
        let Some(boundary) = self.edge.boundary(&campaign) else {
            return;
        };

        if campaign.status == self.edge.marker() {
            // Claimed on an earlier tick. Re-arm only while the boundary is
            // ahead; past boundaries belong to the recovery pass.
            if boundary > base_time {
                self.reserver.reserve(campaign, boundary);
            }
            return;
        }

        match self.flip(&campaign).await {
            Ok(claimed) => {
                if self.edge == LifecycleEdge::Start {
                    self.publisher
                        .publish_campaign(&claimed, campaign.status, claimed.status, "")
                        .await;
                }
                self.reserver.reserve(claimed, boundary);
            }
            Err(err) if err.is_race_lost() => {
                self.metrics.record_claim_conflict(self.edge);
                info!(
                    target: "cadence::claim",
                    edge = %self.edge,
                    campaign_id = %campaign.id,
                    reason = %err,
                    "claim lost the race"
                );
            }
            Err(err) => {
                warn!(
                    target: "cadence::claim",
                    edge = %self.edge,
                    campaign_id = %campaign.id,
                    status = %campaign.status,
                    error = %err,
                    "failed to claim campaign"
                );
            }
        }
    }

    /// Moves the row into the edge's marker with a compare-and-swap on the
    /// `updated_at` read by the page fetch.
    async fn flip(&self, campaign: &Campaign) -> Result<Campaign> {
        let marker = self.edge.marker();
        let mut tx = self.store.begin().await?;
        match tx
            .update_status(campaign.id, marker, campaign.updated_at)
            .await
        {
            Ok(updated_at) => {
                tx.commit().await?;
                Ok(campaign.with_status(marker, updated_at))
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(target: "cadence::claim", campaign_id = %campaign.id, error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }
}

#[async_trait]
impl WorkHandler<PageRequest> for ClaimPageHandler {
    async fn handle(&self, worker: &str, request: PageRequest) -> Result<()> {
        let PageRequest {
            pass,
            base_time,
            condition,
            reply,
        } = request;

        let rows = match self.store.claimable(&condition).await {
            Ok(rows) => rows,
            Err(err) => {
                let _ = reply.send(Err(err));
                return Ok(());
            }
        };

        let summary = PageSummary {
            rows: rows.len(),
            last: rows.last().map(|campaign| campaign.id),
        };
        self.metrics.record_claimed(self.edge, pass, rows.len());
        debug!(
            target: "cadence::claim",
            worker = %worker,
            edge = %self.edge,
            pass = %pass,
            rows = rows.len(),
            after = ?condition.after,
            "fetched claim page"
        );

        for campaign in rows {
            match pass {
                ClaimPass::Imminent => self.claim(campaign, base_time).await,
                ClaimPass::Recovery => {
                    let id = campaign.id;
                    if let Err(err) = self.reserver.execute_now(campaign).await {
                        warn!(target: "cadence::claim", edge = %self.edge, campaign_id = %id, error = %err, "failed to dispatch leftover campaign");
                    }
                }
            }
        }

        let _ = reply.send(Ok(summary));
        Ok(())
    }
}

/// Drives both claim passes of one edge on every tick.
pub struct ClaimScheduler {
    edge: LifecycleEdge,
    config: SchedulerConfig,
    pages: PoolHandle<PageRequest>,
    metrics: LifecycleMetrics,
    shutdown: CancellationToken,
}

impl fmt::Debug for ClaimScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClaimScheduler")
            .field("edge", &self.edge)
            .field("config", &self.config)
            .field("pages", &self.pages)
            .field("shutdown_cancelled", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl ClaimScheduler {
    pub fn new(
        edge: LifecycleEdge,
        config: SchedulerConfig,
        pages: PoolHandle<PageRequest>,
        metrics: LifecycleMetrics,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            edge,
            config,
            pages,
            metrics,
            shutdown,
        }
    }

    pub fn edge(&self) -> LifecycleEdge {
        self.edge
    }

    /// Rows whose boundary falls before the tick after next, plus margin.
    pub fn imminent_condition(&self, base_time: DateTime<Utc>) -> ClaimCondition {
        ClaimCondition::new(
            self.edge,
            base_time + self.config.imminent_window(),
            self.edge.imminent_statuses(),
            self.config.page_size,
        )
    }

    /// Marker rows whose boundary has already passed.
    pub fn recovery_condition(&self, base_time: DateTime<Utc>) -> ClaimCondition {
        ClaimCondition::new(
            self.edge,
            base_time,
            vec![self.edge.marker()],
            self.config.page_size,
        )
    }

    /// Runs both passes for `base_time` concurrently and waits for them.
    pub async fn tick(&self, base_time: DateTime<Utc>) -> TickReport {
        debug!(target: "cadence::claim", edge = %self.edge, base_time = %base_time, "tick");
        let (imminent, recovery) = tokio::join!(
            self.drain(ClaimPass::Imminent, base_time, self.imminent_condition(base_time)),
            self.drain(ClaimPass::Recovery, base_time, self.recovery_condition(base_time)),
        );
        TickReport { imminent, recovery }
    }

    /// Requests pages until one comes back short.
    pub async fn drain(
        &self,
        pass: ClaimPass,
        base_time: DateTime<Utc>,
        mut condition: ClaimCondition,
    ) -> DrainReport {
        let started = Instant::now();
        let mut report = DrainReport::default();

        loop {
            if self.shutdown.is_cancelled() {
                debug!(target: "cadence::claim", edge = %self.edge, pass = %pass, "shutdown; abandoning drain");
                break;
            }

            let (reply, response) = oneshot::channel();
            let request = PageRequest {
                pass,
                base_time,
                condition: condition.clone(),
                reply,
            };
            if let Err(err) = self.pages.submit(request).await {
                warn!(target: "cadence::claim", edge = %self.edge, pass = %pass, error = %err, "claim pool rejected page request");
                break;
            }
            report.pages += 1;

            let summary = match response.await {
                Ok(Ok(summary)) => summary,
                Ok(Err(err)) => {
                    warn!(
                        target: "cadence::claim",
                        edge = %self.edge,
                        pass = %pass,
                        base_time = %base_time,
                        statuses = ?statuses(&condition.statuses),
                        error = %err,
                        "page fetch failed; next tick retries"
                    );
                    break;
                }
                Err(_) => {
                    warn!(target: "cadence::claim", edge = %self.edge, pass = %pass, "claim worker dropped page request");
                    break;
                }
            };
            report.rows += summary.rows;

            match summary.last {
                Some(last) if summary.rows >= condition.page_size => {
                    condition = condition.next_page(last);
                }
                _ => break,
            }
        }

        self.metrics.record_pass(self.edge, pass, started.elapsed());
        if report.rows > 0 {
            info!(
                target: "cadence::claim",
                edge = %self.edge,
                pass = %pass,
                pages = report.pages,
                rows = report.rows,
                "claim pass drained"
            );
        }
        report
    }
}

fn statuses(statuses: &[Status]) -> Vec<&'static str> {
    statuses.iter().map(|s| s.as_str()).collect()
}
