use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use dashmap::{DashMap, mapref::entry::Entry};
use tracing::{debug, trace, warn};

use cadence_model::{Campaign, CampaignId};

use crate::{
    error::Result,
    lifecycle::{LifecycleEdge, timer::Timer, worker_pool::PoolHandle},
    metrics::LifecycleMetrics,
};

/// Binds campaigns to the instant their transition should run and feeds
/// them to the execution pool when that instant arrives.
///
/// The book holds one fire time per campaign. A later reservation with a
/// different fire time supersedes the earlier one; the superseded timer
/// finds its entry gone and does nothing.
#[derive(Clone)]
pub struct Reserver {
    edge: LifecycleEdge,
    skew: chrono::Duration,
    timer: Arc<dyn Timer>,
    execution: PoolHandle<Campaign>,
    book: Arc<DashMap<CampaignId, DateTime<Utc>>>,
    metrics: LifecycleMetrics,
}

impl fmt::Debug for Reserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reserver")
            .field("edge", &self.edge)
            .field("skew", &self.skew)
            .field("pending", &self.book.len())
            .field("execution", &self.execution)
            .finish()
    }
}

impl Reserver {
    pub fn new(
        edge: LifecycleEdge,
        skew: chrono::Duration,
        timer: Arc<dyn Timer>,
        execution: PoolHandle<Campaign>,
        metrics: LifecycleMetrics,
    ) -> Self {
        Self {
            edge,
            skew,
            timer,
            execution,
            book: Arc::new(DashMap::new()),
            metrics,
        }
    }

    pub fn fire_time(&self, boundary: DateTime<Utc>) -> DateTime<Utc> {
        boundary + self.skew
    }

    pub fn pending(&self) -> usize {
        self.book.len()
    }

    pub fn reserved_at(&self, id: CampaignId) -> Option<DateTime<Utc>> {
        self.book.get(&id).map(|at| *at)
    }

    /// Reserves `campaign` for `boundary` adjusted by this edge's skew.
    /// Returns `false` when an identical reservation already exists.
    pub fn reserve(&self, campaign: Campaign, boundary: DateTime<Utc>) -> bool {
        let fire_at = self.fire_time(boundary);
        let id = campaign.id;

        match self.book.entry(id) {
            Entry::Occupied(entry) if *entry.get() == fire_at => {
                trace!(target: "cadence::timer", edge = %self.edge, campaign_id = %id, fire_at = %fire_at, "already reserved");
                return false;
            }
            Entry::Occupied(mut entry) => {
                debug!(
                    target: "cadence::timer",
                    edge = %self.edge,
                    campaign_id = %id,
                    previous = %entry.get(),
                    fire_at = %fire_at,
                    "boundary moved; superseding reservation"
                );
                entry.insert(fire_at);
            }
            Entry::Vacant(entry) => {
                entry.insert(fire_at);
            }
        }
        self.metrics.set_reservations_pending(self.book.len());

        let book = Arc::clone(&self.book);
        let execution = self.execution.clone();
        let metrics = self.metrics.clone();
        let edge = self.edge;

        self.timer.execute_at(
            fire_at,
            Box::pin(async move {
                if book.remove_if(&id, |_, at| *at == fire_at).is_none() {
                    trace!(target: "cadence::timer", edge = %edge, campaign_id = %id, "reservation superseded");
                    return;
                }
                metrics.set_reservations_pending(book.len());
                debug!(target: "cadence::timer", edge = %edge, campaign_id = %id, fire_at = %fire_at, "reservation fired");
                if let Err(err) = execution.submit(campaign).await {
                    warn!(target: "cadence::timer", edge = %edge, campaign_id = %id, error = %err, "failed to hand fired reservation to execution pool");
                }
            }),
        );

        debug!(target: "cadence::timer", edge = %self.edge, campaign_id = %id, boundary = %boundary, fire_at = %fire_at, "reserved");
        true
    }

    /// Queues `campaign` for immediate execution.
    ///
    /// A reservation still ahead of now is superseded, since its stale timer
    /// would otherwise hold the row until the old fire time. One already due
    /// is left to its timer so the row is not dispatched twice.
    pub async fn execute_now(&self, campaign: Campaign) -> Result<bool> {
        let id = campaign.id;
        let now = Utc::now();

        match self.book.entry(id) {
            Entry::Occupied(entry) if *entry.get() <= now => {
                trace!(target: "cadence::timer", edge = %self.edge, campaign_id = %id, "reservation due; not dispatching twice");
                return Ok(false);
            }
            Entry::Occupied(entry) => {
                debug!(
                    target: "cadence::timer",
                    edge = %self.edge,
                    campaign_id = %id,
                    previous = %entry.get(),
                    "running now; superseding later reservation"
                );
                entry.remove();
            }
            Entry::Vacant(_) => {}
        }
        self.metrics.set_reservations_pending(self.book.len());

        debug!(target: "cadence::timer", edge = %self.edge, campaign_id = %id, "dispatching for immediate execution");
        self.execution.submit(campaign).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::TimeDelta;
    use parking_lot::Mutex;

    use cadence_model::{GroupId, Status};

    use super::*;
    use crate::{
        infra::memory::ManualTimer,
        lifecycle::worker_pool::{WorkHandler, WorkerPool},
    };

    #[derive(Default)]
    struct Executed {
        ids: Mutex<Vec<CampaignId>>,
    }

    #[async_trait]
    impl WorkHandler<Campaign> for Executed {
        async fn handle(&self, _worker: &str, campaign: Campaign) -> Result<()> {
            self.ids.lock().push(campaign.id);
            Ok(())
        }
    }

    struct Fixture {
        reserver: Reserver,
        timer: ManualTimer,
        pool: WorkerPool<Campaign>,
        executed: Arc<Executed>,
    }

    impl Fixture {
        fn new() -> Self {
            let timer = ManualTimer::new();
            let executed = Arc::new(Executed::default());
            let pool = WorkerPool::spawn("exec", 1, 16, Arc::clone(&executed));
            let reserver = Reserver::new(
                LifecycleEdge::Start,
                TimeDelta::milliseconds(-150),
                Arc::new(timer.clone()),
                pool.handle(),
                LifecycleMetrics::new("test"),
            );
            Self {
                reserver,
                timer,
                pool,
                executed,
            }
        }

        async fn executed(self) -> Vec<CampaignId> {
            assert!(self.pool.shutdown(Duration::from_secs(5)).await);
            self.executed.ids.lock().clone()
        }
    }

    fn warmup(id: i64, start_at: DateTime<Utc>) -> Campaign {
        Campaign {
            id: CampaignId(id),
            group_id: GroupId(1),
            org_code: "ORG01".into(),
            name: format!("campaign {id}"),
            status: Status::Warmup,
            start_at,
            end_at: None,
            updated_at: start_at - TimeDelta::hours(1),
        }
    }

    #[tokio::test]
    async fn identical_reservation_is_deduplicated() {
        let fixture = Fixture::new();
        let boundary = Utc::now() + TimeDelta::minutes(5);
        let campaign = warmup(1, boundary);

        assert!(fixture.reserver.reserve(campaign.clone(), boundary));
        assert!(!fixture.reserver.reserve(campaign, boundary));

        assert_eq!(fixture.reserver.pending(), 1);
        assert_eq!(
            fixture.reserver.reserved_at(CampaignId(1)),
            Some(boundary - TimeDelta::milliseconds(150))
        );
        assert_eq!(fixture.timer.scheduled().len(), 1);

        assert_eq!(fixture.timer.fire_all().await, 1);
        assert_eq!(fixture.reserver.pending(), 0);
        assert_eq!(fixture.executed().await, vec![CampaignId(1)]);
    }

    #[tokio::test]
    async fn moved_boundary_supersedes_the_earlier_timer() {
        let fixture = Fixture::new();
        let first = Utc::now() + TimeDelta::minutes(5);
        let moved = first + TimeDelta::minutes(3);

        assert!(fixture.reserver.reserve(warmup(1, first), first));
        assert!(fixture.reserver.reserve(warmup(1, moved), moved));
        assert_eq!(fixture.timer.scheduled().len(), 2);

        // The stale timer finds its entry replaced and does nothing.
        assert_eq!(fixture.timer.fire_due(first).await, 1);
        assert_eq!(fixture.reserver.pending(), 1);

        assert_eq!(fixture.timer.fire_all().await, 1);
        assert_eq!(fixture.executed().await, vec![CampaignId(1)]);
    }

    #[tokio::test]
    async fn execute_now_supersedes_a_later_reservation() {
        let fixture = Fixture::new();
        let boundary = Utc::now() + TimeDelta::minutes(5);
        fixture.reserver.reserve(warmup(1, boundary), boundary);

        assert!(fixture.reserver.execute_now(warmup(1, boundary)).await.unwrap());
        assert_eq!(fixture.reserver.pending(), 0);

        // The superseded timer no longer dispatches.
        fixture.timer.fire_all().await;
        assert_eq!(fixture.executed().await, vec![CampaignId(1)]);
    }

    #[tokio::test]
    async fn execute_now_leaves_a_due_reservation_to_its_timer() {
        let fixture = Fixture::new();
        let boundary = Utc::now() - TimeDelta::seconds(1);
        fixture.reserver.reserve(warmup(1, boundary), boundary);

        assert!(!fixture.reserver.execute_now(warmup(1, boundary)).await.unwrap());
        assert_eq!(fixture.reserver.pending(), 1);

        fixture.timer.fire_all().await;
        assert_eq!(fixture.executed().await, vec![CampaignId(1)]);
    }

    #[tokio::test]
    async fn execute_now_without_reservation_dispatches() {
        let fixture = Fixture::new();
        let campaign = warmup(2, Utc::now() - TimeDelta::minutes(10));

        assert!(fixture.reserver.execute_now(campaign).await.unwrap());
        assert_eq!(fixture.executed().await, vec![CampaignId(2)]);
    }
}
