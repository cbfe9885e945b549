//! Wires both lifecycle edges and the queue consumers together and owns
//! their shutdown.

use std::{fmt, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::time::Instant;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{info, warn};

use cadence_model::Campaign;

use crate::{
    lifecycle::{
        LifecycleEdge,
        budget::BudgetController,
        claim::{ClaimPageHandler, ClaimScheduler, PageRequest, TickReport},
        config::LifecycleConfig,
        consumer::QueueConsumer,
        control::ControlEventPublisher,
        engine::TransitionEngine,
        execution::ExecutionHandler,
        reconcile::MutationReconciler,
        reservation::Reserver,
        ticker::run_ticks,
        timer::{Timer, TokioTimer},
        worker_pool::WorkerPool,
    },
    metrics::LifecycleMetrics,
    ports::{CampaignStore, DeliveryStore, MessageQueue, NotificationPublisher},
};

/// External collaborators of the runtime.
#[derive(Clone)]
pub struct LifecyclePorts {
    pub store: Arc<dyn CampaignStore>,
    pub delivery: Arc<dyn DeliveryStore>,
    pub publisher: Arc<dyn NotificationPublisher>,
    /// Mutation notifications. `None` disables reconciliation.
    pub mutations: Option<Arc<dyn MessageQueue>>,
    /// Budget verdicts. `None` disables the budget consumer.
    pub budget: Option<Arc<dyn MessageQueue>>,
    /// Reservation timer. Defaults to a [`TokioTimer`] bound to the
    /// runtime's shutdown token.
    pub timer: Option<Arc<dyn Timer>>,
}

impl fmt::Debug for LifecyclePorts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecyclePorts")
            .field("mutations", &self.mutations.as_ref().map(|q| q.name().to_owned()))
            .field("budget", &self.budget.as_ref().map(|q| q.name().to_owned()))
            .field("custom_timer", &self.timer.is_some())
            .finish()
    }
}

/// Claim and execution tiers of one edge.
pub struct EdgeLane {
    edge: LifecycleEdge,
    scheduler: Arc<ClaimScheduler>,
    reserver: Reserver,
    claim_pool: WorkerPool<PageRequest>,
    execution_pool: WorkerPool<Campaign>,
}

impl fmt::Debug for EdgeLane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EdgeLane")
            .field("edge", &self.edge)
            .field("reserver", &self.reserver)
            .field("claim_pool", &self.claim_pool)
            .field("execution_pool", &self.execution_pool)
            .finish()
    }
}

impl EdgeLane {
    pub fn edge(&self) -> LifecycleEdge {
        self.edge
    }

    pub fn scheduler(&self) -> &Arc<ClaimScheduler> {
        &self.scheduler
    }

    pub fn reserver(&self) -> &Reserver {
        &self.reserver
    }
}

pub struct LifecycleRuntime {
    config: LifecycleConfig,
    shutdown: CancellationToken,
    timer: Arc<dyn Timer>,
    engine: Arc<TransitionEngine>,
    lanes: Vec<EdgeLane>,
    consumers: Vec<Arc<QueueConsumer>>,
    /// Tick loops and queue pollers.
    loops: TaskTracker,
    /// Claim passes started by ticks.
    passes: TaskTracker,
}

impl fmt::Debug for LifecycleRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleRuntime")
            .field("config", &self.config)
            .field("lanes", &self.lanes)
            .field("consumers", &self.consumers)
            .field("loops", &self.loops.len())
            .field("passes", &self.passes.len())
            .field("shutdown_cancelled", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl LifecycleRuntime {
    /// Builds every component and spawns the worker pools. Nothing is
    /// claimed until [`start`](Self::start) or [`tick`](Self::tick).
    pub fn new(
        ports: LifecyclePorts,
        config: LifecycleConfig,
        metrics: LifecycleMetrics,
        shutdown: CancellationToken,
    ) -> Self {
        let timer = ports
            .timer
            .clone()
            .unwrap_or_else(|| Arc::new(TokioTimer::new(shutdown.clone())));
        let publisher = ControlEventPublisher::new(
            Arc::clone(&ports.publisher),
            config.publisher.clone(),
            metrics.clone(),
        );
        let engine = Arc::new(TransitionEngine::new(
            Arc::clone(&ports.store),
            Arc::clone(&ports.delivery),
            publisher.clone(),
            metrics.clone(),
        ));

        let lanes = LifecycleEdge::ALL
            .into_iter()
            .map(|edge| {
                let edge_config = config.edge(edge);
                let execution_pool = WorkerPool::spawn(
                    format!("{edge}-execution"),
                    edge_config.execution_workers,
                    edge_config.execution_queue,
                    Arc::new(ExecutionHandler::new(edge, Arc::clone(&engine))),
                );
                let reserver = Reserver::new(
                    edge,
                    edge_config.skew(),
                    Arc::clone(&timer),
                    execution_pool.handle(),
                    metrics.clone(),
                );
                let claim_pool = WorkerPool::spawn(
                    format!("{edge}-claim"),
                    edge_config.claim_workers,
                    edge_config.claim_queue,
                    Arc::new(ClaimPageHandler::new(
                        edge,
                        Arc::clone(&ports.store),
                        reserver.clone(),
                        publisher.clone(),
                        metrics.clone(),
                    )),
                );
                let scheduler = Arc::new(ClaimScheduler::new(
                    edge,
                    config.scheduler,
                    claim_pool.handle(),
                    metrics.clone(),
                    shutdown.clone(),
                ));
                EdgeLane {
                    edge,
                    scheduler,
                    reserver,
                    claim_pool,
                    execution_pool,
                }
            })
            .collect();

        let backoff = Duration::from_millis(config.reconcile.error_backoff_ms);
        let mut consumers = Vec::new();
        if let Some(queue) = ports.mutations {
            consumers.push(Arc::new(QueueConsumer::new(
                queue,
                Arc::new(MutationReconciler::new(
                    Arc::clone(&engine),
                    config.reconcile,
                    metrics.clone(),
                )),
                metrics.clone(),
                backoff,
            )));
        }
        if let Some(queue) = ports.budget {
            consumers.push(Arc::new(QueueConsumer::new(
                queue,
                Arc::new(BudgetController::new(Arc::clone(&engine))),
                metrics.clone(),
                backoff,
            )));
        }

        Self {
            config,
            shutdown,
            timer,
            engine,
            lanes,
            consumers,
            loops: TaskTracker::new(),
            passes: TaskTracker::new(),
        }
    }

    pub fn engine(&self) -> &Arc<TransitionEngine> {
        &self.engine
    }

    pub fn lane(&self, edge: LifecycleEdge) -> Option<&EdgeLane> {
        self.lanes.iter().find(|lane| lane.edge == edge)
    }

    pub fn consumers(&self) -> &[Arc<QueueConsumer>] {
        &self.consumers
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Spawns the tick loop of each edge and the queue pollers.
    pub fn start(&self) {
        let interval = self.config.scheduler.tick_interval();
        for lane in &self.lanes {
            self.loops.spawn(run_ticks(
                Arc::clone(&lane.scheduler),
                interval,
                self.shutdown.clone(),
                self.passes.clone(),
            ));
        }

        for consumer in &self.consumers {
            for i in 0..self.config.reconcile.pollers.max(1) {
                let consumer = Arc::clone(consumer);
                let poller = format!("poller-{i}");
                self.loops
                    .spawn(consumer.run(poller, self.shutdown.clone()));
            }
        }

        info!(
            target: "cadence::runtime",
            edges = self.lanes.len(),
            consumers = self.consumers.len(),
            tick_interval_ms = self.config.scheduler.tick_interval_ms,
            "lifecycle runtime started"
        );
    }

    /// Runs one tick of every edge for `base_time` and waits for it.
    pub async fn tick(&self, base_time: DateTime<Utc>) -> Vec<(LifecycleEdge, TickReport)> {
        join_all(self.lanes.iter().map(|lane| async move {
            (lane.edge, lane.scheduler.tick(base_time).await)
        }))
        .await
    }

    /// Stops producers first, then drains claim pools, then execution pools.
    /// Returns `false` when the shutdown timeout cut draining short.
    pub async fn shutdown(&self) -> bool {
        let deadline = Instant::now() + self.config.shutdown_timeout();
        info!(target: "cadence::runtime", timeout_ms = self.config.shutdown_timeout_ms, "lifecycle runtime shutting down");
        self.shutdown.cancel();

        self.loops.close();
        self.passes.close();
        let producers = async {
            self.loops.wait().await;
            self.passes.wait().await;
            self.timer.wait().await;
        };
        let mut clean = tokio::time::timeout_at(deadline, producers).await.is_ok();
        if !clean {
            warn!(target: "cadence::runtime", "producers still running at shutdown deadline");
        }

        for lane in &self.lanes {
            clean &= lane.claim_pool.shutdown(remaining(deadline)).await;
        }
        for lane in &self.lanes {
            clean &= lane.execution_pool.shutdown(remaining(deadline)).await;
        }

        info!(target: "cadence::runtime", clean, "lifecycle runtime stopped");
        clean
    }
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}
