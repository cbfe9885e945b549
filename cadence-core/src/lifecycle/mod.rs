//! Campaign lifecycle: claim passes, reservations, transitions and the
//! queue consumers that reconcile operator intent.

pub mod budget;
pub mod claim;
pub mod config;
pub mod consumer;
pub mod control;
mod edge;
pub mod engine;
pub mod execution;
pub mod reconcile;
pub mod reservation;
pub mod runtime;
pub mod ticker;
pub mod timer;
pub mod worker_pool;

pub use budget::BudgetController;
pub use claim::{ClaimPageHandler, ClaimScheduler, DrainReport, PageRequest, PageSummary, TickReport};
pub use config::{
    EdgeConfig, LifecycleConfig, PublisherConfig, QueuePollConfig, ReconcileConfig,
    SchedulerConfig,
};
pub use consumer::{Disposition, MessageHandler, QueueConsumer};
pub use control::{ControlEventPublisher, delivery_event};
pub use edge::{ClaimPass, LifecycleEdge};
pub use engine::{Plan, Transition, TransitionEngine, TransitionOutcome, WriteLog};
pub use execution::ExecutionHandler;
pub use reconcile::{MutationReconciler, reconcile_plan};
pub use reservation::Reserver;
pub use runtime::{EdgeLane, LifecyclePorts, LifecycleRuntime};
pub use ticker::{next_tick, run_ticks};
pub use timer::{Timer, TimerTask, TokioTimer};
pub use worker_pool::{PoolHandle, WorkHandler, WorkerPool};
