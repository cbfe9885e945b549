//! Deferred execution at an absolute wall-clock time.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::trace;

pub type TimerTask = BoxFuture<'static, ()>;

/// Schedules one-shot tasks. Pending tasks are dropped unrun when the
/// timer's cancellation token fires.
#[async_trait]
pub trait Timer: Send + Sync {
    /// Runs `task` at `at`, or as soon as possible when `at` is in the past.
    fn execute_at(&self, at: DateTime<Utc>, task: TimerTask);

    /// Waits for every scheduled task to either fire or observe cancellation.
    async fn wait(&self);
}

/// [`Timer`] backed by one sleeping tokio task per reservation.
#[derive(Clone)]
pub struct TokioTimer {
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl fmt::Debug for TokioTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioTimer")
            .field("pending", &self.tracker.len())
            .field("shutdown_cancelled", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl TokioTimer {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            shutdown,
            tracker: TaskTracker::new(),
        }
    }

    pub fn pending(&self) -> usize {
        self.tracker.len()
    }
}

#[async_trait]
impl Timer for TokioTimer {
    fn execute_at(&self, at: DateTime<Utc>, task: TimerTask) {
        let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let shutdown = self.shutdown.clone();

        self.tracker.spawn(async move {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    trace!(target: "cadence::timer", fire_at = %at, "reservation cancelled");
                }
                _ = tokio::time::sleep(delay) => task.await,
            }
        });
    }

    async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    };

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let timer = TokioTimer::new(CancellationToken::new());
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);

        timer.execute_at(
            Utc::now() + chrono::Duration::seconds(30),
            Box::pin(async move { flag.store(true, Ordering::SeqCst) }),
        );

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!fired.load(Ordering::SeqCst));

        timer.wait().await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn past_deadline_runs_immediately() {
        let timer = TokioTimer::new(CancellationToken::new());
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);

        timer.execute_at(
            Utc::now() - chrono::Duration::seconds(5),
            Box::pin(async move { flag.store(true, Ordering::SeqCst) }),
        );

        timer.wait().await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_drops_pending_tasks() {
        let shutdown = CancellationToken::new();
        let timer = TokioTimer::new(shutdown.clone());
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);

        timer.execute_at(
            Utc::now() + chrono::Duration::minutes(5),
            Box::pin(async move { flag.store(true, Ordering::SeqCst) }),
        );
        assert_eq!(timer.pending(), 1);

        shutdown.cancel();
        timer.wait().await;
        assert!(!fired.load(Ordering::SeqCst));
    }
}
