//! Bounded queue drained by a fixed set of tokio workers.

use std::{any::Any, fmt, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, warn};

use cadence_model::CampaignId;

use crate::error::{CampaignError, Result};

/// Processes one queued item.
#[async_trait]
pub trait WorkHandler<T>: Send + Sync + 'static {
    async fn handle(&self, worker: &str, item: T) -> Result<()>;

    /// Campaign the item acts on, recorded when the item fails.
    fn campaign_id(&self, _item: &T) -> Option<CampaignId> {
        None
    }
}

type SharedSender<T> = Arc<Mutex<Option<mpsc::Sender<T>>>>;

/// Producer side of a [`WorkerPool`]. Cloned into timers and claim passes.
pub struct PoolHandle<T> {
    name: Arc<str>,
    sender: SharedSender<T>,
}

impl<T> Clone for PoolHandle<T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            sender: Arc::clone(&self.sender),
        }
    }
}

impl<T> fmt::Debug for PoolHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolHandle")
            .field("name", &self.name)
            .field("open", &self.sender.lock().is_some())
            .finish()
    }
}

impl<T: Send + 'static> PoolHandle<T> {
    /// Enqueues `item`, waiting for capacity. Fails once the pool is closed.
    pub async fn submit(&self, item: T) -> Result<()> {
        let sender = self.sender.lock().clone();
        let Some(sender) = sender else {
            return Err(CampaignError::Cancelled(format!("pool {} closed", self.name)));
        };
        sender
            .send(item)
            .await
            .map_err(|_| CampaignError::Cancelled(format!("pool {} closed", self.name)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A fixed number of workers sharing one bounded queue.
///
/// Each item runs inside its own error boundary: a failing or panicking
/// item is logged and the worker moves on to the next one.
pub struct WorkerPool<T> {
    handle: PoolHandle<T>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<T> fmt::Debug for WorkerPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let worker_count = self
            .workers
            .try_lock()
            .map(|workers| workers.len())
            .unwrap_or_default();
        f.debug_struct("WorkerPool")
            .field("handle", &self.handle)
            .field("worker_count", &worker_count)
            .finish()
    }
}

impl<T: Send + 'static> WorkerPool<T> {
    pub fn spawn<H>(name: impl Into<Arc<str>>, workers: usize, capacity: usize, handler: Arc<H>) -> Self
    where
        H: WorkHandler<T>,
    {
        let name: Arc<str> = name.into();
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers.max(1) {
            let worker_id = format!("{}-w{}", name, i);
            let pool = Arc::clone(&name);
            let rx = Arc::clone(&rx);
            let handler = Arc::clone(&handler);

            handles.push(tokio::spawn(async move {
                loop {
                    let next = {
                        let mut guard = rx.lock().await;
                        guard.recv().await
                    };
                    let Some(item) = next else {
                        debug!(target: "cadence::runtime", worker = %worker_id, "queue closed; worker exiting");
                        break;
                    };

                    let campaign_id = handler.campaign_id(&item).map(|id| id.0);
                    match AssertUnwindSafe(handler.handle(&worker_id, item))
                        .catch_unwind()
                        .await
                    {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => {
                            warn!(
                                target: "cadence::runtime",
                                pool = %pool,
                                worker = %worker_id,
                                campaign_id,
                                error = %err,
                                "work item failed"
                            );
                        }
                        Err(panic) => {
                            let err = CampaignError::Panicked(panic_message(panic.as_ref()));
                            error!(
                                target: "cadence::runtime",
                                pool = %pool,
                                worker = %worker_id,
                                campaign_id,
                                error = %err,
                                "work item panicked"
                            );
                        }
                    }
                }
            }));
        }

        info!(target: "cadence::runtime", pool = %name, workers = handles.len(), capacity, "worker pool started");

        Self {
            handle: PoolHandle {
                name,
                sender: Arc::new(Mutex::new(Some(tx))),
            },
            workers: Mutex::new(handles),
        }
    }

    pub fn handle(&self) -> PoolHandle<T> {
        self.handle.clone()
    }

    /// Stops accepting items. Queued items are still processed.
    pub fn close(&self) {
        self.handle.sender.lock().take();
    }

    /// Closes the pool and waits up to `timeout` for workers to drain the
    /// queue. Returns `false` if any worker was still busy at the deadline.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.close();
        let handles = std::mem::take(&mut *self.workers.lock());
        let deadline = tokio::time::Instant::now() + timeout;
        let mut drained = true;

        for handle in handles {
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(target: "cadence::runtime", pool = %self.handle.name, "worker task failed: {:?}", e),
                Err(_) => {
                    warn!(target: "cadence::runtime", pool = %self.handle.name, "worker timed out during shutdown");
                    drained = false;
                }
            }
        }
        drained
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
