use std::{fmt, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::lifecycle::timer::{Timer, TimerTask};

/// Timer that only fires when told to. Lets tests step through
/// reservations without sleeping.
#[derive(Clone, Default)]
pub struct ManualTimer {
    scheduled: Arc<Mutex<Vec<(DateTime<Utc>, TimerTask)>>>,
}

impl fmt::Debug for ManualTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualTimer")
            .field("scheduled", &self.scheduled.lock().len())
            .finish()
    }
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire times of tasks not yet run, earliest first.
    pub fn scheduled(&self) -> Vec<DateTime<Utc>> {
        let mut at: Vec<_> = self.scheduled.lock().iter().map(|(at, _)| *at).collect();
        at.sort();
        at
    }

    /// Runs every task due at or before `now`, earliest first.
    pub async fn fire_due(&self, now: DateTime<Utc>) -> usize {
        let mut due = {
            let mut scheduled = self.scheduled.lock();
            let (due, pending): (Vec<_>, Vec<_>) =
                scheduled.drain(..).partition(|(at, _)| *at <= now);
            *scheduled = pending;
            due
        };
        due.sort_by_key(|(at, _)| *at);
        let fired = due.len();
        for (_, task) in due {
            task.await;
        }
        fired
    }

    pub async fn fire_all(&self) -> usize {
        self.fire_due(DateTime::<Utc>::MAX_UTC).await
    }
}

#[async_trait]
impl Timer for ManualTimer {
    fn execute_at(&self, at: DateTime<Utc>, task: TimerTask) {
        self.scheduled.lock().push((at, task));
    }

    /// Pending tasks never fire after shutdown.
    async fn wait(&self) {
        self.scheduled.lock().clear();
    }
}
