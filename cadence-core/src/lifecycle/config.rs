use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::LifecycleEdge;

/// Knobs that tune the lifecycle runtime.
///
/// All fields carry defaults; the server binary overlays values parsed from
/// flags and environment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Tick cadence, claim window and page size shared by both edges.
    pub scheduler: SchedulerConfig,
    /// Pools and timer skew of the start edge.
    pub start: EdgeConfig,
    /// Pools and timer skew of the end edge.
    pub end: EdgeConfig,
    /// Control event envelope fields.
    pub publisher: PublisherConfig,
    /// Mutation and budget queue consumers.
    pub reconcile: ReconcileConfig,
    /// Upper bound for draining pools during shutdown (ms).
    pub shutdown_timeout_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            start: EdgeConfig::default(),
            end: EdgeConfig::for_end(),
            publisher: PublisherConfig::default(),
            reconcile: ReconcileConfig::default(),
            shutdown_timeout_ms: 60_000,
        }
    }
}

impl LifecycleConfig {
    pub fn edge(&self, edge: LifecycleEdge) -> &EdgeConfig {
        match edge {
            LifecycleEdge::Start => &self.start,
            LifecycleEdge::End => &self.end,
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Tick cadence (ms). Ticks align to multiples of this on the wall clock.
    pub tick_interval_ms: u64,
    /// Extra look-ahead past the next tick for the imminent pass (ms).
    pub claim_margin_ms: u64,
    /// Rows per page fetch.
    pub page_size: usize,
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// How far past the tick time the imminent pass looks.
    pub fn imminent_window(&self) -> chrono::Duration {
        chrono::Duration::milliseconds((self.tick_interval_ms + self.claim_margin_ms) as i64)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 60_000,
            claim_margin_ms: 10_000,
            page_size: 10,
        }
    }
}

/// Worker pool sizing plus timer skew for one edge.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct EdgeConfig {
    /// Concurrent page-fetch workers.
    pub claim_workers: usize,
    /// Capacity of the page-fetch queue.
    pub claim_queue: usize,
    /// Concurrent transition workers.
    pub execution_workers: usize,
    /// Capacity of the transition queue fed by timers and recovery.
    pub execution_queue: usize,
    /// Offset added to the boundary when reserving (ms, may be negative).
    pub skew_ms: i64,
}

impl EdgeConfig {
    pub fn skew(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.skew_ms)
    }

    pub fn for_end() -> Self {
        Self {
            skew_ms: 100,
            ..Self::default()
        }
    }
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            claim_workers: 5,
            claim_queue: 5,
            execution_workers: 5,
            execution_queue: 5,
            skew_ms: -150,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PublisherConfig {
    pub topic: String,
    /// Value of the `service` field.
    pub service: String,
    pub version: String,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            topic: "cadence:control".into(),
            service: "campaign-manager".into(),
            version: "1.0".into(),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Sequential consumers per queue.
    pub pollers: usize,
    /// How long an orphaned creative record survives (seconds).
    pub creative_expiry_secs: i64,
    /// Pause after a failed receive before polling again (ms).
    pub error_backoff_ms: u64,
}

impl ReconcileConfig {
    pub fn creative_expiry(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.creative_expiry_secs)
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            pollers: 1,
            creative_expiry_secs: 24 * 60 * 60,
            error_backoff_ms: 1_000,
        }
    }
}

/// Poll parameters of a visibility-timeout queue.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct QueuePollConfig {
    /// Time a received message stays invisible to other consumers (ms).
    pub visibility_timeout_ms: u64,
    /// Long-poll wait per receive (ms).
    pub wait_time_ms: u64,
    pub max_messages: usize,
}

impl Default for QueuePollConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_ms: 60_000,
            wait_time_ms: 20_000,
            max_messages: 10,
        }
    }
}

impl QueuePollConfig {
    pub fn wait_time(&self) -> Duration {
        Duration::from_millis(self.wait_time_ms)
    }
}
