//! Lifecycle metrics.
//!
//! Counters and histograms for:
//! - rows claimed per edge and pass, plus claim conflicts
//! - transition latency and outcome
//! - queue throughput and publish failures
//! - materialized-view inconsistencies
//!
//! The recorder itself is installed once by the binary; components receive a
//! [`LifecycleMetrics`] handle through their constructors.

use std::{sync::Arc, time::Duration};

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

use crate::lifecycle::{ClaimPass, LifecycleEdge};

// ============================================================================
// Metric Names
// ============================================================================

pub mod names {
    pub const CLAIMED_ROWS_TOTAL: &str = "cadence_claimed_rows_total";
    pub const CLAIM_CONFLICTS_TOTAL: &str = "cadence_claim_conflicts_total";
    pub const CLAIM_PASS_DURATION: &str = "cadence_claim_pass_duration_seconds";
    pub const TRANSITION_DURATION: &str = "cadence_transition_duration_seconds";
    pub const TRANSITIONS_TOTAL: &str = "cadence_transitions_total";
    pub const QUEUE_MESSAGES_TOTAL: &str = "cadence_queue_messages_total";
    pub const PUBLISH_FAILURES_TOTAL: &str = "cadence_publish_failures_total";
    pub const INCONSISTENCY_TOTAL: &str = "cadence_materialized_inconsistency_total";
    pub const DELIVERY_WRITES_TOTAL: &str = "cadence_delivery_writes_total";
    pub const RESERVATIONS_PENDING: &str = "cadence_reservations_pending";
}

/// Registers metric descriptions with the installed recorder.
pub fn describe() {
    describe_counter!(names::CLAIMED_ROWS_TOTAL, "Rows returned by claim page fetches");
    describe_counter!(
        names::CLAIM_CONFLICTS_TOTAL,
        "Claims that lost the compare-and-swap on updated_at"
    );
    describe_histogram!(
        names::CLAIM_PASS_DURATION,
        "Duration of a full claim pass drain in seconds"
    );
    describe_histogram!(
        names::TRANSITION_DURATION,
        "Duration of one campaign transition in seconds"
    );
    describe_counter!(names::TRANSITIONS_TOTAL, "Transitions by outcome");
    describe_counter!(names::QUEUE_MESSAGES_TOTAL, "Inbound queue messages by result");
    describe_counter!(names::PUBLISH_FAILURES_TOTAL, "Control events that failed to publish");
    describe_counter!(
        names::INCONSISTENCY_TOTAL,
        "Delivery store writes left behind by a failed transition"
    );
    describe_counter!(names::DELIVERY_WRITES_TOTAL, "Delivery store writes by table");
    describe_gauge!(names::RESERVATIONS_PENDING, "Timer reservations not yet fired");
}

/// Outcome label of a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcomeLabel {
    Applied,
    Skipped,
    Failed,
}

impl TransitionOutcomeLabel {
    fn as_str(self) -> &'static str {
        match self {
            TransitionOutcomeLabel::Applied => "applied",
            TransitionOutcomeLabel::Skipped => "skipped",
            TransitionOutcomeLabel::Failed => "failed",
        }
    }
}

/// Metrics handle shared by the lifecycle components. Every series carries
/// a `service` label.
#[derive(Clone, Debug)]
pub struct LifecycleMetrics {
    service: Arc<str>,
}

impl LifecycleMetrics {
    pub fn new(service: impl Into<Arc<str>>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn service(&self) -> String {
        self.service.to_string()
    }

    pub fn record_claimed(&self, edge: LifecycleEdge, pass: ClaimPass, rows: usize) {
        counter!(
            names::CLAIMED_ROWS_TOTAL,
            "service" => self.service(),
            "edge" => edge.as_str(),
            "pass" => pass.as_str()
        )
        .increment(rows as u64);
    }

    pub fn record_claim_conflict(&self, edge: LifecycleEdge) {
        counter!(
            names::CLAIM_CONFLICTS_TOTAL,
            "service" => self.service(),
            "edge" => edge.as_str()
        )
        .increment(1);
    }

    pub fn record_pass(&self, edge: LifecycleEdge, pass: ClaimPass, elapsed: Duration) {
        histogram!(
            names::CLAIM_PASS_DURATION,
            "service" => self.service(),
            "edge" => edge.as_str(),
            "pass" => pass.as_str()
        )
        .record(elapsed.as_secs_f64());
    }

    pub fn record_transition(
        &self,
        kind: &'static str,
        outcome: TransitionOutcomeLabel,
        elapsed: Duration,
    ) {
        histogram!(
            names::TRANSITION_DURATION,
            "service" => self.service(),
            "kind" => kind
        )
        .record(elapsed.as_secs_f64());
        counter!(
            names::TRANSITIONS_TOTAL,
            "service" => self.service(),
            "kind" => kind,
            "outcome" => outcome.as_str()
        )
        .increment(1);
    }

    pub fn record_queue_message(&self, queue: &str, result: &'static str) {
        counter!(
            names::QUEUE_MESSAGES_TOTAL,
            "service" => self.service(),
            "queue" => queue.to_string(),
            "result" => result
        )
        .increment(1);
    }

    pub fn record_publish_failure(&self, kind: &'static str) {
        counter!(
            names::PUBLISH_FAILURES_TOTAL,
            "service" => self.service(),
            "kind" => kind
        )
        .increment(1);
    }

    pub fn record_inconsistency(&self, kind: &'static str) {
        counter!(
            names::INCONSISTENCY_TOTAL,
            "service" => self.service(),
            "kind" => kind
        )
        .increment(1);
    }

    pub fn record_delivery_write(&self, table: &'static str, op: &'static str) {
        counter!(
            names::DELIVERY_WRITES_TOTAL,
            "service" => self.service(),
            "table" => table,
            "op" => op
        )
        .increment(1);
    }

    pub fn set_reservations_pending(&self, pending: usize) {
        gauge!(names::RESERVATIONS_PENDING, "service" => self.service()).set(pending as f64);
    }
}

impl Default for LifecycleMetrics {
    fn default() -> Self {
        Self::new("campaign-manager")
    }
}
