//! Wall-clock aligned tick loop.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info};

use crate::lifecycle::claim::ClaimScheduler;

/// The first multiple of `interval` since the epoch that is strictly after
/// `now`. Every instance using the same interval ticks on the same instants.
pub fn next_tick(now: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    let step = i64::try_from(interval.as_millis()).unwrap_or(i64::MAX).max(1);
    let now_ms = now.timestamp_millis();
    let next_ms = now_ms.div_euclid(step).saturating_add(1).saturating_mul(step);
    DateTime::from_timestamp_millis(next_ms).unwrap_or(now)
}

/// Runs one tick right away, then one on every aligned boundary until
/// `shutdown` fires. Each tick runs on `tracker` so a slow pass never delays
/// the next boundary and shutdown can wait for passes still in flight.
pub async fn run_ticks(
    scheduler: Arc<ClaimScheduler>,
    interval: Duration,
    shutdown: CancellationToken,
    tracker: TaskTracker,
) {
    let edge = scheduler.edge();
    info!(target: "cadence::claim", edge = %edge, interval_ms = interval.as_millis() as u64, "tick loop started");

    let mut base = Utc::now();
    loop {
        let tick = Arc::clone(&scheduler);
        tracker.spawn(async move {
            tick.tick(base).await;
        });

        let next = next_tick(Utc::now(), interval);
        let delay = (next - Utc::now()).max(TimeDelta::zero());
        let delay = delay.to_std().unwrap_or_default();

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
        base = next;
    }

    debug!(target: "cadence::claim", edge = %edge, "tick loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn aligns_to_the_next_minute() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 42).unwrap();
        let next = next_tick(now, Duration::from_secs(60));
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 10, 19, 12, 1, 0).unwrap());
    }

    #[test]
    fn exact_boundary_moves_forward() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 12, 1, 0).unwrap();
        let next = next_tick(now, Duration::from_secs(60));
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 10, 19, 12, 2, 0).unwrap());
    }

    #[test]
    fn sub_minute_interval() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 7).unwrap();
        let next = next_tick(now, Duration::from_secs(15));
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 15).unwrap());
    }
}
