mod support;

use chrono::{TimeDelta, Utc};

use cadence_core::{CampaignError, LifecycleEdge, lifecycle::TransitionOutcome};
use cadence_model::{CampaignId, DeliveryTable, GroupId, Status};

use support::{Harness, campaign, ending_at, eventually, starting_at};

fn pairs(events: &[(&str, &str)]) -> Vec<(String, String)> {
    events
        .iter()
        .map(|(e, op)| (e.to_string(), op.to_string()))
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tick_claims_reserves_and_starts_campaign() {
    let harness = Harness::new();
    let seeded = harness.seed(campaign(1, 10, Status::Configured));
    let base = Utc::now();

    let reports = harness.runtime.tick(base).await;
    let start = reports
        .iter()
        .find(|(edge, _)| *edge == LifecycleEdge::Start)
        .map(|(_, report)| *report)
        .expect("start edge report");
    assert_eq!(start.imminent.rows, 1);
    assert_eq!(start.recovery.rows, 0);

    assert_eq!(harness.store.status(seeded.id), Some(Status::Warmup));
    let fire_at = seeded.start_at - TimeDelta::milliseconds(150);
    assert_eq!(harness.timer.scheduled(), vec![fire_at]);
    assert_eq!(
        harness
            .reserver(LifecycleEdge::Start)
            .reserved_at(seeded.id),
        Some(fire_at)
    );
    assert_eq!(
        harness.publisher.campaign_events(1),
        pairs(&[("warmup", "NONE")])
    );

    assert_eq!(harness.timer.fire_all().await, 1);
    assert!(harness.status_becomes(seeded.id, Status::Started).await);
    assert!(
        eventually(|| async { harness.publisher.campaign_events(1).len() == 2 }).await
    );

    assert_eq!(
        harness.publisher.campaign_events(1),
        pairs(&[("warmup", "NONE"), ("start", "PUT")])
    );
    let record = harness.delivery.campaign(seeded.id).expect("campaign record");
    assert_eq!(record.status, Status::Started);
    assert_eq!(record.creative_ids.len(), 2);
    assert_eq!(harness.delivery.count(DeliveryTable::Creative), 2);
    assert_eq!(harness.delivery.count(DeliveryTable::Content), 1);
    assert_eq!(harness.delivery.touch_points(GroupId(10)).len(), 2);
    assert_eq!(
        harness.reserver(LifecycleEdge::Start).pending(),
        0,
        "fired reservation leaves the book"
    );

    assert!(harness.runtime.shutdown().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn repeated_ticks_do_not_double_reserve() {
    let harness = Harness::new();
    let seeded = harness.seed(campaign(1, 10, Status::Configured));
    let base = Utc::now();

    harness.runtime.tick(base).await;
    harness.runtime.tick(base + TimeDelta::seconds(5)).await;

    assert_eq!(harness.timer.scheduled().len(), 1);
    assert_eq!(harness.reserver(LifecycleEdge::Start).pending(), 1);
    assert_eq!(
        harness.publisher.campaign_events(1),
        pairs(&[("warmup", "NONE")]),
        "re-arming a claimed row publishes nothing"
    );

    harness.timer.fire_all().await;
    assert!(harness.status_becomes(seeded.id, Status::Started).await);

    // A late duplicate execution finds the marker gone.
    let outcome = harness
        .engine()
        .execute(LifecycleEdge::Start, seeded.id)
        .await
        .expect("skip is not an error");
    assert!(matches!(outcome, TransitionOutcome::Skipped { .. }));
    assert_eq!(harness.publisher.campaign_events(1).len(), 2);

    assert!(harness.runtime.shutdown().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn touch_points_stay_while_group_still_delivers() {
    let harness = Harness::new();
    let past = Utc::now() - TimeDelta::seconds(1);
    let first = harness.seed(starting_at(campaign(1, 5, Status::Warmup), past));
    let second = harness.seed(starting_at(campaign(2, 5, Status::Warmup), past));
    let engine = harness.engine();

    for id in [first.id, second.id] {
        let outcome = engine.execute(LifecycleEdge::Start, id).await.unwrap();
        assert!(outcome.is_applied());
    }
    assert_eq!(harness.delivery.touch_points(GroupId(5)).len(), 2);

    harness
        .store
        .force_status(first.id, Status::Terminate)
        .await
        .unwrap();
    let outcome = engine.execute(LifecycleEdge::End, first.id).await.unwrap();
    assert!(outcome.is_applied());
    assert_eq!(harness.store.status(first.id), Some(Status::Ended));
    assert!(harness.delivery.campaign(first.id).is_none());
    assert!(harness.delivery.content(first.id).is_none());
    assert_eq!(
        harness.delivery.touch_points(GroupId(5)).len(),
        2,
        "second campaign still delivers to the group"
    );
    assert!(harness.publisher.touch_point_events().is_empty());

    harness
        .store
        .force_status(second.id, Status::Terminate)
        .await
        .unwrap();
    engine.execute(LifecycleEdge::End, second.id).await.unwrap();
    assert!(harness.delivery.touch_points(GroupId(5)).is_empty());

    let mut removed = harness.publisher.touch_point_events();
    removed.sort();
    assert_eq!(removed, vec!["tp-5-a".to_string(), "tp-5-b".to_string()]);
    assert_eq!(
        harness.publisher.campaign_events(2).last().cloned(),
        Some(("end".to_string(), "DELETE".to_string()))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn start_and_operator_stop_race_has_one_winner() {
    for round in 0..20 {
        let harness = Harness::new();
        let past = Utc::now() - TimeDelta::seconds(1);
        let seeded = harness.seed(starting_at(campaign(1, 1, Status::Warmup), past));
        let expected = seeded.updated_at;

        let (outcome, operator) = tokio::join!(
            harness.engine().execute(LifecycleEdge::Start, seeded.id),
            harness
                .store
                .operator_update(seeded.id, Status::Stop, expected),
        );
        let outcome = outcome.expect("race loss is a skip");

        match (outcome.is_applied(), operator) {
            (true, Err(CampaignError::VersionConflict(_))) => {
                assert_eq!(harness.store.status(seeded.id), Some(Status::Started));
                assert!(harness.delivery.campaign(seeded.id).is_some());
            }
            (false, Ok(_)) => {
                assert_eq!(harness.store.status(seeded.id), Some(Status::Stop));
                assert!(harness.delivery.campaign(seeded.id).is_none());
                assert!(harness.publisher.campaign_events(1).is_empty());
            }
            (applied, operator) => {
                panic!("round {round}: both or neither won (applied={applied}, operator={operator:?})")
            }
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn delivery_failure_rolls_back_and_recovery_completes() {
    let harness = Harness::new();
    let past = Utc::now() - TimeDelta::seconds(30);
    let seeded = harness.seed(starting_at(campaign(1, 3, Status::Warmup), past));

    harness.delivery.fail_after(2);
    let err = harness
        .engine()
        .execute(LifecycleEdge::Start, seeded.id)
        .await
        .unwrap_err();
    assert!(matches!(err, CampaignError::KeyValue(_)));
    assert_eq!(harness.store.status(seeded.id), Some(Status::Warmup));
    assert_eq!(harness.delivery.writes(), 2);
    assert!(harness.publisher.campaign_events(1).is_empty());

    harness.delivery.heal();
    let reports = harness.runtime.tick(Utc::now()).await;
    let recovered: usize = reports.iter().map(|(_, r)| r.recovery.rows).sum();
    assert_eq!(recovered, 1);
    assert!(harness.timer.scheduled().is_empty(), "recovery runs immediately");

    assert!(harness.status_becomes(seeded.id, Status::Started).await);
    assert!(eventually(|| async { !harness.publisher.campaign_events(1).is_empty() }).await);
    assert_eq!(
        harness.publisher.campaign_events(1),
        pairs(&[("start", "PUT")])
    );
    assert_eq!(harness.delivery.count(DeliveryTable::Creative), 2);

    assert!(harness.runtime.shutdown().await);
}

#[tokio::test]
async fn commit_failure_keeps_marker_for_recovery() {
    let harness = Harness::new();
    let past = Utc::now() - TimeDelta::seconds(30);
    let seeded = harness.seed(starting_at(campaign(1, 3, Status::Warmup), past));

    harness.store.fail_commits(true);
    let err = harness
        .engine()
        .execute(LifecycleEdge::Start, seeded.id)
        .await
        .unwrap_err();
    assert!(matches!(err, CampaignError::Database(_)));
    assert_eq!(harness.store.status(seeded.id), Some(Status::Warmup));
    assert!(harness.delivery.campaign(seeded.id).is_some(), "writes are not compensated");
    assert!(harness.publisher.messages().is_empty());

    harness.store.fail_commits(false);
    let outcome = harness
        .engine()
        .execute(LifecycleEdge::Start, seeded.id)
        .await
        .unwrap();
    assert!(outcome.is_applied());
}

#[tokio::test]
async fn publish_failure_does_not_undo_transition() {
    let harness = Harness::new();
    let past = Utc::now() - TimeDelta::seconds(1);
    let seeded = harness.seed(starting_at(campaign(1, 1, Status::Warmup), past));

    harness.publisher.set_failing(true);
    let outcome = harness
        .engine()
        .execute(LifecycleEdge::Start, seeded.id)
        .await
        .unwrap();

    assert!(outcome.is_applied());
    assert_eq!(harness.store.status(seeded.id), Some(Status::Started));
    assert!(harness.delivery.campaign(seeded.id).is_some());
    assert!(harness.publisher.messages().is_empty());
}

#[tokio::test]
async fn end_transition_requires_marker() {
    let harness = Harness::new();
    let seeded = harness.seed(ending_at(
        campaign(1, 1, Status::Started),
        Utc::now() - TimeDelta::seconds(1),
    ));

    let outcome = harness
        .engine()
        .execute(LifecycleEdge::End, seeded.id)
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        TransitionOutcome::Skipped { campaign_id, .. } if campaign_id == CampaignId(1)
    ));
    assert_eq!(harness.store.status(seeded.id), Some(Status::Started));
}

#[tokio::test]
async fn missing_campaign_is_skipped() {
    let harness = Harness::new();
    let outcome = harness
        .engine()
        .execute(LifecycleEdge::Start, CampaignId(404))
        .await
        .unwrap();
    assert!(!outcome.is_applied());
}
