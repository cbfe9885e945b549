//! In-memory runtime shared by the integration tests.
#![allow(dead_code)]

use std::{future::Future, sync::Arc, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use tokio_util::sync::CancellationToken;

use cadence_core::{
    LifecycleConfig, LifecycleEdge, LifecycleMetrics, LifecyclePorts, LifecycleRuntime,
    infra::memory::{
        InMemoryCampaignStore, InMemoryDeliveryStore, InMemoryQueue, ManualTimer,
        RecordingPublisher,
    },
    lifecycle::{ClaimScheduler, QueueConsumer, Reserver, TransitionEngine},
};
use cadence_model::{
    Campaign, CampaignId, Coupon, Creative, CreativeId, CreativeKind, Gimmick, GroupId, Status,
    TouchPoint, TouchPointId,
};

pub struct Harness {
    pub store: InMemoryCampaignStore,
    pub delivery: InMemoryDeliveryStore,
    pub publisher: RecordingPublisher,
    pub timer: ManualTimer,
    pub mutations: InMemoryQueue,
    pub budget: InMemoryQueue,
    pub runtime: LifecycleRuntime,
}

impl Harness {
    /// Two-minute ticks so a campaign starting two minutes out is claimed
    /// by the first tick.
    pub fn new() -> Self {
        let mut config = LifecycleConfig::default();
        config.scheduler.tick_interval_ms = 120_000;
        config.shutdown_timeout_ms = 5_000;
        Self::with_config(config)
    }

    pub fn with_config(config: LifecycleConfig) -> Self {
        let store = InMemoryCampaignStore::new();
        let delivery = InMemoryDeliveryStore::new();
        let publisher = RecordingPublisher::new();
        let timer = ManualTimer::new();
        let mutations = InMemoryQueue::new("mutations").with_wait(Duration::from_millis(10));
        let budget = InMemoryQueue::new("budget").with_wait(Duration::from_millis(10));

        let ports = LifecyclePorts {
            store: Arc::new(store.clone()),
            delivery: Arc::new(delivery.clone()),
            publisher: Arc::new(publisher.clone()),
            mutations: Some(Arc::new(mutations.clone())),
            budget: Some(Arc::new(budget.clone())),
            timer: Some(Arc::new(timer.clone())),
        };
        let runtime = LifecycleRuntime::new(
            ports,
            config,
            LifecycleMetrics::default(),
            CancellationToken::new(),
        );

        Self {
            store,
            delivery,
            publisher,
            timer,
            mutations,
            budget,
            runtime,
        }
    }

    /// A second runtime over the same stores and topic, as another instance
    /// of the service would run. It gets its own timer.
    pub fn replica(&self) -> (LifecycleRuntime, ManualTimer) {
        let timer = ManualTimer::new();
        let ports = LifecyclePorts {
            store: Arc::new(self.store.clone()),
            delivery: Arc::new(self.delivery.clone()),
            publisher: Arc::new(self.publisher.clone()),
            mutations: None,
            budget: None,
            timer: Some(Arc::new(timer.clone())),
        };
        let mut config = LifecycleConfig::default();
        config.scheduler.tick_interval_ms = 120_000;
        let runtime = LifecycleRuntime::new(
            ports,
            config,
            LifecycleMetrics::default(),
            CancellationToken::new(),
        );
        (runtime, timer)
    }

    pub fn engine(&self) -> &Arc<TransitionEngine> {
        self.runtime.engine()
    }

    pub fn scheduler(&self, edge: LifecycleEdge) -> Arc<ClaimScheduler> {
        let lane = self.runtime.lane(edge).expect("lane exists for every edge");
        Arc::clone(lane.scheduler())
    }

    pub fn reserver(&self, edge: LifecycleEdge) -> Reserver {
        let lane = self.runtime.lane(edge).expect("lane exists for every edge");
        lane.reserver().clone()
    }

    pub fn mutation_consumer(&self) -> Arc<QueueConsumer> {
        Arc::clone(&self.runtime.consumers()[0])
    }

    pub fn budget_consumer(&self) -> Arc<QueueConsumer> {
        Arc::clone(&self.runtime.consumers()[1])
    }

    /// Inserts `campaign` with two creatives, one coupon, a gimmick and the
    /// group's two touch points.
    pub fn seed(&self, campaign: Campaign) -> Campaign {
        let id = campaign.id;
        let group = campaign.group_id;
        self.store.insert_campaign(campaign.clone());
        self.store
            .insert_creatives(id, vec![banner(id.get() * 10 + 1), banner(id.get() * 10 + 2)]);
        self.store.insert_coupons(id, vec![coupon(id.get())]);
        self.store.insert_gimmick(
            id,
            Gimmick {
                url: format!("https://cdn.example/gimmick/{id}.png"),
                code: format!("G{id}"),
            },
        );
        self.store.insert_touch_points(group, touch_points(group));
        campaign
    }

    pub async fn status_becomes(&self, id: CampaignId, status: Status) -> bool {
        eventually(|| async { self.store.status(id) == Some(status) }).await
    }
}

pub fn campaign(id: i64, group: i64, status: Status) -> Campaign {
    let now = Utc::now();
    Campaign {
        id: CampaignId(id),
        group_id: GroupId(group),
        org_code: "ORG01".into(),
        name: format!("campaign {id}"),
        status,
        start_at: now + TimeDelta::minutes(2),
        end_at: Some(now + TimeDelta::days(7)),
        updated_at: now - TimeDelta::hours(1),
    }
}

pub fn starting_at(mut campaign: Campaign, start_at: DateTime<Utc>) -> Campaign {
    campaign.start_at = start_at;
    campaign
}

pub fn ending_at(mut campaign: Campaign, end_at: DateTime<Utc>) -> Campaign {
    campaign.end_at = Some(end_at);
    campaign
}

pub fn banner(id: i64) -> Creative {
    Creative {
        id: CreativeId(id),
        kind: CreativeKind::Banner,
        url: format!("https://cdn.example/banner/{id}.png"),
        link: Some("https://shop.example".into()),
        width: 320.0,
        height: 100.0,
        extension: "png".into(),
        duration: None,
        skip_offset: None,
        end_card_url: None,
        end_card_width: None,
        end_card_height: None,
        end_card_extension: None,
        end_card_link: None,
    }
}

pub fn coupon(id: i64) -> Coupon {
    Coupon {
        id,
        name: format!("coupon {id}"),
        code: format!("C{id}"),
        image_url: format!("https://cdn.example/coupon/{id}.png"),
        rate: 50.0,
    }
}

pub fn touch_points(group: GroupId) -> Vec<TouchPoint> {
    ["a", "b"]
        .into_iter()
        .map(|suffix| TouchPoint {
            id: TouchPointId(format!("tp-{group}-{suffix}")),
            group_id: group,
            store_id: format!("store-{suffix}"),
        })
        .collect()
}

/// Polls `check` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..400 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}
