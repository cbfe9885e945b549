//! Control event mapping and publication.

use std::{fmt, sync::Arc};

use chrono::{SecondsFormat, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use cadence_model::{
    CacheOperation, Campaign, ControlEvent, DeliveryEvent, Status, TouchPointEvent,
    TouchPointRecord,
};

use crate::{
    lifecycle::config::PublisherConfig,
    metrics::LifecycleMetrics,
    ports::{NotificationPublisher, PublishedMessage},
};

/// Maps a status change to the event name and cache directive downstream
/// caches act on. `None` for pairs no consumer understands.
pub fn delivery_event(before: Status, after: Status) -> Option<(DeliveryEvent, CacheOperation)> {
    match (before, after) {
        (Status::Configured, Status::Warmup) => Some((DeliveryEvent::Warmup, CacheOperation::None)),
        (Status::Warmup, Status::Started) => Some((DeliveryEvent::Start, CacheOperation::Put)),
        (Status::Resume, Status::Started) => Some((DeliveryEvent::Resume, CacheOperation::Put)),
        (Status::Started, Status::Started) => Some((DeliveryEvent::Update, CacheOperation::Put)),
        (Status::Stop, Status::Stopped) => Some((DeliveryEvent::Stop, CacheOperation::Delete)),
        (_, Status::Paused) => Some((DeliveryEvent::Pause, CacheOperation::Delete)),
        (_, Status::Ended) => Some((DeliveryEvent::End, CacheOperation::Delete)),
        _ => None,
    }
}

fn trace_id() -> String {
    Uuid::now_v7().simple().to_string()
}

fn event_time() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Publishes control events. Failures are logged and counted, never
/// returned: the transition they describe is already committed.
#[derive(Clone)]
pub struct ControlEventPublisher {
    publisher: Arc<dyn NotificationPublisher>,
    config: PublisherConfig,
    metrics: LifecycleMetrics,
}

impl fmt::Debug for ControlEventPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlEventPublisher")
            .field("topic", &self.config.topic)
            .field("service", &self.config.service)
            .field("version", &self.config.version)
            .finish()
    }
}

impl ControlEventPublisher {
    pub fn new(
        publisher: Arc<dyn NotificationPublisher>,
        config: PublisherConfig,
        metrics: LifecycleMetrics,
    ) -> Self {
        Self {
            publisher,
            config,
            metrics,
        }
    }

    /// Builds the event for `before -> after`, or `None` when the pair is
    /// not mapped.
    pub fn campaign_event(
        &self,
        campaign: &Campaign,
        before: Status,
        after: Status,
        detail: &str,
    ) -> Option<ControlEvent> {
        let (event, cache_operation) = delivery_event(before, after)?;
        Some(ControlEvent {
            trace_id: trace_id(),
            time: event_time(),
            version: self.config.version.clone(),
            event,
            event_detail: detail.to_owned(),
            cache_operation,
            organization: campaign.org_code.clone(),
            service: self.config.service.clone(),
            campaign_id: campaign.id,
            group_id: campaign.group_id,
        })
    }

    pub async fn publish_campaign(
        &self,
        campaign: &Campaign,
        before: Status,
        after: Status,
        detail: &str,
    ) -> Option<PublishedMessage> {
        let Some(event) = self.campaign_event(campaign, before, after, detail) else {
            warn!(
                target: "cadence::publish",
                campaign_id = %campaign.id,
                before = %before,
                after = %after,
                "no control event mapped for status change; not published"
            );
            return None;
        };

        let body = match serde_json::to_string(&event) {
            Ok(body) => body,
            Err(err) => {
                self.publish_failed(&event, &err.to_string());
                return None;
            }
        };
        let attributes = vec![
            ("event".to_owned(), event.event.as_str().to_owned()),
            (
                "cache_operation".to_owned(),
                event.cache_operation.as_str().to_owned(),
            ),
        ];

        match self
            .publisher
            .publish(&self.config.topic, body, attributes)
            .await
        {
            Ok(published) => {
                info!(
                    target: "cadence::publish",
                    message_id = %published.message_id,
                    trace_id = %event.trace_id,
                    event = %event.event,
                    event_detail = %event.event_detail,
                    cache_operation = %event.cache_operation,
                    organization = %event.organization,
                    campaign_id = %event.campaign_id,
                    group_id = %event.group_id,
                    "published campaign control event"
                );
                Some(published)
            }
            Err(err) => {
                self.publish_failed(&event, &err.to_string());
                None
            }
        }
    }

    pub async fn publish_touch_point(
        &self,
        campaign: &Campaign,
        record: &TouchPointRecord,
        event: DeliveryEvent,
        cache_operation: CacheOperation,
    ) -> Option<PublishedMessage> {
        let event = TouchPointEvent {
            trace_id: trace_id(),
            time: event_time(),
            version: self.config.version.clone(),
            event,
            cache_operation,
            organization: campaign.org_code.clone(),
            service: self.config.service.clone(),
            campaign_id: campaign.id,
            touch_point_id: record.touch_point_id.clone(),
            group_id: record.group_id,
            store_id: record.store_id.clone(),
        };

        let result = match serde_json::to_string(&event) {
            Ok(body) => {
                let attributes = vec![(
                    "cache_operation".to_owned(),
                    cache_operation.as_str().to_owned(),
                )];
                self.publisher
                    .publish(&self.config.topic, body, attributes)
                    .await
                    .map_err(|e| e.to_string())
            }
            Err(err) => Err(err.to_string()),
        };

        match result {
            Ok(published) => {
                info!(
                    target: "cadence::publish",
                    message_id = %published.message_id,
                    cache_operation = %cache_operation,
                    campaign_id = %campaign.id,
                    touch_point_id = %record.touch_point_id,
                    group_id = %record.group_id,
                    store_id = %record.store_id,
                    "published touch point control event"
                );
                Some(published)
            }
            Err(err) => {
                self.metrics.record_publish_failure("touch_point");
                error!(
                    target: "cadence::publish",
                    error = %err,
                    trace_id = %event.trace_id,
                    campaign_id = %campaign.id,
                    touch_point_id = %record.touch_point_id,
                    group_id = %record.group_id,
                    "failed to publish touch point control event"
                );
                None
            }
        }
    }

    fn publish_failed(&self, event: &ControlEvent, err: &str) {
        self.metrics.record_publish_failure("campaign");
        error!(
            target: "cadence::publish",
            error = %err,
            trace_id = %event.trace_id,
            time = %event.time,
            version = %event.version,
            event = %event.event,
            cache_operation = %event.cache_operation,
            organization = %event.organization,
            campaign_id = %event.campaign_id,
            group_id = %event.group_id,
            "failed to publish campaign control event"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::CampaignError, ports::notification::MockNotificationPublisher};
    use cadence_model::{CampaignId, GroupId};
    use chrono::TimeZone;

    fn campaign() -> Campaign {
        let at = Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap();
        Campaign {
            id: CampaignId(42),
            group_id: GroupId(7),
            org_code: "acme".into(),
            name: "autumn".into(),
            status: Status::Warmup,
            start_at: at,
            end_at: None,
            updated_at: at,
        }
    }

    #[test]
    fn maps_every_documented_transition() {
        use CacheOperation::*;
        use DeliveryEvent::*;

        let cases = [
            (Status::Configured, Status::Warmup, Warmup, None),
            (Status::Warmup, Status::Started, Start, Put),
            (Status::Resume, Status::Started, Resume, Put),
            (Status::Started, Status::Started, Update, Put),
            (Status::Stop, Status::Stopped, Stop, Delete),
            (Status::Pause, Status::Paused, Pause, Delete),
            (Status::Started, Status::Paused, Pause, Delete),
            (Status::Terminate, Status::Ended, End, Delete),
            (Status::Ended, Status::Ended, End, Delete),
        ];

        for (before, after, event, op) in cases {
            assert_eq!(
                delivery_event(before, after),
                Some((event, op)),
                "{before} -> {after}"
            );
        }
    }

    #[test]
    fn unmapped_pairs_yield_nothing() {
        assert_eq!(delivery_event(Status::Started, Status::Terminate), None);
        assert_eq!(delivery_event(Status::Configured, Status::Started), None);
        assert_eq!(delivery_event(Status::Paused, Status::Stopped), None);
    }

    #[test]
    fn event_body_uses_wire_names() {
        let publisher = ControlEventPublisher::new(
            Arc::new(MockNotificationPublisher::new()),
            PublisherConfig::default(),
            LifecycleMetrics::default(),
        );
        let event = publisher
            .campaign_event(&campaign(), Status::Warmup, Status::Started, "")
            .expect("mapped");
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event"], "start");
        assert_eq!(json["cache_operation"], "PUT");
        assert_eq!(json["organization"], "acme");
        assert_eq!(json["service"], "campaign-manager");
        assert_eq!(json["campaign_id"], 42);
        assert_eq!(json["event_detail"], "");
        assert!(json["trace_id"].as_str().is_some_and(|t| !t.is_empty()));
    }

    #[tokio::test]
    async fn publish_failure_is_swallowed() {
        let mut mock = MockNotificationPublisher::new();
        mock.expect_publish()
            .times(1)
            .returning(|_, _, _| Err(CampaignError::Publish("topic unavailable".into())));

        let publisher = ControlEventPublisher::new(
            Arc::new(mock),
            PublisherConfig::default(),
            LifecycleMetrics::default(),
        );

        let published = publisher
            .publish_campaign(&campaign(), Status::Warmup, Status::Started, "")
            .await;
        assert!(published.is_none());
    }

    #[tokio::test]
    async fn unmapped_transition_is_not_published() {
        let mut mock = MockNotificationPublisher::new();
        mock.expect_publish().never();

        let publisher = ControlEventPublisher::new(
            Arc::new(mock),
            PublisherConfig::default(),
            LifecycleMetrics::default(),
        );

        let published = publisher
            .publish_campaign(&campaign(), Status::Started, Status::Terminate, "")
            .await;
        assert!(published.is_none());
    }

    #[tokio::test]
    async fn publishes_to_configured_topic_with_attributes() {
        let mut mock = MockNotificationPublisher::new();
        mock.expect_publish()
            .withf(|topic, body, attributes| {
                topic == "cadence:control"
                    && body.contains("\"event\":\"end\"")
                    && attributes
                        .iter()
                        .any(|(k, v)| k == "cache_operation" && v == "DELETE")
            })
            .times(1)
            .returning(|_, _, _| {
                Ok(PublishedMessage {
                    message_id: "1-0".into(),
                })
            });

        let publisher = ControlEventPublisher::new(
            Arc::new(mock),
            PublisherConfig::default(),
            LifecycleMetrics::default(),
        );

        let published = publisher
            .publish_campaign(&campaign(), Status::Terminate, Status::Ended, "")
            .await;
        assert_eq!(published.map(|p| p.message_id), Some("1-0".to_string()));
    }
}
