use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    error::{CampaignError, Result},
    ports::{NotificationPublisher, PublishedMessage},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedMessage {
    pub message_id: String,
    pub topic: String,
    pub body: String,
    pub attributes: Vec<(String, String)>,
}

impl RecordedMessage {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap_or(serde_json::Value::Null)
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Topic that keeps every published message in memory.
#[derive(Clone, Default)]
pub struct RecordingPublisher {
    messages: Arc<Mutex<Vec<RecordedMessage>>>,
    failing: Arc<AtomicBool>,
}

impl fmt::Debug for RecordingPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingPublisher")
            .field("published", &self.messages.lock().len())
            .field("failing", &self.failing.load(Ordering::Relaxed))
            .finish()
    }
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<RecordedMessage> {
        self.messages.lock().clone()
    }

    /// Decoded bodies, in publish order.
    pub fn events(&self) -> Vec<serde_json::Value> {
        self.messages.lock().iter().map(RecordedMessage::json).collect()
    }

    /// `(event, cache_operation)` pairs of campaign-level events for `campaign_id`.
    pub fn campaign_events(&self, campaign_id: i64) -> Vec<(String, String)> {
        self.events()
            .into_iter()
            .filter(|e| e["campaign_id"] == campaign_id && e.get("touch_point_id").is_none())
            .map(|e| {
                (
                    e["event"].as_str().unwrap_or_default().to_owned(),
                    e["cache_operation"].as_str().unwrap_or_default().to_owned(),
                )
            })
            .collect()
    }

    /// Touch-point events, as `touch_point_id` values.
    pub fn touch_point_events(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| e["touch_point_id"].as_str().map(str::to_owned))
            .collect()
    }

    pub fn clear(&self) {
        self.messages.lock().clear();
    }
}

#[async_trait]
impl NotificationPublisher for RecordingPublisher {
    async fn publish(
        &self,
        topic: &str,
        body: String,
        attributes: Vec<(String, String)>,
    ) -> Result<PublishedMessage> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CampaignError::Publish(format!("topic {topic} unavailable")));
        }
        let mut messages = self.messages.lock();
        let message_id = format!("{}-{}", topic, messages.len() + 1);
        messages.push(RecordedMessage {
            message_id: message_id.clone(),
            topic: topic.to_owned(),
            body,
            attributes,
        });
        Ok(PublishedMessage { message_id })
    }
}
