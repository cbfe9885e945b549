use std::{
    collections::{HashMap, VecDeque},
    fmt,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::{
    error::{CampaignError, Result},
    ports::{MessageQueue, QueueMessage},
};

#[derive(Debug, Default)]
struct QueueState {
    next_id: u64,
    ready: VecDeque<QueueMessage>,
    in_flight: HashMap<String, QueueMessage>,
    deleted: Vec<String>,
}

/// Visibility-timeout queue held in memory. Received messages stay in
/// flight until deleted or handed back with [`redeliver`](Self::redeliver).
#[derive(Clone)]
pub struct InMemoryQueue {
    name: Arc<str>,
    max_messages: usize,
    wait: Duration,
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
}

impl fmt::Debug for InMemoryQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.try_lock();
        f.debug_struct("InMemoryQueue")
            .field("name", &self.name)
            .field("ready", &state.as_ref().map(|s| s.ready.len()))
            .field("in_flight", &state.as_ref().map(|s| s.in_flight.len()))
            .finish()
    }
}

impl InMemoryQueue {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            max_messages: 10,
            wait: Duration::from_millis(50),
            state: Arc::default(),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn with_max_messages(mut self, max_messages: usize) -> Self {
        self.max_messages = max_messages.max(1);
        self
    }

    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    /// Enqueues `body` and returns the message id.
    pub fn push(&self, body: impl Into<String>) -> String {
        let id = {
            let mut state = self.state.lock();
            state.next_id += 1;
            let id = format!("{}-{}", self.name, state.next_id);
            state.ready.push_back(QueueMessage {
                id: id.clone(),
                receipt: String::new(),
                body: body.into(),
                delivery_count: 0,
            });
            id
        };
        self.notify.notify_one();
        id
    }

    /// Returns every in-flight message to the queue, as an elapsed
    /// visibility timeout would.
    pub fn redeliver(&self) -> usize {
        let mut state = self.state.lock();
        let mut in_flight: Vec<_> = state.in_flight.drain().map(|(_, m)| m).collect();
        in_flight.sort_by(|a, b| a.id.cmp(&b.id));
        let count = in_flight.len();
        for message in in_flight.into_iter().rev() {
            state.ready.push_front(message);
        }
        count
    }

    pub fn ready(&self) -> usize {
        self.state.lock().ready.len()
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().deleted.clone()
    }

    fn take(&self) -> Vec<QueueMessage> {
        let mut state = self.state.lock();
        let n = self.max_messages.min(state.ready.len());
        let mut taken = Vec::with_capacity(n);
        for _ in 0..n {
            let Some(mut message) = state.ready.pop_front() else {
                break;
            };
            message.delivery_count += 1;
            message.receipt = format!("{}#{}", message.id, message.delivery_count);
            state
                .in_flight
                .insert(message.receipt.clone(), message.clone());
            taken.push(message);
        }
        taken
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn receive(&self) -> Result<Vec<QueueMessage>> {
        let taken = self.take();
        if !taken.is_empty() {
            return Ok(taken);
        }
        let _ = tokio::time::timeout(self.wait, self.notify.notified()).await;
        Ok(self.take())
    }

    async fn delete(&self, message: &QueueMessage) -> Result<()> {
        let mut state = self.state.lock();
        if state.in_flight.remove(&message.receipt).is_none() {
            return Err(CampaignError::Queue(format!(
                "receipt {} is not in flight",
                message.receipt
            )));
        }
        state.deleted.push(message.id.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
