use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use cadence_model::{
    CampaignId, CampaignRecord, ContentRecord, CreativeId, CreativeRecord, DeliveryTable, GroupId,
    TouchPointId, TouchPointRecord,
};

use crate::{
    error::{CampaignError, Result},
    ports::DeliveryStore,
};

#[derive(Debug, Default)]
struct Records {
    campaigns: HashMap<CampaignId, CampaignRecord>,
    creatives: HashMap<CreativeId, CreativeRecord>,
    contents: HashMap<CampaignId, ContentRecord>,
    touch_points: HashMap<(TouchPointId, GroupId), TouchPointRecord>,
}

/// Delivery store held in memory, with counters and failure injection for
/// tests.
#[derive(Clone)]
pub struct InMemoryDeliveryStore {
    records: Arc<Mutex<Records>>,
    writes: Arc<AtomicUsize>,
    /// Writes allowed before every further write fails; `usize::MAX` when off.
    fail_after: Arc<AtomicUsize>,
}

impl fmt::Debug for InMemoryDeliveryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryDeliveryStore")
            .field("writes", &self.writes.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for InMemoryDeliveryStore {
    fn default() -> Self {
        Self {
            records: Arc::default(),
            writes: Arc::default(),
            fail_after: Arc::new(AtomicUsize::new(usize::MAX)),
        }
    }
}

impl InMemoryDeliveryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lets `n` more writes through, then fails every write after them.
    pub fn fail_after(&self, n: usize) {
        let done = self.writes.load(Ordering::SeqCst);
        self.fail_after.store(done.saturating_add(n), Ordering::SeqCst);
    }

    pub fn heal(&self) {
        self.fail_after.store(usize::MAX, Ordering::SeqCst);
    }

    /// Successful writes and deletes so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn campaign(&self, id: CampaignId) -> Option<CampaignRecord> {
        self.records.lock().campaigns.get(&id).cloned()
    }

    pub fn creative(&self, id: CreativeId) -> Option<CreativeRecord> {
        self.records.lock().creatives.get(&id).cloned()
    }

    pub fn content(&self, id: CampaignId) -> Option<ContentRecord> {
        self.records.lock().contents.get(&id).cloned()
    }

    pub fn touch_points(&self, group: GroupId) -> Vec<TouchPointRecord> {
        let mut records: Vec<_> = self
            .records
            .lock()
            .touch_points
            .values()
            .filter(|tp| tp.group_id == group)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.touch_point_id.cmp(&b.touch_point_id));
        records
    }

    /// Record count per table.
    pub fn count(&self, table: DeliveryTable) -> usize {
        let records = self.records.lock();
        match table {
            DeliveryTable::Campaign => records.campaigns.len(),
            DeliveryTable::Creative => records.creatives.len(),
            DeliveryTable::Content => records.contents.len(),
            DeliveryTable::TouchPoint => records.touch_points.len(),
        }
    }

    pub fn seed_creative(&self, record: CreativeRecord) {
        self.records.lock().creatives.insert(record.id, record);
    }

    fn write<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Records),
    {
        if self.writes.load(Ordering::SeqCst) >= self.fail_after.load(Ordering::SeqCst) {
            return Err(CampaignError::KeyValue("delivery store unavailable".into()));
        }
        apply(&mut self.records.lock());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl DeliveryStore for InMemoryDeliveryStore {
    async fn put_campaign(&self, record: &CampaignRecord) -> Result<()> {
        self.write(|r| {
            r.campaigns.insert(record.id, record.clone());
        })
    }

    async fn delete_campaign(&self, id: CampaignId) -> Result<()> {
        self.write(|r| {
            r.campaigns.remove(&id);
        })
    }

    async fn put_creative(&self, record: &CreativeRecord) -> Result<()> {
        self.write(|r| {
            r.creatives.insert(record.id, record.clone());
        })
    }

    async fn expire_creative(&self, id: CreativeId, expires_at: DateTime<Utc>) -> Result<()> {
        if !self.records.lock().creatives.contains_key(&id) {
            return Err(CampaignError::ConditionFailed(format!(
                "creative {id} has no delivery record"
            )));
        }
        self.write(|r| {
            if let Some(record) = r.creatives.get_mut(&id) {
                record.ttl = Some(expires_at.timestamp());
            }
        })
    }

    async fn put_content(&self, record: &ContentRecord) -> Result<()> {
        self.write(|r| {
            r.contents.insert(record.campaign_id, record.clone());
        })
    }

    async fn delete_content(&self, id: CampaignId) -> Result<()> {
        self.write(|r| {
            r.contents.remove(&id);
        })
    }

    async fn put_touch_point(&self, record: &TouchPointRecord) -> Result<()> {
        self.write(|r| {
            r.touch_points.insert(
                (record.touch_point_id.clone(), record.group_id),
                record.clone(),
            );
        })
    }

    async fn delete_touch_point(&self, id: &TouchPointId, group: GroupId) -> Result<()> {
        self.write(|r| {
            r.touch_points.remove(&(id.clone(), group));
        })
    }
}
