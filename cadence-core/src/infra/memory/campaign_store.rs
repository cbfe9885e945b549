use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;

use cadence_model::{
    Campaign, CampaignId, Coupon, Creative, CreativeId, Gimmick, GroupId, Status, TouchPoint,
};

use crate::{
    error::{CampaignError, Result},
    ports::{CampaignStore, CampaignTransaction, ClaimCondition},
};

#[derive(Debug, Default)]
struct Tables {
    campaigns: BTreeMap<CampaignId, Campaign>,
    creatives: HashMap<CampaignId, Vec<Creative>>,
    coupons: HashMap<CampaignId, Vec<Coupon>>,
    gimmicks: HashMap<CampaignId, Gimmick>,
    touch_points: HashMap<GroupId, Vec<TouchPoint>>,
}

type RowLocks = DashMap<CampaignId, Arc<tokio::sync::Mutex<()>>>;

/// System of record held in memory.
///
/// Row locks behave like `SELECT ... FOR UPDATE`: a transaction that locked
/// a row holds it until commit or rollback. Status writes are staged and
/// become visible on commit.
#[derive(Clone, Default)]
pub struct InMemoryCampaignStore {
    tables: Arc<Mutex<Tables>>,
    locks: Arc<RowLocks>,
    page_fetches: Arc<AtomicUsize>,
    fail_commits: Arc<AtomicBool>,
}

impl fmt::Debug for InMemoryCampaignStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let campaigns = self
            .tables
            .try_lock()
            .map(|tables| tables.campaigns.len())
            .unwrap_or_default();
        f.debug_struct("InMemoryCampaignStore")
            .field("campaigns", &campaigns)
            .field("page_fetches", &self.page_fetches.load(Ordering::Relaxed))
            .finish()
    }
}

/// Next version token: microsecond precision like `DATETIME(6)`, and always
/// strictly after `previous`.
fn next_version(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now()
        .duration_trunc(TimeDelta::microseconds(1))
        .unwrap_or_else(|_| Utc::now());
    now.max(previous + TimeDelta::microseconds(1))
}

impl InMemoryCampaignStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_campaign(&self, campaign: Campaign) {
        self.tables.lock().campaigns.insert(campaign.id, campaign);
    }

    pub fn insert_creatives(&self, id: CampaignId, creatives: Vec<Creative>) {
        self.tables.lock().creatives.insert(id, creatives);
    }

    pub fn insert_coupons(&self, id: CampaignId, coupons: Vec<Coupon>) {
        self.tables.lock().coupons.insert(id, coupons);
    }

    pub fn insert_gimmick(&self, id: CampaignId, gimmick: Gimmick) {
        self.tables.lock().gimmicks.insert(id, gimmick);
    }

    pub fn insert_touch_points(&self, group: GroupId, touch_points: Vec<TouchPoint>) {
        self.tables.lock().touch_points.insert(group, touch_points);
    }

    pub fn remove_creatives(&self, id: CampaignId) {
        self.tables.lock().creatives.remove(&id);
    }

    /// Committed row.
    pub fn campaign(&self, id: CampaignId) -> Option<Campaign> {
        self.tables.lock().campaigns.get(&id).cloned()
    }

    pub fn status(&self, id: CampaignId) -> Option<Status> {
        self.campaign(id).map(|c| c.status)
    }

    /// An operator write: waits for the row lock, then sets the status if
    /// the row still carries `expected_updated_at`.
    pub async fn operator_update(
        &self,
        id: CampaignId,
        status: Status,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        let _guard = self.row_lock(id).lock_owned().await;
        let mut tables = self.tables.lock();
        let row = tables
            .campaigns
            .get_mut(&id)
            .ok_or(CampaignError::NotFound(id))?;
        if row.updated_at != expected_updated_at {
            return Err(CampaignError::VersionConflict(id));
        }
        row.status = status;
        row.updated_at = next_version(row.updated_at);
        Ok(row.updated_at)
    }

    /// Unconditional operator write.
    pub async fn force_status(&self, id: CampaignId, status: Status) -> Result<DateTime<Utc>> {
        let expected = self
            .campaign(id)
            .ok_or(CampaignError::NotFound(id))?
            .updated_at;
        self.operator_update(id, status, expected).await
    }

    /// Number of [`CampaignStore::claimable`] calls so far.
    pub fn page_fetches(&self) -> usize {
        self.page_fetches.load(Ordering::SeqCst)
    }

    /// Makes every commit fail until switched off again.
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    fn row_lock(&self, id: CampaignId) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.locks.entry(id).or_default().value())
    }
}

#[async_trait]
impl CampaignStore for InMemoryCampaignStore {
    async fn claimable(&self, condition: &ClaimCondition) -> Result<Vec<Campaign>> {
        self.page_fetches.fetch_add(1, Ordering::SeqCst);
        let tables = self.tables.lock();
        Ok(tables
            .campaigns
            .values()
            .filter(|c| condition.after.is_none_or(|after| c.id > after))
            .filter(|c| condition.matches(c))
            .take(condition.page_size)
            .cloned()
            .collect())
    }

    async fn begin(&self) -> Result<Box<dyn CampaignTransaction>> {
        Ok(Box::new(InMemoryTransaction {
            store: self.clone(),
            held: HashMap::new(),
            staged: HashMap::new(),
        }))
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

struct InMemoryTransaction {
    store: InMemoryCampaignStore,
    held: HashMap<CampaignId, OwnedMutexGuard<()>>,
    staged: HashMap<CampaignId, (Status, DateTime<Utc>)>,
}

impl InMemoryTransaction {
    async fn hold(&mut self, id: CampaignId) {
        if !self.held.contains_key(&id) {
            let guard = self.store.row_lock(id).lock_owned().await;
            self.held.insert(id, guard);
        }
    }

    fn view(&self, id: CampaignId) -> Option<Campaign> {
        let mut campaign = self.store.campaign(id)?;
        if let Some((status, updated_at)) = self.staged.get(&id) {
            campaign.status = *status;
            campaign.updated_at = *updated_at;
        }
        Some(campaign)
    }
}

#[async_trait]
impl CampaignTransaction for InMemoryTransaction {
    async fn lock_campaign(&mut self, id: CampaignId) -> Result<Option<Campaign>> {
        self.hold(id).await;
        Ok(self.view(id))
    }

    async fn update_status(
        &mut self,
        id: CampaignId,
        status: Status,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        self.hold(id).await;
        let current = self.view(id).ok_or(CampaignError::NotFound(id))?;
        if current.updated_at != expected_updated_at {
            return Err(CampaignError::VersionConflict(id));
        }
        let updated_at = next_version(current.updated_at);
        self.staged.insert(id, (status, updated_at));
        Ok(updated_at)
    }

    async fn creatives(&mut self, id: CampaignId) -> Result<Vec<Creative>> {
        Ok(self
            .store
            .tables
            .lock()
            .creatives
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    async fn coupons(&mut self, id: CampaignId) -> Result<Vec<Coupon>> {
        Ok(self
            .store
            .tables
            .lock()
            .coupons
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    async fn gimmick(&mut self, id: CampaignId) -> Result<Option<Gimmick>> {
        Ok(self.store.tables.lock().gimmicks.get(&id).cloned())
    }

    async fn touch_points(&mut self, group: GroupId) -> Result<Vec<TouchPoint>> {
        Ok(self
            .store
            .tables
            .lock()
            .touch_points
            .get(&group)
            .cloned()
            .unwrap_or_default())
    }

    async fn count_delivering(&mut self, group: GroupId, excluding: CampaignId) -> Result<u64> {
        let ids: Vec<CampaignId> = self
            .store
            .tables
            .lock()
            .campaigns
            .values()
            .filter(|c| c.group_id == group && c.id != excluding)
            .map(|c| c.id)
            .collect();
        Ok(ids
            .into_iter()
            .filter_map(|id| self.view(id))
            .filter(|c| c.status.is_delivering())
            .count() as u64)
    }

    async fn creative_in_use(&mut self, id: CreativeId) -> Result<bool> {
        Ok(self
            .store
            .tables
            .lock()
            .creatives
            .values()
            .any(|creatives| creatives.iter().any(|c| c.id == id)))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        if self.store.fail_commits.load(Ordering::SeqCst) {
            return Err(CampaignError::Database("commit failed".into()));
        }
        let mut tables = self.store.tables.lock();
        for (id, (status, updated_at)) in &self.staged {
            if let Some(row) = tables.campaigns.get_mut(id) {
                row.status = *status;
                row.updated_at = *updated_at;
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
