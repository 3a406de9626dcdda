use std::collections::{BTreeSet, HashSet};
use std::sync::Mutex;

use ack_types::{ItemId, ItemStatus, NewWorkItem, TenantId, WorkerItem};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::WorkerError;
use crate::queue::WorkQueue;

/// In-memory work queue for tests and single-process embedding.
#[derive(Default)]
pub struct InMemoryQueue {
    inner: Mutex<QueueState>,
}

#[derive(Default)]
struct QueueState {
    items: Vec<WorkerItem>,
    keys: HashSet<String>,
}

impl QueueState {
    fn item_mut(&mut self, id: ItemId) -> Result<&mut WorkerItem, WorkerError> {
        self.items
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| WorkerError::ItemNotFound(id.to_string()))
    }
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<std::sync::MutexGuard<'_, QueueState>, WorkerError> {
        self.inner
            .lock()
            .map_err(|_| WorkerError::Storage("queue lock poisoned".into()))
    }

    /// Snapshot of every item in enqueue order.
    pub fn all(&self) -> Vec<WorkerItem> {
        self.state().map(|s| s.items.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl WorkQueue for InMemoryQueue {
    async fn enqueue(&self, item: NewWorkItem, now: DateTime<Utc>) -> Result<bool, WorkerError> {
        let mut state = self.state()?;
        if !state.keys.insert(item.idempotency_key.clone()) {
            return Ok(false);
        }
        state.items.push(item.into_item(now));
        Ok(true)
    }

    async fn tenants(&self) -> Result<Vec<TenantId>, WorkerError> {
        let state = self.state()?;
        let tenants: BTreeSet<TenantId> = state
            .items
            .iter()
            .filter(|i| !i.status.is_terminal())
            .map(|i| i.tenant_id.clone())
            .collect();
        Ok(tenants.into_iter().collect())
    }

    async fn claim_due(
        &self,
        tenant: &TenantId,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<WorkerItem>, WorkerError> {
        let mut state = self.state()?;
        let mut due: Vec<&mut WorkerItem> = state
            .items
            .iter_mut()
            .filter(|i| &i.tenant_id == tenant && i.is_due(now))
            .collect();
        due.sort_by_key(|i| (i.next_attempt_at, i.created_at));

        let mut claimed = Vec::new();
        for item in due.into_iter().take(limit as usize) {
            item.claim(now)?;
            claimed.push(item.clone());
        }
        Ok(claimed)
    }

    async fn mark_delivered(&self, id: ItemId, now: DateTime<Utc>) -> Result<(), WorkerError> {
        self.state()?.item_mut(id)?.mark_delivered(now)?;
        Ok(())
    }

    async fn reschedule(
        &self,
        id: ItemId,
        attempt: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), WorkerError> {
        self.state()?
            .item_mut(id)?
            .reschedule(attempt, next_attempt_at, error)?;
        Ok(())
    }

    async fn mark_dead(
        &self,
        id: ItemId,
        attempt: u32,
        now: DateTime<Utc>,
        error: &str,
    ) -> Result<(), WorkerError> {
        self.state()?.item_mut(id)?.mark_dead(attempt, now, error)?;
        Ok(())
    }

    async fn release(&self, id: ItemId) -> Result<(), WorkerError> {
        self.state()?.item_mut(id)?.release()?;
        Ok(())
    }

    async fn release_stale(
        &self,
        tenant: &TenantId,
        claimed_before: DateTime<Utc>,
    ) -> Result<u64, WorkerError> {
        let mut state = self.state()?;
        let mut released = 0;
        for item in state.items.iter_mut().filter(|i| {
            &i.tenant_id == tenant
                && i.status == ItemStatus::InFlight
                && i.claimed_at.is_some_and(|at| at < claimed_before)
        }) {
            item.release()?;
            released += 1;
        }
        Ok(released)
    }

    async fn get(&self, id: ItemId) -> Result<Option<WorkerItem>, WorkerError> {
        Ok(self.state()?.items.iter().find(|i| i.id == id).cloned())
    }

    async fn list_dead(
        &self,
        tenant: &TenantId,
        limit: u32,
    ) -> Result<Vec<WorkerItem>, WorkerError> {
        let state = self.state()?;
        let mut dead: Vec<WorkerItem> = state
            .items
            .iter()
            .filter(|i| &i.tenant_id == tenant && i.status == ItemStatus::Dead)
            .cloned()
            .collect();
        dead.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        dead.truncate(limit as usize);
        Ok(dead)
    }
}
