//! InMemoryPendingStore - プロセス内の PendingStore 実装
//!
//! # 実装詳細
//! - 単一の `std::sync::Mutex` で records / tombstones / waiters をまとめて保護
//! - ロックは `.await` を跨がない（各メソッドの中で完結）
//! - 状態遷移と通知テーブルの操作が同じロックの下なので、
//!   「登録した直後に結果が来て通知を取りこぼす」競合が起きない

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::oneshot;

use crate::domain::{
    BatchId, ErgoError, Resolution, TaskKey, TaskRecord, TaskRequest, TaskResult, TaskState,
};
use crate::ports::{
    PendingItem, PendingSnapshot, PendingStore, StoreCounts, WaitRegistration, WaiterToken,
};

#[derive(Default)]
struct StoreState {
    records: HashMap<TaskKey, TaskRecord>,

    /// Identities evicted after their retention window.
    tombstones: HashSet<TaskKey>,

    /// Notification table: identity -> (seq -> sender).
    waiters: HashMap<TaskKey, HashMap<u64, oneshot::Sender<Resolution>>>,

    next_waiter_seq: u64,
}

#[derive(Default)]
pub struct InMemoryPendingStore {
    state: Mutex<StoreState>,
}

impl InMemoryPendingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PendingStore for InMemoryPendingStore {
    async fn put(&self, request: TaskRequest, now: DateTime<Utc>) -> Result<(), ErgoError> {
        let mut state = self.lock();
        let identity = request.identity().clone();
        if state.records.contains_key(&identity) || state.tombstones.contains(&identity) {
            return Err(ErgoError::DuplicateIdentity(identity));
        }
        state.records.insert(identity, TaskRecord::new(request, now));
        Ok(())
    }

    async fn list_pending(&self, now: DateTime<Utc>) -> Result<PendingSnapshot, ErgoError> {
        let state = self.lock();
        let items = state
            .records
            .values()
            .filter(|r| r.state == TaskState::Pending)
            .map(|r| PendingItem {
                request: r.request.clone(),
                age: now - r.request.execution_time(),
            })
            .collect();
        Ok(PendingSnapshot::new(items))
    }

    async fn mark_dispatched(
        &self,
        identities: &[TaskKey],
        batch_id: BatchId,
        now: DateTime<Utc>,
    ) -> Result<(), ErgoError> {
        let mut state = self.lock();

        // 全件検証してから適用する（一部だけ遷移した状態を見せない）
        let mut seen = HashSet::with_capacity(identities.len());
        for identity in identities {
            let record = state
                .records
                .get(identity)
                .ok_or_else(|| ErgoError::UnknownIdentity(identity.to_string()))?;
            if record.state != TaskState::Pending || !seen.insert(identity) {
                return Err(ErgoError::InvalidTransition {
                    identity: identity.clone(),
                    from: record.state,
                    to: TaskState::Dispatched,
                });
            }
        }

        for identity in identities {
            if let Some(record) = state.records.get_mut(identity) {
                record.mark_dispatched(batch_id, now)?;
            }
        }
        Ok(())
    }

    async fn apply_result(&self, result: &TaskResult, now: DateTime<Utc>) -> Result<bool, ErgoError> {
        let mut state = self.lock();
        let Some(record) = state.records.get_mut(&result.identity) else {
            return Ok(false);
        };
        if record.state != TaskState::Dispatched {
            return Ok(false);
        }
        record.mark_settled(result.clone(), now)?;
        Ok(true)
    }

    async fn get(&self, identity: &TaskKey) -> Result<Option<TaskRecord>, ErgoError> {
        Ok(self.lock().records.get(identity).cloned())
    }

    async fn counts(&self) -> Result<StoreCounts, ErgoError> {
        let state = self.lock();
        let mut counts = StoreCounts::default();
        for record in state.records.values() {
            match record.state {
                TaskState::Pending => counts.pending += 1,
                TaskState::Dispatched => counts.dispatched += 1,
                TaskState::Completed => counts.completed += 1,
                TaskState::Failed => counts.failed += 1,
                TaskState::Expired => counts.expired += 1,
            }
        }
        Ok(counts)
    }

    async fn expire_overdue(
        &self,
        now: DateTime<Utc>,
        bound: Duration,
    ) -> Result<Vec<TaskKey>, ErgoError> {
        let mut state = self.lock();
        let mut expired = Vec::new();
        for (identity, record) in state.records.iter_mut() {
            if record.state != TaskState::Dispatched {
                continue;
            }
            let Some(dispatched_at) = record.dispatched_at else {
                continue;
            };
            if now - dispatched_at > bound {
                record.mark_expired(now)?;
                expired.push(identity.clone());
            }
        }
        expired.sort();
        Ok(expired)
    }

    async fn evict_settled(&self, now: DateTime<Utc>, retention: Duration) -> Result<usize, ErgoError> {
        let mut state = self.lock();
        let cutoff = now - retention;
        let evict: Vec<TaskKey> = state
            .records
            .iter()
            .filter(|(identity, r)| {
                r.state.is_terminal()
                    && r.settled_at.is_some_and(|at| at < cutoff)
                    && !state.waiters.contains_key(*identity)
            })
            .map(|(identity, _)| identity.clone())
            .collect();

        for identity in &evict {
            state.records.remove(identity);
            state.tombstones.insert(identity.clone());
        }
        Ok(evict.len())
    }

    async fn register_waiter(&self, identity: &TaskKey) -> Result<WaitRegistration, ErgoError> {
        let mut state = self.lock();
        let record = state
            .records
            .get(identity)
            .ok_or_else(|| ErgoError::UnknownIdentity(identity.to_string()))?;
        if let Some(resolution) = record.resolution() {
            return Ok(WaitRegistration::Resolved(resolution));
        }

        let seq = state.next_waiter_seq;
        state.next_waiter_seq += 1;
        let (tx, rx) = oneshot::channel();
        state
            .waiters
            .entry(identity.clone())
            .or_default()
            .insert(seq, tx);

        let token = WaiterToken {
            identity: identity.clone(),
            seq,
        };
        Ok(WaitRegistration::Registered(token, rx))
    }

    fn deregister_waiter(&self, token: &WaiterToken) {
        let mut state = self.lock();
        if let Some(entries) = state.waiters.get_mut(&token.identity) {
            entries.remove(&token.seq);
            if entries.is_empty() {
                state.waiters.remove(&token.identity);
            }
        }
    }

    async fn notify_waiters(&self, identity: &TaskKey) -> Result<usize, ErgoError> {
        let mut state = self.lock();
        let Some(resolution) = state.records.get(identity).and_then(TaskRecord::resolution) else {
            return Ok(0);
        };
        let Some(entries) = state.waiters.remove(identity) else {
            return Ok(0);
        };

        let mut released = 0;
        for (_, tx) in entries {
            // receiver が既に drop されていても問題ない
            if tx.send(resolution.clone()).is_ok() {
                released += 1;
            }
        }
        Ok(released)
    }

    fn waiter_count(&self) -> usize {
        self.lock().waiters.values().map(HashMap::len).sum()
    }
}
