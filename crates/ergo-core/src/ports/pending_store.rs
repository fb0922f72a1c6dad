//! PendingStore port - タスク状態の正本（source of truth）
//!
//! PendingStore は以下を管理します：
//! - 状態（Pending / Dispatched / Completed / Failed / Expired）
//! - 受信した結果
//! - waiter の通知テーブル
//!
//! # 設計原則
//! - すべての状態遷移は読み手から見てアトミック（途中状態は見えない）
//! - 通知テーブルの登録は `deregister_waiter` で必ず外せる（Drop から呼ぶので同期メソッド）

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::domain::{BatchId, ErgoError, Resolution, TaskKey, TaskRecord, TaskRequest, TaskResult};

/// A pending request together with its age at snapshot time.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingItem {
    pub request: TaskRequest,
    pub age: Duration,
}

/// Oldest-first snapshot of pending requests.
///
/// Consumed lazily; the snapshot is taken under the store lock, so it is
/// consistent even if the store changes while it is being iterated.
#[derive(Debug)]
pub struct PendingSnapshot {
    items: std::vec::IntoIter<PendingItem>,
}

impl PendingSnapshot {
    /// Sorts by execution time, ties broken by identity.
    pub fn new(mut items: Vec<PendingItem>) -> Self {
        items.sort_by(|a, b| {
            a.request
                .execution_time()
                .cmp(&b.request.execution_time())
                .then_with(|| a.request.identity().cmp(b.request.identity()))
        });
        Self {
            items: items.into_iter(),
        }
    }
}

impl Iterator for PendingSnapshot {
    type Item = PendingItem;

    fn next(&mut self) -> Option<Self::Item> {
        self.items.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.items.size_hint()
    }
}

impl ExactSizeIterator for PendingSnapshot {}

/// Per-state counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounts {
    pub pending: usize,
    pub dispatched: usize,
    pub completed: usize,
    pub failed: usize,
    pub expired: usize,
}

/// Handle for one entry in the notification table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WaiterToken {
    pub identity: TaskKey,
    pub seq: u64,
}

/// Result of registering interest in a task.
#[derive(Debug)]
pub enum WaitRegistration {
    /// The task is already terminal; nothing was registered.
    Resolved(Resolution),

    /// Registered; the receiver fires once the task settles.
    Registered(WaiterToken, oneshot::Receiver<Resolution>),
}

#[async_trait]
pub trait PendingStore: Send + Sync {
    /// Insert a new Pending request. Fails with `DuplicateIdentity` if the
    /// identity was ever seen during this run.
    async fn put(&self, request: TaskRequest, now: DateTime<Utc>) -> Result<(), ErgoError>;

    /// All Pending requests, oldest first, aged relative to `now`.
    async fn list_pending(&self, now: DateTime<Utc>) -> Result<PendingSnapshot, ErgoError>;

    /// Pending -> Dispatched for the whole set, or nothing at all.
    async fn mark_dispatched(
        &self,
        identities: &[TaskKey],
        batch_id: BatchId,
        now: DateTime<Utc>,
    ) -> Result<(), ErgoError>;

    /// Dispatched -> Completed/Failed.
    ///
    /// Returns `true` when waiters should be notified. Unknown, still-pending
    /// and already-terminal identities are a no-op returning `false`.
    async fn apply_result(&self, result: &TaskResult, now: DateTime<Utc>) -> Result<bool, ErgoError>;

    async fn get(&self, identity: &TaskKey) -> Result<Option<TaskRecord>, ErgoError>;

    async fn counts(&self) -> Result<StoreCounts, ErgoError>;

    /// Dispatched items older than `bound` become Expired. Returns their identities.
    async fn expire_overdue(
        &self,
        now: DateTime<Utc>,
        bound: Duration,
    ) -> Result<Vec<TaskKey>, ErgoError>;

    /// Drop terminal records settled before `now - retention`, keeping their
    /// identities as tombstones. Returns the number evicted.
    async fn evict_settled(&self, now: DateTime<Utc>, retention: Duration) -> Result<usize, ErgoError>;

    async fn register_waiter(&self, identity: &TaskKey) -> Result<WaitRegistration, ErgoError>;

    fn deregister_waiter(&self, token: &WaiterToken);

    /// Deliver the terminal resolution of `identity` to every registered
    /// waiter and clear their registrations. Returns how many were released.
    async fn notify_waiters(&self, identity: &TaskKey) -> Result<usize, ErgoError>;

    fn waiter_count(&self) -> usize;
}
