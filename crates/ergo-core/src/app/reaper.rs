//! Reaper - 結果が返ってこないタスクの期限切れ処理と、古いレコードの掃除
//!
//! # フロー（1 tick）
//! 1. `resultTimeout` が設定されていれば、古い Dispatched を Expired にして waiter に通知
//! 2. `retention` より前に終わったレコードを削除（identity は tombstone として残る）

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use async_trait::async_trait;

use super::config::EngineConfig;
use super::periodic::{Tick, TickGuard};
use super::status::{EngineCounters, bump};
use crate::domain::{ErgoError, TaskKey};
use crate::ports::{Clock, PendingStore};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub expired: Vec<TaskKey>,
    pub released: usize,
    pub evicted: usize,
}

pub struct Reaper {
    store: Arc<dyn PendingStore>,
    clock: Arc<dyn Clock>,
    config: Arc<EngineConfig>,
    counters: Arc<EngineCounters>,
    running: AtomicBool,
}

impl Reaper {
    pub fn new(
        store: Arc<dyn PendingStore>,
        clock: Arc<dyn Clock>,
        config: Arc<EngineConfig>,
        counters: Arc<EngineCounters>,
    ) -> Self {
        Self {
            store,
            clock,
            config,
            counters,
            running: AtomicBool::new(false),
        }
    }

    /// `None` if another reap is still running.
    pub async fn tick(&self) -> Result<Option<ReapReport>, ErgoError> {
        let Some(_guard) = TickGuard::try_acquire(&self.running) else {
            bump(&self.counters.ticks_skipped, 1);
            return Ok(None);
        };
        let now = self.clock.now();
        let mut report = ReapReport::default();

        if let Some(bound) = self.config.result_timeout() {
            report.expired = self.store.expire_overdue(now, bound).await?;
            for identity in &report.expired {
                report.released += self.store.notify_waiters(identity).await?;
                tracing::warn!(identity = %identity, "no result within timeout, task expired");
            }
            bump(&self.counters.tasks_expired, report.expired.len());
            bump(&self.counters.waiters_released, report.released);
        }

        report.evicted = self.store.evict_settled(now, self.config.retention()).await?;
        bump(&self.counters.records_evicted, report.evicted);
        if report.evicted > 0 {
            tracing::debug!(evicted = report.evicted, "settled records evicted");
        }
        Ok(Some(report))
    }
}

#[async_trait]
impl Tick for Reaper {
    fn name(&self) -> &'static str {
        "reaper"
    }

    async fn run_tick(&self) {
        if let Err(e) = self.tick().await {
            tracing::error!(error = %e, kind = ?e.kind(), "reap tick failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BatchId, ChannelAddress, Resolution, TaskRequest, TaskResult, TaskState};
    use crate::impls::InMemoryPendingStore;
    use crate::ports::{FixedClock, WaitRegistration};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use serde_json::json;
    use ulid::Ulid;

    fn t(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn key(s: &str) -> TaskKey {
        TaskKey::new(s).unwrap()
    }

    fn reaper(
        store: Arc<InMemoryPendingStore>,
        clock: Arc<FixedClock>,
        result_timeout_minutes: Option<u64>,
    ) -> Reaper {
        let mut config = EngineConfig::new(ChannelAddress::new("req"), ChannelAddress::new("res"), 5);
        config.result_timeout_minutes = result_timeout_minutes;
        config.retention_minutes = 30;
        Reaper::new(store, clock, Arc::new(config), Arc::new(EngineCounters::default()))
    }

    async fn dispatched(store: &InMemoryPendingStore, id: &str, at: i64) {
        let req = TaskRequest::new(key(id), json!({}), t(at), ChannelAddress::new("req"));
        store.put(req, t(at)).await.unwrap();
        store
            .mark_dispatched(&[key(id)], BatchId::from_ulid(Ulid::nil()), t(at))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn overdue_task_expires_and_wakes_waiter() {
        let store = Arc::new(InMemoryPendingStore::new());
        let clock = Arc::new(FixedClock::new(t(0)));
        dispatched(&store, "old", 0).await;
        dispatched(&store, "fresh", 50).await;
        let WaitRegistration::Registered(_, rx) = store.register_waiter(&key("old")).await.unwrap() else {
            panic!("expected registration");
        };

        clock.set(t(61));
        let report = reaper(store.clone(), clock, Some(60)).tick().await.unwrap().unwrap();

        assert_eq!(report.expired, vec![key("old")]);
        assert_eq!(report.released, 1);
        assert_eq!(rx.await.unwrap(), Resolution::Expired);
        assert_eq!(store.get(&key("fresh")).await.unwrap().unwrap().state, TaskState::Dispatched);
    }

    #[tokio::test]
    async fn no_expiry_without_result_timeout() {
        let store = Arc::new(InMemoryPendingStore::new());
        let clock = Arc::new(FixedClock::new(t(1000)));
        dispatched(&store, "a", 0).await;

        let report = reaper(store.clone(), clock, None).tick().await.unwrap().unwrap();
        assert!(report.expired.is_empty());
        assert_eq!(store.get(&key("a")).await.unwrap().unwrap().state, TaskState::Dispatched);
    }

    #[tokio::test]
    async fn settled_records_are_evicted_after_retention() {
        let store = Arc::new(InMemoryPendingStore::new());
        let clock = Arc::new(FixedClock::new(t(0)));
        dispatched(&store, "a", 0).await;
        store
            .apply_result(&TaskResult::success(key("a"), json!(1), t(1)), t(1))
            .await
            .unwrap();
        let reaper = reaper(store.clone(), clock.clone(), None);

        clock.set(t(20));
        assert_eq!(reaper.tick().await.unwrap().unwrap().evicted, 0);

        clock.set(t(40));
        assert_eq!(reaper.tick().await.unwrap().unwrap().evicted, 1);
        assert!(store.get(&key("a")).await.unwrap().is_none());
    }
}
