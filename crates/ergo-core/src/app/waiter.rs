//! Waiters - 呼び出し側がタスクの結果を待つ
//!
//! - polling はしない。PendingStore の通知テーブルに登録して oneshot で起こしてもらう
//! - timeout は失敗ではなく [`AwaitOutcome::Timeout`]。タスクの状態は変えない
//! - 待っている future が drop（キャンセル）されたら登録も外す

use std::sync::Arc;
use std::time::Duration;

use crate::domain::{ErgoError, Resolution, TaskFailure, TaskKey};
use crate::ports::{PendingStore, WaitRegistration, WaiterToken};

/// What an awaiting caller gets back.
#[derive(Debug, Clone, PartialEq)]
pub enum AwaitOutcome {
    Completed(serde_json::Value),
    Failed(TaskFailure),
    Expired,
    /// Nothing arrived in time. The task is still in flight.
    Timeout,
}

impl From<Resolution> for AwaitOutcome {
    fn from(resolution: Resolution) -> Self {
        match resolution {
            Resolution::Completed(payload) => AwaitOutcome::Completed(payload),
            Resolution::Failed(failure) => AwaitOutcome::Failed(failure),
            Resolution::Expired => AwaitOutcome::Expired,
        }
    }
}

impl AwaitOutcome {
    pub fn is_timeout(&self) -> bool {
        matches!(self, AwaitOutcome::Timeout)
    }
}

/// Removes the notification entry when the wait ends, however it ends.
struct Registration<'a> {
    store: &'a dyn PendingStore,
    token: WaiterToken,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.store.deregister_waiter(&self.token);
    }
}

#[derive(Clone)]
pub struct Waiters {
    store: Arc<dyn PendingStore>,
}

impl Waiters {
    pub fn new(store: Arc<dyn PendingStore>) -> Self {
        Self { store }
    }

    /// Wait for `identity` to reach a terminal state, up to `timeout`.
    ///
    /// Returns immediately if the task is already terminal. Fails with
    /// `UnknownIdentity` for identities the store does not hold.
    pub async fn await_result(
        &self,
        identity: &TaskKey,
        timeout: Duration,
    ) -> Result<AwaitOutcome, ErgoError> {
        let (token, rx) = match self.store.register_waiter(identity).await? {
            WaitRegistration::Resolved(resolution) => return Ok(resolution.into()),
            WaitRegistration::Registered(token, rx) => (token, rx),
        };
        let _registration = Registration {
            store: self.store.as_ref(),
            token,
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(resolution)) => Ok(resolution.into()),
            Ok(Err(_)) => {
                // sender が通知なしに消えた。状態を見直す
                let record = self.store.get(identity).await?;
                match record.and_then(|r| r.resolution()) {
                    Some(resolution) => Ok(resolution.into()),
                    None => Err(ErgoError::Store(format!(
                        "notification for {identity} dropped before settlement"
                    ))),
                }
            }
            Err(_) => {
                tracing::debug!(identity = %identity, timeout_ms = timeout.as_millis() as u64, "await timed out");
                Ok(AwaitOutcome::Timeout)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BatchId, ChannelAddress, TaskRequest, TaskResult, TaskState};
    use crate::impls::InMemoryPendingStore;
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;
    use ulid::Ulid;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn key(s: &str) -> TaskKey {
        TaskKey::new(s).unwrap()
    }

    async fn dispatched(store: &InMemoryPendingStore, id: &str) {
        let req = TaskRequest::new(key(id), json!({}), t0(), ChannelAddress::new("req"));
        store.put(req, t0()).await.unwrap();
        store
            .mark_dispatched(&[key(id)], BatchId::from_ulid(Ulid::nil()), t0())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_without_changing_state() {
        let store = Arc::new(InMemoryPendingStore::new());
        dispatched(&store, "a").await;
        let waiters = Waiters::new(store.clone());

        let started = tokio::time::Instant::now();
        let outcome = waiters.await_result(&key("a"), Duration::from_secs(1)).await.unwrap();
        assert_eq!(outcome, AwaitOutcome::Timeout);
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(store.get(&key("a")).await.unwrap().unwrap().state, TaskState::Dispatched);
        assert_eq!(store.waiter_count(), 0);
    }

    #[tokio::test]
    async fn terminal_task_resolves_immediately() {
        let store = Arc::new(InMemoryPendingStore::new());
        dispatched(&store, "a").await;
        let failure = TaskResult::failure(key("a"), json!({"why": "boom"}), t0())
            .with_result_code(2)
            .with_error_message("boom");
        store.apply_result(&failure, t0()).await.unwrap();

        let outcome = Waiters::new(store)
            .await_result(&key("a"), Duration::ZERO)
            .await
            .unwrap();
        let AwaitOutcome::Failed(detail) = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert_eq!(detail.result_code, Some(2));
        assert_eq!(detail.error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn unknown_identity_is_an_error() {
        let waiters = Waiters::new(Arc::new(InMemoryPendingStore::new()));
        let err = waiters
            .await_result(&key("ghost"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ErgoError::UnknownIdentity(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn wakes_on_notify() {
        let store = Arc::new(InMemoryPendingStore::new());
        dispatched(&store, "a").await;
        let waiters = Waiters::new(store.clone());

        let waiting = tokio::spawn({
            let waiters = waiters.clone();
            async move { waiters.await_result(&key("a"), Duration::from_secs(60)).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.waiter_count(), 1);

        store
            .apply_result(&TaskResult::success(key("a"), json!("ok"), t0()), t0())
            .await
            .unwrap();
        assert_eq!(store.notify_waiters(&key("a")).await.unwrap(), 1);

        let outcome = waiting.await.unwrap().unwrap();
        assert_eq!(outcome, AwaitOutcome::Completed(json!("ok")));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_wait_leaves_no_registration() {
        let store = Arc::new(InMemoryPendingStore::new());
        dispatched(&store, "a").await;
        let waiters = Waiters::new(store.clone());

        let waiting = tokio::spawn(async move {
            waiters.await_result(&key("a"), Duration::from_secs(60)).await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.waiter_count(), 1);

        waiting.abort();
        assert!(waiting.await.unwrap_err().is_cancelled());
        assert_eq!(store.waiter_count(), 0);
    }
}
