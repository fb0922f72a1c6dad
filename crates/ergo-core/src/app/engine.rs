//! Engine - オーケストレータから見た入口
//!
//! - `submit` / `submit_to`: Pending として登録するだけ（publish は Dispatcher の tick で行う）
//! - `await_result`: 結果を待つ（Waiters に委譲）
//! - `start`: Dispatcher / Collector / Reaper を周期タスクとして起動

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::builder::EngineBuilder;
use super::collector::Collector;
use super::config::EngineConfig;
use super::dispatcher::Dispatcher;
use super::periodic::TaskGroup;
use super::reaper::Reaper;
use super::status::{EngineCounters, EngineStatus};
use super::waiter::{AwaitOutcome, Waiters};
use crate::domain::{ChannelAddress, ErgoError, TaskKey, TaskRecord, TaskRequest};
use crate::ports::{Clock, PendingStore};

#[derive(Clone)]
pub struct Engine {
    config: Arc<EngineConfig>,
    store: Arc<dyn PendingStore>,
    clock: Arc<dyn Clock>,
    counters: Arc<EngineCounters>,
    dispatcher: Arc<Dispatcher>,
    collector: Arc<Collector>,
    reaper: Arc<Reaper>,
    waiters: Waiters,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        config: Arc<EngineConfig>,
        store: Arc<dyn PendingStore>,
        clock: Arc<dyn Clock>,
        counters: Arc<EngineCounters>,
        dispatcher: Arc<Dispatcher>,
        collector: Arc<Collector>,
        reaper: Arc<Reaper>,
        waiters: Waiters,
    ) -> Self {
        Self {
            config,
            store,
            clock,
            counters,
            dispatcher,
            collector,
            reaper,
            waiters,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Enqueue a request for the default request channel.
    ///
    /// `execution_time` is the orchestrator's logical time for the task; it
    /// drives ordering and staleness, not the wall-clock enqueue time.
    pub async fn submit(
        &self,
        identity: TaskKey,
        payload: serde_json::Value,
        execution_time: DateTime<Utc>,
    ) -> Result<(), ErgoError> {
        let channel = self.config.request_channel_address.clone();
        self.submit_to(channel, identity, payload, execution_time).await
    }

    /// Enqueue a request routed to `channel`.
    ///
    /// A blank `channel` is rejected with `InvalidAddress` before anything is stored.
    pub async fn submit_to(
        &self,
        channel: ChannelAddress,
        identity: TaskKey,
        payload: serde_json::Value,
        execution_time: DateTime<Utc>,
    ) -> Result<(), ErgoError> {
        if channel.is_empty() {
            return Err(ErgoError::InvalidAddress(channel));
        }
        let request = TaskRequest::new(identity, payload, execution_time, channel);
        let identity = request.identity().clone();
        let channel = request.channel().clone();
        self.store.put(request, self.clock.now()).await?;
        tracing::debug!(identity = %identity, channel = %channel, "task submitted");
        Ok(())
    }

    pub async fn await_result(
        &self,
        identity: &TaskKey,
        timeout: Duration,
    ) -> Result<AwaitOutcome, ErgoError> {
        self.waiters.await_result(identity, timeout).await
    }

    pub async fn record(&self, identity: &TaskKey) -> Result<Option<TaskRecord>, ErgoError> {
        self.store.get(identity).await
    }

    pub async fn status(&self) -> Result<EngineStatus, ErgoError> {
        Ok(EngineStatus {
            tasks: self.store.counts().await?,
            counters: self.counters.snapshot(),
            waiters: self.store.waiter_count(),
        })
    }

    /// Spawn the dispatcher, collector and reaper loops.
    ///
    /// Must be called inside a tokio runtime. Stop them with
    /// [`TaskGroup::shutdown_and_join`].
    pub fn start(&self) -> TaskGroup {
        let mut group = TaskGroup::new();
        group.spawn(self.dispatcher.clone(), self.config.dispatch_interval());
        group.spawn(self.collector.clone(), self.config.collect_interval());
        group.spawn(self.reaper.clone(), self.config.reaper_interval());
        group
    }

    /// Direct access for manual ticks and `flush()`.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn collector(&self) -> &Collector {
        &self.collector
    }

    pub fn reaper(&self) -> &Reaper {
        &self.reaper
    }
}
