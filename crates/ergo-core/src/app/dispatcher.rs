//! Dispatcher - batch を outbound チャネルへ publish する
//!
//! # フロー（1 tick）
//! 1. BatchAccumulator::form_batch() で batch を決める（なければ何もしない）
//! 2. wire 形式に encode して publish（`publishTimeout` で上限）
//! 3. publish 成功後に PendingStore::mark_dispatched()
//!
//! publish → mark の順なので、間でプロセスが落ちても「送ったのに Pending のまま」
//! になるだけ（次の tick で再送 = at-least-once）。送っていないのに Dispatched に
//! なることはない。

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use async_trait::async_trait;

use super::accumulator::BatchAccumulator;
use super::config::EngineConfig;
use super::periodic::{Tick, TickGuard};
use super::status::{EngineCounters, bump};
use crate::codec;
use crate::domain::{Batch, BatchId, BatchReason, ChannelAddress, ErgoError};
use crate::ports::{ChannelError, Clock, OutboundChannel, PendingStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedBatch {
    pub batch_id: BatchId,
    pub channel: ChannelAddress,
    pub reason: BatchReason,
    pub size: usize,
}

impl From<&Batch> for PublishedBatch {
    fn from(batch: &Batch) -> Self {
        Self {
            batch_id: batch.id(),
            channel: batch.channel().clone(),
            reason: batch.reason(),
            size: batch.len(),
        }
    }
}

#[derive(Debug)]
pub enum DispatchOutcome {
    /// Another tick was still running.
    Skipped,

    /// No batch was due.
    Idle,

    Published(Vec<PublishedBatch>),

    /// A publish failed; its items stay Pending. Batches published earlier in
    /// the same tick are listed.
    PublishFailed {
        published: Vec<PublishedBatch>,
        error: ErgoError,
    },
}

pub struct Dispatcher {
    store: Arc<dyn PendingStore>,
    accumulator: BatchAccumulator,
    outbound: Arc<dyn OutboundChannel>,
    clock: Arc<dyn Clock>,
    config: Arc<EngineConfig>,
    counters: Arc<EngineCounters>,
    running: AtomicBool,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn PendingStore>,
        accumulator: BatchAccumulator,
        outbound: Arc<dyn OutboundChannel>,
        clock: Arc<dyn Clock>,
        config: Arc<EngineConfig>,
        counters: Arc<EngineCounters>,
    ) -> Self {
        Self {
            store,
            accumulator,
            outbound,
            clock,
            config,
            counters,
            running: AtomicBool::new(false),
        }
    }

    /// Run one dispatch tick.
    ///
    /// Only invariant violations come back as `Err`; channel trouble is
    /// reported through [`DispatchOutcome::PublishFailed`].
    pub async fn tick(&self) -> Result<DispatchOutcome, ErgoError> {
        let Some(_guard) = TickGuard::try_acquire(&self.running) else {
            bump(&self.counters.ticks_skipped, 1);
            tracing::debug!("dispatch tick still running, skipping");
            return Ok(DispatchOutcome::Skipped);
        };

        let mut published = Vec::new();
        for _ in 0..self.config.max_batches_per_tick {
            let now = self.clock.now();
            let batch = self
                .accumulator
                .form_batch(now, self.config.max_batch_size, self.config.staleness_threshold())
                .await?;
            let Some(batch) = batch else {
                break;
            };
            if let Err(error) = self.publish_and_mark(&batch).await? {
                return Ok(DispatchOutcome::PublishFailed { published, error });
            }
            published.push(PublishedBatch::from(&batch));
        }

        if published.is_empty() {
            Ok(DispatchOutcome::Idle)
        } else {
            Ok(DispatchOutcome::Published(published))
        }
    }

    /// Publish the oldest pending items now, whatever the triggers say.
    pub async fn flush(&self) -> Result<DispatchOutcome, ErgoError> {
        let Some(_guard) = TickGuard::try_acquire(&self.running) else {
            bump(&self.counters.ticks_skipped, 1);
            return Ok(DispatchOutcome::Skipped);
        };

        let now = self.clock.now();
        let Some(batch) = self
            .accumulator
            .force_batch(now, self.config.max_batch_size)
            .await?
        else {
            return Ok(DispatchOutcome::Idle);
        };
        match self.publish_and_mark(&batch).await? {
            Ok(()) => Ok(DispatchOutcome::Published(vec![PublishedBatch::from(&batch)])),
            Err(error) => Ok(DispatchOutcome::PublishFailed {
                published: Vec::new(),
                error,
            }),
        }
    }

    /// Outer `Err`: the store refused the transition (a bug).
    /// Inner `Err`: publish failed and nothing changed.
    async fn publish_and_mark(&self, batch: &Batch) -> Result<Result<(), ErgoError>, ErgoError> {
        if let Err(error) = self.publish(batch).await {
            bump(&self.counters.publish_failures, 1);
            tracing::warn!(
                batch_id = %batch.id(),
                channel = %batch.channel(),
                size = batch.len(),
                error = %error,
                "publish failed, items stay pending"
            );
            return Ok(Err(error));
        }

        let identities = batch.identities();
        self.store
            .mark_dispatched(&identities, batch.id(), self.clock.now())
            .await?;

        bump(&self.counters.batches_published, 1);
        bump(&self.counters.tasks_dispatched, batch.len());
        tracing::info!(
            batch_id = %batch.id(),
            channel = %batch.channel(),
            size = batch.len(),
            reason = ?batch.reason(),
            "batch dispatched"
        );
        Ok(Ok(()))
    }

    async fn publish(&self, batch: &Batch) -> Result<(), ErgoError> {
        let body = codec::encode_batch(batch)?;
        let timeout = self.config.publish_timeout();
        let result = tokio::time::timeout(timeout, self.outbound.publish(batch.channel(), body))
            .await
            .unwrap_or(Err(ChannelError::Timeout(timeout)));
        result.map_err(|e| ErgoError::ChannelUnavailable {
            address: batch.channel().clone(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl Tick for Dispatcher {
    fn name(&self) -> &'static str {
        "dispatcher"
    }

    async fn run_tick(&self) {
        if let Err(e) = self.tick().await {
            tracing::error!(error = %e, kind = ?e.kind(), "dispatch tick failed");
        }
    }
}
