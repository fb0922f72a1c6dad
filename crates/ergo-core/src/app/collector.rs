//! Collector - 結果メッセージを受信して PendingStore に反映する
//!
//! # フロー（1 tick）
//! 1. InboundChannel::receive()（`receiveTimeout` で上限）
//! 2. 各メッセージを decode
//!    - 不正なもの: ログ + カウンタ、acknowledge して捨てる
//! 3. PendingStore::apply_result() → 反映されたら waiter に通知
//! 4. acknowledge
//!
//! 反映してから acknowledge するので、途中で落ちても結果は再配信されるだけです。
//! 同じ結果が 2 回届いても apply_result は 2 回目を無視します。

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use async_trait::async_trait;

use super::config::EngineConfig;
use super::periodic::{Tick, TickGuard};
use super::status::{EngineCounters, bump};
use crate::codec;
use crate::domain::ErgoError;
use crate::ports::{ChannelError, Clock, InboundChannel, InboundMessage, PendingStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectReport {
    pub received: usize,
    pub applied: usize,
    pub ignored: usize,
    pub malformed: usize,
    pub released: usize,
}

#[derive(Debug)]
pub enum CollectOutcome {
    Skipped,
    Collected(CollectReport),
    ReceiveFailed(ErgoError),
}

pub struct Collector {
    store: Arc<dyn PendingStore>,
    inbound: Arc<dyn InboundChannel>,
    clock: Arc<dyn Clock>,
    config: Arc<EngineConfig>,
    counters: Arc<EngineCounters>,
    running: AtomicBool,
}

impl Collector {
    pub fn new(
        store: Arc<dyn PendingStore>,
        inbound: Arc<dyn InboundChannel>,
        clock: Arc<dyn Clock>,
        config: Arc<EngineConfig>,
        counters: Arc<EngineCounters>,
    ) -> Self {
        Self {
            store,
            inbound,
            clock,
            config,
            counters,
            running: AtomicBool::new(false),
        }
    }

    /// Run one collect tick.
    pub async fn tick(&self) -> Result<CollectOutcome, ErgoError> {
        let Some(_guard) = TickGuard::try_acquire(&self.running) else {
            bump(&self.counters.ticks_skipped, 1);
            tracing::debug!("collect tick still running, skipping");
            return Ok(CollectOutcome::Skipped);
        };

        let messages = match self.receive().await {
            Ok(messages) => messages,
            Err(error) => {
                bump(&self.counters.receive_failures, 1);
                tracing::warn!(error = %error, "receive failed");
                return Ok(CollectOutcome::ReceiveFailed(error));
            }
        };

        let mut report = CollectReport {
            received: messages.len(),
            ..CollectReport::default()
        };
        for message in messages {
            self.handle(message, &mut report).await?;
        }

        if report.received > 0 {
            tracing::info!(
                received = report.received,
                applied = report.applied,
                ignored = report.ignored,
                malformed = report.malformed,
                released = report.released,
                "results collected"
            );
        }
        Ok(CollectOutcome::Collected(report))
    }

    async fn receive(&self) -> Result<Vec<InboundMessage>, ErgoError> {
        let address = &self.config.result_channel_address;
        let timeout = self.config.receive_timeout();
        let call = self.inbound.receive(
            address,
            self.config.collector_max_messages,
            self.config.receive_wait(),
        );
        tokio::time::timeout(timeout, call)
            .await
            .unwrap_or(Err(ChannelError::Timeout(timeout)))
            .map_err(|e| ErgoError::ChannelUnavailable {
                address: address.clone(),
                reason: e.to_string(),
            })
    }

    async fn handle(&self, message: InboundMessage, report: &mut CollectReport) -> Result<(), ErgoError> {
        let result = match codec::decode_result(&message.body) {
            Ok(result) => result,
            Err(error) => {
                report.malformed += 1;
                bump(&self.counters.malformed_messages, 1);
                tracing::warn!(receipt = %message.receipt, error = %error, "discarding malformed result");
                self.acknowledge(&message).await;
                return Ok(());
            }
        };

        let applied = match self.store.apply_result(&result, self.clock.now()).await {
            Ok(applied) => applied,
            Err(error) if error.is_transient() => {
                // ack しないので visibility timeout 後に再配信される
                tracing::warn!(identity = %result.identity, error = %error, "store unavailable, leaving result for redelivery");
                return Ok(());
            }
            Err(error) => return Err(error),
        };

        if applied {
            report.applied += 1;
            bump(&self.counters.results_applied, 1);
            let released = self.store.notify_waiters(&result.identity).await?;
            report.released += released;
            bump(&self.counters.waiters_released, released);
            tracing::debug!(
                identity = %result.identity,
                outcome = ?result.outcome,
                released,
                "result applied"
            );
        } else {
            report.ignored += 1;
            bump(&self.counters.results_ignored, 1);
            tracing::debug!(identity = %result.identity, "result ignored");
        }

        self.acknowledge(&message).await;
        Ok(())
    }

    async fn acknowledge(&self, message: &InboundMessage) {
        let address = &self.config.result_channel_address;
        let timeout = self.config.receive_timeout();
        let acked = tokio::time::timeout(timeout, self.inbound.acknowledge(address, message.receipt))
            .await
            .unwrap_or(Err(ChannelError::Timeout(timeout)));
        if let Err(error) = acked {
            bump(&self.counters.ack_failures, 1);
            tracing::warn!(receipt = %message.receipt, error = %error, "acknowledge failed");
        }
    }
}

#[async_trait]
impl Tick for Collector {
    fn name(&self) -> &'static str {
        "collector"
    }

    async fn run_tick(&self) {
        if let Err(e) = self.tick().await {
            tracing::error!(error = %e, kind = ?e.kind(), "collect tick failed");
        }
    }
}
