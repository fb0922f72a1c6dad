//! EngineBuilder - エンジンの構築とワイヤリング
//!
//! # Fail-fast
//! - 設定は build() 時に validate() する
//! - 必須の部品（config / outbound / inbound）が無ければ BuildError
//! - store / clock / id generator は省略するとインメモリ・システム時計・ULID を使う

use std::sync::Arc;

use super::accumulator::BatchAccumulator;
use super::collector::Collector;
use super::config::{ConfigError, EngineConfig};
use super::dispatcher::Dispatcher;
use super::engine::Engine;
use super::reaper::Reaper;
use super::status::EngineCounters;
use super::waiter::Waiters;
use crate::impls::InMemoryPendingStore;
use crate::ports::{Clock, IdGenerator, InboundChannel, OutboundChannel, PendingStore, SystemClock, UlidGenerator};

/// BuildError はエンジン構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing component: {0}")]
    Missing(&'static str),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// # 使用例
/// ```ignore
/// let channel = Arc::new(InMemoryChannel::new());
/// let engine = EngineBuilder::new()
///     .config(config)
///     .channel(channel)
///     .build()?;
/// let tasks = engine.start();
/// ```
#[derive(Default)]
pub struct EngineBuilder {
    config: Option<EngineConfig>,
    store: Option<Arc<dyn PendingStore>>,
    outbound: Option<Arc<dyn OutboundChannel>>,
    inbound: Option<Arc<dyn InboundChannel>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn store(mut self, store: Arc<dyn PendingStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn outbound(mut self, outbound: Arc<dyn OutboundChannel>) -> Self {
        self.outbound = Some(outbound);
        self
    }

    pub fn inbound(mut self, inbound: Arc<dyn InboundChannel>) -> Self {
        self.inbound = Some(inbound);
        self
    }

    /// Use one transport for both directions.
    pub fn channel<C>(self, channel: Arc<C>) -> Self
    where
        C: OutboundChannel + InboundChannel + 'static,
    {
        self.outbound(channel.clone()).inbound(channel)
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn build(self) -> Result<Engine, BuildError> {
        let config = self.config.ok_or(BuildError::Missing("config"))?;
        config.validate()?;
        let outbound = self.outbound.ok_or(BuildError::Missing("outbound channel"))?;
        let inbound = self.inbound.ok_or(BuildError::Missing("inbound channel"))?;

        let config = Arc::new(config);
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryPendingStore::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(clock.clone())));
        let counters = Arc::new(EngineCounters::default());

        let dispatcher = Dispatcher::new(
            store.clone(),
            BatchAccumulator::new(store.clone(), ids),
            outbound,
            clock.clone(),
            config.clone(),
            counters.clone(),
        );
        let collector = Collector::new(
            store.clone(),
            inbound,
            clock.clone(),
            config.clone(),
            counters.clone(),
        );
        let reaper = Reaper::new(store.clone(), clock.clone(), config.clone(), counters.clone());

        tracing::debug!(
            request_channel = %config.request_channel_address,
            result_channel = %config.result_channel_address,
            max_batch_size = config.max_batch_size,
            "engine built"
        );
        Ok(Engine::from_parts(
            config,
            store.clone(),
            clock,
            counters,
            Arc::new(dispatcher),
            Arc::new(collector),
            Arc::new(reaper),
            Waiters::new(store),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ChannelAddress;
    use crate::impls::InMemoryChannel;

    fn config() -> EngineConfig {
        EngineConfig::new(ChannelAddress::new("req"), ChannelAddress::new("res"), 5)
    }

    #[test]
    fn build_success() {
        let engine = EngineBuilder::new()
            .config(config())
            .channel(Arc::new(InMemoryChannel::new()))
            .build();
        assert!(engine.is_ok());
    }

    #[test]
    fn build_without_config_fails() {
        let engine = EngineBuilder::new()
            .channel(Arc::new(InMemoryChannel::new()))
            .build();
        assert!(matches!(engine, Err(BuildError::Missing("config"))));
    }

    #[test]
    fn build_without_inbound_fails() {
        let engine = EngineBuilder::new()
            .config(config())
            .outbound(Arc::new(InMemoryChannel::new()))
            .build();
        assert!(matches!(engine, Err(BuildError::Missing("inbound channel"))));
    }

    #[test]
    fn build_rejects_invalid_config() {
        let mut bad = config();
        bad.collector_max_messages = 0;
        let engine = EngineBuilder::new()
            .config(bad)
            .channel(Arc::new(InMemoryChannel::new()))
            .build();
        assert!(matches!(engine, Err(BuildError::Config(ConfigError::Invalid(_)))));
    }
}
