//! ergo-core
//!
//! Batching and dispatch engine that offloads workflow tasks to an external
//! execution pool over a message queue and collects their results.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（TaskKey, TaskRequest, Batch, TaskResult, state, errors）
//! - **ports**: 抽象化レイヤー（PendingStore, Outbound/InboundChannel, Clock, IdGenerator）
//! - **impls**: 実装（InMemoryPendingStore, InMemoryChannel）
//! - **app**: アプリケーションロジック（accumulator, dispatcher, collector, reaper, engine）
//! - **codec**: wire 上の JSON 表現

pub mod app;
pub mod codec;
pub mod domain;
pub mod impls;
pub mod ports;

pub use app::{AwaitOutcome, Engine, EngineBuilder, EngineConfig};
pub use domain::{ChannelAddress, ErgoError, TaskKey, TaskResult};
