//! App - アプリケーション層
//!
//! ports を組み合わせてエンジンの振る舞いを実装します。
//!
//! # 主要コンポーネント
//! - **EngineBuilder / Engine**: 構築とワイヤリング、オーケストレータ向け API
//! - **BatchAccumulator**: いつ・どの batch を出すかの判断
//! - **Dispatcher**: batch の publish（周期タスク）
//! - **Collector**: 結果の受信と反映（周期タスク）
//! - **Reaper**: 期限切れと古いレコードの掃除（周期タスク）
//! - **Waiters**: 結果待ち

pub mod accumulator;
pub mod builder;
pub mod collector;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod periodic;
pub mod reaper;
pub mod status;
pub mod waiter;

pub use self::accumulator::{BatchAccumulator, BatchPlan, plan_batch, plan_forced_batch};
pub use self::builder::{BuildError, EngineBuilder};
pub use self::collector::{CollectOutcome, CollectReport, Collector};
pub use self::config::{ConfigError, EngineConfig};
pub use self::dispatcher::{DispatchOutcome, Dispatcher, PublishedBatch};
pub use self::engine::Engine;
pub use self::periodic::{TaskGroup, Tick};
pub use self::reaper::{ReapReport, Reaper};
pub use self::status::{CounterSnapshot, EngineCounters, EngineStatus};
pub use self::waiter::{AwaitOutcome, Waiters};
