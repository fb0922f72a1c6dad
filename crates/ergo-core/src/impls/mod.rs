//! Impls - ports の実装（開発用・テスト用）
//!
//! # 含まれる実装
//! - **InMemoryPendingStore**: プロセス内の状態ストア
//! - **InMemoryChannel**: outbound / inbound を兼ねるメッセージキュー
//!
//! 本番用の実装（SQS, PostgreSQL など）は別クレートに置く想定です。

pub mod inmem_channel;
pub mod inmem_store;

pub use self::inmem_channel::InMemoryChannel;
pub use self::inmem_store::InMemoryPendingStore;
