//! Ports - 抽象化レイヤー
//!
//! 外部システム（状態ストア、メッセージキュー、時計）へのインターフェース。
//! 実装は `impls` に置き、テストと本番で差し替えます。

pub mod channel;
pub mod clock;
pub mod id_generator;
pub mod pending_store;

pub use self::channel::{ChannelError, InboundChannel, InboundMessage, OutboundChannel};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::pending_store::{
    PendingItem, PendingSnapshot, PendingStore, StoreCounts, WaitRegistration, WaiterToken,
};
