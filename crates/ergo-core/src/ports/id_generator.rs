//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）。Clock から timestamp 部分を取るので
//!   FixedClock と組み合わせると timestamp が決定的になります。

use crate::domain::ids::{BatchId, MessageId};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は batch / message の ID を生成
pub trait IdGenerator: Send + Sync {
    fn generate_batch_id(&self) -> BatchId;

    fn generate_message_id(&self) -> MessageId;
}

pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_batch_id(&self) -> BatchId {
        BatchId::from(self.next_ulid())
    }

    fn generate_message_id(&self) -> MessageId {
        MessageId::from(self.next_ulid())
    }
}
