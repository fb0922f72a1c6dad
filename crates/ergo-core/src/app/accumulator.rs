//! BatchAccumulator - 「いつ batch を出すか」の判断
//!
//! # 学習ポイント
//! - 判断ロジック（`plan_batch`）は純粋関数。store も時計も触らない
//! - store からの読み出しと BatchId の採番は `BatchAccumulator` 側に寄せる
//!
//! # トリガー
//! - **Size**: candidate が `max_size` に達したら即座に出す
//! - **Staleness**: 最古の pending の age が閾値を超えたら、`max_size` 未満でも出す
//! - どちらも成立しなければ次の tick まで待つ
//!
//! # チャネル選択
//! 宛先チャネルが複数ある場合は、stale なチャネル → pending 件数の多いチャネル
//! → アドレスの辞書順、の優先度で 1 つ選び、その中だけでトリガーを評価します。
//! 満杯のチャネルがあれば件数で必ずそちらが選ばれます。

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::domain::{Batch, BatchReason, ChannelAddress, ErgoError, TaskRequest};
use crate::ports::{IdGenerator, PendingItem, PendingStore};

/// Decision made for one channel, before an id is assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchPlan {
    pub channel: ChannelAddress,
    pub reason: BatchReason,
    pub requests: Vec<TaskRequest>,
}

#[derive(Debug, Clone, Copy)]
enum Trigger {
    Evaluate { staleness_threshold: Duration },
    Force,
}

#[derive(Debug)]
struct ChannelGroup {
    /// Age of the first (oldest) item seen for this channel.
    oldest_age: Duration,
    pending: usize,
    candidate: Vec<TaskRequest>,
}

/// Pure batch decision over an oldest-first sequence of pending items.
///
/// Deterministic: the same items, `max_size` and threshold always produce the
/// same plan.
pub fn plan_batch(
    items: impl IntoIterator<Item = PendingItem>,
    max_size: usize,
    staleness_threshold: Duration,
) -> Option<BatchPlan> {
    plan(items, max_size, Trigger::Evaluate { staleness_threshold })
}

/// Like [`plan_batch`] but emits the oldest `max_size` items of the channel
/// holding the oldest pending item, whatever the triggers say.
pub fn plan_forced_batch(
    items: impl IntoIterator<Item = PendingItem>,
    max_size: usize,
) -> Option<BatchPlan> {
    plan(items, max_size, Trigger::Force)
}

fn plan(
    items: impl IntoIterator<Item = PendingItem>,
    max_size: usize,
    trigger: Trigger,
) -> Option<BatchPlan> {
    if max_size == 0 {
        return None;
    }

    let mut groups: BTreeMap<ChannelAddress, ChannelGroup> = BTreeMap::new();
    for item in items {
        let group = groups
            .entry(item.request.channel().clone())
            .or_insert_with(|| ChannelGroup {
                oldest_age: item.age,
                pending: 0,
                candidate: Vec::with_capacity(max_size),
            });
        group.pending += 1;
        if group.candidate.len() < max_size {
            group.candidate.push(item.request);
        }
    }

    let (channel, group) = match trigger {
        Trigger::Evaluate { staleness_threshold } => groups.into_iter().max_by_key(|(addr, g)| {
            (
                g.oldest_age > staleness_threshold,
                g.pending,
                Reverse(addr.clone()),
            )
        })?,
        Trigger::Force => groups
            .into_iter()
            .max_by_key(|(addr, g)| (g.oldest_age, Reverse(addr.clone())))?,
    };

    let reason = if group.candidate.len() >= max_size {
        BatchReason::SizeTriggered
    } else {
        match trigger {
            Trigger::Evaluate { staleness_threshold } if group.oldest_age > staleness_threshold => {
                BatchReason::StalenessTriggered
            }
            Trigger::Evaluate { .. } => return None,
            Trigger::Force => BatchReason::Forced,
        }
    };

    Some(BatchPlan {
        channel,
        reason,
        requests: group.candidate,
    })
}

/// Reads the store and turns a [`BatchPlan`] into an identified [`Batch`].
pub struct BatchAccumulator {
    store: Arc<dyn PendingStore>,
    ids: Arc<dyn IdGenerator>,
}

impl BatchAccumulator {
    pub fn new(store: Arc<dyn PendingStore>, ids: Arc<dyn IdGenerator>) -> Self {
        Self { store, ids }
    }

    pub async fn form_batch(
        &self,
        now: DateTime<Utc>,
        max_size: usize,
        staleness_threshold: Duration,
    ) -> Result<Option<Batch>, ErgoError> {
        let pending = self.store.list_pending(now).await?;
        Ok(plan_batch(pending, max_size, staleness_threshold).map(|p| self.seal(p, now)))
    }

    pub async fn force_batch(
        &self,
        now: DateTime<Utc>,
        max_size: usize,
    ) -> Result<Option<Batch>, ErgoError> {
        let pending = self.store.list_pending(now).await?;
        Ok(plan_forced_batch(pending, max_size).map(|p| self.seal(p, now)))
    }

    fn seal(&self, plan: BatchPlan, now: DateTime<Utc>) -> Batch {
        Batch::new(
            self.ids.generate_batch_id(),
            plan.channel,
            plan.reason,
            now,
            plan.requests,
        )
    }
}
