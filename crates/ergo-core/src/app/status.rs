//! Status - 観測用のカウンタとスナップショット
//!
//! tick 境界で握りつぶした一時的な失敗（publish 失敗、不正メッセージなど）は
//! ここのカウンタとログでだけ観測できます。

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::ports::StoreCounts;

#[derive(Debug, Default)]
pub struct EngineCounters {
    pub(crate) batches_published: AtomicU64,
    pub(crate) tasks_dispatched: AtomicU64,
    pub(crate) publish_failures: AtomicU64,
    pub(crate) ticks_skipped: AtomicU64,
    pub(crate) results_applied: AtomicU64,
    pub(crate) results_ignored: AtomicU64,
    pub(crate) malformed_messages: AtomicU64,
    pub(crate) receive_failures: AtomicU64,
    pub(crate) ack_failures: AtomicU64,
    pub(crate) waiters_released: AtomicU64,
    pub(crate) tasks_expired: AtomicU64,
    pub(crate) records_evicted: AtomicU64,
}

pub(crate) fn bump(counter: &AtomicU64, by: usize) {
    counter.fetch_add(by as u64, Ordering::Relaxed);
}

impl EngineCounters {
    pub fn snapshot(&self) -> CounterSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CounterSnapshot {
            batches_published: get(&self.batches_published),
            tasks_dispatched: get(&self.tasks_dispatched),
            publish_failures: get(&self.publish_failures),
            ticks_skipped: get(&self.ticks_skipped),
            results_applied: get(&self.results_applied),
            results_ignored: get(&self.results_ignored),
            malformed_messages: get(&self.malformed_messages),
            receive_failures: get(&self.receive_failures),
            ack_failures: get(&self.ack_failures),
            waiters_released: get(&self.waiters_released),
            tasks_expired: get(&self.tasks_expired),
            records_evicted: get(&self.records_evicted),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub batches_published: u64,
    pub tasks_dispatched: u64,
    pub publish_failures: u64,
    pub ticks_skipped: u64,
    pub results_applied: u64,
    pub results_ignored: u64,
    pub malformed_messages: u64,
    pub receive_failures: u64,
    pub ack_failures: u64,
    pub waiters_released: u64,
    pub tasks_expired: u64,
    pub records_evicted: u64,
}

/// Point-in-time view of the whole engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub tasks: StoreCounts,
    pub counters: CounterSnapshot,
    pub waiters: usize,
}
