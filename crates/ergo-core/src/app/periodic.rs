//! Periodic - タイマー駆動のループと、その停止
//!
//! - 各ループは `tokio::time::interval` で起動し、遅れた tick は飛ばす（Skip）
//! - tick はループ内で直列に実行されるので、同じタスクが自分自身と並行して走ることはない
//! - shutdown は tick と tick の間でしか見ない。実行中の tick は最後まで走る

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// One unit of periodic work.
///
/// Implementations log and count their own failures; a tick never brings the
/// loop down.
#[async_trait]
pub trait Tick: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn run_tick(&self);
}

/// Marks a tick as in progress; a second acquire fails until it is dropped.
pub(crate) struct TickGuard<'a> {
    running: &'a AtomicBool,
}

impl<'a> TickGuard<'a> {
    pub(crate) fn try_acquire(running: &'a AtomicBool) -> Option<Self> {
        running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { running })
    }
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Handle to the running periodic tasks.
/// - `shutdown_and_join()` で全ループの終了を待てる
/// - handle を drop してもループは止まる（sender が閉じるため）
pub struct TaskGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl TaskGroup {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            joins: Vec::new(),
        }
    }

    pub fn spawn(&mut self, task: Arc<dyn Tick>, period: Duration) {
        let shutdown_rx = self.shutdown_tx.subscribe();
        tracing::info!(task = task.name(), period_ms = period.as_millis() as u64, "starting periodic task");
        self.joins
            .push(tokio::spawn(periodic_loop(task, period, shutdown_rx)));
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Request shutdown for all loops.
    /// In-flight ticks are not interrupted.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(e) = join.await {
                tracing::error!(error = %e, "periodic task panicked");
            }
        }
    }
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self::new()
    }
}

async fn periodic_loop(task: Arc<dyn Tick>, period: Duration, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                // sender が drop された場合も停止扱い
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        // ここは shutdown と競合させない（publish / apply を途中で切らない）
        task.run_tick().await;
    }
    tracing::info!(task = task.name(), "periodic task stopped");
}
