//! End-to-end: submit → dispatch → simulated worker → collect → await.
//!
//! Ticks are driven by hand against a FixedClock so every step is deterministic.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use ergo_core::app::{AwaitOutcome, CollectOutcome, DispatchOutcome, Engine, EngineConfig};
use ergo_core::codec;
use ergo_core::domain::{BatchReason, ChannelAddress, TaskKey, TaskResult, TaskState};
use ergo_core::impls::InMemoryChannel;
use ergo_core::ports::{FixedClock, InboundChannel, OutboundChannel};
use serde_json::json;

fn t(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap() + chrono::Duration::minutes(minutes)
}

fn key(s: &str) -> TaskKey {
    TaskKey::compose("etl", s, "2024-03-01").unwrap()
}

fn requests() -> ChannelAddress {
    ChannelAddress::new("requests")
}

fn results() -> ChannelAddress {
    ChannelAddress::new("results")
}

struct Harness {
    engine: Engine,
    channel: Arc<InMemoryChannel>,
    clock: Arc<FixedClock>,
}

fn harness(max_batch_size: usize, result_timeout_minutes: Option<u64>) -> Harness {
    let clock = Arc::new(FixedClock::new(t(0)));
    let channel = Arc::new(InMemoryChannel::new());
    let mut config = EngineConfig::new(requests(), results(), 5);
    config.max_batch_size = max_batch_size;
    config.receive_wait_secs = 0;
    config.result_timeout_minutes = result_timeout_minutes;
    let engine = Engine::builder()
        .config(config)
        .channel(channel.clone())
        .clock(clock.clone())
        .build()
        .unwrap();
    Harness {
        engine,
        channel,
        clock,
    }
}

/// Plays the external pool: takes every batch on `address`, answers each task.
async fn work(h: &Harness, address: &ChannelAddress, answer: impl Fn(&TaskKey) -> TaskResult) -> usize {
    let mut tasks = 0;
    let messages = h.channel.receive(address, 100, Duration::ZERO).await.unwrap();
    for message in messages {
        let batch = codec::decode_batch(&message.body).unwrap();
        for task in &batch.tasks {
            let body = codec::encode_result(&answer(&task.identity)).unwrap();
            h.channel.publish(&results(), body).await.unwrap();
            tasks += 1;
        }
        h.channel.acknowledge(address, message.receipt).await.unwrap();
    }
    tasks
}

fn succeed(identity: &TaskKey) -> TaskResult {
    TaskResult::success(identity.clone(), json!({ "done": identity.as_str() }), t(0))
}

async fn state(h: &Harness, identity: &TaskKey) -> TaskState {
    h.engine.record(identity).await.unwrap().unwrap().state
}

async fn collect(h: &Harness) -> usize {
    match h.engine.collector().tick().await.unwrap() {
        CollectOutcome::Collected(report) => report.applied,
        other => panic!("unexpected collect outcome {other:?}"),
    }
}

#[tokio::test]
async fn full_then_stale_batches_round_trip() {
    let h = harness(2, None);
    for (name, at) in [("a", 0), ("b", 1), ("c", 2)] {
        h.engine.submit(key(name), json!({ "n": name }), t(at)).await.unwrap();
    }

    let DispatchOutcome::Published(first) = h.engine.dispatcher().tick().await.unwrap() else {
        panic!("expected the size trigger");
    };
    assert_eq!(first[0].reason, BatchReason::SizeTriggered);
    assert_eq!(first[0].size, 2);

    assert_eq!(work(&h, &requests(), succeed).await, 2);
    assert_eq!(collect(&h).await, 2);
    assert_eq!(
        h.engine.await_result(&key("a"), Duration::ZERO).await.unwrap(),
        AwaitOutcome::Completed(json!({ "done": key("a").as_str() }))
    );

    // c alone: nothing until its age passes the threshold
    h.clock.set(t(7));
    assert!(matches!(h.engine.dispatcher().tick().await.unwrap(), DispatchOutcome::Idle));
    h.clock.set(t(8));
    let DispatchOutcome::Published(second) = h.engine.dispatcher().tick().await.unwrap() else {
        panic!("expected the staleness trigger");
    };
    assert_eq!(second[0].reason, BatchReason::StalenessTriggered);

    work(&h, &requests(), |id| {
        TaskResult::failure(id.clone(), json!(null), t(8))
            .with_result_code(137)
            .with_error_message("killed")
    })
    .await;
    collect(&h).await;

    let AwaitOutcome::Failed(failure) = h.engine.await_result(&key("c"), Duration::ZERO).await.unwrap() else {
        panic!("expected failure");
    };
    assert_eq!(failure.result_code, Some(137));

    let status = h.engine.status().await.unwrap();
    assert_eq!(status.tasks.completed, 2);
    assert_eq!(status.tasks.failed, 1);
    assert_eq!(status.counters.batches_published, 2);
    assert_eq!(status.waiters, 0);
}

#[tokio::test]
async fn collector_releases_a_blocked_waiter() {
    let h = harness(1, None);
    h.engine.submit(key("a"), json!({}), t(0)).await.unwrap();
    h.engine.dispatcher().tick().await.unwrap();

    let waiting = tokio::spawn({
        let engine = h.engine.clone();
        async move { engine.await_result(&key("a"), Duration::from_secs(30)).await }
    });
    while h.engine.status().await.unwrap().waiters == 0 {
        tokio::task::yield_now().await;
    }

    work(&h, &requests(), succeed).await;
    collect(&h).await;

    let outcome = waiting.await.unwrap().unwrap();
    assert!(matches!(outcome, AwaitOutcome::Completed(_)));
    assert_eq!(h.engine.status().await.unwrap().waiters, 0);
}

#[tokio::test]
async fn redelivered_result_is_applied_once() {
    let h = harness(1, None);
    h.engine.submit(key("a"), json!({}), t(0)).await.unwrap();
    h.engine.dispatcher().tick().await.unwrap();

    work(&h, &requests(), succeed).await;
    let duplicate = codec::encode_result(&TaskResult::failure(key("a"), json!(null), t(1))).unwrap();
    h.channel.publish(&results(), duplicate).await.unwrap();

    assert_eq!(collect(&h).await, 1);
    assert_eq!(state(&h, &key("a")).await, TaskState::Completed);
    assert_eq!(h.engine.status().await.unwrap().counters.results_ignored, 1);
}

#[tokio::test]
async fn overdue_task_expires_and_late_result_is_ignored() {
    let h = harness(1, Some(30));
    h.engine.submit(key("a"), json!({}), t(0)).await.unwrap();
    h.engine.dispatcher().tick().await.unwrap();

    h.clock.set(t(31));
    let report = h.engine.reaper().tick().await.unwrap().unwrap();
    assert_eq!(report.expired, vec![key("a")]);
    assert_eq!(
        h.engine.await_result(&key("a"), Duration::ZERO).await.unwrap(),
        AwaitOutcome::Expired
    );

    work(&h, &requests(), succeed).await;
    assert_eq!(collect(&h).await, 0);
    assert_eq!(state(&h, &key("a")).await, TaskState::Expired);
}

#[tokio::test]
async fn routed_requests_go_to_their_own_channel() {
    let h = harness(1, None);
    let side = ChannelAddress::new("requests-gpu");
    h.engine.submit(key("cpu"), json!({}), t(0)).await.unwrap();
    h.engine.submit_to(side.clone(), key("gpu"), json!({}), t(1)).await.unwrap();

    let DispatchOutcome::Published(batches) = h.engine.dispatcher().tick().await.unwrap() else {
        panic!("expected a publish");
    };
    // どちらも 1 件で満杯、件数も同じなのでアドレス順
    assert_eq!(batches[0].channel, requests());
    h.engine.dispatcher().tick().await.unwrap();

    assert_eq!(work(&h, &side, succeed).await, 1);
    assert_eq!(work(&h, &requests(), succeed).await, 1);
    assert_eq!(collect(&h).await, 2);
}

#[tokio::test]
async fn flush_pushes_out_a_partial_batch() {
    let h = harness(10, None);
    h.engine.submit(key("a"), json!({}), t(0)).await.unwrap();
    assert!(matches!(h.engine.dispatcher().tick().await.unwrap(), DispatchOutcome::Idle));

    let DispatchOutcome::Published(batches) = h.engine.dispatcher().flush().await.unwrap() else {
        panic!("expected a forced publish");
    };
    assert_eq!(batches[0].reason, BatchReason::Forced);
    assert_eq!(state(&h, &key("a")).await, TaskState::Dispatched);
}
