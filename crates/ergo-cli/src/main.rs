use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use ergo_core::app::{AwaitOutcome, Engine, EngineConfig};
use ergo_core::codec::{self, WireTask};
use ergo_core::domain::{ChannelAddress, TaskKey, TaskResult};
use ergo_core::impls::InMemoryChannel;
use ergo_core::ports::{InboundChannel, OutboundChannel};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Deserialize)]
struct HelloPayload {
    name: String,
    #[serde(default)]
    fail: bool,
}

/// 外部の実行プールの代わり：request channel から batch を取り、1 件ずつ結果を返す
async fn worker_pool(
    channel: Arc<InMemoryChannel>,
    requests: ChannelAddress,
    results: ChannelAddress,
    shutdown_rx: watch::Receiver<bool>,
) {
    while !*shutdown_rx.borrow() {
        let messages = match channel.receive(&requests, 1, Duration::from_secs(1)).await {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(error = %e, "worker receive failed");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };
        for message in messages {
            if let Err(e) = handle_batch(&channel, &results, &message.body).await {
                // ack しない：visibility timeout 後に再配信される
                tracing::warn!(receipt = %message.receipt, error = %e, "worker failed on batch");
                continue;
            }
            if let Err(e) = channel.acknowledge(&requests, message.receipt).await {
                tracing::warn!(receipt = %message.receipt, error = %e, "worker ack failed");
            }
        }
    }
}

async fn handle_batch(
    channel: &InMemoryChannel,
    results: &ChannelAddress,
    body: &[u8],
) -> anyhow::Result<()> {
    let batch = codec::decode_batch(body)?;
    tracing::info!(
        batch_id = %batch.batch_id,
        size = batch.tasks.len(),
        reason = ?batch.reason,
        "worker picked up batch"
    );
    for task in &batch.tasks {
        let result = execute(task);
        let body = codec::encode_result(&result)?;
        channel
            .publish(results, body)
            .await
            .with_context(|| format!("publishing result for {}", task.identity))?;
    }
    Ok(())
}

fn execute(task: &WireTask) -> TaskResult {
    let now = Utc::now();
    let identity = task.identity.clone();
    match serde_json::from_value::<HelloPayload>(task.payload.clone()) {
        Ok(p) if p.fail => TaskResult::failure(identity, json!({ "name": p.name }), now)
            .with_result_code(1)
            .with_error_message("intentional failure"),
        Ok(p) => TaskResult::success(identity, json!({ "greeting": format!("Hello, {}!", p.name) }), now),
        Err(e) => TaskResult::failure(identity, serde_json::Value::Null, now)
            .with_result_code(2)
            .with_error_message(format!("json decode: {e}")),
    }
}

/// `ERGO_CONFIG`（JSON ファイル）→ `ERGO_*` 環境変数 → デモ用の設定、の順
fn load_config() -> anyhow::Result<EngineConfig> {
    if let Ok(path) = std::env::var("ERGO_CONFIG") {
        let raw = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
        return EngineConfig::from_json(&raw).with_context(|| format!("parsing {path}"));
    }
    if std::env::var_os("ERGO_REQUEST_CHANNEL_ADDRESS").is_some() {
        return EngineConfig::from_env().context("reading ERGO_* environment");
    }

    let mut config = EngineConfig::new(
        ChannelAddress::new("demo-requests"),
        ChannelAddress::new("demo-results"),
        1,
    );
    config.max_batch_size = 3;
    config.dispatch_interval_secs = 1;
    config.collect_interval_secs = 1;
    config.reaper_interval_secs = 5;
    config.receive_timeout_secs = 5;
    config.result_timeout_minutes = Some(5);
    Ok(config)
}

async fn run_demo(engine: &Engine) -> anyhow::Result<()> {
    let run = Utc::now().format("%Y%m%dT%H%M%S").to_string();
    let names = ["alice", "bob", "carol", "dave", "erin"];

    let mut keys = Vec::new();
    for (i, name) in names.iter().enumerate() {
        let key = TaskKey::compose("hello_dag", &format!("greet_{name}"), &run)?;
        let payload = json!({ "name": name, "fail": i == 3 });
        // 過去の実行時刻にして、端数の batch がすぐ stale になるようにする
        let execution_time =
            Utc::now() - chrono::Duration::minutes(2) + chrono::Duration::seconds(i as i64);
        engine.submit(key.clone(), payload, execution_time).await?;
        keys.push(key);
    }
    tracing::info!(submitted = keys.len(), "demo tasks submitted");

    let mut waits = JoinSet::new();
    for key in keys {
        let engine = engine.clone();
        waits.spawn(async move {
            let outcome = engine.await_result(&key, Duration::from_secs(30)).await;
            (key, outcome)
        });
    }
    while let Some(joined) = waits.join_next().await {
        let (key, outcome) = joined?;
        match outcome? {
            AwaitOutcome::Completed(payload) => {
                tracing::info!(identity = %key, %payload, "task completed");
            }
            AwaitOutcome::Failed(failure) => {
                tracing::warn!(
                    identity = %key,
                    result_code = ?failure.result_code,
                    error = ?failure.error_message,
                    "task failed"
                );
            }
            AwaitOutcome::Expired => tracing::warn!(identity = %key, "task expired"),
            AwaitOutcome::Timeout => tracing::warn!(identity = %key, "gave up waiting"),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ergo_core=info,ergo_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config()?;
    let channel = Arc::new(InMemoryChannel::new());
    let engine = Engine::builder()
        .config(config.clone())
        .channel(channel.clone())
        .build()?;

    let (worker_tx, worker_rx) = watch::channel(false);
    let worker = tokio::spawn(worker_pool(
        channel,
        config.request_channel_address.clone(),
        config.result_channel_address.clone(),
        worker_rx,
    ));
    let tasks = engine.start();

    tokio::select! {
        result = run_demo(&engine) => result?,
        _ = tokio::signal::ctrl_c() => tracing::warn!("interrupted, shutting down"),
    }

    tasks.shutdown_and_join().await;
    // worker が既に終わっていても構わない
    let _ = worker_tx.send(true);
    worker.await.context("worker pool panicked")?;

    let status = engine.status().await?;
    tracing::info!(status = %serde_json::to_string(&status)?, "final status");
    Ok(())
}
