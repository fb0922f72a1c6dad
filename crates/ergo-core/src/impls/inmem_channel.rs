//! InMemoryChannel - 開発・テスト用のメッセージキュー
//!
//! # 学習ポイント
//! - Mutex + Condvar による blocking receive
//! - Async での blocking 処理の扱い（spawn_blocking）
//! - address ごとの複数キューの管理
//! - visibility timeout による at-least-once 配送（ack されないメッセージは再配送）

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::domain::{ChannelAddress, MessageId};
use crate::ports::{
    ChannelError, IdGenerator, InboundChannel, InboundMessage, OutboundChannel, SystemClock,
    UlidGenerator,
};

/// SQS と同じ 256 KiB
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 256 * 1024;

pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct StoredMessage {
    id: MessageId,
    body: Vec<u8>,
}

#[derive(Debug)]
struct InFlight {
    address: ChannelAddress,
    message: StoredMessage,
    visible_again_at: Instant,
}

struct ChannelQueues {
    queues: HashMap<ChannelAddress, VecDeque<StoredMessage>>,
    in_flight: HashMap<MessageId, InFlight>,
    available: bool,
}

impl ChannelQueues {
    /// visibility timeout を過ぎた in-flight メッセージをキューの先頭に戻す
    fn requeue_expired(&mut self, now: Instant) {
        let expired: Vec<MessageId> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.visible_again_at <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(f) = self.in_flight.remove(&id) {
                self.queues.entry(f.address).or_default().push_front(f.message);
            }
        }
    }
}

/// InMemoryChannel は outbound / inbound の両方を実装する
///
/// # 使用例
/// ```ignore
/// let channel = InMemoryChannel::new();
/// channel.publish(&addr, body).await?;
/// let msgs = channel.receive(&addr, 10, Duration::from_secs(1)).await?;
/// channel.acknowledge(&addr, msgs[0].receipt).await?;
/// ```
pub struct InMemoryChannel {
    inner: Arc<Mutex<ChannelQueues>>,
    condvar: Arc<Condvar>,
    ids: UlidGenerator<SystemClock>,
    max_message_bytes: usize,
    visibility_timeout: Duration,
}

impl InMemoryChannel {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_MESSAGE_BYTES, DEFAULT_VISIBILITY_TIMEOUT)
    }

    pub fn with_limits(max_message_bytes: usize, visibility_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ChannelQueues {
                queues: HashMap::new(),
                in_flight: HashMap::new(),
                available: true,
            })),
            condvar: Arc::new(Condvar::new()),
            ids: UlidGenerator::new(SystemClock),
            max_message_bytes,
            visibility_timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChannelQueues> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 障害を模擬する。false の間は publish / receive が Unavailable を返す
    pub fn set_available(&self, available: bool) {
        self.lock().available = available;
        self.condvar.notify_all();
    }

    /// Number of visible (not in-flight) messages at `address`.
    pub fn visible_len(&self, address: &ChannelAddress) -> usize {
        self.lock().queues.get(address).map_or(0, VecDeque::len)
    }

    pub fn in_flight_len(&self) -> usize {
        self.lock().in_flight.len()
    }

    /// Remove and return every visible message at `address` without the
    /// receive/ack protocol.
    pub fn drain(&self, address: &ChannelAddress) -> Vec<Vec<u8>> {
        self.lock()
            .queues
            .get_mut(address)
            .map(|q| q.drain(..).map(|m| m.body).collect())
            .unwrap_or_default()
    }
}

impl Default for InMemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OutboundChannel for InMemoryChannel {
    async fn publish(&self, address: &ChannelAddress, body: Vec<u8>) -> Result<(), ChannelError> {
        if body.len() > self.max_message_bytes {
            return Err(ChannelError::PayloadTooLarge {
                size: body.len(),
                limit: self.max_message_bytes,
            });
        }
        {
            let mut inner = self.lock();
            if !inner.available {
                return Err(ChannelError::Unavailable(format!("{address} is offline")));
            }
            let message = StoredMessage {
                id: self.ids.generate_message_id(),
                body,
            };
            inner.queues.entry(address.clone()).or_default().push_back(message);
        }
        // 待機中の receive に通知
        self.condvar.notify_all();
        Ok(())
    }
}

#[async_trait]
impl InboundChannel for InMemoryChannel {
    async fn receive(
        &self,
        address: &ChannelAddress,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<InboundMessage>, ChannelError> {
        let inner = Arc::clone(&self.inner);
        let condvar = Arc::clone(&self.condvar);
        let address = address.clone();
        let visibility_timeout = self.visibility_timeout;

        tokio::task::spawn_blocking(move || {
            let start = Instant::now();
            let mut guard = inner.lock().unwrap_or_else(PoisonError::into_inner);
            loop {
                if !guard.available {
                    return Err(ChannelError::Unavailable(format!("{address} is offline")));
                }
                let now = Instant::now();
                guard.requeue_expired(now);

                let mut taken = Vec::new();
                if let Some(queue) = guard.queues.get_mut(&address) {
                    while taken.len() < max_messages {
                        let Some(message) = queue.pop_front() else {
                            break;
                        };
                        taken.push(message);
                    }
                }
                if !taken.is_empty() {
                    let mut out = Vec::with_capacity(taken.len());
                    for message in taken {
                        out.push(InboundMessage {
                            receipt: message.id,
                            body: message.body.clone(),
                        });
                        guard.in_flight.insert(
                            message.id,
                            InFlight {
                                address: address.clone(),
                                message,
                                visible_again_at: now + visibility_timeout,
                            },
                        );
                    }
                    return Ok(out);
                }

                let elapsed = start.elapsed();
                if elapsed >= wait {
                    return Ok(Vec::new());
                }
                let (next_guard, _) = condvar
                    .wait_timeout(guard, wait.saturating_sub(elapsed))
                    .unwrap_or_else(PoisonError::into_inner);
                guard = next_guard;
            }
        })
        .await
        .map_err(|e| ChannelError::Unavailable(format!("receive task failed: {e}")))?
    }

    async fn acknowledge(
        &self,
        _address: &ChannelAddress,
        receipt: MessageId,
    ) -> Result<(), ChannelError> {
        self.lock()
            .in_flight
            .remove(&receipt)
            .map(|_| ())
            .ok_or(ChannelError::UnknownReceipt(receipt))
    }
}
