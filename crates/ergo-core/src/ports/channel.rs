//! Channel ports - 外部メッセージキュー（SQS など）への送受信
//!
//! - OutboundChannel: batch を 1 メッセージとして publish
//! - InboundChannel: 結果メッセージを受信し、処理後に acknowledge
//!
//! どちらもネットワーク I/O でブロックしうるので、呼び出し側（Dispatcher /
//! Collector）が `tokio::time::timeout` で上限をかけます。

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{ChannelAddress, MessageId};

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel unavailable: {0}")]
    Unavailable(String),

    #[error("payload of {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("unknown receipt {0}")]
    UnknownReceipt(MessageId),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

/// One message received from an inbound channel.
///
/// `receipt` must be passed back to [`InboundChannel::acknowledge`] to remove
/// the message from the source queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub receipt: MessageId,
    pub body: Vec<u8>,
}

#[async_trait]
pub trait OutboundChannel: Send + Sync {
    async fn publish(&self, address: &ChannelAddress, body: Vec<u8>) -> Result<(), ChannelError>;
}

#[async_trait]
pub trait InboundChannel: Send + Sync {
    /// Receive up to `max_messages`, waiting at most `wait` for the first one.
    /// An empty vector means nothing arrived in time.
    async fn receive(
        &self,
        address: &ChannelAddress,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<InboundMessage>, ChannelError>;

    async fn acknowledge(
        &self,
        address: &ChannelAddress,
        receipt: MessageId,
    ) -> Result<(), ChannelError>;
}
