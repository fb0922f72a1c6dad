//! Errors - エラー型と分類
//!
//! `Timeout` はエラーではなく `await_result` の通常の結果なので、ここには含めません。

use thiserror::Error;

use super::key::{ChannelAddress, TaskKey};
use super::state::TaskState;

/// ErrorKind はエラーの運用上の分類
///
/// - Caller: 呼び出し側のバグ（identity の再利用など）
/// - Invariant: 内部不変条件の違反（正しい使い方では起きない、バグ報告扱い）
/// - Transient: 一時的な障害（次の tick でリトライ）
/// - Malformed: 受信メッセージの不正（破棄してログ）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Caller,
    Invariant,
    Transient,
    Malformed,
}

/// ErgoError はドメインエラー
#[derive(Debug, Error)]
pub enum ErgoError {
    #[error("duplicate identity: {0}")]
    DuplicateIdentity(TaskKey),

    #[error("invalid transition for {identity}: {from:?} -> {to:?}")]
    InvalidTransition {
        identity: TaskKey,
        from: TaskState,
        to: TaskState,
    },

    #[error("unknown identity: {0}")]
    UnknownIdentity(String),

    #[error("invalid identity {identity:?}: {reason}")]
    InvalidIdentity {
        identity: String,
        reason: &'static str,
    },

    #[error("invalid channel address {0:?}")]
    InvalidAddress(ChannelAddress),

    #[error("channel {address} unavailable: {reason}")]
    ChannelUnavailable {
        address: ChannelAddress,
        reason: String,
    },

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("store failure: {0}")]
    Store(String),
}

impl ErgoError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ErgoError::DuplicateIdentity(_)
            | ErgoError::UnknownIdentity(_)
            | ErgoError::InvalidIdentity { .. }
            | ErgoError::InvalidAddress(_) => ErrorKind::Caller,
            ErgoError::InvalidTransition { .. } => ErrorKind::Invariant,
            ErgoError::ChannelUnavailable { .. } | ErgoError::Store(_) => ErrorKind::Transient,
            ErgoError::MalformedMessage(_) => ErrorKind::Malformed,
        }
    }

    /// Transient errors are retried on the next tick and never reach the orchestrator.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_propagation_policy() {
        let key = TaskKey::new("wf/t/r").unwrap();
        assert_eq!(ErgoError::DuplicateIdentity(key.clone()).kind(), ErrorKind::Caller);
        assert_eq!(
            ErgoError::InvalidAddress(ChannelAddress::new(" ")).kind(),
            ErrorKind::Caller
        );
        assert_eq!(
            ErgoError::InvalidTransition {
                identity: key,
                from: TaskState::Completed,
                to: TaskState::Dispatched,
            }
            .kind(),
            ErrorKind::Invariant
        );
        let unavailable = ErgoError::ChannelUnavailable {
            address: ChannelAddress::new("q"),
            reason: "down".into(),
        };
        assert!(unavailable.is_transient());
        assert_eq!(
            ErgoError::MalformedMessage("x".into()).kind(),
            ErrorKind::Malformed
        );
    }

    #[test]
    fn messages_name_the_identity() {
        let key = TaskKey::new("wf/t/r").unwrap();
        let msg = ErgoError::DuplicateIdentity(key).to_string();
        assert!(msg.contains("wf/t/r"));
    }
}
