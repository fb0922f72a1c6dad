//! Outcome model: results reported back by the execution pool.
//!
//! A [`TaskResult`] is what arrives on the inbound channel. A [`Resolution`]
//! is the terminal view of a task handed to whoever awaits it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::key::TaskKey;

/// Serialized as SUCCESS / FAILURE on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    Success,
    Failure,
}

/// Result of one executed task, as reported by the worker pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub identity: TaskKey,
    pub outcome: OutcomeKind,

    #[serde(default)]
    pub payload: serde_json::Value,

    pub completed_at: DateTime<Utc>,

    /// Executor-specific status code, usually only set on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_code: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl TaskResult {
    pub fn success(
        identity: TaskKey,
        payload: serde_json::Value,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            identity,
            outcome: OutcomeKind::Success,
            payload,
            completed_at,
            result_code: None,
            error_message: None,
        }
    }

    pub fn failure(
        identity: TaskKey,
        payload: serde_json::Value,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            identity,
            outcome: OutcomeKind::Failure,
            payload,
            completed_at,
            result_code: None,
            error_message: None,
        }
    }

    pub fn with_result_code(mut self, code: i64) -> Self {
        self.result_code = Some(code);
        self
    }

    pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.outcome == OutcomeKind::Success
    }
}

/// Failure details surfaced to a waiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFailure {
    pub payload: serde_json::Value,
    pub result_code: Option<i64>,
    pub error_message: Option<String>,
}

/// Terminal state of a task, as delivered to waiters.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Completed(serde_json::Value),
    Failed(TaskFailure),
    Expired,
}

impl From<&TaskResult> for Resolution {
    fn from(result: &TaskResult) -> Self {
        match result.outcome {
            OutcomeKind::Success => Resolution::Completed(result.payload.clone()),
            OutcomeKind::Failure => Resolution::Failed(TaskFailure {
                payload: result.payload.clone(),
                result_code: result.result_code,
                error_message: result.error_message.clone(),
            }),
        }
    }
}
