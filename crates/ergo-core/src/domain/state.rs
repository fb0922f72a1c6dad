//! State - タスクの状態
//!
//! # 状態遷移
//! - Pending -> Dispatched -> Completed
//! - Pending -> Dispatched -> Failed
//! - Pending -> Dispatched -> Expired
//!
//! 遷移は単調で、状態が戻ることはありません。

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Created, not yet sent.
    Pending,

    /// Sent to the outbound channel, awaiting result.
    Dispatched,

    /// Result received, success.
    Completed,

    /// Result received, failure.
    Failed,

    /// No result within the configured bound.
    Expired,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Expired
        )
    }

    pub fn can_transition_to(self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (TaskState::Pending, TaskState::Dispatched)
                | (
                    TaskState::Dispatched,
                    TaskState::Completed | TaskState::Failed | TaskState::Expired
                )
        )
    }
}
