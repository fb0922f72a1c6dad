//! Wire codec - outbound batch / inbound result メッセージの JSON 表現
//!
//! # Outbound（1 batch = 1 メッセージ）
//! ```json
//! {"batchId":"batch-01H...","reason":"size-triggered","formedAt":"...",
//!  "tasks":[{"identity":"wf/task/run","payload":{...},"executionTime":"..."}]}
//! ```
//!
//! # Inbound（1 result = 1 メッセージ）
//! ```json
//! {"identity":"wf/task/run","outcome":"SUCCESS","payload":{...},"completedAt":"..."}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Batch, BatchId, BatchReason, ErgoError, TaskKey, TaskResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireTask {
    pub identity: TaskKey,
    pub payload: serde_json::Value,
    pub execution_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchMessage {
    pub batch_id: BatchId,
    pub reason: BatchReason,
    pub formed_at: DateTime<Utc>,
    pub tasks: Vec<WireTask>,
}

impl From<&Batch> for BatchMessage {
    fn from(batch: &Batch) -> Self {
        Self {
            batch_id: batch.id(),
            reason: batch.reason(),
            formed_at: batch.formed_at(),
            tasks: batch
                .requests()
                .iter()
                .map(|r| WireTask {
                    identity: r.identity().clone(),
                    payload: r.payload().clone(),
                    execution_time: r.execution_time(),
                })
                .collect(),
        }
    }
}

pub fn encode_batch(batch: &Batch) -> Result<Vec<u8>, ErgoError> {
    serde_json::to_vec(&BatchMessage::from(batch))
        .map_err(|e| ErgoError::MalformedMessage(format!("encode batch {}: {e}", batch.id())))
}

pub fn decode_batch(bytes: &[u8]) -> Result<BatchMessage, ErgoError> {
    serde_json::from_slice(bytes).map_err(|e| ErgoError::MalformedMessage(e.to_string()))
}

pub fn encode_result(result: &TaskResult) -> Result<Vec<u8>, ErgoError> {
    serde_json::to_vec(result)
        .map_err(|e| ErgoError::MalformedMessage(format!("encode result {}: {e}", result.identity)))
}

/// Identity validation happens here too, via `TaskKey`'s `Deserialize`.
pub fn decode_result(bytes: &[u8]) -> Result<TaskResult, ErgoError> {
    serde_json::from_slice(bytes).map_err(|e| ErgoError::MalformedMessage(e.to_string()))
}
