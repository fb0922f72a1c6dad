//! TaskRequest - オーケストレータから投入される 1 件の作業要求

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::key::{ChannelAddress, TaskKey};

/// A unit of work waiting to be offloaded.
///
/// `execution_time` is the logical time supplied by the orchestrator, not the
/// wall-clock enqueue time. Batching age is measured against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    identity: TaskKey,
    payload: serde_json::Value,
    execution_time: DateTime<Utc>,
    channel: ChannelAddress,
}

impl TaskRequest {
    pub fn new(
        identity: TaskKey,
        payload: serde_json::Value,
        execution_time: DateTime<Utc>,
        channel: ChannelAddress,
    ) -> Self {
        Self {
            identity,
            payload,
            execution_time,
            channel,
        }
    }

    pub fn identity(&self) -> &TaskKey {
        &self.identity
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn execution_time(&self) -> DateTime<Utc> {
        self.execution_time
    }

    /// Outbound channel this request is routed to.
    pub fn channel(&self) -> &ChannelAddress {
        &self.channel
    }
}
