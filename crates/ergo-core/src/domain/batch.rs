//! Batch - 1 回の outbound publish にまとめられたタスク群

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::BatchId;
use super::key::{ChannelAddress, TaskKey};
use super::request::TaskRequest;

/// Why a batch was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BatchReason {
    /// The candidate reached the configured maximum size.
    SizeTriggered,

    /// The oldest pending item waited longer than the staleness threshold.
    StalenessTriggered,

    /// Explicit flush, regardless of either trigger.
    Forced,
}

/// Ordered, bounded group of requests published together.
///
/// Immutable once formed: fields are private and there are no mutators.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    id: BatchId,
    channel: ChannelAddress,
    reason: BatchReason,
    formed_at: DateTime<Utc>,
    requests: Vec<TaskRequest>,
}

impl Batch {
    pub fn new(
        id: BatchId,
        channel: ChannelAddress,
        reason: BatchReason,
        formed_at: DateTime<Utc>,
        requests: Vec<TaskRequest>,
    ) -> Self {
        Self {
            id,
            channel,
            reason,
            formed_at,
            requests,
        }
    }

    pub fn id(&self) -> BatchId {
        self.id
    }

    pub fn channel(&self) -> &ChannelAddress {
        &self.channel
    }

    pub fn reason(&self) -> BatchReason {
        self.reason
    }

    pub fn formed_at(&self) -> DateTime<Utc> {
        self.formed_at
    }

    pub fn requests(&self) -> &[TaskRequest] {
        &self.requests
    }

    pub fn identities(&self) -> Vec<TaskKey> {
        self.requests.iter().map(|r| r.identity().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&BatchReason::SizeTriggered).unwrap(),
            "\"size-triggered\""
        );
        assert_eq!(
            serde_json::to_string(&BatchReason::StalenessTriggered).unwrap(),
            "\"staleness-triggered\""
        );
    }
}
