//! Task record: request + lifecycle metadata.

use chrono::{DateTime, Utc};

use super::errors::ErgoError;
use super::ids::BatchId;
use super::outcome::{OutcomeKind, Resolution, TaskResult};
use super::request::TaskRequest;
use super::state::TaskState;

/// Everything the store knows about one task.
///
/// Design:
/// - This is the single source of truth for task state.
/// - All state transitions go through the `mark_*` methods, which refuse
///   anything [`TaskState::can_transition_to`] does not allow.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub request: TaskRequest,
    pub state: TaskState,

    /// Batch this task was published in (set once Dispatched).
    pub batch_id: Option<BatchId>,

    /// Result as received (set once Completed/Failed).
    pub result: Option<TaskResult>,

    pub submitted_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn new(request: TaskRequest, submitted_at: DateTime<Utc>) -> Self {
        Self {
            request,
            state: TaskState::Pending,
            batch_id: None,
            result: None,
            submitted_at,
            dispatched_at: None,
            settled_at: None,
        }
    }

    fn transition(&mut self, next: TaskState) -> Result<(), ErgoError> {
        if !self.state.can_transition_to(next) {
            return Err(ErgoError::InvalidTransition {
                identity: self.request.identity().clone(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    pub fn mark_dispatched(&mut self, batch_id: BatchId, at: DateTime<Utc>) -> Result<(), ErgoError> {
        self.transition(TaskState::Dispatched)?;
        self.batch_id = Some(batch_id);
        self.dispatched_at = Some(at);
        Ok(())
    }

    pub fn mark_settled(&mut self, result: TaskResult, at: DateTime<Utc>) -> Result<(), ErgoError> {
        let next = match result.outcome {
            OutcomeKind::Success => TaskState::Completed,
            OutcomeKind::Failure => TaskState::Failed,
        };
        self.transition(next)?;
        self.result = Some(result);
        self.settled_at = Some(at);
        Ok(())
    }

    pub fn mark_expired(&mut self, at: DateTime<Utc>) -> Result<(), ErgoError> {
        self.transition(TaskState::Expired)?;
        self.settled_at = Some(at);
        Ok(())
    }

    /// Terminal view for waiters. `None` while the task is still in flight.
    pub fn resolution(&self) -> Option<Resolution> {
        match self.state {
            TaskState::Completed | TaskState::Failed => self.result.as_ref().map(Resolution::from),
            TaskState::Expired => Some(Resolution::Expired),
            TaskState::Pending | TaskState::Dispatched => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChannelAddress, TaskKey};
    use chrono::TimeZone;
    use ulid::Ulid;

    fn record() -> TaskRecord {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let req = TaskRequest::new(
            TaskKey::new("wf/t/r").unwrap(),
            serde_json::json!({}),
            t0,
            ChannelAddress::new("requests"),
        );
        TaskRecord::new(req, t0)
    }

    #[test]
    fn settle_requires_dispatch() {
        let mut rec = record();
        let now = rec.submitted_at;
        let result = TaskResult::success(rec.request.identity().clone(), serde_json::json!(1), now);

        let err = rec.mark_settled(result.clone(), now).unwrap_err();
        assert!(matches!(err, ErgoError::InvalidTransition { from: TaskState::Pending, .. }));
        assert_eq!(rec.state, TaskState::Pending);

        rec.mark_dispatched(BatchId::from_ulid(Ulid::new()), now).unwrap();
        rec.mark_settled(result, now).unwrap();
        assert_eq!(rec.state, TaskState::Completed);
        assert_eq!(rec.resolution(), Some(Resolution::Completed(serde_json::json!(1))));
    }

    #[test]
    fn expired_is_terminal() {
        let mut rec = record();
        let now = rec.submitted_at;
        rec.mark_dispatched(BatchId::from_ulid(Ulid::new()), now).unwrap();
        rec.mark_expired(now).unwrap();
        assert_eq!(rec.resolution(), Some(Resolution::Expired));
        assert!(rec.mark_expired(now).is_err());
    }
}
