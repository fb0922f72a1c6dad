//! Domain model (identities, requests, results, batches, states, errors).

pub mod batch;
pub mod errors;
pub mod ids;
pub mod key;
pub mod outcome;
pub mod record;
pub mod request;
pub mod state;

pub use batch::{Batch, BatchReason};
pub use errors::{ErgoError, ErrorKind};
pub use ids::{BatchId, MessageId};
pub use key::{ChannelAddress, TaskKey};
pub use outcome::{OutcomeKind, Resolution, TaskFailure, TaskResult};
pub use record::TaskRecord;
pub use request::TaskRequest;
pub use state::TaskState;
