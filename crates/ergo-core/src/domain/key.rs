//! Task identity and channel addressing.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::ErgoError;

/// Upper bound on identity length, in bytes.
pub const MAX_KEY_LEN: usize = 512;

const COMPONENT_SEPARATOR: char = '/';

/// Globally unique identity of a task request.
///
/// Composed by the orchestrator from workflow, task and run identifiers.
/// Validated on construction: non-empty, at most [`MAX_KEY_LEN`] bytes,
/// no control characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskKey(String);

impl TaskKey {
    pub fn new(raw: impl Into<String>) -> Result<Self, ErgoError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(ErgoError::InvalidIdentity {
                identity: raw,
                reason: "identity is empty",
            });
        }
        if raw.len() > MAX_KEY_LEN {
            return Err(ErgoError::InvalidIdentity {
                identity: raw,
                reason: "identity exceeds 512 bytes",
            });
        }
        if raw.chars().any(char::is_control) {
            return Err(ErgoError::InvalidIdentity {
                identity: raw,
                reason: "identity contains control characters",
            });
        }
        Ok(Self(raw))
    }

    /// `workflow/task/run` 形式の identity を組み立てる
    pub fn compose(workflow: &str, task: &str, run: &str) -> Result<Self, ErgoError> {
        for part in [workflow, task, run] {
            if part.is_empty() || part.contains(COMPONENT_SEPARATOR) {
                return Err(ErgoError::InvalidIdentity {
                    identity: format!("{workflow}{COMPONENT_SEPARATOR}{task}{COMPONENT_SEPARATOR}{run}"),
                    reason: "components must be non-empty and must not contain '/'",
                });
            }
        }
        Self::new(format!(
            "{workflow}{COMPONENT_SEPARATOR}{task}{COMPONENT_SEPARATOR}{run}"
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TaskKey {
    type Error = ErgoError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for TaskKey {
    type Error = ErgoError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TaskKey> for String {
    fn from(key: TaskKey) -> Self {
        key.0
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Address of an outbound or inbound channel (a queue URL, a topic name, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelAddress(String);

impl ChannelAddress {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn compose_joins_components() {
        let key = TaskKey::compose("etl", "load", "2024-01-01T00:00:00+00:00").unwrap();
        assert_eq!(key.as_str(), "etl/load/2024-01-01T00:00:00+00:00");
    }

    #[rstest]
    #[case("", "load", "run")]
    #[case("etl", "", "run")]
    #[case("etl", "a/b", "run")]
    fn compose_rejects_bad_components(#[case] wf: &str, #[case] task: &str, #[case] run: &str) {
        let err = TaskKey::compose(wf, task, run).unwrap_err();
        assert!(matches!(err, ErgoError::InvalidIdentity { .. }));
    }

    #[rstest]
    #[case("")]
    #[case("tab\there")]
    fn new_rejects_invalid(#[case] raw: &str) {
        assert!(TaskKey::new(raw).is_err());
    }

    #[test]
    fn new_rejects_oversized() {
        assert!(TaskKey::new("k".repeat(MAX_KEY_LEN + 1)).is_err());
        assert!(TaskKey::new("k".repeat(MAX_KEY_LEN)).is_ok());
    }

    #[test]
    fn deserialize_validates() {
        let ok: TaskKey = serde_json::from_str("\"a/b/c\"").unwrap();
        assert_eq!(ok.as_str(), "a/b/c");
        assert!(serde_json::from_str::<TaskKey>("\"\"").is_err());
    }
}
