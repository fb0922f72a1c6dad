//! EngineConfig - エンジン全体の設定
//!
//! グローバルな設定は持たず、この構造体を各コンポーネントの構築時に渡します。
//! JSON ファイルまたは `ERGO_*` 環境変数から読み込めます。

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::ChannelAddress;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Default outbound target.
    pub request_channel_address: ChannelAddress,

    /// Inbound source of results.
    pub result_channel_address: ChannelAddress,

    #[serde(default = "defaults::max_batch_size")]
    pub max_batch_size: usize,

    pub staleness_threshold_minutes: u64,

    #[serde(default = "defaults::dispatch_interval_secs")]
    pub dispatch_interval_secs: u64,

    #[serde(default = "defaults::collect_interval_secs")]
    pub collect_interval_secs: u64,

    #[serde(default = "defaults::reaper_interval_secs")]
    pub reaper_interval_secs: u64,

    #[serde(default = "defaults::publish_timeout_secs")]
    pub publish_timeout_secs: u64,

    /// Upper bound on one receive call, including the long-poll wait.
    #[serde(default = "defaults::receive_timeout_secs")]
    pub receive_timeout_secs: u64,

    /// Long-poll wait passed to the inbound channel.
    #[serde(default = "defaults::receive_wait_secs")]
    pub receive_wait_secs: u64,

    #[serde(default = "defaults::collector_max_messages")]
    pub collector_max_messages: usize,

    #[serde(default = "defaults::max_batches_per_tick")]
    pub max_batches_per_tick: usize,

    /// Dispatched tasks without a result after this long become Expired.
    /// Expiry is off when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_timeout_minutes: Option<u64>,

    #[serde(default = "defaults::retention_minutes")]
    pub retention_minutes: u64,
}

mod defaults {
    pub fn max_batch_size() -> usize {
        10
    }
    pub fn dispatch_interval_secs() -> u64 {
        60
    }
    pub fn collect_interval_secs() -> u64 {
        10
    }
    pub fn reaper_interval_secs() -> u64 {
        60
    }
    pub fn publish_timeout_secs() -> u64 {
        30
    }
    pub fn receive_timeout_secs() -> u64 {
        20
    }
    pub fn receive_wait_secs() -> u64 {
        1
    }
    pub fn collector_max_messages() -> usize {
        10
    }
    pub fn max_batches_per_tick() -> usize {
        1
    }
    pub fn retention_minutes() -> u64 {
        60
    }
}

/// Upper bound for every minute-valued setting (100 years).
pub const MAX_DURATION_MINUTES: u64 = 100 * 365 * 24 * 60;

fn minutes(m: u64) -> chrono::Duration {
    // validate() が上限を保証する。検証されていない設定でも panic しないよう飽和させる
    chrono::Duration::minutes(m.min(MAX_DURATION_MINUTES) as i64)
}

/// (camelCase key, environment variable) pairs understood by [`EngineConfig::from_env`].
const ENV_KEYS: &[(&str, &str)] = &[
    ("requestChannelAddress", "ERGO_REQUEST_CHANNEL_ADDRESS"),
    ("resultChannelAddress", "ERGO_RESULT_CHANNEL_ADDRESS"),
    ("maxBatchSize", "ERGO_MAX_BATCH_SIZE"),
    ("stalenessThresholdMinutes", "ERGO_STALENESS_THRESHOLD_MINUTES"),
    ("dispatchIntervalSecs", "ERGO_DISPATCH_INTERVAL_SECS"),
    ("collectIntervalSecs", "ERGO_COLLECT_INTERVAL_SECS"),
    ("reaperIntervalSecs", "ERGO_REAPER_INTERVAL_SECS"),
    ("publishTimeoutSecs", "ERGO_PUBLISH_TIMEOUT_SECS"),
    ("receiveTimeoutSecs", "ERGO_RECEIVE_TIMEOUT_SECS"),
    ("receiveWaitSecs", "ERGO_RECEIVE_WAIT_SECS"),
    ("collectorMaxMessages", "ERGO_COLLECTOR_MAX_MESSAGES"),
    ("maxBatchesPerTick", "ERGO_MAX_BATCHES_PER_TICK"),
    ("resultTimeoutMinutes", "ERGO_RESULT_TIMEOUT_MINUTES"),
    ("retentionMinutes", "ERGO_RETENTION_MINUTES"),
];

impl EngineConfig {
    /// Required fields only; everything else takes its default.
    pub fn new(
        request_channel_address: ChannelAddress,
        result_channel_address: ChannelAddress,
        staleness_threshold_minutes: u64,
    ) -> Self {
        Self {
            request_channel_address,
            result_channel_address,
            max_batch_size: defaults::max_batch_size(),
            staleness_threshold_minutes,
            dispatch_interval_secs: defaults::dispatch_interval_secs(),
            collect_interval_secs: defaults::collect_interval_secs(),
            reaper_interval_secs: defaults::reaper_interval_secs(),
            publish_timeout_secs: defaults::publish_timeout_secs(),
            receive_timeout_secs: defaults::receive_timeout_secs(),
            receive_wait_secs: defaults::receive_wait_secs(),
            collector_max_messages: defaults::collector_max_messages(),
            max_batches_per_tick: defaults::max_batches_per_tick(),
            result_timeout_minutes: None,
            retention_minutes: defaults::retention_minutes(),
        }
    }

    pub fn from_json(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read `ERGO_*` variables. Numeric-looking values are passed as numbers,
    /// except for addresses.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut map = serde_json::Map::new();
        for (key, var) in ENV_KEYS {
            let Some(raw) = lookup(var) else {
                continue;
            };
            let value = match raw.trim().parse::<u64>() {
                Ok(n) if !key.ends_with("Address") => serde_json::Value::from(n),
                _ => serde_json::Value::String(raw),
            };
            map.insert((*key).to_string(), value);
        }
        let config: Self = serde_json::from_value(serde_json::Value::Object(map))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_channel_address.is_empty() {
            return Err(ConfigError::Invalid("requestChannelAddress is empty".into()));
        }
        if self.result_channel_address.is_empty() {
            return Err(ConfigError::Invalid("resultChannelAddress is empty".into()));
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError::Invalid("maxBatchSize must be at least 1".into()));
        }
        if self.collector_max_messages == 0 {
            return Err(ConfigError::Invalid("collectorMaxMessages must be at least 1".into()));
        }
        if self.max_batches_per_tick == 0 {
            return Err(ConfigError::Invalid("maxBatchesPerTick must be at least 1".into()));
        }
        if self.dispatch_interval_secs == 0
            || self.collect_interval_secs == 0
            || self.reaper_interval_secs == 0
        {
            return Err(ConfigError::Invalid("tick intervals must be non-zero".into()));
        }
        let minute_fields = [
            ("stalenessThresholdMinutes", Some(self.staleness_threshold_minutes)),
            ("resultTimeoutMinutes", self.result_timeout_minutes),
            ("retentionMinutes", Some(self.retention_minutes)),
        ];
        for (name, value) in minute_fields {
            if value.is_some_and(|m| m > MAX_DURATION_MINUTES) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be at most {MAX_DURATION_MINUTES}"
                )));
            }
        }
        if self.receive_wait_secs >= self.receive_timeout_secs {
            return Err(ConfigError::Invalid(
                "receiveWaitSecs must be shorter than receiveTimeoutSecs".into(),
            ));
        }
        Ok(())
    }

    pub fn staleness_threshold(&self) -> chrono::Duration {
        minutes(self.staleness_threshold_minutes)
    }

    pub fn result_timeout(&self) -> Option<chrono::Duration> {
        self.result_timeout_minutes.map(minutes)
    }

    pub fn retention(&self) -> chrono::Duration {
        minutes(self.retention_minutes)
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_secs(self.dispatch_interval_secs)
    }

    pub fn collect_interval(&self) -> Duration {
        Duration::from_secs(self.collect_interval_secs)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_secs)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_secs(self.receive_timeout_secs)
    }

    pub fn receive_wait(&self) -> Duration {
        Duration::from_secs(self.receive_wait_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    #[test]
    fn json_applies_defaults() {
        let config = EngineConfig::from_json(
            r#"{"requestChannelAddress":"req","resultChannelAddress":"res","stalenessThresholdMinutes":5}"#,
        )
        .unwrap();
        assert_eq!(config.max_batch_size, 10);
        assert_eq!(config.staleness_threshold(), chrono::Duration::minutes(5));
        assert_eq!(config.result_timeout(), None);
        assert_eq!(config, EngineConfig::new(ChannelAddress::new("req"), ChannelAddress::new("res"), 5));
    }

    #[test]
    fn staleness_threshold_is_required() {
        let err = EngineConfig::from_json(r#"{"requestChannelAddress":"req","resultChannelAddress":"res"}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let err = EngineConfig::from_json(
            r#"{"requestChannelAddress":"req","resultChannelAddress":"res","stalenessThresholdMinutes":5,"maxBatchSize":0}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("maxBatchSize"));
    }

    #[test]
    fn empty_address_is_rejected() {
        let config = EngineConfig::new(ChannelAddress::new(" "), ChannelAddress::new("res"), 5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_vars_are_mapped() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("ERGO_REQUEST_CHANNEL_ADDRESS", "https://sqs/requests"),
            ("ERGO_RESULT_CHANNEL_ADDRESS", "https://sqs/results"),
            ("ERGO_STALENESS_THRESHOLD_MINUTES", "3"),
            ("ERGO_MAX_BATCH_SIZE", "4"),
            ("ERGO_RESULT_TIMEOUT_MINUTES", "90"),
        ]);
        let config = EngineConfig::from_vars(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.request_channel_address.as_str(), "https://sqs/requests");
        assert_eq!(config.max_batch_size, 4);
        assert_eq!(config.staleness_threshold_minutes, 3);
        assert_eq!(config.result_timeout(), Some(chrono::Duration::minutes(90)));
    }

    #[rstest]
    #[case("stalenessThresholdMinutes", r#""stalenessThresholdMinutes":18446744073709551615"#)]
    #[case("stalenessThresholdMinutes", r#""stalenessThresholdMinutes":1000000000000000"#)]
    #[case("resultTimeoutMinutes", r#""stalenessThresholdMinutes":5,"resultTimeoutMinutes":1000000000000000"#)]
    #[case("retentionMinutes", r#""stalenessThresholdMinutes":5,"retentionMinutes":1000000000000"#)]
    fn oversized_minutes_are_rejected(#[case] field: &str, #[case] fields: &str) {
        let json = format!(r#"{{"requestChannelAddress":"req","resultChannelAddress":"res",{fields}}}"#);
        let err = EngineConfig::from_json(&json).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains(field), "{err}");
    }

    #[test]
    fn largest_accepted_minutes_stay_positive() {
        let mut config = EngineConfig::new(
            ChannelAddress::new("req"),
            ChannelAddress::new("res"),
            MAX_DURATION_MINUTES,
        );
        config.retention_minutes = MAX_DURATION_MINUTES;
        config.validate().unwrap();
        assert!(config.staleness_threshold() > chrono::Duration::zero());

        let now = chrono::Utc::now();
        assert!(now - config.retention() < now);
    }

    #[test]
    fn unvalidated_minutes_saturate_instead_of_wrapping() {
        let mut config = EngineConfig::new(ChannelAddress::new("req"), ChannelAddress::new("res"), u64::MAX);
        config.retention_minutes = u64::MAX;
        config.result_timeout_minutes = Some(u64::MAX);
        assert_eq!(
            config.staleness_threshold(),
            chrono::Duration::minutes(MAX_DURATION_MINUTES as i64)
        );
        assert!(config.result_timeout().is_some_and(|d| d > chrono::Duration::zero()));
        let now = chrono::Utc::now();
        assert!(now - config.retention() < now);
    }
}
