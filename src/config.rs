use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::event_sourcing::store::CursorPolicy;
use crate::utils::{CircuitBreakerConfig, RetryConfig};

// ============================================================================
// Engine Configuration
// ============================================================================
//
// Operational knobs only. None of these change correctness: snapshot cadence
// and idle eviction trade memory and replay cost, retries trade latency.
//
// Sources, later wins: defaults → JSON document → PARTITION_ES_* variables.
//
// ============================================================================

pub const ENV_PREFIX: &str = "PARTITION_ES_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("invalid configuration document: {0}")]
    Document(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Period of the dirty-snapshot flush timer
    pub snapshot_interval_ms: u64,
    /// Flush a snapshot after this many applied events; 0 disables
    pub snapshot_every_events: u64,
    /// Coordinators with no traffic for this long shut down
    pub idle_timeout_ms: u64,
    /// Bounded mailbox size per coordinator
    pub mailbox_capacity: usize,
    pub cursor_policy: CursorPolicy,
    /// Backoff for transient ledger read failures
    pub store_retry: RetryConfig,
    pub snapshot_breaker: CircuitBreakerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            snapshot_interval_ms: 10_000,
            snapshot_every_events: 50,
            idle_timeout_ms: 300_000,
            mailbox_capacity: 64,
            cursor_policy: CursorPolicy::FromStart,
            store_retry: RetryConfig::default(),
            snapshot_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(document: &str) -> Result<Self, ConfigError> {
        serde_json::from_str::<Self>(document)?.validate()
    }

    /// Defaults overlaid with `PARTITION_ES_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().overlay(std::env::vars())
    }

    /// Apply `PARTITION_ES_*` pairs on top of `self`. Unrelated keys are
    /// ignored.
    pub fn overlay<I>(mut self, vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match name {
                "SNAPSHOT_INTERVAL_MS" => self.snapshot_interval_ms = parse(&key, &value)?,
                "SNAPSHOT_EVERY_EVENTS" => self.snapshot_every_events = parse(&key, &value)?,
                "IDLE_TIMEOUT_MS" => self.idle_timeout_ms = parse(&key, &value)?,
                "MAILBOX_CAPACITY" => self.mailbox_capacity = parse(&key, &value)?,
                "CURSOR_POLICY" => {
                    self.cursor_policy = serde_json::from_value(serde_json::Value::String(
                        value.to_ascii_lowercase(),
                    ))
                    .map_err(|e| invalid(&key, &value, e))?
                }
                "STORE_RETRY_MAX_ATTEMPTS" => self.store_retry.max_attempts = parse(&key, &value)?,
                "STORE_RETRY_INITIAL_DELAY_MS" => {
                    self.store_retry.initial_delay = Duration::from_millis(parse(&key, &value)?)
                }
                "STORE_RETRY_MAX_DELAY_MS" => {
                    self.store_retry.max_delay = Duration::from_millis(parse(&key, &value)?)
                }
                _ => tracing::debug!(key = %key, "Ignoring unknown configuration variable"),
            }
        }
        self.validate()
    }

    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.mailbox_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "mailbox_capacity".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.snapshot_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "snapshot_interval_ms".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.idle_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "idle_timeout_ms".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.store_retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "store_retry.max_attempts".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(self)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.snapshot_interval_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e| invalid(key, value, e))
}

fn invalid(key: &str, value: &str, reason: impl std::fmt::Display) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.snapshot_interval(), Duration::from_secs(10));
        assert_eq!(config.snapshot_every_events, 50);
        assert_eq!(config.idle_timeout(), Duration::from_secs(300));
        assert_eq!(config.mailbox_capacity, 64);
        assert_eq!(config.cursor_policy, CursorPolicy::FromStart);
        assert_eq!(config.store_retry.max_attempts, 3);
    }

    #[test]
    fn test_env_overlay() {
        let config = EngineConfig::default()
            .overlay(vars(&[
                ("PARTITION_ES_IDLE_TIMEOUT_MS", "1500"),
                ("PARTITION_ES_CURSOR_POLICY", "REJECT"),
                ("PARTITION_ES_STORE_RETRY_MAX_ATTEMPTS", "7"),
                ("HOME", "/root"),
            ]))
            .unwrap();

        assert_eq!(config.idle_timeout_ms, 1500);
        assert_eq!(config.cursor_policy, CursorPolicy::Reject);
        assert_eq!(config.store_retry.max_attempts, 7);
    }

    #[test]
    fn test_env_overlay_rejects_garbage() {
        let err = EngineConfig::default()
            .overlay(vars(&[("PARTITION_ES_MAILBOX_CAPACITY", "lots")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "PARTITION_ES_MAILBOX_CAPACITY"));

        let err = EngineConfig::default()
            .overlay(vars(&[("PARTITION_ES_MAILBOX_CAPACITY", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_json_document_keeps_defaults_for_missing_fields() {
        let config = EngineConfig::from_json_str(
            r#"{"snapshot_every_events": 5, "cursor_policy": "empty", "store_retry": {"max_attempts": 2}}"#,
        )
        .unwrap();

        assert_eq!(config.snapshot_every_events, 5);
        assert_eq!(config.cursor_policy, CursorPolicy::Empty);
        assert_eq!(config.store_retry.max_attempts, 2);
        assert_eq!(config.store_retry.initial_delay, Duration::from_millis(100));
        assert_eq!(config.mailbox_capacity, 64);
    }
}
