//! Cache configuration, loaded once and shared read-only by every node and
//! client of a cluster.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::order::WriteOrderMode;

/// How many backup acknowledgments a primary needs before it commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DurabilityThreshold {
    /// Every backup that is reachable at forward time; unreachable ones are
    /// excluded and never block the commit.
    #[default]
    AllReachable,
    /// At least this many backups must acknowledge.
    AtLeast(usize),
}

impl DurabilityThreshold {
    /// Acks required given the number of assigned backups.
    pub fn required(&self, assigned: usize) -> usize {
        match self {
            DurabilityThreshold::AllReachable => 0,
            DurabilityThreshold::AtLeast(n) => (*n).min(assigned),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub name: String,
    /// Backup copies per key, in addition to the primary.
    pub backups: usize,
    pub write_order_mode: WriteOrderMode,
    /// Overall deadline for one put call; `None` retries without bound.
    pub retry_deadline_ms: Option<u64>,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub durability: DurabilityThreshold,
    pub max_key_bytes: usize,
    pub max_value_bytes: usize,
    pub vnodes_per_node: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            backups: 1,
            write_order_mode: WriteOrderMode::Clock,
            retry_deadline_ms: Some(30_000),
            backoff_initial_ms: 10,
            backoff_max_ms: 200,
            durability: DurabilityThreshold::AllReachable,
            max_key_bytes: 1024,
            max_value_bytes: 1024 * 1024,
            vnodes_per_node: 64,
        }
    }
}

impl CacheConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: CacheConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_json_str(&content)?;
        tracing::info!(
            path = %path.display(),
            cache = %config.name,
            backups = config.backups,
            mode = ?config.write_order_mode,
            "loaded cache config"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backoff_initial_ms == 0 {
            return Err(ConfigError::Invalid("backoff_initial_ms must be > 0".into()));
        }
        if self.backoff_initial_ms > self.backoff_max_ms {
            return Err(ConfigError::Invalid(format!(
                "backoff_initial_ms ({}) exceeds backoff_max_ms ({})",
                self.backoff_initial_ms, self.backoff_max_ms
            )));
        }
        if let DurabilityThreshold::AtLeast(n) = self.durability {
            if n > self.backups {
                return Err(ConfigError::Invalid(format!(
                    "durability requires {} backup acks but only {} backups are configured",
                    n, self.backups
                )));
            }
        }
        if self.vnodes_per_node == 0 {
            return Err(ConfigError::Invalid("vnodes_per_node must be > 0".into()));
        }
        Ok(())
    }

    pub fn with_backups(mut self, backups: usize) -> Self {
        self.backups = backups;
        self
    }

    pub fn with_write_order_mode(mut self, mode: WriteOrderMode) -> Self {
        self.write_order_mode = mode;
        self
    }

    pub fn with_retry_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.retry_deadline_ms =
            deadline.map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn with_durability(mut self, durability: DurabilityThreshold) -> Self {
        self.durability = durability;
        self
    }

    pub fn with_max_value_bytes(mut self, max: usize) -> Self {
        self.max_value_bytes = max;
        self
    }

    pub fn retry_deadline(&self) -> Option<Duration> {
        self.retry_deadline_ms.map(Duration::from_millis)
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.backups, 1);
        assert_eq!(config.write_order_mode, WriteOrderMode::Clock);
        assert_eq!(config.durability, DurabilityThreshold::AllReachable);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = CacheConfig::from_json_str(
            r#"{ "backups": 2, "write_order_mode": "PRIMARY", "retry_deadline_ms": null }"#,
        )
        .unwrap();

        assert_eq!(config.backups, 2);
        assert_eq!(config.write_order_mode, WriteOrderMode::Primary);
        assert_eq!(config.retry_deadline(), None);
        assert_eq!(config.backoff_max_ms, 200);
    }

    #[test]
    fn test_durability_json() {
        let config =
            CacheConfig::from_json_str(r#"{ "backups": 2, "durability": { "at_least": 1 } }"#)
                .unwrap();
        assert_eq!(config.durability, DurabilityThreshold::AtLeast(1));
        assert_eq!(config.durability.required(2), 1);
        assert_eq!(DurabilityThreshold::AllReachable.required(2), 0);
    }

    #[test]
    fn test_invalid_configs() {
        let err = CacheConfig::from_json_str(r#"{ "backups": 1, "durability": { "at_least": 2 } }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err =
            CacheConfig::from_json_str(r#"{ "backoff_initial_ms": 500, "backoff_max_ms": 100 }"#)
                .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = CacheConfig::from_json_str("not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_huge_deadline_saturates() {
        let config = CacheConfig::default().with_retry_deadline(Some(Duration::MAX));
        assert_eq!(config.retry_deadline_ms, Some(u64::MAX));

        let config = CacheConfig::default().with_retry_deadline(Some(Duration::from_secs(2)));
        assert_eq!(config.retry_deadline(), Some(Duration::from_secs(2)));
    }
}
