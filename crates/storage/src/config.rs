//! Storage-layer configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, limits::ContainerLimits};

/// Default row count of a container that was never persisted.
pub const DEFAULT_ROWS: u8 = 3;

/// Default time budget of a single backend call.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration shared by owner handles and backend wrappers.
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use coffer_storage::StorageConfig;
///
/// let config = StorageConfig::builder()
///     .default_rows(3)
///     .operation_timeout(Duration::from_secs(5))
///     .build()
///     .unwrap();
/// assert_eq!(config.default_rows(), 3);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawStorageConfig")]
pub struct StorageConfig {
    pub(crate) default_rows: u8,

    pub(crate) limits: ContainerLimits,

    #[serde(serialize_with = "humantime_serde::serialize")]
    pub(crate) operation_timeout: Duration,
}

/// Unvalidated form read from configuration files.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStorageConfig {
    #[serde(default = "default_rows")]
    default_rows: u8,

    #[serde(default)]
    limits: ContainerLimits,

    #[serde(with = "humantime_serde", default = "default_operation_timeout")]
    operation_timeout: Duration,
}

fn default_rows() -> u8 {
    DEFAULT_ROWS
}

fn default_operation_timeout() -> Duration {
    DEFAULT_OPERATION_TIMEOUT
}

impl TryFrom<RawStorageConfig> for StorageConfig {
    type Error = ConfigError;

    fn try_from(raw: RawStorageConfig) -> Result<Self, Self::Error> {
        Self::builder()
            .default_rows(raw.default_rows)
            .limits(raw.limits)
            .operation_timeout(raw.operation_timeout)
            .build()
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            default_rows: DEFAULT_ROWS,
            limits: ContainerLimits::default(),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }
}

#[bon::bon]
impl StorageConfig {
    /// Creates a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `default_rows` is zero or above the row
    /// limit, or if `operation_timeout` is zero.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_ROWS)] default_rows: u8,
        #[builder(default)] limits: ContainerLimits,
        #[builder(default = DEFAULT_OPERATION_TIMEOUT)] operation_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        if default_rows == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "default_rows",
                min: "1".into(),
                value: "0".into(),
            });
        }
        if default_rows > limits.max_rows() {
            return Err(ConfigError::AboveMaximum {
                field: "default_rows",
                max: limits.max_rows().to_string(),
                value: default_rows.to_string(),
            });
        }
        if operation_timeout.is_zero() {
            return Err(ConfigError::BelowMinimum {
                field: "operation_timeout",
                min: "1ns".into(),
                value: "0s".into(),
            });
        }
        Ok(Self { default_rows, limits, operation_timeout })
    }

    /// Rows assumed for a container that has never been persisted.
    #[must_use]
    pub fn default_rows(&self) -> u8 {
        self.default_rows
    }

    /// Capacity limits enforced on every write.
    #[must_use]
    pub fn limits(&self) -> &ContainerLimits {
        &self.limits
    }

    /// Time budget of a single backend call.
    #[must_use]
    pub fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = StorageConfig::default();
        assert_eq!(config.default_rows(), 3);
        assert_eq!(config.limits().max_rows(), 6);
        assert_eq!(config.operation_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn builder_rejects_rows_above_limit() {
        let err = StorageConfig::builder().default_rows(7).build().unwrap_err();
        assert!(matches!(err, ConfigError::AboveMaximum { field: "default_rows", .. }));
    }

    #[test]
    fn builder_rejects_zero_timeout() {
        let err = StorageConfig::builder().operation_timeout(Duration::ZERO).build().unwrap_err();
        assert!(matches!(err, ConfigError::BelowMinimum { field: "operation_timeout", .. }));
    }

    #[test]
    fn deserializes_humantime_durations() {
        let config: StorageConfig =
            serde_json::from_str(r#"{"default_rows": 2, "operation_timeout": "250ms"}"#).unwrap();
        assert_eq!(config.default_rows(), 2);
        assert_eq!(config.operation_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn deserialize_rejects_zero_timeout() {
        let err = serde_json::from_str::<StorageConfig>(r#"{"operation_timeout": "0s"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("operation_timeout"), "unexpected error: {err}");
    }

    #[test]
    fn deserialize_rejects_zero_rows() {
        let err = serde_json::from_str::<StorageConfig>(r#"{"default_rows": 0}"#).unwrap_err();
        assert!(err.to_string().contains("default_rows"), "unexpected error: {err}");
    }

    #[test]
    fn deserialize_rejects_rows_above_limit() {
        let json = r#"{"default_rows": 5, "limits": {"max_rows": 4}}"#;
        assert!(serde_json::from_str::<StorageConfig>(json).is_err());
    }

    #[test]
    fn serialized_config_reads_back() {
        let config = StorageConfig::builder()
            .operation_timeout(Duration::from_millis(1500))
            .build()
            .unwrap();
        let json = serde_json::to_string(&config).unwrap();
        let back: StorageConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.operation_timeout(), Duration::from_millis(1500));
    }
}
