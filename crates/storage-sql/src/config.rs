//! Configuration for the SQLite storage backend.

use std::{path::PathBuf, time::Duration};

use coffer_storage::ContainerLimits;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SqlStorageError};

/// Default time SQLite waits on a locked database (5 seconds).
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for [`SqlBackend`](crate::SqlBackend).
///
/// Without a `path` the database lives in memory and disappears with the
/// backend.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
///
/// use coffer_storage_sql::SqlBackendConfig;
///
/// let config = SqlBackendConfig::builder()
///     .path("data/coffer.db")
///     .busy_timeout(Duration::from_secs(2))
///     .build()?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawSqlBackendConfig")]
pub struct SqlBackendConfig {
    /// Database file; `None` for an in-memory database.
    pub(crate) path: Option<PathBuf>,

    /// How long a statement waits on a locked database.
    #[serde(serialize_with = "humantime_serde::serialize")]
    pub(crate) busy_timeout: Duration,

    /// Capacity limits enforced on every write.
    pub(crate) limits: ContainerLimits,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSqlBackendConfig {
    #[serde(default)]
    path: Option<PathBuf>,

    #[serde(with = "humantime_serde", default = "default_busy_timeout")]
    busy_timeout: Duration,

    #[serde(default)]
    limits: ContainerLimits,
}

fn default_busy_timeout() -> Duration {
    DEFAULT_BUSY_TIMEOUT
}

impl TryFrom<RawSqlBackendConfig> for SqlBackendConfig {
    type Error = SqlStorageError;

    fn try_from(raw: RawSqlBackendConfig) -> Result<Self> {
        Self::builder()
            .maybe_path(raw.path)
            .busy_timeout(raw.busy_timeout)
            .limits(raw.limits)
            .build()
    }
}

#[bon::bon]
impl SqlBackendConfig {
    /// Creates a new configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SqlStorageError::Config`] if `busy_timeout` is zero.
    #[builder]
    pub fn new(
        #[builder(into)] path: Option<PathBuf>,
        #[builder(default = DEFAULT_BUSY_TIMEOUT)] busy_timeout: Duration,
        #[builder(default)] limits: ContainerLimits,
    ) -> Result<Self> {
        if busy_timeout.is_zero() {
            return Err(SqlStorageError::Config("busy_timeout must be non-zero".into()));
        }
        Ok(Self { path, busy_timeout, limits })
    }

    /// An in-memory database with default settings.
    #[must_use]
    pub fn in_memory() -> Self {
        Self { path: None, busy_timeout: DEFAULT_BUSY_TIMEOUT, limits: ContainerLimits::default() }
    }

    /// Returns the database file, if any.
    #[must_use]
    pub fn path(&self) -> Option<&std::path::Path> {
        self.path.as_deref()
    }

    /// Returns the busy timeout.
    #[must_use]
    pub fn busy_timeout(&self) -> Duration {
        self.busy_timeout
    }

    /// Returns the container limits.
    #[must_use]
    pub fn limits(&self) -> &ContainerLimits {
        &self.limits
    }
}
