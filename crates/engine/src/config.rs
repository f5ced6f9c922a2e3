//! Engine configuration.
//!
//! # Defaults
//!
//! | Setting | Default |
//! |---------|---------|
//! | `max_containers` | 27 |
//! | `use_vanilla_container` | `false` |
//! | `only_show_accessible` | `true` |
//! | `worker_limit` | 4 |

use coffer_storage::ConfigError;
use serde::{Deserialize, Serialize};

/// Default number of containers per owner.
pub const DEFAULT_MAX_CONTAINERS: u32 = 27;

/// Default number of concurrent background backup workers.
pub const DEFAULT_WORKER_LIMIT: usize = 4;

/// Behavior of contexts and the backup engine.
///
/// # Example
///
/// ```
/// use coffer_engine::EngineConfig;
///
/// let config = EngineConfig::builder()
///     .max_containers(9)
///     .use_vanilla_container(true)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_containers(), 9);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawEngineConfig")]
pub struct EngineConfig {
    max_containers: u32,
    use_vanilla_container: bool,
    only_show_accessible: bool,
    worker_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_containers: DEFAULT_MAX_CONTAINERS,
            use_vanilla_container: false,
            only_show_accessible: true,
            worker_limit: DEFAULT_WORKER_LIMIT,
        }
    }
}

/// Unvalidated form read from configuration files.
#[derive(Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawEngineConfig {
    max_containers: u32,
    use_vanilla_container: bool,
    only_show_accessible: bool,
    worker_limit: usize,
}

impl Default for RawEngineConfig {
    fn default() -> Self {
        let EngineConfig {
            max_containers,
            use_vanilla_container,
            only_show_accessible,
            worker_limit,
        } = EngineConfig::default();
        Self { max_containers, use_vanilla_container, only_show_accessible, worker_limit }
    }
}

impl TryFrom<RawEngineConfig> for EngineConfig {
    type Error = ConfigError;

    fn try_from(raw: RawEngineConfig) -> Result<Self, Self::Error> {
        Self::builder()
            .max_containers(raw.max_containers)
            .use_vanilla_container(raw.use_vanilla_container)
            .only_show_accessible(raw.only_show_accessible)
            .worker_limit(raw.worker_limit)
            .build()
    }
}

#[bon::bon]
impl EngineConfig {
    /// Creates a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BelowMinimum`] if `max_containers` or
    /// `worker_limit` is zero.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_MAX_CONTAINERS)] max_containers: u32,
        #[builder(default)] use_vanilla_container: bool,
        #[builder(default = true)] only_show_accessible: bool,
        #[builder(default = DEFAULT_WORKER_LIMIT)] worker_limit: usize,
    ) -> Result<Self, ConfigError> {
        if max_containers == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "max_containers",
                min: "1".into(),
                value: "0".into(),
            });
        }
        if worker_limit == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "worker_limit",
                min: "1".into(),
                value: "0".into(),
            });
        }
        Ok(Self { max_containers, use_vanilla_container, only_show_accessible, worker_limit })
    }

    /// Number of containers loaded per owner; ordinals run `0..max_containers`.
    #[must_use]
    pub fn max_containers(&self) -> u32 {
        self.max_containers
    }

    /// Whether ordinal 0 mirrors the external vanilla inventory.
    #[must_use]
    pub fn use_vanilla_container(&self) -> bool {
        self.use_vanilla_container
    }

    /// Whether a list with exactly one accessible container opens it directly.
    #[must_use]
    pub fn only_show_accessible(&self) -> bool {
        self.only_show_accessible
    }

    /// Concurrent background backup operations.
    #[must_use]
    pub fn worker_limit(&self) -> usize {
        self.worker_limit
    }
}
