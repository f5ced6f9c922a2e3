//! Row and slot validation for container records.
//!
//! Backends call [`validate_record`] on every write path so an out-of-range
//! slot or row count is rejected before it reaches the medium.
//!
//! # Defaults
//!
//! | Limit | Default |
//! |-------|---------|
//! | `max_rows` | 6 |
//! | `row_width` | 9 (fixed) |

use serde::{Deserialize, Serialize};

use crate::{ConfigError, StorageError, types::ContainerRecord};

/// Number of slots in one row.
pub const ROW_WIDTH: u32 = 9;

/// Default maximum number of rows per container.
pub const DEFAULT_MAX_ROWS: u8 = 6;

/// Configurable capacity limits for containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawContainerLimits")]
pub struct ContainerLimits {
    max_rows: u8,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawContainerLimits {
    max_rows: u8,
}

impl TryFrom<RawContainerLimits> for ContainerLimits {
    type Error = ConfigError;

    fn try_from(raw: RawContainerLimits) -> Result<Self, Self::Error> {
        Self::new(raw.max_rows)
    }
}

impl ContainerLimits {
    /// Creates limits with the given maximum row count.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BelowMinimum`] if `max_rows` is zero.
    pub fn new(max_rows: u8) -> Result<Self, ConfigError> {
        if max_rows == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "max_rows",
                min: "1".into(),
                value: "0".into(),
            });
        }
        Ok(Self { max_rows })
    }

    /// Returns the maximum number of rows.
    #[must_use]
    pub fn max_rows(&self) -> u8 {
        self.max_rows
    }

    /// Returns the largest slot count any container may have.
    #[must_use]
    pub fn max_slots(&self) -> u32 {
        u32::from(self.max_rows) * ROW_WIDTH
    }
}

impl Default for ContainerLimits {
    fn default() -> Self {
        Self { max_rows: DEFAULT_MAX_ROWS }
    }
}

/// Validates a row count against the limits.
pub fn validate_rows(rows: u8, limits: &ContainerLimits) -> Result<(), StorageError> {
    if rows == 0 || rows > limits.max_rows {
        return Err(StorageError::invalid_record(format!(
            "rows {rows} outside 1..={}",
            limits.max_rows
        )));
    }
    Ok(())
}

/// Validates rows and every slot index of a record.
///
/// Slot indices must be below `rows * 9`.
pub fn validate_record(record: &ContainerRecord, limits: &ContainerLimits) -> Result<(), StorageError> {
    validate_rows(record.rows, limits)?;
    let capacity = u32::from(record.rows) * ROW_WIDTH;
    if let Some((&slot, _)) = record.contents.range(capacity..).next() {
        return Err(StorageError::invalid_record(format!(
            "container {}: slot {slot} exceeds capacity {capacity}",
            record.ordinal
        )));
    }
    Ok(())
}
