//! Storage abstraction for per-owner container data.
//!
//! This crate provides the [`StorageBackend`] trait, the types persisted
//! through it, and two interchangeable backends. The context and backup
//! layers in `coffer-engine` use only this abstraction, so the flat-file and
//! relational media are drop-in substitutes.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      coffer-engine                          │
//! │          ContextManager │ PlayerContext │ BackupEngine      │
//! ├─────────────────────────────────────────────────────────────┤
//! │                PlayerData (owner-scoped)                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │                  StorageBackend trait                       │
//! │   (containers by owner/ordinal, owner export/import,        │
//! │    archive write/read/list/remove)                          │
//! ├──────────────┬──────────────┬───────────────────────────────┤
//! │ MemoryBackend│  FileBackend │ SqlBackend                    │
//! │   (testing)  │ (JSON files) │ (coffer-storage-sql, SQLite)  │
//! └──────────────┴──────────────┴───────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//!
//! use coffer_storage::{
//!     ContainerRecord, ItemRecord, MemoryBackend, OwnerId, PlayerData, SlotMap, StorageConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = Arc::new(MemoryBackend::new());
//!     let owner = OwnerId::new_v4();
//!     let data = PlayerData::load(backend, owner, StorageConfig::default()).await?;
//!
//!     let contents = SlotMap::from([(0, ItemRecord::new(&b"diamond"[..]))]);
//!     data.save_container(&ContainerRecord::new(0, 3, contents.clone())).await?;
//!
//!     assert_eq!(data.get_contents(0).await?, contents);
//!     Ok(())
//! }
//! ```
//!
//! # Available Backends
//!
//! | Backend | Use Case | Persistence |
//! |---------|----------|-------------|
//! | [`MemoryBackend`] | Testing, development | No |
//! | [`FileBackend`] | One JSON file per owner | Yes |
//! | `SqlBackend` (in `coffer-storage-sql`) | SQLite tables | Yes |
//!
//! Wrap any of them in [`TimeoutBackend`] to bound each call.
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module (record generators, a fault-injecting backend
//!   wrapper, assertion macros) and the `conformance` suite. Enable this in `[dev-dependencies]`.
//! - **`failpoints`**: Compiles `fail` fail points into the write paths.

#![deny(unsafe_code)]

pub mod backend;
pub mod config;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod conformance;
pub mod error;
pub mod file;
pub mod limits;
pub mod memory;
pub mod player;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod timeout;
pub mod types;

// Re-export primary types at crate root for convenience
pub use backend::StorageBackend;
pub use config::StorageConfig;
pub use error::{BoxError, ConfigError, StorageError, StorageResult};
pub use file::FileBackend;
pub use limits::{ContainerLimits, ROW_WIDTH, validate_record, validate_rows};
pub use memory::MemoryBackend;
pub use player::{ContainerSaveError, PlayerData, SaveReport, SaveStats};
pub use timeout::TimeoutBackend;
pub use types::{
    BackupArchive, BackupManifest, ContainerRecord, ItemRecord, OwnerId, OwnerIndex,
    OwnerSnapshot, SlotMap,
};
