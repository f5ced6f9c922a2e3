//! Per-owner container contexts and the backup engine.
//!
//! Every owner has a set of numbered containers. A [`PlayerContext`] holds the
//! loaded ones in memory, tracks who is viewing them and what changed, and
//! pushes the changes back through [`coffer_storage::PlayerData`]. The
//! [`ContextManager`] keeps one context per owner. The [`BackupEngine`]
//! archives, restores and removes full snapshots of the persisted data.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐   ┌─────────────────────────────┐
//! │        ContextManager        │◄──┤        BackupEngine         │
//! │  owner -> PlayerContext      │   │ registry │ workers │ clock  │
//! │  owner gates                 │   └──────────────┬──────────────┘
//! ├──────────────────────────────┤                  │
//! │ PlayerContext                │                  │
//! │   Container (standard)       │                  │
//! │   Container (vanilla)        │                  │
//! ├──────────────────────────────┤                  │
//! │ PlayerData (owner-scoped)    │                  │
//! └──────────────┬───────────────┘                  │
//!                ▼                                  ▼
//!        ┌─────────────────────────────────────────────────┐
//!        │       StorageBackend (memory, file, SQL)        │
//!        └─────────────────────────────────────────────────┘
//! ```
//!
//! Everything outside storage reaches the engine through the traits in
//! [`Collaborators`]: access rules, presence, the rendering layer and the
//! externally managed inventory.
//!
//! # Concurrency
//!
//! Each owner has a gate. Loading, saving, exporting and restoring an owner
//! take it, so a backup never sees half of a save. Restores lock the gates of
//! all targeted owners in ascending order and refuse to run over unsaved or
//! open containers.
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with fakes for every
//!   collaborator and a manual clock.

#![deny(unsafe_code)]

pub mod backup;
pub mod clock;
pub mod collab;
pub mod config;
pub mod container;
pub mod context;
pub mod error;
pub mod manager;
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use backup::{
    Backup, BackupEngine, BackupTask, RemovalOutcome, RemovalState, RemovalTask, RestoreReport,
    TaskState,
};
pub use clock::{Clock, SystemClock};
pub use collab::{
    AccessPolicy, Collaborators, ContainerListing, ContainerView, ListingEntry, Presence,
    Presentation, ProfileError, VanillaInventory, ViewerId,
};
pub use config::EngineConfig;
pub use container::Container;
pub use context::PlayerContext;
pub use error::{BackupError, ContextError};
pub use manager::{ContextManager, OwnerGuard, SaveAllReport};
