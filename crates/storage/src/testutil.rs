//! Shared test utilities for storage backend testing.
//!
//! Deterministic owners, items and records, a pre-populated
//! [`MemoryBackend`], a [`FaultyBackend`] wrapper for partial-failure tests,
//! and assertion macros over [`StorageResult`]. Feature-gated behind
//! `testutil` so none of it leaks into production builds.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! coffer-storage = { path = "../storage", features = ["testutil"] }
//! ```
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use coffer_storage::testutil::{make_owner, make_record};
//! ```

use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::{
    StorageBackend,
    error::{StorageError, StorageResult},
    memory::MemoryBackend,
    types::{
        BackupArchive, BackupManifest, ContainerRecord, ItemRecord, OwnerId, OwnerIndex,
        OwnerSnapshot, SlotMap,
    },
};

/// Deterministic owner identity for index `idx`.
#[must_use]
pub fn make_owner(idx: u128) -> OwnerId {
    OwnerId::from_uuid(Uuid::from_u128(0xc0ff_ee00_0000_0000_0000_0000_0000_0000 | idx))
}

/// Item payload like `"tag:000042"`.
#[must_use]
pub fn make_item(tag: &str, idx: u32) -> ItemRecord {
    ItemRecord::new(format!("{tag}:{idx:06}").into_bytes())
}

/// Contents filling every `stride`-th slot of a `rows`-row container.
#[must_use]
pub fn make_contents(tag: &str, rows: u8, stride: u32) -> SlotMap {
    let capacity = u32::from(rows) * crate::limits::ROW_WIDTH;
    (0..capacity).step_by(stride.max(1) as usize).map(|slot| (slot, make_item(tag, slot))).collect()
}

/// A record with [`make_contents`] filled in.
#[must_use]
pub fn make_record(ordinal: u32, rows: u8, tag: &str) -> ContainerRecord {
    ContainerRecord::new(ordinal, rows, make_contents(tag, rows, 4))
}

/// A manifest with a fixed creation time offset by `seconds`.
#[must_use]
pub fn make_manifest(name: &str, seconds: i64) -> BackupManifest {
    let base: DateTime<Utc> = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap_or_default();
    BackupManifest {
        name: name.to_owned(),
        created_at: base + chrono::Duration::seconds(seconds),
        sequence: 0,
        owners: 0,
        containers: 0,
    }
}

/// Create a [`MemoryBackend`] with `owners` owners holding `containers` each.
///
/// # Panics
///
/// Panics if any save fails (should not happen with `MemoryBackend`).
pub async fn populated_backend(owners: u128, containers: u32) -> (MemoryBackend, Vec<OwnerId>) {
    let backend = MemoryBackend::new();
    let mut ids = Vec::new();
    for idx in 0..owners {
        let owner = make_owner(idx);
        for ordinal in 0..containers {
            let record = make_record(ordinal, 3, &format!("o{idx}c{ordinal}"));
            backend.save_container(owner, &record).await.expect("populate save failed");
        }
        ids.push(owner);
    }
    (backend, ids)
}

/// Backend wrapper that fails selected writes.
///
/// Saves of the configured `(owner, ordinal)` pairs fail with
/// [`StorageError::Write`]; every other call is delegated.
#[derive(Clone)]
pub struct FaultyBackend<B> {
    inner: B,
    failing_saves: Arc<Mutex<HashSet<(OwnerId, u32)>>>,
    failing_exports: Arc<Mutex<HashSet<OwnerId>>>,
    fail_archive_writes: Arc<Mutex<bool>>,
}

impl<B: StorageBackend> FaultyBackend<B> {
    /// Wraps `inner` with no faults configured.
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            failing_saves: Arc::default(),
            failing_exports: Arc::default(),
            fail_archive_writes: Arc::default(),
        }
    }

    /// The wrapped backend.
    pub fn inner(&self) -> &B {
        &self.inner
    }

    /// Makes saves of one container fail.
    pub fn fail_save(&self, owner: OwnerId, ordinal: u32) {
        self.failing_saves.lock().insert((owner, ordinal));
    }

    /// Makes exports of one owner fail.
    pub fn fail_export(&self, owner: OwnerId) {
        self.failing_exports.lock().insert(owner);
    }

    /// Toggles failure of archive writes.
    pub fn fail_archive_writes(&self, fail: bool) {
        *self.fail_archive_writes.lock() = fail;
    }

    /// Clears every configured fault.
    pub fn heal(&self) {
        self.failing_saves.lock().clear();
        self.failing_exports.lock().clear();
        *self.fail_archive_writes.lock() = false;
    }
}

#[async_trait]
impl<B: StorageBackend> StorageBackend for FaultyBackend<B> {
    async fn load_index(&self, owner: OwnerId) -> StorageResult<OwnerIndex> {
        self.inner.load_index(owner).await
    }

    async fn get_container(
        &self,
        owner: OwnerId,
        ordinal: u32,
    ) -> StorageResult<Option<ContainerRecord>> {
        self.inner.get_container(owner, ordinal).await
    }

    async fn save_container(&self, owner: OwnerId, record: &ContainerRecord) -> StorageResult<()> {
        if self.failing_saves.lock().contains(&(owner, record.ordinal)) {
            return Err(StorageError::write(format!(
                "injected fault saving {owner} container {}",
                record.ordinal
            )));
        }
        self.inner.save_container(owner, record).await
    }

    async fn list_owners(&self) -> StorageResult<Vec<OwnerId>> {
        self.inner.list_owners().await
    }

    async fn export_owner(&self, owner: OwnerId) -> StorageResult<OwnerSnapshot> {
        if self.failing_exports.lock().contains(&owner) {
            return Err(StorageError::read(format!("injected fault exporting {owner}")));
        }
        self.inner.export_owner(owner).await
    }

    async fn import_owner(&self, snapshot: &OwnerSnapshot) -> StorageResult<()> {
        self.inner.import_owner(snapshot).await
    }

    async fn delete_owner(&self, owner: OwnerId) -> StorageResult<()> {
        self.inner.delete_owner(owner).await
    }

    async fn write_backup(
        &self,
        manifest: &BackupManifest,
        owners: &[OwnerSnapshot],
    ) -> StorageResult<()> {
        if *self.fail_archive_writes.lock() {
            return Err(StorageError::write("injected fault writing archive"));
        }
        self.inner.write_backup(manifest, owners).await
    }

    async fn read_backup(&self, name: &str) -> StorageResult<BackupArchive> {
        self.inner.read_backup(name).await
    }

    async fn list_backups(&self) -> StorageResult<Vec<BackupManifest>> {
        self.inner.list_backups().await
    }

    async fn remove_backup(&self, name: &str) -> StorageResult<bool> {
        self.inner.remove_backup(name).await
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.inner.health_check().await
    }
}

/// Assert that a [`StorageResult`] is a [`StorageError::NotFound`].
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use coffer_storage::{assert_not_found, error::{StorageError, StorageResult}};
///
/// let result: StorageResult<()> = Err(StorageError::NotFound { key: "missing".into() });
/// assert_not_found!(result);
/// ```
#[macro_export]
macro_rules! assert_not_found {
    ($result:expr) => {
        let result = $result;
        assert!(
            matches!(&result, Err($crate::error::StorageError::NotFound { .. })),
            "expected StorageError::NotFound, got: {:?}",
            result,
        );
    };
    ($result:expr, $msg:expr) => {
        let result = $result;
        assert!(
            matches!(&result, Err($crate::error::StorageError::NotFound { .. })),
            "{}: expected StorageError::NotFound, got: {:?}",
            $msg,
            result,
        );
    };
}

/// Assert that a [`StorageResult`] is a read failure.
#[macro_export]
macro_rules! assert_read_error {
    ($result:expr) => {
        let result = $result;
        assert!(
            matches!(&result, Err(e) if e.is_read()),
            "expected a read error, got: {:?}",
            result,
        );
    };
}

/// Assert that a [`StorageResult`] is a write failure.
#[macro_export]
macro_rules! assert_write_error {
    ($result:expr) => {
        let result = $result;
        assert!(
            matches!(&result, Err(e) if e.is_write()),
            "expected a write error, got: {:?}",
            result,
        );
    };
}

/// Assert that a [`StorageResult`] is `Ok`.
///
/// Returns the inner value on success, panics with a descriptive message
/// on failure.
#[macro_export]
macro_rules! assert_storage_ok {
    ($result:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("expected Ok, got StorageError: {e:?}"),
        }
    };
    ($result:expr, $msg:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("{}: expected Ok, got StorageError: {e:?}", $msg),
        }
    };
}

/// Assert that a [`StorageResult`] contains a [`StorageError::Timeout`].
#[macro_export]
macro_rules! assert_timeout {
    ($result:expr) => {
        let result = $result;
        assert!(
            matches!(&result, Err($crate::error::StorageError::Timeout { .. })),
            "expected StorageError::Timeout, got: {:?}",
            result,
        );
    };
}
