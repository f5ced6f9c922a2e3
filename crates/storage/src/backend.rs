//! Storage backend trait definition.
//!
//! [`StorageBackend`] is the contract every physical medium implements. The
//! flat-file and relational backends are drop-in substitutes: same
//! operations, same error taxonomy, different layout.
//!
//! # Design
//!
//! - **Owner-keyed**: live data is addressed by `(owner, ordinal)`.
//! - **Atomic per container**: a crash during [`save_container`] never leaves
//!   a container readable as a mix of old and new slots.
//! - **Per-owner consistent exports**: [`export_owner`] observes one owner at a
//!   single point in time, which is what backups rely on.
//! - **Archives are opaque to callers**: how an archive is laid out is up to the
//!   backend; the manifest makes it self-describing.
//!
//! The trait is object safe so components share it as
//! `Arc<dyn StorageBackend>`.
//!
//! # Implementing a Backend
//!
//! 1. Implement the [`StorageBackend`] trait
//! 2. Validate records with [`validate_record`](crate::limits::validate_record)
//! 3. Map medium-specific errors to [`StorageError`](crate::StorageError)
//! 4. Run the [`conformance`](crate::conformance) suite against it
//!
//! [`save_container`]: StorageBackend::save_container
//! [`export_owner`]: StorageBackend::export_owner

use async_trait::async_trait;

use crate::{
    error::StorageResult,
    types::{BackupArchive, BackupManifest, ContainerRecord, OwnerId, OwnerIndex, OwnerSnapshot},
};

/// Abstract persistence medium for container data and backup archives.
///
/// Backends are `Send + Sync` and tolerate concurrent calls: a background
/// save may run while a backup export reads the same owner.
///
/// # Operations
///
/// | Method | Description |
/// |--------|-------------|
/// | [`load_index`](StorageBackend::load_index) | Ordinals and rows persisted for an owner |
/// | [`get_container`](StorageBackend::get_container) | One container's persisted record |
/// | [`save_container`](StorageBackend::save_container) | Atomic upsert of one container |
/// | [`list_owners`](StorageBackend::list_owners) | Every owner with persisted data |
/// | [`export_owner`](StorageBackend::export_owner) | Consistent snapshot of one owner |
/// | [`import_owner`](StorageBackend::import_owner) | Atomic replacement of one owner |
/// | [`delete_owner`](StorageBackend::delete_owner) | Remove one owner's data |
/// | [`write_backup`](StorageBackend::write_backup) | Persist a new archive |
/// | [`read_backup`](StorageBackend::read_backup) | Read an archive back |
/// | [`list_backups`](StorageBackend::list_backups) | Manifests of every archive |
/// | [`remove_backup`](StorageBackend::remove_backup) | Delete an archive |
/// | [`health_check`](StorageBackend::health_check) | Verify availability |
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Reads which ordinals are persisted for `owner` and their row counts.
    ///
    /// Returns an empty index for an owner without data. Contents are not
    /// read.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn load_index(&self, owner: OwnerId) -> StorageResult<OwnerIndex>;

    /// Reads one container.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(record))` if the container was persisted
    /// - `Ok(None)` if it never was
    /// - `Err(StorageError::Read { .. })` if the stored data is corrupt
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get_container(
        &self,
        owner: OwnerId,
        ordinal: u32,
    ) -> StorageResult<Option<ContainerRecord>>;

    /// Upserts rows and contents of one container.
    ///
    /// Either the whole record becomes visible or none of it does.
    ///
    /// # Errors
    ///
    /// - [`StorageError::InvalidRecord`](crate::StorageError::InvalidRecord) if
    ///   the record violates the container limits
    /// - [`StorageError::Write`](crate::StorageError::Write) if the medium fails
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn save_container(&self, owner: OwnerId, record: &ContainerRecord) -> StorageResult<()>;

    /// Lists every owner that has persisted data, in ascending order.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn list_owners(&self) -> StorageResult<Vec<OwnerId>>;

    /// Reads every container of `owner` at a single point in time.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn export_owner(&self, owner: OwnerId) -> StorageResult<OwnerSnapshot>;

    /// Replaces all data of the snapshot's owner with the snapshot.
    ///
    /// Containers persisted for the owner but absent from the snapshot are
    /// removed. The replacement is atomic.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn import_owner(&self, snapshot: &OwnerSnapshot) -> StorageResult<()>;

    /// Removes all data of `owner`. A no-op if nothing is persisted.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn delete_owner(&self, owner: OwnerId) -> StorageResult<()>;

    /// Writes a new archive.
    ///
    /// All-or-nothing: on error no archive named `manifest.name` is listed.
    /// Fails with [`Write`](crate::StorageError::Write) if the name is taken.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn write_backup(
        &self,
        manifest: &BackupManifest,
        owners: &[OwnerSnapshot],
    ) -> StorageResult<()>;

    /// Reads an archive back.
    ///
    /// Fails with [`NotFound`](crate::StorageError::NotFound) if it does not
    /// exist.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn read_backup(&self, name: &str) -> StorageResult<BackupArchive>;

    /// Lists the manifests of every archive, in no particular order.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn list_backups(&self) -> StorageResult<Vec<BackupManifest>>;

    /// Deletes an archive.
    ///
    /// # Returns
    ///
    /// - `Ok(true)` if the archive existed and was removed
    /// - `Ok(false)` if it was already absent
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn remove_backup(&self, name: &str) -> StorageResult<bool>;

    /// Verifies the medium is reachable.
    #[must_use = "health check results indicate backend availability and must be inspected"]
    async fn health_check(&self) -> StorageResult<()>;
}

#[async_trait]
impl<B: StorageBackend + ?Sized> StorageBackend for std::sync::Arc<B> {
    async fn load_index(&self, owner: OwnerId) -> StorageResult<OwnerIndex> {
        (**self).load_index(owner).await
    }

    async fn get_container(
        &self,
        owner: OwnerId,
        ordinal: u32,
    ) -> StorageResult<Option<ContainerRecord>> {
        (**self).get_container(owner, ordinal).await
    }

    async fn save_container(&self, owner: OwnerId, record: &ContainerRecord) -> StorageResult<()> {
        (**self).save_container(owner, record).await
    }

    async fn list_owners(&self) -> StorageResult<Vec<OwnerId>> {
        (**self).list_owners().await
    }

    async fn export_owner(&self, owner: OwnerId) -> StorageResult<OwnerSnapshot> {
        (**self).export_owner(owner).await
    }

    async fn import_owner(&self, snapshot: &OwnerSnapshot) -> StorageResult<()> {
        (**self).import_owner(snapshot).await
    }

    async fn delete_owner(&self, owner: OwnerId) -> StorageResult<()> {
        (**self).delete_owner(owner).await
    }

    async fn write_backup(
        &self,
        manifest: &BackupManifest,
        owners: &[OwnerSnapshot],
    ) -> StorageResult<()> {
        (**self).write_backup(manifest, owners).await
    }

    async fn read_backup(&self, name: &str) -> StorageResult<BackupArchive> {
        (**self).read_backup(name).await
    }

    async fn list_backups(&self) -> StorageResult<Vec<BackupManifest>> {
        (**self).list_backups().await
    }

    async fn remove_backup(&self, name: &str) -> StorageResult<bool> {
        (**self).remove_backup(name).await
    }

    async fn health_check(&self) -> StorageResult<()> {
        (**self).health_check().await
    }
}
