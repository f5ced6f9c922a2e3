//! Flat-file storage backend.
//!
//! One JSON file per owner, named by the owner's simple UUID form, and one
//! directory per archive mirroring the live layout:
//!
//! ```text
//! <root>/
//! ├── players/
//! │   └── 6f1c2d3e4a5b6c7d8e9fa0b1c2d3e4f5.json
//! └── backups/
//!     └── 20240101-120000-000/
//!         ├── manifest.json
//!         └── players/
//!             └── 6f1c2d3e4a5b6c7d8e9fa0b1c2d3e4f5.json
//! ```
//!
//! An owner file holds one section per ordinal with its row count and a list
//! of `{slot, item}` entries, items encoded as hex.
//!
//! # Atomicity
//!
//! Owner files are written to a `.tmp` sibling, synced and renamed over the
//! original, so readers observe either the old or the new file. Archives are
//! assembled in `backups/.<name>.partial/` and renamed into place once every
//! file is written; partial directories are never listed and are removed on
//! failure and on [`FileBackend::open`].
//!
//! All filesystem work runs on [`tokio::task::spawn_blocking`]. Writers are
//! serialized by a per-backend lock so read-modify-write of one owner file
//! never interleaves with another.

use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{self, Write as _},
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use fail::fail_point;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    backend::StorageBackend,
    error::{StorageError, StorageResult},
    limits::{ContainerLimits, validate_record},
    types::{
        BackupArchive, BackupManifest, ContainerRecord, ItemRecord, OwnerId, OwnerIndex,
        OwnerSnapshot, SlotMap,
    },
};

const PLAYERS_DIR: &str = "players";
const BACKUPS_DIR: &str = "backups";
const MANIFEST_FILE: &str = "manifest.json";
const PARTIAL_SUFFIX: &str = ".partial";

#[derive(Debug, Default, Serialize, Deserialize)]
struct OwnerFile {
    #[serde(default)]
    containers: BTreeMap<u32, ContainerSection>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ContainerSection {
    rows: u8,
    #[serde(default)]
    items: Vec<SlotEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SlotEntry {
    slot: u32,
    item: ItemRecord,
}

impl OwnerFile {
    fn from_records<'a>(records: impl IntoIterator<Item = &'a ContainerRecord>) -> Self {
        let containers = records
            .into_iter()
            .map(|record| {
                let items = record
                    .contents
                    .iter()
                    .map(|(&slot, item)| SlotEntry { slot, item: item.clone() })
                    .collect();
                (record.ordinal, ContainerSection { rows: record.rows, items })
            })
            .collect();
        Self { containers }
    }

    fn upsert(&mut self, record: &ContainerRecord) {
        let section = Self::from_records([record]).containers.remove(&record.ordinal);
        if let Some(section) = section {
            self.containers.insert(record.ordinal, section);
        }
    }

    fn index(&self) -> OwnerIndex {
        OwnerIndex::from_entries(self.containers.iter().map(|(&ordinal, s)| (ordinal, s.rows)))
    }
}

fn section_to_record(
    ordinal: u32,
    section: &ContainerSection,
    limits: &ContainerLimits,
) -> StorageResult<ContainerRecord> {
    let mut contents = SlotMap::new();
    for entry in &section.items {
        if contents.insert(entry.slot, entry.item.clone()).is_some() {
            return Err(StorageError::read(format!(
                "container {ordinal}: duplicate slot {}",
                entry.slot
            )));
        }
    }
    let record = ContainerRecord::new(ordinal, section.rows, contents);
    validate_record(&record, limits)
        .map_err(|e| StorageError::read(format!("corrupt container section: {e}")))?;
    Ok(record)
}

fn owner_file_name(owner: OwnerId) -> String {
    format!("{}.json", owner.simple())
}

fn is_valid_backup_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Writes `bytes` to `path` through a synced temporary sibling.
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fail_point!("file-before-rename", |_| {
        Err(io::Error::other("injected failure before rename"))
    });
    fs::rename(&tmp, path)
}

fn read_owner_file(path: &Path) -> StorageResult<Option<OwnerFile>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(StorageError::read_with_source(
                format!("failed to read {}", path.display()),
                e,
            ));
        },
    };
    serde_json::from_slice(&bytes).map(Some).map_err(|e| {
        StorageError::read_with_source(format!("failed to decode {}", path.display()), e)
    })
}

fn list_owner_files(dir: &Path) -> StorageResult<Vec<OwnerId>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StorageError::read_with_source("failed to list owners", e)),
    };

    let mut owners = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StorageError::read_with_source("failed to list owners", e))?;
        let name = entry.file_name();
        let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
            continue;
        };
        match OwnerId::parse(stem) {
            Ok(owner) => owners.push(owner),
            Err(_) => debug!(file = stem, "ignoring unrecognized file"),
        }
    }
    owners.sort();
    Ok(owners)
}

struct Inner {
    root: PathBuf,
    limits: ContainerLimits,
    write_lock: Mutex<()>,
}

impl Inner {
    fn players_dir(&self) -> PathBuf {
        self.root.join(PLAYERS_DIR)
    }

    fn backups_dir(&self) -> PathBuf {
        self.root.join(BACKUPS_DIR)
    }

    fn owner_path(&self, owner: OwnerId) -> PathBuf {
        self.players_dir().join(owner_file_name(owner))
    }

    fn load_owner(&self, owner: OwnerId) -> StorageResult<OwnerFile> {
        Ok(read_owner_file(&self.owner_path(owner))?.unwrap_or_default())
    }

    fn store_owner(&self, owner: OwnerId, file: &OwnerFile) -> StorageResult<()> {
        let path = self.owner_path(owner);
        let bytes = serde_json::to_vec_pretty(file)
            .map_err(|e| StorageError::internal_with_source("failed to encode owner file", e))?;
        write_atomic(&path, &bytes).map_err(|e| {
            StorageError::write_with_source(format!("failed to write {}", path.display()), e)
        })
    }

    fn get_container(&self, owner: OwnerId, ordinal: u32) -> StorageResult<Option<ContainerRecord>> {
        let file = self.load_owner(owner)?;
        file.containers
            .get(&ordinal)
            .map(|section| section_to_record(ordinal, section, &self.limits))
            .transpose()
    }

    fn save_container(&self, owner: OwnerId, record: &ContainerRecord) -> StorageResult<()> {
        let _guard = self.write_lock.lock();
        let mut file = self.load_owner(owner)?;
        file.upsert(record);
        self.store_owner(owner, &file)
    }

    fn export_owner(&self, owner: OwnerId) -> StorageResult<OwnerSnapshot> {
        let file = self.load_owner(owner)?;
        let containers = file
            .containers
            .iter()
            .map(|(&ordinal, section)| section_to_record(ordinal, section, &self.limits))
            .collect::<StorageResult<Vec<_>>>()?;
        Ok(OwnerSnapshot::new(owner, containers))
    }

    fn import_owner(&self, snapshot: &OwnerSnapshot) -> StorageResult<()> {
        let _guard = self.write_lock.lock();
        if snapshot.containers.is_empty() {
            return self.remove_owner_file(snapshot.owner);
        }
        self.store_owner(snapshot.owner, &OwnerFile::from_records(&snapshot.containers))
    }

    fn delete_owner(&self, owner: OwnerId) -> StorageResult<()> {
        let _guard = self.write_lock.lock();
        self.remove_owner_file(owner)
    }

    fn remove_owner_file(&self, owner: OwnerId) -> StorageResult<()> {
        match fs::remove_file(self.owner_path(owner)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::write_with_source("failed to delete owner file", e)),
        }
    }

    fn write_backup(&self, manifest: &BackupManifest, owners: &[OwnerSnapshot]) -> StorageResult<()> {
        let final_dir = self.backups_dir().join(&manifest.name);
        let partial_dir = self.backups_dir().join(format!(".{}{PARTIAL_SUFFIX}", manifest.name));

        let _guard = self.write_lock.lock();
        if final_dir.exists() {
            return Err(StorageError::write(format!("archive {} already exists", manifest.name)));
        }

        let result = assemble_archive(&partial_dir, manifest, owners)
            .and_then(|()| {
                fail_point!("file-backup-before-commit", |_| {
                    Err(io::Error::other("injected failure before archive commit"))
                });
                fs::rename(&partial_dir, &final_dir)
            })
            .map_err(|e| {
                StorageError::write_with_source(format!("failed to write archive {}", manifest.name), e)
            });

        if result.is_err()
            && let Err(cleanup) = fs::remove_dir_all(&partial_dir)
            && cleanup.kind() != io::ErrorKind::NotFound
        {
            warn!(backup = %manifest.name, error = %cleanup, "failed to clean up partial archive");
        }
        result
    }

    fn read_backup(&self, name: &str) -> StorageResult<BackupArchive> {
        let dir = self.backups_dir().join(name);
        let manifest = read_manifest(&dir)?.ok_or_else(|| StorageError::not_found(name))?;

        let players = dir.join(PLAYERS_DIR);
        let mut owners = Vec::new();
        for owner in list_owner_files(&players)? {
            let file = read_owner_file(&players.join(owner_file_name(owner)))?.unwrap_or_default();
            let containers = file
                .containers
                .iter()
                .map(|(&ordinal, section)| section_to_record(ordinal, section, &self.limits))
                .collect::<StorageResult<Vec<_>>>()?;
            owners.push(OwnerSnapshot::new(owner, containers));
        }
        Ok(BackupArchive { manifest, owners })
    }

    fn list_backups(&self) -> StorageResult<Vec<BackupManifest>> {
        let entries = match fs::read_dir(self.backups_dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::read_with_source("failed to list archives", e)),
        };

        let mut manifests = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|e| StorageError::read_with_source("failed to list archives", e))?;
            if entry.file_name().to_str().is_none_or(|n| n.starts_with('.')) {
                continue;
            }
            match read_manifest(&entry.path()) {
                Ok(Some(manifest)) => manifests.push(manifest),
                Ok(None) => {},
                Err(error) => {
                    warn!(path = %entry.path().display(), error = %error, "skipping unreadable archive");
                },
            }
        }
        Ok(manifests)
    }

    fn remove_backup(&self, name: &str) -> StorageResult<bool> {
        let _guard = self.write_lock.lock();
        match fs::remove_dir_all(self.backups_dir().join(name)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => {
                Err(StorageError::write_with_source(format!("failed to remove archive {name}"), e))
            },
        }
    }

    fn remove_stale_partials(&self) -> io::Result<()> {
        for entry in fs::read_dir(self.backups_dir())? {
            let entry = entry?;
            let is_partial = entry
                .file_name()
                .to_str()
                .is_some_and(|n| n.starts_with('.') && n.ends_with(PARTIAL_SUFFIX));
            if is_partial {
                warn!(path = %entry.path().display(), "removing stale partial archive");
                fs::remove_dir_all(entry.path())?;
            }
        }
        Ok(())
    }
}

fn assemble_archive(
    dir: &Path,
    manifest: &BackupManifest,
    owners: &[OwnerSnapshot],
) -> io::Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir)?;
    }
    let players = dir.join(PLAYERS_DIR);
    fs::create_dir_all(&players)?;

    for snapshot in owners {
        let bytes = serde_json::to_vec_pretty(&OwnerFile::from_records(&snapshot.containers))?;
        write_atomic(&players.join(owner_file_name(snapshot.owner)), &bytes)?;
    }
    write_atomic(&dir.join(MANIFEST_FILE), &serde_json::to_vec_pretty(manifest)?)
}

fn read_manifest(dir: &Path) -> StorageResult<Option<BackupManifest>> {
    let path = dir.join(MANIFEST_FILE);
    match fs::read(&path) {
        Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
            StorageError::read_with_source(format!("failed to decode {}", path.display()), e)
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StorageError::read_with_source(format!("failed to read {}", path.display()), e)),
    }
}

/// Flat-file storage backend rooted at a directory.
///
/// Cheaply cloneable; clones share the write lock.
#[derive(Clone)]
pub struct FileBackend {
    inner: Arc<Inner>,
}

impl FileBackend {
    /// Opens (creating if needed) a backend rooted at `root`.
    ///
    /// Leftover partial archives from an interrupted run are removed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the directory layout cannot be created.
    pub fn open(root: impl Into<PathBuf>, limits: ContainerLimits) -> StorageResult<Self> {
        let inner = Inner { root: root.into(), limits, write_lock: Mutex::new(()) };
        for dir in [inner.players_dir(), inner.backups_dir()] {
            fs::create_dir_all(&dir).map_err(|e| {
                StorageError::write_with_source(format!("failed to create {}", dir.display()), e)
            })?;
        }
        inner
            .remove_stale_partials()
            .map_err(|e| StorageError::write_with_source("failed to clean partial archives", e))?;
        debug!(root = %inner.root.display(), "file backend opened");
        Ok(Self { inner: Arc::new(inner) })
    }

    /// The root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Path of an owner's live data file.
    #[must_use]
    pub fn owner_path(&self, owner: OwnerId) -> PathBuf {
        self.inner.owner_path(owner)
    }

    async fn run<T, F>(&self, operation: &'static str, f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Inner) -> StorageResult<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(&inner)).await.map_err(|e| {
            StorageError::internal_with_source(format!("{operation} task failed"), e)
        })?
    }
}

impl std::fmt::Debug for FileBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBackend").field("root", &self.inner.root).finish_non_exhaustive()
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    #[tracing::instrument(skip(self), fields(owner = %owner))]
    async fn load_index(&self, owner: OwnerId) -> StorageResult<OwnerIndex> {
        self.run("load_index", move |inner| Ok(inner.load_owner(owner)?.index())).await
    }

    #[tracing::instrument(skip(self), fields(owner = %owner))]
    async fn get_container(
        &self,
        owner: OwnerId,
        ordinal: u32,
    ) -> StorageResult<Option<ContainerRecord>> {
        self.run("get_container", move |inner| inner.get_container(owner, ordinal)).await
    }

    #[tracing::instrument(skip(self, record), fields(owner = %owner, ordinal = record.ordinal))]
    async fn save_container(&self, owner: OwnerId, record: &ContainerRecord) -> StorageResult<()> {
        validate_record(record, &self.inner.limits)?;
        let record = record.clone();
        self.run("save_container", move |inner| inner.save_container(owner, &record)).await
    }

    async fn list_owners(&self) -> StorageResult<Vec<OwnerId>> {
        self.run("list_owners", |inner| list_owner_files(&inner.players_dir())).await
    }

    #[tracing::instrument(skip(self), fields(owner = %owner))]
    async fn export_owner(&self, owner: OwnerId) -> StorageResult<OwnerSnapshot> {
        self.run("export_owner", move |inner| inner.export_owner(owner)).await
    }

    #[tracing::instrument(skip(self, snapshot), fields(owner = %snapshot.owner))]
    async fn import_owner(&self, snapshot: &OwnerSnapshot) -> StorageResult<()> {
        for record in &snapshot.containers {
            validate_record(record, &self.inner.limits)?;
        }
        let snapshot = snapshot.clone();
        self.run("import_owner", move |inner| inner.import_owner(&snapshot)).await
    }

    #[tracing::instrument(skip(self), fields(owner = %owner))]
    async fn delete_owner(&self, owner: OwnerId) -> StorageResult<()> {
        self.run("delete_owner", move |inner| inner.delete_owner(owner)).await
    }

    #[tracing::instrument(skip(self, manifest, owners), fields(backup = %manifest.name))]
    async fn write_backup(
        &self,
        manifest: &BackupManifest,
        owners: &[OwnerSnapshot],
    ) -> StorageResult<()> {
        if !is_valid_backup_name(&manifest.name) {
            return Err(StorageError::invalid_record(format!(
                "invalid archive name {:?}",
                manifest.name
            )));
        }
        for record in owners.iter().flat_map(|s| &s.containers) {
            validate_record(record, &self.inner.limits)?;
        }
        let manifest = manifest.clone();
        let owners = owners.to_vec();
        self.run("write_backup", move |inner| inner.write_backup(&manifest, &owners)).await
    }

    #[tracing::instrument(skip(self))]
    async fn read_backup(&self, name: &str) -> StorageResult<BackupArchive> {
        if !is_valid_backup_name(name) {
            return Err(StorageError::not_found(name));
        }
        let name = name.to_owned();
        self.run("read_backup", move |inner| inner.read_backup(&name)).await
    }

    async fn list_backups(&self) -> StorageResult<Vec<BackupManifest>> {
        self.run("list_backups", |inner| inner.list_backups()).await
    }

    #[tracing::instrument(skip(self))]
    async fn remove_backup(&self, name: &str) -> StorageResult<bool> {
        if !is_valid_backup_name(name) {
            return Ok(false);
        }
        let name = name.to_owned();
        self.run("remove_backup", move |inner| inner.remove_backup(&name)).await
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.run("health_check", |inner| {
            fs::metadata(inner.players_dir())
                .map(|_| ())
                .map_err(|e| StorageError::read_with_source("players directory unavailable", e))
        })
        .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn backend() -> (tempfile::TempDir, FileBackend) {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(dir.path(), ContainerLimits::default()).unwrap();
        (dir, backend)
    }

    fn record(ordinal: u32, items: &[(u32, &str)]) -> ContainerRecord {
        let contents: SlotMap =
            items.iter().map(|(slot, raw)| (*slot, ItemRecord::new(raw.as_bytes().to_vec()))).collect();
        ContainerRecord::new(ordinal, 3, contents)
    }

    fn manifest(name: &str) -> BackupManifest {
        BackupManifest {
            name: name.to_owned(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
            sequence: 0,
            owners: 1,
            containers: 1,
        }
    }

    #[tokio::test]
    async fn test_owner_file_named_by_simple_uuid() {
        let (dir, backend) = backend();
        let owner = OwnerId::new_v4();

        backend.save_container(owner, &record(0, &[(1, "gem")])).await.unwrap();

        let expected = dir.path().join("players").join(format!("{}.json", owner.simple()));
        assert!(expected.is_file());
        assert_eq!(backend.owner_path(owner), expected);
    }

    #[tokio::test]
    async fn test_upsert_keeps_other_sections() {
        let (_dir, backend) = backend();
        let owner = OwnerId::new_v4();
        backend.save_container(owner, &record(0, &[(0, "a")])).await.unwrap();
        backend.save_container(owner, &record(1, &[(0, "b")])).await.unwrap();
        backend.save_container(owner, &record(0, &[(2, "c")])).await.unwrap();

        let index = backend.load_index(owner).await.unwrap();
        assert_eq!(index.ordinals().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(backend.get_container(owner, 0).await.unwrap(), Some(record(0, &[(2, "c")])));
    }

    #[tokio::test]
    async fn test_corrupt_owner_file_is_read_error() {
        let (_dir, backend) = backend();
        let owner = OwnerId::new_v4();
        fs::write(backend.owner_path(owner), b"{ not json").unwrap();

        let err = backend.get_container(owner, 0).await.unwrap_err();

        assert!(matches!(err, StorageError::Read { .. }));
    }

    #[tokio::test]
    async fn test_out_of_range_slot_on_disk_is_read_error() {
        let (_dir, backend) = backend();
        let owner = OwnerId::new_v4();
        let raw = r#"{"containers":{"0":{"rows":1,"items":[{"slot":30,"item":"00"}]}}}"#;
        fs::write(backend.owner_path(owner), raw).unwrap();

        let err = backend.get_container(owner, 0).await.unwrap_err();

        assert!(err.is_read());
    }

    #[tokio::test]
    async fn test_list_owners_ignores_foreign_files() {
        let (dir, backend) = backend();
        let owner = OwnerId::new_v4();
        backend.save_container(owner, &record(0, &[])).await.unwrap();
        fs::write(dir.path().join("players").join("notes.txt"), b"hi").unwrap();
        fs::write(dir.path().join("players").join("bogus.json"), b"{}").unwrap();

        assert_eq!(backend.list_owners().await.unwrap(), vec![owner]);
    }

    #[tokio::test]
    async fn test_archive_layout_mirrors_live_layout() {
        let (dir, backend) = backend();
        let owner = OwnerId::new_v4();
        let snapshot = OwnerSnapshot::new(owner, vec![record(0, &[(4, "x")])]);

        backend.write_backup(&manifest("20240101-120000-000"), &[snapshot.clone()]).await.unwrap();

        let archive_dir = dir.path().join("backups").join("20240101-120000-000");
        assert!(archive_dir.join("manifest.json").is_file());
        assert!(archive_dir.join("players").join(format!("{}.json", owner.simple())).is_file());
        let archive = backend.read_backup("20240101-120000-000").await.unwrap();
        assert_eq!(archive.owners, vec![snapshot]);
    }

    #[tokio::test]
    async fn test_open_removes_stale_partial_archives() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("backups").join(".20240101-120000-000.partial");
        fs::create_dir_all(&stale).unwrap();

        let backend = FileBackend::open(dir.path(), ContainerLimits::default()).unwrap();

        assert!(!stale.exists());
        assert!(backend.list_backups().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_archive_names_rejected() {
        let (_dir, backend) = backend();

        let result = backend.write_backup(&manifest("../escape"), &[]).await;

        assert!(matches!(result, Err(StorageError::InvalidRecord { .. })));
        assert!(!backend.remove_backup("../escape").await.unwrap());
        assert!(backend.read_backup(".hidden").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_unreadable_manifest_skipped_when_listing() {
        let (dir, backend) = backend();
        backend.write_backup(&manifest("good"), &[]).await.unwrap();
        let broken = dir.path().join("backups").join("broken");
        fs::create_dir_all(&broken).unwrap();
        fs::write(broken.join("manifest.json"), b"garbage").unwrap();

        let names: Vec<String> =
            backend.list_backups().await.unwrap().into_iter().map(|m| m.name).collect();

        assert_eq!(names, vec!["good".to_owned()]);
    }
}
