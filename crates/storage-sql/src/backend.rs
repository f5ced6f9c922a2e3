//! SQLite-backed storage backend implementation.
//!
//! This module provides [`SqlBackend`], which implements the
//! [`StorageBackend`](coffer_storage::StorageBackend) trait on one SQLite
//! connection.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use coffer_storage::{
    BackupArchive, BackupManifest, ContainerLimits, ContainerRecord, OwnerId, OwnerIndex,
    OwnerSnapshot, SlotMap, StorageBackend, StorageError, StorageResult, validate_record,
};
use fail::fail_point;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use tracing::debug;

use crate::{
    config::SqlBackendConfig,
    error::{Result, SqlStorageError},
    schema,
};

fn read_error(err: impl Into<SqlStorageError>) -> StorageError {
    err.into().into_read_error()
}

fn write_error(err: impl Into<SqlStorageError>) -> StorageError {
    err.into().into_write_error()
}

fn parse_owner(raw: &str) -> StorageResult<OwnerId> {
    OwnerId::parse(raw)
        .map_err(|e| read_error(SqlStorageError::Corrupt(format!("owner key {raw:?}: {e}"))))
}

fn encode_contents(contents: &SlotMap) -> StorageResult<String> {
    serde_json::to_string(contents).map_err(write_error)
}

/// Rebuilds a record from one row, rejecting data no valid write produces.
fn decode_record(
    ordinal: u32,
    rows: u8,
    contents: &str,
    limits: &ContainerLimits,
) -> StorageResult<ContainerRecord> {
    let contents: SlotMap = serde_json::from_str(contents).map_err(read_error)?;
    let record = ContainerRecord::new(ordinal, rows, contents);
    validate_record(&record, limits).map_err(|e| {
        read_error(SqlStorageError::Corrupt(format!("stored container {ordinal}: {e}")))
    })?;
    Ok(record)
}

fn encode_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn decode_manifest(
    name: String,
    created_at: &str,
    sequence: i64,
    owners: u32,
    containers: u32,
) -> StorageResult<BackupManifest> {
    let created_at = DateTime::parse_from_rfc3339(created_at)
        .map_err(|e| read_error(SqlStorageError::Corrupt(format!("archive {name}: {e}"))))?
        .with_timezone(&Utc);
    let sequence = u64::try_from(sequence)
        .map_err(|e| read_error(SqlStorageError::Corrupt(format!("archive {name}: {e}"))))?;
    Ok(BackupManifest { name, created_at, sequence, owners, containers })
}

fn insert_containers(tx: &Transaction<'_>, owner: &str, rows: &[(u32, u8, String)]) -> Result<()> {
    let mut stmt = tx.prepare_cached(
        "INSERT INTO containers (owner, ordinal, row_count, contents) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for (ordinal, row_count, contents) in rows {
        stmt.execute(params![owner, ordinal, row_count, contents])?;
    }
    Ok(())
}

struct Inner {
    conn: Mutex<Connection>,
    limits: ContainerLimits,
}

impl Inner {
    fn load_index(&self, owner: OwnerId) -> StorageResult<OwnerIndex> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT ordinal, row_count FROM containers WHERE owner = ?1 ORDER BY ordinal",
            )
            .map_err(read_error)?;
        let entries = stmt
            .query_map([owner.simple()], |row| Ok((row.get::<_, u32>(0)?, row.get::<_, u8>(1)?)))
            .map_err(read_error)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(read_error)?;
        Ok(OwnerIndex::from_entries(entries))
    }

    fn get_container(&self, owner: OwnerId, ordinal: u32) -> StorageResult<Option<ContainerRecord>> {
        let row = {
            let conn = self.conn.lock();
            conn.query_row(
                "SELECT row_count, contents FROM containers WHERE owner = ?1 AND ordinal = ?2",
                params![owner.simple(), ordinal],
                |row| Ok((row.get::<_, u8>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
            .map_err(read_error)?
        };
        row.map(|(rows, contents)| decode_record(ordinal, rows, &contents, &self.limits))
            .transpose()
    }

    fn save_container(&self, owner: OwnerId, record: &ContainerRecord) -> StorageResult<()> {
        let contents = encode_contents(&record.contents)?;
        fail_point!("sql-save-container", |_| {
            Err(StorageError::write("injected failure before container save"))
        });
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO containers (owner, ordinal, row_count, contents)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (owner, ordinal)
             DO UPDATE SET row_count = excluded.row_count, contents = excluded.contents",
            params![owner.simple(), record.ordinal, record.rows, contents],
        )
        .map_err(write_error)?;
        Ok(())
    }

    fn list_owners(&self) -> StorageResult<Vec<OwnerId>> {
        let raw = {
            let conn = self.conn.lock();
            let mut stmt = conn
                .prepare_cached("SELECT DISTINCT owner FROM containers")
                .map_err(read_error)?;
            stmt.query_map([], |row| row.get::<_, String>(0))
                .map_err(read_error)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(read_error)?
        };
        let mut owners = raw.iter().map(|s| parse_owner(s)).collect::<StorageResult<Vec<_>>>()?;
        owners.sort();
        Ok(owners)
    }

    fn export_owner(&self, owner: OwnerId) -> StorageResult<OwnerSnapshot> {
        let rows = {
            let conn = self.conn.lock();
            let mut stmt = conn
                .prepare_cached(
                    "SELECT ordinal, row_count, contents FROM containers WHERE owner = ?1",
                )
                .map_err(read_error)?;
            stmt.query_map([owner.simple()], |row| {
                Ok((row.get::<_, u32>(0)?, row.get::<_, u8>(1)?, row.get::<_, String>(2)?))
            })
            .map_err(read_error)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(read_error)?
        };
        let containers = rows
            .iter()
            .map(|(ordinal, rows, contents)| decode_record(*ordinal, *rows, contents, &self.limits))
            .collect::<StorageResult<Vec<_>>>()?;
        Ok(OwnerSnapshot::new(owner, containers))
    }

    fn import_owner(&self, snapshot: &OwnerSnapshot) -> StorageResult<()> {
        let rows = snapshot
            .containers
            .iter()
            .map(|c| Ok((c.ordinal, c.rows, encode_contents(&c.contents)?)))
            .collect::<StorageResult<Vec<_>>>()?;
        let owner = snapshot.owner.simple();

        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(write_error)?;
        tx.execute("DELETE FROM containers WHERE owner = ?1", [&owner]).map_err(write_error)?;
        insert_containers(&tx, &owner, &rows).map_err(write_error)?;
        tx.commit().map_err(write_error)
    }

    fn delete_owner(&self, owner: OwnerId) -> StorageResult<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM containers WHERE owner = ?1", [owner.simple()])
            .map_err(write_error)?;
        Ok(())
    }

    fn write_backup(&self, manifest: &BackupManifest, owners: &[OwnerSnapshot]) -> StorageResult<()> {
        let sequence = i64::try_from(manifest.sequence)
            .map_err(|e| StorageError::invalid_record(format!("archive sequence: {e}")))?;
        let encoded = owners
            .iter()
            .map(|snapshot| {
                let rows = snapshot
                    .containers
                    .iter()
                    .map(|c| Ok((c.ordinal, c.rows, encode_contents(&c.contents)?)))
                    .collect::<StorageResult<Vec<_>>>()?;
                Ok((snapshot.owner.simple(), rows))
            })
            .collect::<StorageResult<Vec<_>>>()?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(write_error)?;
        let taken = tx
            .query_row("SELECT 1 FROM backups WHERE name = ?1", [&manifest.name], |_| Ok(()))
            .optional()
            .map_err(write_error)?
            .is_some();
        if taken {
            return Err(StorageError::write(format!("archive {} already exists", manifest.name)));
        }

        tx.execute(
            "INSERT INTO backups (name, created_at, sequence, owners, containers)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                manifest.name,
                encode_timestamp(&manifest.created_at),
                sequence,
                manifest.owners,
                manifest.containers
            ],
        )
        .map_err(write_error)?;
        {
            let mut owner_stmt = tx
                .prepare_cached("INSERT INTO backup_owners (backup, owner) VALUES (?1, ?2)")
                .map_err(write_error)?;
            let mut container_stmt = tx
                .prepare_cached(
                    "INSERT INTO backup_containers (backup, owner, ordinal, row_count, contents)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .map_err(write_error)?;
            for (owner, rows) in &encoded {
                owner_stmt.execute(params![manifest.name, owner]).map_err(write_error)?;
                for (ordinal, row_count, contents) in rows {
                    container_stmt
                        .execute(params![manifest.name, owner, ordinal, row_count, contents])
                        .map_err(write_error)?;
                }
            }
        }

        fail_point!("sql-backup-before-commit", |_| {
            Err(StorageError::write("injected failure before archive commit"))
        });
        tx.commit().map_err(write_error)
    }

    fn read_backup(&self, name: &str) -> StorageResult<BackupArchive> {
        let conn = self.conn.lock();
        let header = conn
            .query_row(
                "SELECT created_at, sequence, owners, containers FROM backups WHERE name = ?1",
                [name],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, u32>(2)?,
                        row.get::<_, u32>(3)?,
                    ))
                },
            )
            .optional()
            .map_err(read_error)?
            .ok_or_else(|| StorageError::not_found(name))?;
        let manifest = decode_manifest(name.to_owned(), &header.0, header.1, header.2, header.3)?;

        let mut grouped: BTreeMap<OwnerId, Vec<ContainerRecord>> = BTreeMap::new();
        let mut owner_stmt = conn
            .prepare_cached("SELECT owner FROM backup_owners WHERE backup = ?1")
            .map_err(read_error)?;
        let owner_rows = owner_stmt
            .query_map([name], |row| row.get::<_, String>(0))
            .map_err(read_error)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(read_error)?;
        for raw in &owner_rows {
            grouped.entry(parse_owner(raw)?).or_default();
        }

        let mut container_stmt = conn
            .prepare_cached(
                "SELECT owner, ordinal, row_count, contents FROM backup_containers
                 WHERE backup = ?1",
            )
            .map_err(read_error)?;
        let container_rows = container_stmt
            .query_map([name], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, u8>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(read_error)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(read_error)?;
        for (raw, ordinal, rows, contents) in &container_rows {
            let record = decode_record(*ordinal, *rows, contents, &self.limits)?;
            grouped.entry(parse_owner(raw)?).or_default().push(record);
        }

        let owners = grouped
            .into_iter()
            .map(|(owner, containers)| OwnerSnapshot::new(owner, containers))
            .collect();
        Ok(BackupArchive { manifest, owners })
    }

    fn list_backups(&self) -> StorageResult<Vec<BackupManifest>> {
        let rows = {
            let conn = self.conn.lock();
            let mut stmt = conn
                .prepare_cached("SELECT name, created_at, sequence, owners, containers FROM backups")
                .map_err(read_error)?;
            stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, u32>(3)?,
                    row.get::<_, u32>(4)?,
                ))
            })
            .map_err(read_error)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(read_error)?
        };
        rows.into_iter()
            .map(|(name, created_at, sequence, owners, containers)| {
                decode_manifest(name, &created_at, sequence, owners, containers)
            })
            .collect()
    }

    fn remove_backup(&self, name: &str) -> StorageResult<bool> {
        let conn = self.conn.lock();
        let removed =
            conn.execute("DELETE FROM backups WHERE name = ?1", [name]).map_err(write_error)?;
        Ok(removed > 0)
    }

    fn health_check(&self) -> StorageResult<()> {
        fail_point!("health-check", |_| Err(StorageError::internal("injected health failure")));
        let conn = self.conn.lock();
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(|e| StorageError::internal_with_source("health check query failed", e))?;
        Ok(())
    }
}

/// SQLite-backed implementation of [`StorageBackend`].
///
/// One connection is shared behind a mutex; statements run on the blocking
/// thread pool. Imports and archive writes each run in one transaction, so
/// a failure leaves the previous state intact.
///
/// # Example
///
/// ```no_run
/// use coffer_storage::{ContainerRecord, OwnerId, StorageBackend};
/// use coffer_storage_sql::{SqlBackend, SqlBackendConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = SqlBackendConfig::builder().path("coffer.db").build()?;
/// let backend = SqlBackend::open(config)?;
///
/// let owner = OwnerId::new_v4();
/// backend.save_container(owner, &ContainerRecord::empty(0, 3)).await?;
/// assert!(backend.load_index(owner).await?.contains(0));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SqlBackend {
    inner: Arc<Inner>,
}

impl SqlBackend {
    /// Opens the database described by `config`, applying migrations.
    ///
    /// # Errors
    ///
    /// Returns [`SqlStorageError::Sqlite`] if the database cannot be opened
    /// or migrated.
    pub fn open(config: SqlBackendConfig) -> Result<Self> {
        let conn = match config.path() {
            Some(path) => {
                if let Some(parent) = path.parent()
                    && !parent.as_os_str().is_empty()
                {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        SqlStorageError::Config(format!("cannot create {}: {e}", parent.display()))
                    })?;
                }
                Connection::open(path)?
            },
            None => Connection::open_in_memory()?,
        };
        conn.busy_timeout(config.busy_timeout())?;
        schema::migrate(&conn)?;
        debug!(path = ?config.path(), "sql backend opened");

        Ok(Self { inner: Arc::new(Inner { conn: Mutex::new(conn), limits: *config.limits() }) })
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`SqlStorageError::Sqlite`] if migrations fail.
    pub fn in_memory() -> Result<Self> {
        Self::open(SqlBackendConfig::in_memory())
    }

    /// Runs raw SQL against the connection.
    ///
    /// Intended for tests that need to corrupt or inspect rows directly.
    #[cfg(any(test, feature = "testutil"))]
    pub fn execute_raw(&self, sql: &str) -> Result<usize> {
        Ok(self.inner.conn.lock().execute(sql, [])?)
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

impl std::fmt::Debug for SqlBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlBackend").field("limits", &self.inner.limits).finish_non_exhaustive()
    }
}

#[async_trait]
impl StorageBackend for SqlBackend {
    #[tracing::instrument(skip(self), fields(owner = %owner))]
    async fn load_index(&self, owner: OwnerId) -> StorageResult<OwnerIndex> {
        self.run("load_index", move |inner| inner.load_index(owner)).await
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
        self.run("list_owners", Inner::list_owners).await
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
        for record in owners.iter().flat_map(|s| &s.containers) {
            validate_record(record, &self.inner.limits)?;
        }
        let manifest = manifest.clone();
        let owners = owners.to_vec();
        self.run("write_backup", move |inner| inner.write_backup(&manifest, &owners)).await
    }

    #[tracing::instrument(skip(self))]
    async fn read_backup(&self, name: &str) -> StorageResult<BackupArchive> {
        let name = name.to_owned();
        self.run("read_backup", move |inner| inner.read_backup(&name)).await
    }

    async fn list_backups(&self) -> StorageResult<Vec<BackupManifest>> {
        self.run("list_backups", Inner::list_backups).await
    }

    #[tracing::instrument(skip(self))]
    async fn remove_backup(&self, name: &str) -> StorageResult<bool> {
        let name = name.to_owned();
        self.run("remove_backup", move |inner| inner.remove_backup(&name)).await
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.run("health_check", Inner::health_check).await
    }
}
