use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    sync::Arc,
    time::Instant,
};

use chrono::{DateTime, Utc};
use coffer_storage::{
    BackupManifest, OwnerId, OwnerSnapshot, StorageBackend, StorageError, TimeoutBackend,
};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{Semaphore, SemaphorePermit, watch};
use tracing::{debug, error, info, warn};

use super::{
    Backup, RestoreReport,
    naming::BackupNamer,
    task::{BackupTask, RemovalOutcome, RemovalState, RemovalTask, ResultCallback, TaskState},
};
use crate::{clock::Clock, error::BackupError, manager::ContextManager};

/// Creates, lists, restores and removes archives.
///
/// Operations that touch storage hold one of `worker_limit` permits, so at
/// most that many run at once. The registry is the source of truth for
/// [`list_backups`](Self::list_backups) after [`open`](Self::open).
pub struct BackupEngine {
    backend: Arc<dyn StorageBackend>,
    unbounded: Arc<dyn StorageBackend>,
    contexts: Arc<ContextManager>,
    clock: Arc<dyn Clock>,
    registry: RwLock<BTreeMap<String, Backup>>,
    namer: Mutex<BackupNamer>,
    workers: Arc<Semaphore>,
}

impl BackupEngine {
    /// Opens the engine, scanning storage once for existing archives.
    ///
    /// Backend calls are bounded by the manager's operation timeout.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::Storage`] if the archives cannot be listed.
    #[tracing::instrument(skip_all)]
    pub async fn open(
        backend: Arc<dyn StorageBackend>,
        contexts: Arc<ContextManager>,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>, BackupError> {
        let unbounded = Arc::clone(&backend);
        let backend: Arc<dyn StorageBackend> = Arc::new(TimeoutBackend::new(
            backend,
            contexts.storage_config().operation_timeout(),
        ));

        let manifests = backend.list_backups().await?;
        let max_sequence = manifests.iter().map(|m| m.sequence).max();
        let registry: BTreeMap<String, Backup> =
            manifests.into_iter().map(|m| (m.name.clone(), Backup::from(m))).collect();
        info!(backups = registry.len(), "backup registry loaded");

        let workers = Arc::new(Semaphore::new(contexts.config().worker_limit()));
        Ok(Arc::new(Self {
            backend,
            unbounded,
            contexts,
            clock,
            registry: RwLock::new(registry),
            namer: Mutex::new(BackupNamer::starting_after(max_sequence)),
            workers,
        }))
    }

    /// Known archives, oldest first.
    #[must_use]
    pub fn list_backups(&self) -> Vec<Backup> {
        let mut backups: Vec<Backup> = self.registry.read().values().cloned().collect();
        backups.sort();
        backups
    }

    /// Looks up a known archive by name.
    #[must_use]
    pub fn find_backup(&self, name: &str) -> Option<Backup> {
        self.registry.read().get(name).cloned()
    }

    async fn permit(&self) -> Result<SemaphorePermit<'_>, BackupError> {
        self.workers.acquire().await.map_err(|e| BackupError::Task(e.to_string()))
    }

    /// Archives every persisted owner.
    ///
    /// Each owner is exported under its gate, so the archive never holds a
    /// half-applied save. The archive is registered only after it was written
    /// completely.
    ///
    /// # Errors
    ///
    /// - [`BackupError::ExportFailed`] if an owner cannot be read
    /// - [`BackupError::Storage`] if listing owners or writing the archive fails
    pub async fn create_backup(&self) -> Result<Backup, BackupError> {
        let _permit = self.permit().await?;
        self.create_with_permit().await
    }

    /// Runs [`create_backup`](Self::create_backup) in the background.
    pub fn spawn_create_backup(self: &Arc<Self>) -> BackupTask {
        let (state, rx) = watch::channel(TaskState::Pending);
        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let result = match engine.permit().await {
                Ok(_permit) => {
                    state.send_replace(TaskState::Running);
                    engine.create_with_permit().await
                },
                Err(e) => Err(e),
            };
            let done = if result.is_ok() { TaskState::Succeeded } else { TaskState::Failed };
            state.send_replace(done);
            result
        });
        BackupTask::new(rx, handle)
    }

    #[tracing::instrument(skip(self), fields(backup))]
    async fn create_with_permit(&self) -> Result<Backup, BackupError> {
        let created_at = self.clock.now();
        let (name, sequence) = {
            let registry = self.registry.read();
            self.namer.lock().next(created_at, |n| registry.contains_key(n))
        };
        tracing::Span::current().record("backup", name.as_str());

        let result = self.write_archive(&name, sequence, created_at).await;
        self.namer.lock().release(&name);
        result
    }

    async fn write_archive(
        &self,
        name: &str,
        sequence: u64,
        created_at: DateTime<Utc>,
    ) -> Result<Backup, BackupError> {
        let start = Instant::now();
        let owners = self.backend.list_owners().await?;
        let exported = self.export_owners(owners).await;
        self.contexts.prune_gates();
        let snapshots = exported?;

        let containers: usize = snapshots.iter().map(|s| s.containers.len()).sum();
        let manifest = BackupManifest {
            name: name.to_owned(),
            created_at,
            sequence,
            owners: u32::try_from(snapshots.len()).unwrap_or(u32::MAX),
            containers: u32::try_from(containers).unwrap_or(u32::MAX),
        };

        if let Err(e) = self.backend.write_backup(&manifest, &snapshots).await {
            error!(error = %e, "archive write failed");
            if e.is_timeout() {
                self.discard_partial(name).await;
            }
            return Err(e.into());
        }

        let backup = Backup::from(manifest);
        self.registry.write().insert(name.to_owned(), backup.clone());
        info!(
            owners = backup.owners(),
            containers = backup.containers(),
            duration_ms = start.elapsed().as_millis() as u64,
            "backup created"
        );
        Ok(backup)
    }

    async fn export_owners(
        &self,
        owners: Vec<OwnerId>,
    ) -> Result<Vec<OwnerSnapshot>, BackupError> {
        let mut snapshots = Vec::with_capacity(owners.len());
        for owner in owners {
            let _guard = self.contexts.lock_owner(owner).await;
            let snapshot = self.backend.export_owner(owner).await.map_err(|source| {
                error!(owner = %owner, error = %source, "owner export failed");
                BackupError::ExportFailed { owner, source }
            })?;
            snapshots.push(snapshot);
        }
        Ok(snapshots)
    }

    /// Best-effort removal of an archive whose write timed out.
    ///
    /// The write may still be running in the backend. Removal is serialized
    /// behind it there, so this call is not bounded by the operation timeout.
    async fn discard_partial(&self, name: &str) {
        match self.unbounded.remove_backup(name).await {
            Ok(true) => warn!(backup = name, "partial archive discarded"),
            Ok(false) => {},
            Err(e) => warn!(backup = name, error = %e, "partial archive cleanup failed"),
        }
    }

    /// Replaces the live dataset with an archive.
    ///
    /// Targets every owner in the archive and every owner currently
    /// persisted. Refuses with [`BackupError::OwnersBusy`] before writing
    /// anything if any target has a loaded context that is dirty or in use.
    /// Clean loaded contexts of targets are evicted. Live owners absent from
    /// the archive are deleted. A failing owner does not stop the others.
    ///
    /// # Errors
    ///
    /// - [`BackupError::NotFound`] if the archive is not registered or gone
    /// - [`BackupError::OwnersBusy`] under the refusal above
    /// - [`BackupError::Storage`] if the archive or owner list cannot be read
    #[tracing::instrument(skip(self, backup), fields(backup = %backup.name()))]
    pub async fn restore_backup(&self, backup: &Backup) -> Result<RestoreReport, BackupError> {
        let name = backup.name();
        if !self.registry.read().contains_key(name) {
            return Err(BackupError::NotFound { name: name.to_owned() });
        }
        let _permit = self.permit().await?;
        let start = Instant::now();

        let archive = self.backend.read_backup(name).await.map_err(|e| {
            if e.is_not_found() {
                BackupError::NotFound { name: name.to_owned() }
            } else {
                BackupError::Storage(e)
            }
        })?;
        let live = self.backend.list_owners().await?;

        let targets: BTreeSet<OwnerId> =
            archive.owners.iter().map(|s| s.owner).chain(live.iter().copied()).collect();
        let mut guards = Vec::with_capacity(targets.len());
        for owner in &targets {
            guards.push(self.contexts.lock_owner(*owner).await);
        }
        let targets: Vec<OwnerId> = targets.into_iter().collect();

        let evicted = match self.contexts.evict_for_restore(&targets) {
            Ok(evicted) => evicted,
            Err(owners) => {
                drop(guards);
                self.contexts.prune_gates();
                warn!(busy = owners.len(), "restore refused, owners have unsaved or open work");
                return Err(BackupError::OwnersBusy { owners });
            },
        };
        debug!(evicted, "clean contexts evicted");

        let mut report = RestoreReport::default();
        for snapshot in &archive.owners {
            match self.backend.import_owner(snapshot).await {
                Ok(()) => report.restored.push(snapshot.owner),
                Err(e) => {
                    error!(owner = %snapshot.owner, error = %e, "owner restore failed");
                    report.failed.push((snapshot.owner, e));
                },
            }
        }

        let archived: HashSet<OwnerId> = archive.owners.iter().map(|s| s.owner).collect();
        for owner in live.into_iter().filter(|o| !archived.contains(o)) {
            match self.backend.delete_owner(owner).await {
                Ok(()) => report.removed.push(owner),
                Err(e) => {
                    error!(owner = %owner, error = %e, "owner removal failed");
                    report.failed.push((owner, e));
                },
            }
        }
        drop(guards);
        self.contexts.prune_gates();

        info!(
            restored = report.restored.len(),
            removed = report.removed.len(),
            failed = report.failed.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "backup restored"
        );
        Ok(report)
    }

    /// Deletes an archive in the background.
    ///
    /// `on_result` runs exactly once: `true` if the archive was deleted and
    /// unregistered, `false` if it was already absent or the backend failed.
    /// An absent archive is not an error.
    pub fn remove_backup<F>(self: &Arc<Self>, backup: &Backup, on_result: F) -> RemovalTask
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let callback = ResultCallback::new(on_result);
        let (state, rx) = watch::channel(RemovalState::Pending);
        let engine = Arc::clone(self);
        let name = backup.name().to_owned();

        let handle = tokio::spawn(async move {
            let outcome = match engine.permit().await {
                Ok(_permit) => {
                    state.send_replace(RemovalState::Running);
                    engine.remove_with_permit(&name).await
                },
                Err(e) => RemovalOutcome::Failed(StorageError::internal(e.to_string())),
            };
            state.send_replace(outcome.state());
            callback.deliver(outcome.removed());
            outcome
        });
        RemovalTask::new(rx, handle)
    }

    #[tracing::instrument(skip(self))]
    async fn remove_with_permit(&self, name: &str) -> RemovalOutcome {
        match self.backend.remove_backup(name).await {
            Ok(true) => {
                self.registry.write().remove(name);
                info!("backup removed");
                RemovalOutcome::Removed
            },
            Ok(false) => {
                if self.registry.write().remove(name).is_some() {
                    warn!("registered backup was missing from storage");
                }
                debug!("backup already absent");
                RemovalOutcome::NotFound
            },
            Err(e) => {
                error!(error = %e, "backup removal failed");
                RemovalOutcome::Failed(e)
            },
        }
    }
}

impl std::fmt::Debug for BackupEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupEngine")
            .field("backups", &self.registry.read().len())
            .field("available_workers", &self.workers.available_permits())
            .finish_non_exhaustive()
    }
}
