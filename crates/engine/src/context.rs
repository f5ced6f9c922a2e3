//! The per-owner context.
//!
//! A [`PlayerContext`] holds every container materialized for one owner,
//! keyed by ordinal, together with the owner's [`PlayerData`] handle.
//! Lookups and accessibility queries are synchronous; loading and saving go
//! through the storage layer.
//!
//! Saves and loads of one owner are serialized through the owner's gate, the
//! same lock the backup engine takes while it exports or restores that owner.

use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use coffer_storage::{OwnerId, PlayerData, SaveStats};
use parking_lot::RwLock;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::{
    collab::{Collaborators, ContainerListing, ListingEntry, ViewerId},
    config::EngineConfig,
    container::Container,
    error::ContextError,
};

/// All loaded containers of one owner.
pub struct PlayerContext {
    owner: OwnerId,
    data: PlayerData,
    config: Arc<EngineConfig>,
    collab: Collaborators,
    containers: RwLock<BTreeMap<u32, Arc<Container>>>,
    gate: Arc<AsyncMutex<()>>,
    evicted: AtomicBool,
}

impl PlayerContext {
    /// Creates an empty context around an owner's storage handle.
    #[must_use]
    pub fn new(data: PlayerData, config: EngineConfig, collab: Collaborators) -> Self {
        Self::with_gate(data, Arc::new(config), collab, Arc::default())
    }

    pub(crate) fn with_gate(
        data: PlayerData,
        config: Arc<EngineConfig>,
        collab: Collaborators,
        gate: Arc<AsyncMutex<()>>,
    ) -> Self {
        Self {
            owner: data.owner(),
            data,
            config,
            collab,
            containers: RwLock::new(BTreeMap::new()),
            gate,
            evicted: AtomicBool::new(false),
        }
    }

    /// The owner.
    #[must_use]
    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    /// The owner's storage handle.
    #[must_use]
    pub fn data(&self) -> &PlayerData {
        &self.data
    }

    /// (Re)builds the container set for ordinals `0..count`.
    ///
    /// Persisted contents are read for every ordinal that has them. A
    /// container whose contents cannot be read is exposed as empty and
    /// excluded from later saves. In-memory edits of the previous set are
    /// discarded.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::TooManyContainers`] if `count` exceeds the
    /// configured maximum.
    #[tracing::instrument(skip(self), fields(owner = %self.owner))]
    pub async fn load_containers(&self, count: u32) -> Result<(), ContextError> {
        let max = self.config.max_containers();
        if count > max {
            return Err(ContextError::TooManyContainers { requested: count, max });
        }

        let _gate = self.gate.lock().await;
        self.rebuild(count).await
    }

    /// Loads `count` containers unless a set is already loaded.
    ///
    /// The emptiness check and the load happen under the owner's gate, so
    /// concurrent callers load once and never replace a set in use. Returns
    /// `true` if this call loaded the set.
    ///
    /// # Errors
    ///
    /// Same as [`load_containers`](Self::load_containers).
    #[tracing::instrument(skip(self), fields(owner = %self.owner))]
    pub async fn load_if_empty(&self, count: u32) -> Result<bool, ContextError> {
        let max = self.config.max_containers();
        if count > max {
            return Err(ContextError::TooManyContainers { requested: count, max });
        }

        let _gate = self.gate.lock().await;
        if !self.is_empty() {
            return Ok(false);
        }
        self.rebuild(count).await?;
        Ok(true)
    }

    async fn rebuild(&self, count: u32) -> Result<(), ContextError> {
        let mut loaded = BTreeMap::new();
        for ordinal in 0..count {
            let container = Arc::new(self.create_container(ordinal).await?);
            if loaded.insert(ordinal, container).is_some() {
                return Err(ContextError::InvariantViolation(format!(
                    "duplicate container ordinal {ordinal}"
                )));
            }
        }
        *self.containers.write() = loaded;
        debug!(count, "containers loaded");
        Ok(())
    }

    /// Returns the container, creating it from storage on first access.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::InvalidOrdinal`] if `ordinal` is at or above the
    /// configured maximum.
    pub async fn ensure_container(&self, ordinal: u32) -> Result<Arc<Container>, ContextError> {
        if let Some(container) = self.get_container(ordinal) {
            return Ok(container);
        }
        let created = Arc::new(self.create_container(ordinal).await?);
        let mut containers = self.containers.write();
        Ok(Arc::clone(containers.entry(ordinal).or_insert(created)))
    }

    async fn create_container(&self, ordinal: u32) -> Result<Container, ContextError> {
        let max = self.config.max_containers();
        if ordinal >= max {
            return Err(ContextError::InvalidOrdinal { ordinal, max });
        }

        let rows = self.data.get_rows(ordinal);
        if ordinal == 0 && self.config.use_vanilla_container() {
            return Ok(Container::vanilla(self.owner, rows, self.collab.clone()));
        }
        if !self.data.is_persisted(ordinal) {
            return Ok(Container::standard(
                self.owner,
                ordinal,
                rows,
                Default::default(),
                self.collab.clone(),
            ));
        }
        match self.data.get_contents(ordinal).await {
            Ok(contents) => {
                Ok(Container::standard(self.owner, ordinal, rows, contents, self.collab.clone()))
            },
            Err(error) => {
                warn!(
                    owner = %self.owner,
                    ordinal,
                    error = %error,
                    "container unreadable, exposing it as empty"
                );
                Ok(Container::unreadable(self.owner, ordinal, rows, self.collab.clone()))
            },
        }
    }

    /// Looks up a loaded container.
    #[must_use]
    pub fn get_container(&self, ordinal: u32) -> Option<Arc<Container>> {
        self.containers.read().get(&ordinal).cloned()
    }

    /// Loaded containers in ordinal order.
    #[must_use]
    pub fn containers(&self) -> Vec<Arc<Container>> {
        self.containers.read().values().cloned().collect()
    }

    /// Number of loaded containers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.containers.read().len()
    }

    /// Returns `true` if no container is loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.containers.read().is_empty()
    }

    /// Number of containers the owner may use right now.
    #[must_use]
    pub fn accessible_count(&self) -> usize {
        self.containers.read().values().filter(|c| c.is_accessible()).count()
    }

    /// Returns `true` if no container has a viewer.
    #[must_use]
    pub fn is_unused(&self) -> bool {
        self.containers.read().values().all(|c| !c.is_container_used())
    }

    /// Returns `true` if any container has unsaved edits.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.containers.read().values().any(|c| c.is_dirty())
    }

    /// Pulls live edits into every container, then reports whether any has
    /// unsaved changes.
    ///
    /// Unlike [`is_dirty`](Self::is_dirty) this sees edits still held by the
    /// presentation layer after their viewer closed.
    pub fn has_pending_edits(&self) -> bool {
        let containers = self.containers();
        for container in &containers {
            container.update_container();
        }
        containers.iter().any(|c| c.is_dirty())
    }

    /// Returns `true` once a restore has replaced this context's data.
    #[must_use]
    pub fn is_evicted(&self) -> bool {
        self.evicted.load(Ordering::Acquire)
    }

    pub(crate) fn mark_evicted(&self) {
        self.evicted.store(true, Ordering::Release);
    }

    /// Pulls live edits into every container, then persists them all.
    ///
    /// Every container is attempted even if some fail. Containers are marked
    /// clean only if their save succeeded and they were not edited meanwhile.
    ///
    /// # Errors
    ///
    /// - [`ContextError::ContainerWrite`] naming the first failed container
    /// - [`ContextError::Evicted`] if a restore replaced this owner's data
    #[tracing::instrument(skip(self), fields(owner = %self.owner))]
    pub async fn save(&self) -> Result<SaveStats, ContextError> {
        let _gate = self.gate.lock().await;
        if self.is_evicted() {
            return Err(ContextError::Evicted { owner: self.owner });
        }

        let containers = self.containers();
        for container in &containers {
            container.update_container();
        }
        let captured: Vec<_> = containers
            .iter()
            .filter_map(|c| {
                c.capture().map(|(record, generation)| (Arc::clone(c), record, generation))
            })
            .collect();
        let records: Vec<_> = captured.iter().map(|(_, record, _)| record.clone()).collect();

        let report = self.data.save_context(&records).await;
        for ((container, _, generation), (_, result)) in captured.iter().zip(report.results()) {
            if result.is_ok() {
                container.mark_saved(*generation);
            }
        }

        report.into_result().map_err(|failure| ContextError::ContainerWrite {
            owner: self.owner,
            ordinal: failure.ordinal,
            source: failure.source,
        })
    }

    /// Loads the offline profile behind the vanilla container if the owner is
    /// not connected.
    ///
    /// A failed load only makes the vanilla container inaccessible.
    #[tracing::instrument(skip(self), fields(owner = %self.owner))]
    pub async fn load_offline_profile_if_needed(&self) {
        if !self.config.use_vanilla_container() || self.collab.presence().is_online(self.owner) {
            return;
        }
        let Some(container) = self.get_container(0).filter(|c| c.is_vanilla()) else {
            return;
        };
        match self.collab.vanilla().load_offline_profile(self.owner).await {
            Ok(()) => container.set_profile_failed(false),
            Err(error) => {
                warn!(error = %error, "offline profile failed, vanilla container unavailable");
                container.set_profile_failed(true);
            },
        }
    }

    /// Shows the container list to a viewer.
    ///
    /// With `only_show_accessible` set and exactly one accessible container,
    /// ordinal 0 opens directly instead.
    pub fn open_list_inventory(&self, viewer: ViewerId) {
        let only_accessible = self.config.only_show_accessible();
        if only_accessible && self.accessible_count() == 1 {
            self.open_container_inventory(viewer, 0);
            return;
        }

        let entries = self
            .containers()
            .iter()
            .map(|c| ListingEntry {
                ordinal: c.ordinal(),
                accessible: c.is_accessible(),
                in_use: c.is_container_used(),
            })
            .filter(|entry| entry.accessible || !only_accessible)
            .collect();
        self.collab
            .presentation()
            .open_list(viewer, ContainerListing { owner: self.owner, entries });
    }

    /// Opens one container for a viewer.
    ///
    /// Returns `true` if the container is loaded, accessible and was opened.
    pub fn open_container_inventory(&self, viewer: ViewerId, ordinal: u32) -> bool {
        self.get_container(ordinal).is_some_and(|c| c.open_container_for(viewer))
    }
}

impl std::fmt::Debug for PlayerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerContext")
            .field("owner", &self.owner)
            .field("containers", &self.len())
            .finish_non_exhaustive()
    }
}
