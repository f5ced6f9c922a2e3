//! Owner to context registry.
//!
//! [`ContextManager`] guarantees at most one [`PlayerContext`] per owner.
//! Creation is double-checked under the owner's gate: concurrent first
//! accesses for the same owner load storage once and all receive the same
//! context.
//!
//! # Owner gates
//!
//! Every owner has a gate (an async mutex). It is held while a context is
//! created, loaded or saved, and by the backup engine while it exports or
//! restores that owner, so those never interleave for one owner.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use coffer_engine::{Collaborators, ContextManager, EngineConfig};
//! use coffer_storage::{MemoryBackend, OwnerId};
//!
//! # async fn example(collaborators: Collaborators) -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ContextManager::builder()
//!     .backend(Arc::new(MemoryBackend::new()))
//!     .collaborators(collaborators)
//!     .config(EngineConfig::default())
//!     .build();
//!
//! let owner = OwnerId::new_v4();
//! let context = manager.load_context(owner).await?;
//! assert_eq!(context.len(), 27);
//! manager.save_context(owner, true).await?;
//! # Ok(())
//! # }
//! ```

use std::{collections::HashMap, sync::Arc, time::Instant};

use coffer_storage::{
    OwnerId, PlayerData, SaveStats, StorageBackend, StorageConfig, TimeoutBackend,
};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::{
    collab::Collaborators, config::EngineConfig, context::PlayerContext, error::ContextError,
};

/// Exclusive hold on one owner's gate.
///
/// Saves, loads and context creation for the owner wait until it is dropped.
#[derive(Debug)]
pub struct OwnerGuard {
    owner: OwnerId,
    _guard: OwnedMutexGuard<()>,
}

impl OwnerGuard {
    /// The owner this guard holds.
    #[must_use]
    pub fn owner(&self) -> OwnerId {
        self.owner
    }
}

/// Outcome of [`ContextManager::save_all`].
#[derive(Debug, Default)]
pub struct SaveAllReport {
    /// Per-owner results, in ascending owner order.
    pub results: Vec<(OwnerId, Result<SaveStats, ContextError>)>,
    /// Owners unloaded because they were saved and unused.
    pub unloaded: Vec<OwnerId>,
}

impl SaveAllReport {
    /// Owners whose save failed.
    #[must_use]
    pub fn failed_owners(&self) -> Vec<OwnerId> {
        self.results.iter().filter(|(_, r)| r.is_err()).map(|(owner, _)| *owner).collect()
    }
}

/// Registry of loaded contexts.
pub struct ContextManager {
    backend: Arc<dyn StorageBackend>,
    storage: StorageConfig,
    config: Arc<EngineConfig>,
    collab: Collaborators,
    contexts: RwLock<HashMap<OwnerId, Arc<PlayerContext>>>,
    gates: Mutex<HashMap<OwnerId, Arc<AsyncMutex<()>>>>,
}

#[bon::bon]
impl ContextManager {
    /// Creates a manager.
    ///
    /// Every backend call is bounded by `storage.operation_timeout`.
    #[builder]
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        collaborators: Collaborators,
        #[builder(default)] config: EngineConfig,
        #[builder(default)] storage: StorageConfig,
    ) -> Self {
        let backend: Arc<dyn StorageBackend> =
            Arc::new(TimeoutBackend::new(backend, storage.operation_timeout()));
        Self {
            backend,
            storage,
            config: Arc::new(config),
            collab: collaborators,
            contexts: RwLock::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
        }
    }
}

impl ContextManager {
    /// The backend contexts persist through.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The storage configuration handed to every owner handle.
    #[must_use]
    pub fn storage_config(&self) -> &StorageConfig {
        &self.storage
    }

    fn gate(&self, owner: OwnerId) -> Arc<AsyncMutex<()>> {
        Arc::clone(self.gates.lock().entry(owner).or_default())
    }

    /// Drops the gates that no context, guard or waiter holds.
    pub(crate) fn prune_gates(&self) {
        self.gates.lock().retain(|_, gate| Arc::strong_count(gate) > 1);
    }

    /// Takes the owner's gate, waiting for any save or load in progress.
    pub async fn lock_owner(&self, owner: OwnerId) -> OwnerGuard {
        OwnerGuard { owner, _guard: self.gate(owner).lock_owned().await }
    }

    /// Returns the loaded context of an owner without creating one.
    #[must_use]
    pub fn get_context(&self, owner: OwnerId) -> Option<Arc<PlayerContext>> {
        self.contexts.read().get(&owner).cloned()
    }

    /// Returns the owner's context, creating it if absent.
    ///
    /// A new context has no containers; see
    /// [`load_context`](Self::load_context) to populate it.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::Storage`] if the owner's index cannot be read.
    #[tracing::instrument(skip(self), fields(owner = %owner))]
    pub async fn get_or_create_context(
        &self,
        owner: OwnerId,
    ) -> Result<Arc<PlayerContext>, ContextError> {
        if let Some(context) = self.get_context(owner) {
            return Ok(context);
        }

        let gate = self.gate(owner);
        let _guard = gate.lock().await;
        if let Some(context) = self.get_context(owner) {
            return Ok(context);
        }

        let data = PlayerData::load(Arc::clone(&self.backend), owner, self.storage.clone()).await?;
        let created = Arc::new(PlayerContext::with_gate(
            data,
            Arc::clone(&self.config),
            self.collab.clone(),
            Arc::clone(&gate),
        ));
        let context = Arc::clone(self.contexts.write().entry(owner).or_insert(created));
        debug!("context created");
        Ok(context)
    }

    /// Returns the owner's context with all containers loaded.
    ///
    /// Loads `max_containers` containers on first use and the offline
    /// profile behind the vanilla container when needed.
    ///
    /// # Errors
    ///
    /// Returns the storage or configuration error from loading.
    pub async fn load_context(&self, owner: OwnerId) -> Result<Arc<PlayerContext>, ContextError> {
        let context = self.get_or_create_context(owner).await?;
        if context.load_if_empty(self.config.max_containers()).await? {
            context.load_offline_profile_if_needed().await;
        }
        Ok(context)
    }

    /// Saves a loaded context, optionally unloading it when nobody uses it.
    ///
    /// Returns `Ok(None)` if the owner has no loaded context. A context whose
    /// save failed is never unloaded, so its in-memory state is kept.
    ///
    /// # Errors
    ///
    /// Returns the [`ContextError`] from [`PlayerContext::save`].
    #[tracing::instrument(skip(self), fields(owner = %owner))]
    pub async fn save_context(
        &self,
        owner: OwnerId,
        unload_if_unused: bool,
    ) -> Result<Option<SaveStats>, ContextError> {
        let Some(context) = self.get_context(owner) else {
            return Ok(None);
        };
        let stats = context.save().await?;
        if unload_if_unused && context.is_unused() && self.remove_if_current(owner, &context) {
            drop(context);
            self.prune_gates();
            debug!("context unloaded after save");
        }
        Ok(Some(stats))
    }

    /// Removes an owner's context without saving it.
    ///
    /// The owner's gate is released by the next save or backup once the
    /// returned context is dropped.
    pub fn unload_context(&self, owner: OwnerId) -> Option<Arc<PlayerContext>> {
        self.contexts.write().remove(&owner)
    }

    fn remove_if_current(&self, owner: OwnerId, context: &Arc<PlayerContext>) -> bool {
        let mut contexts = self.contexts.write();
        if contexts.get(&owner).is_some_and(|current| Arc::ptr_eq(current, context)) {
            contexts.remove(&owner);
            return true;
        }
        false
    }

    /// Saves every loaded context.
    ///
    /// A failing owner does not stop the others. With `unload_unused`, saved
    /// contexts without viewers are unloaded.
    #[tracing::instrument(skip(self))]
    pub async fn save_all(&self, unload_unused: bool) -> SaveAllReport {
        let start = Instant::now();
        let mut contexts: Vec<_> = self.contexts.read().values().cloned().collect();
        contexts.sort_by_key(|c| c.owner());

        let mut report = SaveAllReport::default();
        for context in contexts {
            let owner = context.owner();
            let result = context.save().await;
            match &result {
                Ok(_) if unload_unused && context.is_unused() => {
                    if self.remove_if_current(owner, &context) {
                        report.unloaded.push(owner);
                    }
                },
                Ok(_) => {},
                Err(error) => warn!(owner = %owner, error = %error, "context save failed"),
            }
            report.results.push((owner, result));
        }
        self.prune_gates();

        info!(
            contexts = report.results.len(),
            failed = report.failed_owners().len(),
            unloaded = report.unloaded.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "all contexts saved"
        );
        report
    }

    /// Owners with a loaded context, ascending.
    #[must_use]
    pub fn loaded_owners(&self) -> Vec<OwnerId> {
        let mut owners: Vec<_> = self.contexts.read().keys().copied().collect();
        owners.sort();
        owners
    }

    /// Evicts the clean, unused contexts of `owners` ahead of a restore.
    ///
    /// The caller holds the gates of all `owners`. Live edits are pulled
    /// first, as a save would. Nothing is evicted if any of them is dirty or
    /// in use; those owners are returned instead.
    pub(crate) fn evict_for_restore(&self, owners: &[OwnerId]) -> Result<usize, Vec<OwnerId>> {
        let mut contexts = self.contexts.write();
        let busy: Vec<OwnerId> = owners
            .iter()
            .filter(|owner| {
                contexts.get(owner).is_some_and(|c| c.has_pending_edits() || !c.is_unused())
            })
            .copied()
            .collect();
        if !busy.is_empty() {
            return Err(busy);
        }

        let mut evicted = 0;
        for owner in owners {
            if let Some(context) = contexts.remove(owner) {
                context.mark_evicted();
                evicted += 1;
            }
        }
        Ok(evicted)
    }
}

impl std::fmt::Debug for ContextManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextManager")
            .field("loaded", &self.contexts.read().len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use coffer_storage::MemoryBackend;

    use super::*;
    use crate::testutil::{FakeWorld, item, make_owner};

    fn manager(backend: &MemoryBackend, world: &FakeWorld) -> ContextManager {
        ContextManager::builder()
            .backend(Arc::new(backend.clone()))
            .collaborators(world.collaborators())
            .config(EngineConfig::builder().max_containers(4).build().unwrap())
            .build()
    }

    #[tokio::test]
    async fn test_get_context_does_not_create() {
        let world = FakeWorld::new();
        let manager = manager(&MemoryBackend::new(), &world);

        assert!(manager.get_context(make_owner(1)).is_none());
        assert!(manager.loaded_owners().is_empty());
    }

    #[tokio::test]
    async fn test_load_context_populates_configured_count() {
        let world = FakeWorld::new();
        let manager = manager(&MemoryBackend::new(), &world);

        let context = manager.load_context(make_owner(1)).await.unwrap();

        assert_eq!(context.len(), 4);
        assert_eq!(manager.loaded_owners(), vec![make_owner(1)]);
    }

    #[tokio::test]
    async fn test_save_context_unloads_only_when_unused() {
        let world = FakeWorld::new();
        let manager = manager(&MemoryBackend::new(), &world);
        let owner = make_owner(1);
        let context = manager.load_context(owner).await.unwrap();
        context.open_container_inventory(crate::ViewerId::owner(owner), 1);

        manager.save_context(owner, true).await.unwrap();
        assert!(manager.get_context(owner).is_some(), "context in use must stay loaded");

        context.get_container(1).unwrap().close_for(crate::ViewerId::owner(owner));
        manager.save_context(owner, true).await.unwrap();
        assert!(manager.get_context(owner).is_none());
    }

    #[tokio::test]
    async fn test_save_context_without_context_is_none() {
        let world = FakeWorld::new();
        let manager = manager(&MemoryBackend::new(), &world);

        assert!(manager.save_context(make_owner(9), true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_evict_refuses_when_any_owner_dirty() {
        let world = FakeWorld::new();
        let manager = manager(&MemoryBackend::new(), &world);
        let clean = manager.load_context(make_owner(1)).await.unwrap();
        let dirty = manager.load_context(make_owner(2)).await.unwrap();
        dirty.get_container(0).unwrap().set_slot(0, Some(item("wip"))).unwrap();

        let busy = manager.evict_for_restore(&[make_owner(1), make_owner(2)]).unwrap_err();

        assert_eq!(busy, vec![make_owner(2)]);
        assert!(!clean.is_evicted());
        assert_eq!(manager.loaded_owners().len(), 2);
    }

    #[tokio::test]
    async fn test_gates_released_with_their_contexts() {
        let world = FakeWorld::new();
        let manager = manager(&MemoryBackend::new(), &world);
        for idx in 1..=3 {
            manager.load_context(make_owner(idx)).await.unwrap();
        }
        assert_eq!(manager.gates.lock().len(), 3);

        manager.save_context(make_owner(1), true).await.unwrap();
        assert_eq!(manager.gates.lock().len(), 2);

        let guard = manager.lock_owner(make_owner(9)).await;
        manager.save_all(true).await;
        assert_eq!(manager.gates.lock().len(), 1, "a held gate must survive");
        assert_eq!(guard.owner(), make_owner(9));

        drop(guard);
        manager.prune_gates();
        assert!(manager.gates.lock().is_empty());
    }

    #[tokio::test]
    async fn test_evict_pulls_live_edits_before_deciding() {
        let world = FakeWorld::new();
        let owner = make_owner(1);
        let manager = manager(&MemoryBackend::new(), &world);
        let context = manager.load_context(owner).await.unwrap();
        let viewer = crate::ViewerId::owner(owner);
        assert!(context.open_container_inventory(viewer, 1));
        world.presentation.set_live(owner, 1, [(2, item("edited"))].into());
        context.get_container(1).unwrap().close_for(viewer);
        assert!(!context.is_dirty());

        let busy = manager.evict_for_restore(&[owner]).unwrap_err();

        assert_eq!(busy, vec![owner]);
        assert!(!context.is_evicted());
        assert_eq!(context.get_container(1).unwrap().contents().get(&2), Some(&item("edited")));
    }

    #[tokio::test]
    async fn test_evict_marks_contexts() {
        let world = FakeWorld::new();
        let manager = manager(&MemoryBackend::new(), &world);
        let context = manager.load_context(make_owner(1)).await.unwrap();

        assert_eq!(manager.evict_for_restore(&[make_owner(1), make_owner(2)]).unwrap(), 1);

        assert!(context.is_evicted());
        assert!(manager.get_context(make_owner(1)).is_none());
    }
}
