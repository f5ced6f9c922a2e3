//! The container entity.
//!
//! A [`Container`] is one numbered inventory of an owner. It is a tagged
//! variant: [`StandardContainer`] holds persisted contents, while
//! [`VanillaContainer`] mirrors the external vanilla inventory and is never
//! written through the storage layer. Both share the same capability methods,
//! dispatched on the tag.
//!
//! Accessibility is never cached; each query consults the injected
//! [`AccessPolicy`](crate::AccessPolicy).

use std::{
    collections::BTreeSet,
    sync::atomic::{AtomicBool, Ordering},
};

use coffer_storage::{ContainerRecord, ItemRecord, OwnerId, ROW_WIDTH, SlotMap};
use parking_lot::Mutex;
use tracing::debug;

use crate::{
    collab::{Collaborators, ContainerView, ViewerId},
    error::ContextError,
};

#[derive(Debug)]
struct ContainerState {
    rows: u8,
    contents: SlotMap,
    dirty: bool,
    /// Bumped on every content change; lets a save tell whether it captured
    /// the latest edit.
    generation: u64,
    viewers: BTreeSet<ViewerId>,
}

impl ContainerState {
    fn capacity(&self) -> u32 {
        u32::from(self.rows) * ROW_WIDTH
    }

    fn touch(&mut self) {
        self.dirty = true;
        self.generation += 1;
    }
}

struct ContainerCore {
    owner: OwnerId,
    ordinal: u32,
    collab: Collaborators,
    state: Mutex<ContainerState>,
}

impl ContainerCore {
    fn new(
        owner: OwnerId,
        ordinal: u32,
        rows: u8,
        contents: SlotMap,
        collab: Collaborators,
    ) -> Self {
        let state = ContainerState {
            rows,
            contents,
            dirty: false,
            generation: 0,
            viewers: BTreeSet::new(),
        };
        Self { owner, ordinal, collab, state: Mutex::new(state) }
    }

    fn policy_allows(&self) -> bool {
        self.collab.access().is_accessible(self.owner, self.ordinal)
    }
}

impl std::fmt::Debug for ContainerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerCore")
            .field("owner", &self.owner)
            .field("ordinal", &self.ordinal)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

/// A container whose contents are persisted.
#[derive(Debug)]
pub struct StandardContainer {
    core: ContainerCore,
    load_failed: bool,
}

/// The ordinal-0 container backed by the external vanilla inventory.
#[derive(Debug)]
pub struct VanillaContainer {
    core: ContainerCore,
    profile_failed: AtomicBool,
}

/// One numbered container of an owner.
#[derive(Debug)]
pub enum Container {
    /// Persisted through the storage layer.
    Standard(StandardContainer),
    /// Mirrors the external vanilla inventory.
    Vanilla(VanillaContainer),
}

impl Container {
    pub(crate) fn standard(
        owner: OwnerId,
        ordinal: u32,
        rows: u8,
        contents: SlotMap,
        collab: Collaborators,
    ) -> Self {
        Self::Standard(StandardContainer {
            core: ContainerCore::new(owner, ordinal, rows, contents, collab),
            load_failed: false,
        })
    }

    /// A standard container whose persisted contents could not be read.
    ///
    /// It is exposed as empty and skipped by saves so the stored data is
    /// left alone.
    pub(crate) fn unreadable(
        owner: OwnerId,
        ordinal: u32,
        rows: u8,
        collab: Collaborators,
    ) -> Self {
        Self::Standard(StandardContainer {
            core: ContainerCore::new(owner, ordinal, rows, SlotMap::new(), collab),
            load_failed: true,
        })
    }

    pub(crate) fn vanilla(owner: OwnerId, rows: u8, collab: Collaborators) -> Self {
        Self::Vanilla(VanillaContainer {
            core: ContainerCore::new(owner, 0, rows, SlotMap::new(), collab),
            profile_failed: AtomicBool::new(false),
        })
    }

    fn core(&self) -> &ContainerCore {
        match self {
            Self::Standard(c) => &c.core,
            Self::Vanilla(c) => &c.core,
        }
    }

    /// Zero-based ordinal.
    #[must_use]
    pub fn ordinal(&self) -> u32 {
        self.core().ordinal
    }

    /// The owner.
    #[must_use]
    pub fn owner(&self) -> OwnerId {
        self.core().owner
    }

    /// Returns `true` for the vanilla container.
    #[must_use]
    pub fn is_vanilla(&self) -> bool {
        matches!(self, Self::Vanilla(_))
    }

    /// Returns `true` if the persisted contents failed to load.
    #[must_use]
    pub fn load_failed(&self) -> bool {
        matches!(self, Self::Standard(c) if c.load_failed)
    }

    /// Capacity in rows.
    #[must_use]
    pub fn rows(&self) -> u8 {
        self.core().state.lock().rows
    }

    /// Whether the owner may use this container right now.
    #[must_use]
    pub fn is_accessible(&self) -> bool {
        match self {
            Self::Standard(c) => c.core.policy_allows(),
            Self::Vanilla(c) => {
                c.core.policy_allows()
                    && !c.profile_failed.load(Ordering::Acquire)
                    && c.core.collab.vanilla().is_available(c.core.owner)
            },
        }
    }

    /// Returns `true` if at least one viewer has this container open.
    #[must_use]
    pub fn is_container_used(&self) -> bool {
        !self.core().state.lock().viewers.is_empty()
    }

    /// Returns `true` if contents changed since the last successful save.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.core().state.lock().dirty
    }

    /// Current contents. Always empty for the vanilla container.
    #[must_use]
    pub fn contents(&self) -> SlotMap {
        self.core().state.lock().contents.clone()
    }

    /// Pulls live contents from the presentation layer.
    ///
    /// Returns `true` if the contents changed. The vanilla container is
    /// edited in place by its owner and never pulls.
    pub fn update_container(&self) -> bool {
        let Self::Standard(c) = self else {
            return false;
        };
        let Some(live) = c.core.collab.presentation().live_contents(c.core.owner, c.core.ordinal)
        else {
            return false;
        };
        let mut state = c.core.state.lock();
        if state.contents == live {
            return false;
        }
        state.contents = live;
        state.touch();
        true
    }

    /// Opens this container for a viewer.
    ///
    /// Returns `false` without opening anything if the container is not
    /// accessible.
    pub fn open_container_for(&self, viewer: ViewerId) -> bool {
        if !self.is_accessible() {
            return false;
        }
        let core = self.core();
        let view = {
            let mut state = core.state.lock();
            state.viewers.insert(viewer);
            ContainerView {
                owner: core.owner,
                ordinal: core.ordinal,
                rows: state.rows,
                contents: state.contents.clone(),
                vanilla: self.is_vanilla(),
            }
        };
        debug!(owner = %core.owner, ordinal = core.ordinal, viewer = %viewer, "container opened");
        core.collab.presentation().open_container(viewer, view);
        true
    }

    /// Records that a viewer closed this container.
    ///
    /// Returns `false` if the viewer did not have it open.
    pub fn close_for(&self, viewer: ViewerId) -> bool {
        self.core().state.lock().viewers.remove(&viewer)
    }

    /// Puts an item into a slot, or clears it with `None`.
    ///
    /// # Errors
    ///
    /// - [`ContextError::ExternallyManaged`] for the vanilla container
    /// - [`ContextError::InvalidSlot`] if `slot` is beyond the capacity
    pub fn set_slot(&self, slot: u32, item: Option<ItemRecord>) -> Result<(), ContextError> {
        let core = self.editable_core()?;
        let mut state = core.state.lock();
        let capacity = state.capacity();
        if slot >= capacity {
            return Err(ContextError::InvalidSlot { ordinal: core.ordinal, slot, capacity });
        }
        let changed = match item {
            Some(item) => state.contents.insert(slot, item.clone()) != Some(item),
            None => state.contents.remove(&slot).is_some(),
        };
        if changed {
            state.touch();
        }
        Ok(())
    }

    /// Replaces all contents.
    ///
    /// # Errors
    ///
    /// Same as [`set_slot`](Self::set_slot); nothing changes on error.
    pub fn replace_contents(&self, contents: SlotMap) -> Result<(), ContextError> {
        let core = self.editable_core()?;
        let mut state = core.state.lock();
        let capacity = state.capacity();
        if let Some((&slot, _)) = contents.range(capacity..).next() {
            return Err(ContextError::InvalidSlot { ordinal: core.ordinal, slot, capacity });
        }
        if state.contents != contents {
            state.contents = contents;
            state.touch();
        }
        Ok(())
    }

    /// The record a save would persist.
    ///
    /// `None` for the vanilla container and for containers whose stored
    /// data could not be read.
    #[must_use]
    pub fn snapshot(&self) -> Option<ContainerRecord> {
        self.capture().map(|(record, _)| record)
    }

    pub(crate) fn capture(&self) -> Option<(ContainerRecord, u64)> {
        match self {
            Self::Standard(c) if !c.load_failed => {
                let state = c.core.state.lock();
                let record =
                    ContainerRecord::new(c.core.ordinal, state.rows, state.contents.clone());
                Some((record, state.generation))
            },
            _ => None,
        }
    }

    /// Clears the dirty flag if no edit happened since `generation` was
    /// captured.
    pub(crate) fn mark_saved(&self, generation: u64) {
        let mut state = self.core().state.lock();
        if state.generation == generation {
            state.dirty = false;
        }
    }

    pub(crate) fn set_profile_failed(&self, failed: bool) {
        if let Self::Vanilla(c) = self {
            c.profile_failed.store(failed, Ordering::Release);
        }
    }

    fn editable_core(&self) -> Result<&ContainerCore, ContextError> {
        match self {
            Self::Standard(c) => Ok(&c.core),
            Self::Vanilla(c) => Err(ContextError::ExternallyManaged { ordinal: c.core.ordinal }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::testutil::{FakeWorld, item, make_owner};

    #[test]
    fn test_accessibility_is_rederived_each_call() {
        let world = FakeWorld::new();
        let owner = make_owner(1);
        let container = Container::standard(owner, 2, 3, SlotMap::new(), world.collaborators());

        assert!(container.is_accessible());
        world.access.deny(owner, 2);
        assert!(!container.is_accessible());
        world.access.allow(owner, 2);
        assert!(container.is_accessible());
    }

    #[test]
    fn test_open_and_close_toggle_usage() {
        let world = FakeWorld::new();
        let owner = make_owner(1);
        let viewer = ViewerId::owner(owner);
        let container = Container::standard(owner, 0, 3, SlotMap::new(), world.collaborators());

        assert!(container.open_container_for(viewer));
        assert!(container.is_container_used());
        assert_eq!(world.presentation.opened().len(), 1);

        assert!(container.close_for(viewer));
        assert!(!container.is_container_used());
        assert!(!container.close_for(viewer));
    }

    #[test]
    fn test_inaccessible_container_does_not_open() {
        let world = FakeWorld::new();
        let owner = make_owner(1);
        world.access.deny(owner, 0);
        let container = Container::standard(owner, 0, 3, SlotMap::new(), world.collaborators());

        assert!(!container.open_container_for(ViewerId::owner(owner)));
        assert!(!container.is_container_used());
        assert!(world.presentation.opened().is_empty());
    }

    #[test]
    fn test_update_pulls_live_contents_and_marks_dirty() {
        let world = FakeWorld::new();
        let owner = make_owner(1);
        let container = Container::standard(owner, 1, 3, SlotMap::new(), world.collaborators());
        assert!(!container.update_container());

        let live: SlotMap = [(4, item("torch"))].into_iter().collect();
        world.presentation.set_live(owner, 1, live.clone());

        assert!(container.update_container());
        assert_eq!(container.contents(), live);
        assert!(container.is_dirty());
        assert!(!container.update_container());
    }

    #[test]
    fn test_set_slot_bounds_checked() {
        let world = FakeWorld::new();
        let container =
            Container::standard(make_owner(1), 0, 2, SlotMap::new(), world.collaborators());

        container.set_slot(17, Some(item("last"))).unwrap();
        let err = container.set_slot(18, Some(item("past"))).unwrap_err();
        assert!(matches!(err, ContextError::InvalidSlot { slot: 18, capacity: 18, .. }));
    }

    #[test]
    fn test_mark_saved_ignores_stale_generation() {
        let world = FakeWorld::new();
        let container =
            Container::standard(make_owner(1), 0, 3, SlotMap::new(), world.collaborators());
        container.set_slot(0, Some(item("a"))).unwrap();
        let (_, generation) = container.capture().unwrap();

        container.set_slot(1, Some(item("b"))).unwrap();
        container.mark_saved(generation);
        assert!(container.is_dirty(), "edit after capture must stay dirty");

        let (_, generation) = container.capture().unwrap();
        container.mark_saved(generation);
        assert!(!container.is_dirty());
    }

    #[test]
    fn test_vanilla_is_never_persisted_or_edited() {
        let world = FakeWorld::new();
        let container = Container::vanilla(make_owner(1), 3, world.collaborators());

        assert!(container.snapshot().is_none());
        assert!(matches!(
            container.set_slot(0, Some(item("x"))),
            Err(ContextError::ExternallyManaged { ordinal: 0 })
        ));
    }

    #[test]
    fn test_vanilla_requires_available_inventory() {
        let world = FakeWorld::new();
        let owner = make_owner(1);
        let container = Container::vanilla(owner, 3, world.collaborators());

        assert!(!container.is_accessible());
        world.vanilla.set_available(owner, true);
        assert!(container.is_accessible());
        container.set_profile_failed(true);
        assert!(!container.is_accessible());
    }

    #[test]
    fn test_unreadable_container_is_empty_and_skipped() {
        let world = FakeWorld::new();
        let container = Container::unreadable(make_owner(1), 5, 3, world.collaborators());

        assert!(container.load_failed());
        assert!(container.contents().is_empty());
        assert!(container.snapshot().is_none());
    }
}
