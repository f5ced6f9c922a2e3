//! Shared test utilities for engine tests.
//!
//! Enabled by the `testutil` feature. Provides in-memory fakes for every
//! collaborator, bundled in a [`FakeWorld`], and a [`ManualClock`].

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
pub use coffer_storage::testutil::{make_contents, make_owner, make_record};
use coffer_storage::{ItemRecord, OwnerId, SlotMap};
use parking_lot::Mutex;

use crate::{
    clock::Clock,
    collab::{
        AccessPolicy, Collaborators, ContainerListing, ContainerView, Presence, Presentation,
        ProfileError, VanillaInventory, ViewerId,
    },
};

/// Creates an item whose payload is the tag's bytes.
#[must_use]
pub fn item(tag: &str) -> ItemRecord {
    ItemRecord::new(tag.to_owned())
}

/// Access policy that allows everything unless told otherwise.
#[derive(Debug, Default)]
pub struct FakeAccess {
    denied: Mutex<HashSet<(OwnerId, u32)>>,
    accessible_below: Mutex<Option<u32>>,
}

impl FakeAccess {
    /// Denies one container of one owner.
    pub fn deny(&self, owner: OwnerId, ordinal: u32) {
        self.denied.lock().insert((owner, ordinal));
    }

    /// Lifts a previous [`deny`](Self::deny).
    pub fn allow(&self, owner: OwnerId, ordinal: u32) {
        self.denied.lock().remove(&(owner, ordinal));
    }

    /// Only ordinals below `limit` are accessible, for every owner.
    pub fn set_accessible_below(&self, limit: u32) {
        *self.accessible_below.lock() = Some(limit);
    }
}

impl AccessPolicy for FakeAccess {
    fn is_accessible(&self, owner: OwnerId, ordinal: u32) -> bool {
        let below = self.accessible_below.lock().is_none_or(|limit| ordinal < limit);
        below && !self.denied.lock().contains(&(owner, ordinal))
    }
}

/// Presence tracker where every owner starts offline.
#[derive(Debug, Default)]
pub struct FakePresence {
    online: Mutex<HashSet<OwnerId>>,
}

impl FakePresence {
    /// Marks an owner online or offline.
    pub fn set_online(&self, owner: OwnerId, online: bool) {
        let mut set = self.online.lock();
        if online {
            set.insert(owner);
        } else {
            set.remove(&owner);
        }
    }
}

impl Presence for FakePresence {
    fn is_online(&self, owner: OwnerId) -> bool {
        self.online.lock().contains(&owner)
    }
}

/// Presentation layer that records what it was asked to show.
#[derive(Debug, Default)]
pub struct RecordingPresentation {
    opened: Mutex<Vec<(ViewerId, ContainerView)>>,
    lists: Mutex<Vec<(ViewerId, ContainerListing)>>,
    live: Mutex<HashMap<(OwnerId, u32), SlotMap>>,
}

impl RecordingPresentation {
    /// Every container opened so far.
    #[must_use]
    pub fn opened(&self) -> Vec<(ViewerId, ContainerView)> {
        self.opened.lock().clone()
    }

    /// Every list opened so far.
    #[must_use]
    pub fn lists(&self) -> Vec<(ViewerId, ContainerListing)> {
        self.lists.lock().clone()
    }

    /// Simulates a viewer editing a container on screen.
    pub fn set_live(&self, owner: OwnerId, ordinal: u32, contents: SlotMap) {
        self.live.lock().insert((owner, ordinal), contents);
    }

    /// Removes the live view of a container.
    pub fn clear_live(&self, owner: OwnerId, ordinal: u32) {
        self.live.lock().remove(&(owner, ordinal));
    }
}

impl Presentation for RecordingPresentation {
    fn open_container(&self, viewer: ViewerId, view: ContainerView) {
        self.opened.lock().push((viewer, view));
    }

    fn open_list(&self, viewer: ViewerId, listing: ContainerListing) {
        self.lists.lock().push((viewer, listing));
    }

    fn live_contents(&self, owner: OwnerId, ordinal: u32) -> Option<SlotMap> {
        self.live.lock().get(&(owner, ordinal)).cloned()
    }
}

/// Vanilla inventory whose availability is set by the test.
///
/// A successful offline profile load makes the owner available.
#[derive(Debug, Default)]
pub struct FakeVanilla {
    available: Mutex<HashSet<OwnerId>>,
    fail_profiles: AtomicBool,
    loads: AtomicUsize,
}

impl FakeVanilla {
    /// Sets whether an owner's inventory is available.
    pub fn set_available(&self, owner: OwnerId, available: bool) {
        let mut set = self.available.lock();
        if available {
            set.insert(owner);
        } else {
            set.remove(&owner);
        }
    }

    /// Makes every profile load fail.
    pub fn fail_profiles(&self, fail: bool) {
        self.fail_profiles.store(fail, Ordering::SeqCst);
    }

    /// Number of profile loads attempted.
    #[must_use]
    pub fn profile_loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VanillaInventory for FakeVanilla {
    fn is_available(&self, owner: OwnerId) -> bool {
        self.available.lock().contains(&owner)
    }

    async fn load_offline_profile(&self, owner: OwnerId) -> Result<(), ProfileError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_profiles.load(Ordering::SeqCst) {
            return Err(ProfileError { owner, message: "injected profile failure".into() });
        }
        self.set_available(owner, true);
        Ok(())
    }
}

/// Every collaborator fake, with handles kept for assertions.
#[derive(Debug, Clone, Default)]
pub struct FakeWorld {
    /// The access policy.
    pub access: Arc<FakeAccess>,
    /// The presence tracker.
    pub presence: Arc<FakePresence>,
    /// The rendering layer.
    pub presentation: Arc<RecordingPresentation>,
    /// The vanilla inventory.
    pub vanilla: Arc<FakeVanilla>,
}

impl FakeWorld {
    /// Fresh fakes: everything accessible, every owner offline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bundles the fakes for injection.
    #[must_use]
    pub fn collaborators(&self) -> Collaborators {
        Collaborators::builder()
            .access(self.access.clone())
            .presence(self.presence.clone())
            .presentation(self.presentation.clone())
            .vanilla(self.vanilla.clone())
            .build()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// A clock frozen at `seconds` after the Unix epoch.
    #[must_use]
    pub fn at(seconds: i64) -> Self {
        Self { now: Mutex::new(DateTime::from_timestamp(seconds, 0).unwrap_or_default()) }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: TimeDelta) {
        *self.now.lock() += by;
    }

    /// Jumps to an instant.
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_fake_access_combines_limit_and_denials() {
        let access = FakeAccess::default();
        let owner = make_owner(1);
        access.set_accessible_below(3);
        access.deny(owner, 1);

        assert!(access.is_accessible(owner, 0));
        assert!(!access.is_accessible(owner, 1));
        assert!(!access.is_accessible(owner, 3));
        assert!(access.is_accessible(make_owner(2), 1));
    }

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::at(1_700_000_000);
        clock.advance(TimeDelta::milliseconds(5));
        assert_eq!(clock.now().timestamp_millis(), 1_700_000_000_005);
    }
}
