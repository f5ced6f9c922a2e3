//! Interfaces to the collaborators surrounding the engine.
//!
//! Permission policy, presence tracking, rendering and the external vanilla
//! inventory live outside this crate. They are injected through a
//! [`Collaborators`] bundle at construction time.
//!
//! | Trait | Used for |
//! |-------|----------|
//! | [`AccessPolicy`] | Whether an owner may use a container |
//! | [`Presence`] | Whether an owner is connected |
//! | [`Presentation`] | Showing containers and reading back live edits |
//! | [`VanillaInventory`] | The externally owned ordinal-0 inventory |

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use coffer_storage::{OwnerId, SlotMap};
use thiserror::Error;
use uuid::Uuid;

/// Identity of someone looking at a container.
///
/// Usually the owner, sometimes an administrator inspecting another owner.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewerId(Uuid);

impl ViewerId {
    /// Wraps a UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The viewer that is the owner itself.
    #[must_use]
    pub fn owner(owner: OwnerId) -> Self {
        Self(*owner.as_uuid())
    }
}

impl fmt::Display for ViewerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything needed to render one container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerView {
    /// Owner of the container.
    pub owner: OwnerId,
    /// Container ordinal.
    pub ordinal: u32,
    /// Capacity in rows.
    pub rows: u8,
    /// Current contents; empty for the vanilla container.
    pub contents: SlotMap,
    /// Whether the contents come from the external vanilla inventory.
    pub vanilla: bool,
}

/// One line of the container list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListingEntry {
    /// Container ordinal.
    pub ordinal: u32,
    /// Whether the owner may open it.
    pub accessible: bool,
    /// Whether someone has it open.
    pub in_use: bool,
}

/// The list of an owner's containers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerListing {
    /// Owner of the containers.
    pub owner: OwnerId,
    /// Entries in ordinal order.
    pub entries: Vec<ListingEntry>,
}

/// Decides whether an owner may use a container.
///
/// Consulted on every query since policy may change at runtime.
pub trait AccessPolicy: Send + Sync {
    /// Returns `true` if `owner` may use container `ordinal`.
    fn is_accessible(&self, owner: OwnerId, ordinal: u32) -> bool;
}

/// Tracks which owners are connected.
pub trait Presence: Send + Sync {
    /// Returns `true` if `owner` is currently connected.
    fn is_online(&self, owner: OwnerId) -> bool;
}

/// The rendering layer.
pub trait Presentation: Send + Sync {
    /// Shows one container to a viewer.
    fn open_container(&self, viewer: ViewerId, view: ContainerView);

    /// Shows the container list to a viewer.
    fn open_list(&self, viewer: ViewerId, listing: ContainerListing);

    /// Contents currently shown for a container, if a live view exists.
    fn live_contents(&self, owner: OwnerId, ordinal: u32) -> Option<SlotMap>;
}

/// Failure to load an offline owner's profile.
#[derive(Debug, Clone, Error)]
#[error("Failed to load offline profile of {owner}: {message}")]
pub struct ProfileError {
    /// The owner whose profile failed to load.
    pub owner: OwnerId,
    /// What went wrong.
    pub message: String,
}

/// The externally owned inventory backing the vanilla container.
#[async_trait]
pub trait VanillaInventory: Send + Sync {
    /// Returns `true` if the owner's inventory can be read and edited now.
    fn is_available(&self, owner: OwnerId) -> bool;

    /// Loads an offline owner's profile so the inventory becomes available.
    async fn load_offline_profile(&self, owner: OwnerId) -> Result<(), ProfileError>;
}

/// Collaborators injected into contexts and the manager.
#[derive(Clone)]
pub struct Collaborators {
    pub(crate) access: Arc<dyn AccessPolicy>,
    pub(crate) presence: Arc<dyn Presence>,
    pub(crate) presentation: Arc<dyn Presentation>,
    pub(crate) vanilla: Arc<dyn VanillaInventory>,
}

#[bon::bon]
impl Collaborators {
    /// Bundles the collaborators.
    #[builder]
    pub fn new(
        access: Arc<dyn AccessPolicy>,
        presence: Arc<dyn Presence>,
        presentation: Arc<dyn Presentation>,
        vanilla: Arc<dyn VanillaInventory>,
    ) -> Self {
        Self { access, presence, presentation, vanilla }
    }

    /// The access policy.
    #[must_use]
    pub fn access(&self) -> &dyn AccessPolicy {
        self.access.as_ref()
    }

    /// The presence tracker.
    #[must_use]
    pub fn presence(&self) -> &dyn Presence {
        self.presence.as_ref()
    }

    /// The rendering layer.
    #[must_use]
    pub fn presentation(&self) -> &dyn Presentation {
        self.presentation.as_ref()
    }

    /// The vanilla inventory.
    #[must_use]
    pub fn vanilla(&self) -> &dyn VanillaInventory {
        self.vanilla.as_ref()
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
