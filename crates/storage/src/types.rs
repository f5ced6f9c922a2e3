//! Common types used across storage operations.
//!
//! These are the persisted shapes of container data. They carry no runtime
//! state (viewers, accessibility); that lives in the engine crate.

use std::{collections::BTreeMap, fmt};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use uuid::Uuid;

/// Unique identity of a container owner.
///
/// Immutable once assigned and used as the primary key of every persisted
/// and cached structure.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(Uuid);

impl OwnerId {
    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Generates a random identity.
    #[must_use]
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the wrapped UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Returns the identity as 32 lowercase hex digits without separators.
    ///
    /// This is the form used for file names and relational keys.
    #[must_use]
    pub fn simple(&self) -> String {
        self.0.simple().to_string()
    }

    /// Parses either the hyphenated or the simple form.
    ///
    /// # Errors
    ///
    /// Returns the UUID parse error when `s` is neither form.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for OwnerId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An opaque item payload stored in one slot.
///
/// The storage layer never interprets the bytes. On text media they are
/// written as lowercase hex so that round trips are bit-identical.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ItemRecord(Bytes);

impl ItemRecord {
    /// Creates a record from raw bytes.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Returns the raw payload.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the payload as [`Bytes`].
    #[must_use]
    pub fn bytes(&self) -> Bytes {
        self.0.clone()
    }
}

impl Serialize for ItemRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for ItemRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        hex::decode(&encoded).map(|raw| Self(Bytes::from(raw))).map_err(de::Error::custom)
    }
}

/// Sparse slot index to item mapping of one container.
///
/// Empty slots are absent. Ordered so serialized output is deterministic.
pub type SlotMap = BTreeMap<u32, ItemRecord>;

/// Persisted form of one numbered container.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    /// Zero-based ordinal within the owner's set.
    pub ordinal: u32,
    /// Capacity in rows.
    pub rows: u8,
    /// Slot contents.
    #[serde(default)]
    pub contents: SlotMap,
}

impl ContainerRecord {
    /// Creates a record.
    #[must_use]
    pub fn new(ordinal: u32, rows: u8, contents: SlotMap) -> Self {
        Self { ordinal, rows, contents }
    }

    /// Creates a record without contents.
    #[must_use]
    pub fn empty(ordinal: u32, rows: u8) -> Self {
        Self { ordinal, rows, contents: SlotMap::new() }
    }
}

/// Metadata discovered by the first read of an owner: which ordinals are
/// persisted and with how many rows.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OwnerIndex {
    rows: BTreeMap<u32, u8>,
}

impl OwnerIndex {
    /// Builds an index from `(ordinal, rows)` pairs.
    pub fn from_entries(entries: impl IntoIterator<Item = (u32, u8)>) -> Self {
        Self { rows: entries.into_iter().collect() }
    }

    /// Returns `true` if the ordinal has persisted data.
    #[must_use]
    pub fn contains(&self, ordinal: u32) -> bool {
        self.rows.contains_key(&ordinal)
    }

    /// Returns the persisted rows of an ordinal.
    #[must_use]
    pub fn rows(&self, ordinal: u32) -> Option<u8> {
        self.rows.get(&ordinal).copied()
    }

    /// Records that an ordinal is persisted with the given rows.
    pub fn insert(&mut self, ordinal: u32, rows: u8) {
        self.rows.insert(ordinal, rows);
    }

    /// Persisted ordinals in ascending order.
    pub fn ordinals(&self) -> impl Iterator<Item = u32> + '_ {
        self.rows.keys().copied()
    }

    /// Number of persisted ordinals.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` if nothing is persisted for the owner.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Every container of one owner, exported as a unit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerSnapshot {
    /// The owner the containers belong to.
    pub owner: OwnerId,
    /// Containers sorted by ordinal.
    pub containers: Vec<ContainerRecord>,
}

impl OwnerSnapshot {
    /// Creates a snapshot, sorting containers by ordinal.
    #[must_use]
    pub fn new(owner: OwnerId, mut containers: Vec<ContainerRecord>) -> Self {
        containers.sort_by_key(|c| c.ordinal);
        Self { owner, containers }
    }
}

/// Self-describing header of a backup archive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupManifest {
    /// Unique archive name, derived from the creation time.
    pub name: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Tiebreak counter for archives created within the same clock tick.
    #[serde(default)]
    pub sequence: u64,
    /// Number of owners in the archive.
    pub owners: u32,
    /// Number of containers in the archive.
    pub containers: u32,
}

impl BackupManifest {
    /// Sort key: creation time, then tiebreak counter, then name.
    #[must_use]
    pub fn order_key(&self) -> (DateTime<Utc>, u64, &str) {
        (self.created_at, self.sequence, self.name.as_str())
    }
}

/// A full archive as read back from a backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackupArchive {
    /// Archive header.
    pub manifest: BackupManifest,
    /// Every owner captured in the archive.
    pub owners: Vec<OwnerSnapshot>,
}
