//! Conformance test suite for [`StorageBackend`] implementations.
//!
//! Every backend (memory, flat-file, relational, or third-party) runs the
//! same functions to prove it is a drop-in substitute for the others.
//!
//! Each function uses freshly generated owners and archive names, so one
//! backend instance can run the whole suite.
//!
//! # Usage
//!
//! Enable the `testutil` feature and call each conformance function with
//! a backend instance:
//!
//! ```no_run
//! use coffer_storage::{MemoryBackend, conformance};
//!
//! #[tokio::test]
//! async fn container_save_then_get_round_trips() {
//!     conformance::container_save_then_get_round_trips(&MemoryBackend::new()).await;
//! }
//! ```
//!
//! # Test Categories
//!
//! | Category | Functions | Contract aspect |
//! |----------|-----------|-----------------|
//! | Container | 9 tests | Per-container get/save semantics and validation |
//! | Owner | 6 tests | Listing, export, import and deletion of whole owners |
//! | Archive | 8 tests | Archive write/read/list/remove and validation |
//! | Concurrent | 2 tests | Thread-safety and atomicity under parallel access |
//! | Health | 1 test | Availability probe |

use std::sync::Arc;

use uuid::Uuid;

use crate::{
    assert_not_found,
    backend::StorageBackend,
    error::StorageError,
    testutil::{make_contents, make_item, make_manifest, make_record},
    types::{ContainerRecord, ItemRecord, OwnerId, OwnerSnapshot, SlotMap},
};

fn archive_name(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

// ============================================================================
// Container (9 tests)
// ============================================================================

/// `load_index` for an unknown owner is empty.
pub async fn container_index_empty_for_unknown_owner<B: StorageBackend>(backend: &B) {
    let index = backend.load_index(OwnerId::new_v4()).await.expect("load_index");
    assert!(index.is_empty(), "unknown owner should have an empty index: {index:?}");
}

/// `get_container` on a never-saved ordinal returns `Ok(None)`.
pub async fn container_get_missing_returns_none<B: StorageBackend>(backend: &B) {
    let result = backend.get_container(OwnerId::new_v4(), 3).await;
    assert!(matches!(result, Ok(None)), "missing container should be None: {result:?}");
}

/// `save_container` then `get_container` returns the same record.
pub async fn container_save_then_get_round_trips<B: StorageBackend>(backend: &B) {
    let owner = OwnerId::new_v4();
    let record = make_record(2, 4, "roundtrip");
    backend.save_container(owner, &record).await.expect("save");
    let loaded = backend.get_container(owner, 2).await.expect("get");
    assert_eq!(loaded, Some(record));
}

/// An empty content mapping round-trips as empty, not as absent.
pub async fn container_empty_contents_round_trip<B: StorageBackend>(backend: &B) {
    let owner = OwnerId::new_v4();
    backend.save_container(owner, &ContainerRecord::empty(0, 2)).await.expect("save");
    let loaded = backend.get_container(owner, 0).await.expect("get").expect("persisted");
    assert!(loaded.contents.is_empty());
    assert_eq!(loaded.rows, 2);
}

/// A second save replaces every slot of the first; nothing is merged.
pub async fn container_save_replaces_previous_contents<B: StorageBackend>(backend: &B) {
    let owner = OwnerId::new_v4();
    backend.save_container(owner, &make_record(0, 3, "old")).await.expect("first save");
    let replacement = ContainerRecord::new(0, 3, SlotMap::from([(5, make_item("new", 5))]));
    backend.save_container(owner, &replacement).await.expect("second save");
    let loaded = backend.get_container(owner, 0).await.expect("get");
    assert_eq!(loaded, Some(replacement), "old slots must not survive an overwrite");
}

/// Saved rows appear in the owner index.
pub async fn container_rows_recorded_in_index<B: StorageBackend>(backend: &B) {
    let owner = OwnerId::new_v4();
    backend.save_container(owner, &ContainerRecord::empty(0, 1)).await.expect("save 0");
    backend.save_container(owner, &ContainerRecord::empty(4, 6)).await.expect("save 4");
    let index = backend.load_index(owner).await.expect("load_index");
    assert_eq!(index.ordinals().collect::<Vec<_>>(), vec![0, 4]);
    assert_eq!(index.rows(0), Some(1));
    assert_eq!(index.rows(4), Some(6));
    assert_eq!(index.rows(1), None);
}

/// A slot beyond `rows * 9` is rejected before anything is written.
pub async fn container_rejects_slot_beyond_rows<B: StorageBackend>(backend: &B) {
    let owner = OwnerId::new_v4();
    let record = ContainerRecord::new(0, 2, SlotMap::from([(18, make_item("x", 18))]));
    let result = backend.save_container(owner, &record).await;
    assert!(matches!(result, Err(StorageError::InvalidRecord { .. })), "{result:?}");
    assert_eq!(backend.get_container(owner, 0).await.expect("get"), None);
}

/// Rows above the configured maximum are rejected.
pub async fn container_rejects_rows_above_limit<B: StorageBackend>(backend: &B) {
    let result = backend.save_container(OwnerId::new_v4(), &ContainerRecord::empty(0, 7)).await;
    assert!(matches!(result, Err(StorageError::InvalidRecord { .. })), "{result:?}");
}

/// Arbitrary item bytes round-trip bit for bit.
pub async fn container_item_bytes_round_trip_exactly<B: StorageBackend>(backend: &B) {
    let owner = OwnerId::new_v4();
    let raw: Vec<u8> = (0..=255).collect();
    let record = ContainerRecord::new(
        1,
        1,
        SlotMap::from([(0, ItemRecord::new(raw.clone())), (8, ItemRecord::new(Vec::new()))]),
    );
    backend.save_container(owner, &record).await.expect("save");
    let loaded = backend.get_container(owner, 1).await.expect("get").expect("persisted");
    assert_eq!(loaded.contents[&0].as_bytes(), raw.as_slice());
    assert!(loaded.contents[&8].as_bytes().is_empty());
}

// ============================================================================
// Owner (6 tests)
// ============================================================================

/// Owners do not see each other's containers.
pub async fn owner_data_is_isolated<B: StorageBackend>(backend: &B) {
    let (a, b) = (OwnerId::new_v4(), OwnerId::new_v4());
    backend.save_container(a, &make_record(0, 3, "a")).await.expect("save a");
    backend.save_container(b, &make_record(0, 3, "b")).await.expect("save b");
    let loaded_a = backend.get_container(a, 0).await.expect("get a").expect("a persisted");
    assert_eq!(loaded_a.contents, make_contents("a", 3, 4));
}

/// `list_owners` is sorted and contains every owner with data.
pub async fn owner_list_sorted_and_complete<B: StorageBackend>(backend: &B) {
    let owners: Vec<OwnerId> = (0..3).map(|_| OwnerId::new_v4()).collect();
    for owner in &owners {
        backend.save_container(*owner, &ContainerRecord::empty(0, 1)).await.expect("save");
    }
    let listed = backend.list_owners().await.expect("list_owners");
    assert!(listed.windows(2).all(|w| w[0] < w[1]), "owners must be sorted and unique");
    for owner in &owners {
        assert!(listed.contains(owner), "{owner} missing from listing");
    }
}

/// Export of an owner without data is an empty snapshot.
pub async fn owner_export_unknown_is_empty<B: StorageBackend>(backend: &B) {
    let owner = OwnerId::new_v4();
    let snapshot = backend.export_owner(owner).await.expect("export");
    assert_eq!(snapshot, OwnerSnapshot::new(owner, Vec::new()));
}

/// Import replaces every container of the owner with the snapshot's.
pub async fn owner_import_replaces_all_containers<B: StorageBackend>(backend: &B) {
    let owner = OwnerId::new_v4();
    backend.save_container(owner, &make_record(0, 3, "live0")).await.expect("save 0");
    backend.save_container(owner, &make_record(1, 3, "live1")).await.expect("save 1");

    let snapshot = OwnerSnapshot::new(owner, vec![make_record(1, 2, "restored")]);
    backend.import_owner(&snapshot).await.expect("import");

    assert_eq!(backend.get_container(owner, 0).await.expect("get 0"), None);
    assert_eq!(backend.export_owner(owner).await.expect("export"), snapshot);
}

/// Importing an empty snapshot leaves the owner without data.
pub async fn owner_import_empty_removes_owner<B: StorageBackend>(backend: &B) {
    let owner = OwnerId::new_v4();
    backend.save_container(owner, &make_record(0, 1, "gone")).await.expect("save");
    backend.import_owner(&OwnerSnapshot::new(owner, Vec::new())).await.expect("import");
    assert!(backend.load_index(owner).await.expect("load_index").is_empty());
    assert!(!backend.list_owners().await.expect("list").contains(&owner));
}

/// `delete_owner` removes data and is a no-op for unknown owners.
pub async fn owner_delete_removes_data<B: StorageBackend>(backend: &B) {
    let owner = OwnerId::new_v4();
    backend.save_container(owner, &make_record(0, 1, "x")).await.expect("save");
    backend.delete_owner(owner).await.expect("delete");
    assert_eq!(backend.get_container(owner, 0).await.expect("get"), None);
    backend.delete_owner(owner).await.expect("second delete is a no-op");
}

// ============================================================================
// Archive (7 tests)
// ============================================================================

/// An archive reads back exactly as written.
pub async fn archive_write_then_read<B: StorageBackend>(backend: &B) {
    let name = archive_name("rw");
    let mut manifest = make_manifest(&name, 0);
    let owners = vec![
        OwnerSnapshot::new(OwnerId::new_v4(), vec![make_record(0, 3, "a"), make_record(2, 6, "b")]),
        OwnerSnapshot::new(OwnerId::new_v4(), vec![ContainerRecord::empty(0, 1)]),
    ];
    manifest.owners = 2;
    manifest.containers = 3;

    backend.write_backup(&manifest, &owners).await.expect("write_backup");
    let archive = backend.read_backup(&name).await.expect("read_backup");

    assert_eq!(archive.manifest, manifest);
    let mut expected = owners;
    expected.sort_by_key(|s| s.owner);
    let mut actual = archive.owners;
    actual.sort_by_key(|s| s.owner);
    assert_eq!(actual, expected);
}

/// Reading a missing archive is `NotFound`.
pub async fn archive_read_missing_is_not_found<B: StorageBackend>(backend: &B) {
    assert_not_found!(backend.read_backup(&archive_name("missing")).await);
}

/// A written archive is listed with its manifest.
pub async fn archive_listed_after_write<B: StorageBackend>(backend: &B) {
    let name = archive_name("listed");
    let manifest = make_manifest(&name, 5);
    backend.write_backup(&manifest, &[]).await.expect("write_backup");
    let listed = backend.list_backups().await.expect("list_backups");
    assert!(listed.contains(&manifest), "{name} missing from {listed:?}");
}

/// Writing a second archive under a taken name fails with a write error.
pub async fn archive_duplicate_name_rejected<B: StorageBackend>(backend: &B) {
    let manifest = make_manifest(&archive_name("dup"), 0);
    backend.write_backup(&manifest, &[]).await.expect("first write");
    let result = backend.write_backup(&manifest, &[]).await;
    assert!(result.as_ref().is_err_and(StorageError::is_write), "{result:?}");
}

/// An archive holding an invalid record is rejected and never listed.
pub async fn archive_rejects_invalid_record<B: StorageBackend>(backend: &B) {
    let name = archive_name("invalid");
    let snapshot = OwnerSnapshot {
        owner: OwnerId::new_v4(),
        containers: vec![ContainerRecord::empty(0, 7)],
    };
    let result = backend.write_backup(&make_manifest(&name, 0), &[snapshot]).await;
    assert!(matches!(result, Err(StorageError::InvalidRecord { .. })), "{result:?}");
    let listed = backend.list_backups().await.expect("list_backups");
    assert!(listed.iter().all(|m| m.name != name));
}

/// `remove_backup` reports `true` once, then `false`.
pub async fn archive_remove_reports_presence<B: StorageBackend>(backend: &B) {
    let name = archive_name("rm");
    backend.write_backup(&make_manifest(&name, 0), &[]).await.expect("write_backup");
    assert!(backend.remove_backup(&name).await.expect("first remove"));
    assert!(!backend.remove_backup(&name).await.expect("second remove"));
}

/// A removed archive is neither listed nor readable.
pub async fn archive_removed_not_listed<B: StorageBackend>(backend: &B) {
    let name = archive_name("gone");
    backend.write_backup(&make_manifest(&name, 0), &[]).await.expect("write_backup");
    backend.remove_backup(&name).await.expect("remove");
    let listed = backend.list_backups().await.expect("list_backups");
    assert!(listed.iter().all(|m| m.name != name));
    assert_not_found!(backend.read_backup(&name).await);
}

/// Later live writes do not alter an archive.
pub async fn archive_independent_of_live_data<B: StorageBackend>(backend: &B) {
    let owner = OwnerId::new_v4();
    backend.save_container(owner, &make_record(0, 3, "before")).await.expect("save");
    let snapshot = backend.export_owner(owner).await.expect("export");
    let name = archive_name("frozen");
    backend.write_backup(&make_manifest(&name, 0), &[snapshot.clone()]).await.expect("write");

    backend.save_container(owner, &make_record(0, 3, "after")).await.expect("overwrite");

    let archive = backend.read_backup(&name).await.expect("read_backup");
    assert_eq!(archive.owners, vec![snapshot]);
}

// ============================================================================
// Concurrent (2 tests)
// ============================================================================

/// Parallel saves to distinct containers of one owner all land.
pub async fn concurrent_saves_to_distinct_containers<B: StorageBackend + 'static>(
    backend: Arc<B>,
) {
    let owner = OwnerId::new_v4();
    let mut handles = Vec::new();
    for ordinal in 0..8u32 {
        let backend = Arc::clone(&backend);
        handles.push(tokio::spawn(async move {
            backend
                .save_container(owner, &make_record(ordinal, 2, &format!("c{ordinal}")))
                .await
                .expect("concurrent save");
        }));
    }
    for handle in handles {
        handle.await.expect("task panicked");
    }

    let snapshot = backend.export_owner(owner).await.expect("export");
    assert_eq!(snapshot.containers.len(), 8);
    for record in &snapshot.containers {
        assert_eq!(record.contents, make_contents(&format!("c{}", record.ordinal), 2, 4));
    }
}

/// Exports racing with overwrites never observe a half-written container.
pub async fn concurrent_export_sees_whole_records<B: StorageBackend + 'static>(backend: Arc<B>) {
    let owner = OwnerId::new_v4();
    let full = |tag: &str| ContainerRecord::new(0, 6, make_contents(tag, 6, 1));
    backend.save_container(owner, &full("a")).await.expect("seed");

    let writer = {
        let backend = Arc::clone(&backend);
        tokio::spawn(async move {
            for round in 0..20 {
                let tag = if round % 2 == 0 { "b" } else { "a" };
                backend.save_container(owner, &full(tag)).await.expect("overwrite");
            }
        })
    };

    for _ in 0..20 {
        let snapshot = backend.export_owner(owner).await.expect("export");
        let record = &snapshot.containers[0];
        let uniform = record == &full("a") || record == &full("b");
        assert!(uniform, "export observed a mix of two writes");
    }
    writer.await.expect("writer panicked");
}

// ============================================================================
// Health (1 test)
// ============================================================================

/// A freshly constructed backend reports healthy.
pub async fn health_check_returns_healthy<B: StorageBackend>(backend: &B) {
    let result = backend.health_check().await;
    assert!(result.is_ok(), "health check should pass: {result:?}");
}

/// Runs every conformance function against one backend.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
///
/// use coffer_storage::{MemoryBackend, conformance};
///
/// #[tokio::test]
/// async fn memory_backend_conformance() {
///     conformance::run_all(Arc::new(MemoryBackend::new())).await;
/// }
/// ```
pub async fn run_all<B: StorageBackend + 'static>(backend: Arc<B>) {
    // Container
    container_index_empty_for_unknown_owner(backend.as_ref()).await;
    container_get_missing_returns_none(backend.as_ref()).await;
    container_save_then_get_round_trips(backend.as_ref()).await;
    container_empty_contents_round_trip(backend.as_ref()).await;
    container_save_replaces_previous_contents(backend.as_ref()).await;
    container_rows_recorded_in_index(backend.as_ref()).await;
    container_rejects_slot_beyond_rows(backend.as_ref()).await;
    container_rejects_rows_above_limit(backend.as_ref()).await;
    container_item_bytes_round_trip_exactly(backend.as_ref()).await;

    // Owner
    owner_data_is_isolated(backend.as_ref()).await;
    owner_list_sorted_and_complete(backend.as_ref()).await;
    owner_export_unknown_is_empty(backend.as_ref()).await;
    owner_import_replaces_all_containers(backend.as_ref()).await;
    owner_import_empty_removes_owner(backend.as_ref()).await;
    owner_delete_removes_data(backend.as_ref()).await;

    // Archive
    archive_write_then_read(backend.as_ref()).await;
    archive_read_missing_is_not_found(backend.as_ref()).await;
    archive_listed_after_write(backend.as_ref()).await;
    archive_duplicate_name_rejected(backend.as_ref()).await;
    archive_rejects_invalid_record(backend.as_ref()).await;
    archive_remove_reports_presence(backend.as_ref()).await;
    archive_removed_not_listed(backend.as_ref()).await;
    archive_independent_of_live_data(backend.as_ref()).await;

    // Concurrent
    concurrent_saves_to_distinct_containers(Arc::clone(&backend)).await;
    concurrent_export_sees_whole_records(Arc::clone(&backend)).await;

    // Health
    health_check_returns_healthy(backend.as_ref()).await;
}
