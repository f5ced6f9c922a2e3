//! Backup engine scenarios across the storage backends.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use chrono::TimeDelta;
use coffer_engine::{
    Backup, BackupEngine, BackupError, ContextError, ContextManager, EngineConfig, RemovalOutcome,
    RemovalState, TaskState, ViewerId,
    testutil::{FakeWorld, ManualClock, item, make_owner, make_record},
};
use coffer_storage::{
    ContainerLimits, FileBackend, MemoryBackend, OwnerId, OwnerSnapshot, StorageBackend,
    testutil::FaultyBackend,
};
use coffer_storage_sql::SqlBackend;
use rstest::rstest;
use tempfile::TempDir;
use tokio::sync::oneshot;

struct Harness {
    backend: Arc<dyn StorageBackend>,
    world: FakeWorld,
    contexts: Arc<ContextManager>,
    clock: Arc<ManualClock>,
    engine: Arc<BackupEngine>,
}

async fn harness(backend: Arc<dyn StorageBackend>) -> Harness {
    let world = FakeWorld::new();
    let contexts = Arc::new(
        ContextManager::builder()
            .backend(Arc::clone(&backend))
            .collaborators(world.collaborators())
            .config(EngineConfig::builder().max_containers(4).build().expect("config"))
            .build(),
    );
    let clock = Arc::new(ManualClock::at(1_700_000_000));
    let engine = BackupEngine::open(Arc::clone(&backend), Arc::clone(&contexts), clock.clone())
        .await
        .expect("open engine");
    Harness { backend, world, contexts, clock, engine }
}

#[derive(Debug, Clone, Copy)]
enum Medium {
    Memory,
    File,
    Sql,
}

fn backend_for(medium: Medium) -> (Arc<dyn StorageBackend>, Option<TempDir>) {
    match medium {
        Medium::Memory => (Arc::new(MemoryBackend::new()), None),
        Medium::File => {
            let dir = tempfile::tempdir().expect("tempdir");
            let backend = FileBackend::open(dir.path(), ContainerLimits::default()).expect("open");
            (Arc::new(backend), Some(dir))
        },
        Medium::Sql => (Arc::new(SqlBackend::in_memory().expect("sqlite")), None),
    }
}

async fn seed(backend: &dyn StorageBackend, owner: OwnerId, tag: &str) {
    for ordinal in 0..3 {
        let record = make_record(ordinal, 3, &format!("{tag}-{ordinal}"));
        backend.save_container(owner, &record).await.expect("seed");
    }
}

async fn export_all(backend: &dyn StorageBackend) -> Vec<OwnerSnapshot> {
    let mut snapshots = Vec::new();
    for owner in backend.list_owners().await.expect("list owners") {
        snapshots.push(backend.export_owner(owner).await.expect("export"));
    }
    snapshots
}

async fn remove_and_wait(h: &Harness, backup: &Backup) -> (bool, RemovalOutcome) {
    let (tx, rx) = oneshot::channel();
    let task = h.engine.remove_backup(backup, move |removed| {
        let _ = tx.send(removed);
    });
    let outcome = task.outcome().await;
    (rx.await.expect("callback dropped"), outcome)
}

// ============================================================================
// Round trips
// ============================================================================

#[rstest]
#[case::memory(Medium::Memory)]
#[case::file(Medium::File)]
#[case::sql(Medium::Sql)]
#[tokio::test]
async fn restore_onto_cleared_dataset_reproduces_contents(#[case] medium: Medium) {
    let (backend, _dir) = backend_for(medium);
    let h = harness(backend).await;
    for idx in 1..=3 {
        seed(h.backend.as_ref(), make_owner(idx), &format!("owner{idx}")).await;
    }
    let before = export_all(h.backend.as_ref()).await;

    let backup = h.engine.create_backup().await.expect("create");
    for idx in 1..=3 {
        h.backend.delete_owner(make_owner(idx)).await.unwrap();
    }
    assert!(h.backend.list_owners().await.unwrap().is_empty());

    let report = h.engine.restore_backup(&backup).await.expect("restore");

    assert!(report.is_complete());
    assert_eq!(report.restored.len(), 3);
    assert_eq!(export_all(h.backend.as_ref()).await, before);
}

#[rstest]
#[case::memory(Medium::Memory)]
#[case::file(Medium::File)]
#[case::sql(Medium::Sql)]
#[tokio::test]
async fn restore_recovers_deleted_owner_without_touching_other(#[case] medium: Medium) {
    let (backend, _dir) = backend_for(medium);
    let h = harness(backend).await;
    let (a, b) = (make_owner(0xA), make_owner(0xB));
    seed(h.backend.as_ref(), a, "alpha").await;
    seed(h.backend.as_ref(), b, "beta").await;
    let a_before = h.backend.export_owner(a).await.unwrap();
    let b_before = h.backend.export_owner(b).await.unwrap();

    let backup = h.engine.create_backup().await.expect("create");
    h.backend.delete_owner(b).await.unwrap();
    h.engine.restore_backup(&backup).await.expect("restore");

    assert_eq!(h.backend.export_owner(b).await.unwrap(), b_before);
    assert_eq!(h.backend.export_owner(a).await.unwrap(), a_before);
}

#[tokio::test]
async fn restore_removes_owners_absent_from_archive() {
    let h = harness(Arc::new(MemoryBackend::new())).await;
    seed(h.backend.as_ref(), make_owner(1), "kept").await;
    let backup = h.engine.create_backup().await.unwrap();
    seed(h.backend.as_ref(), make_owner(2), "newcomer").await;

    let report = h.engine.restore_backup(&backup).await.unwrap();

    assert_eq!(report.removed, vec![make_owner(2)]);
    assert_eq!(h.backend.list_owners().await.unwrap(), vec![make_owner(1)]);
}

// ============================================================================
// Naming and listing
// ============================================================================

#[tokio::test]
async fn identical_timestamps_yield_distinct_ordered_backups() {
    let h = harness(Arc::new(MemoryBackend::new())).await;
    seed(h.backend.as_ref(), make_owner(1), "x").await;

    let first = h.engine.create_backup().await.unwrap();
    let second = h.engine.create_backup().await.unwrap();
    h.clock.advance(TimeDelta::seconds(1));
    let third = h.engine.create_backup().await.unwrap();

    assert_eq!(first.created_at(), second.created_at());
    assert_ne!(first.name(), second.name());
    assert_eq!(h.engine.list_backups(), vec![first.clone(), second.clone(), third.clone()]);
    for backup in [&first, &second, &third] {
        assert_eq!(h.engine.find_backup(backup.name()).as_ref(), Some(backup));
        assert!(h.backend.read_backup(backup.name()).await.is_ok());
    }
}

#[tokio::test]
async fn reopened_engine_sees_existing_backups_and_continues_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let open = || -> Arc<dyn StorageBackend> {
        Arc::new(FileBackend::open(dir.path(), ContainerLimits::default()).unwrap())
    };
    let h = harness(open()).await;
    seed(h.backend.as_ref(), make_owner(1), "x").await;
    let first = h.engine.create_backup().await.unwrap();
    let second = h.engine.create_backup().await.unwrap();

    let reopened = harness(open()).await;
    assert_eq!(reopened.engine.list_backups(), vec![first, second.clone()]);

    let third = reopened.engine.create_backup().await.unwrap();
    assert!(third.sequence() > second.sequence());
    assert_ne!(third.name(), second.name());
}

// ============================================================================
// Removal
// ============================================================================

#[tokio::test]
async fn removing_twice_reports_false_the_second_time() {
    let h = harness(Arc::new(MemoryBackend::new())).await;
    let backup = h.engine.create_backup().await.unwrap();

    let (removed, outcome) = remove_and_wait(&h, &backup).await;
    assert!(removed);
    assert!(matches!(outcome, RemovalOutcome::Removed));
    assert!(h.engine.list_backups().is_empty());
    assert!(h.backend.list_backups().await.unwrap().is_empty());

    let (removed, outcome) = remove_and_wait(&h, &backup).await;
    assert!(!removed);
    assert!(matches!(outcome, RemovalOutcome::NotFound));
    assert!(h.engine.list_backups().is_empty());
}

#[tokio::test]
async fn removal_leaves_other_backups_registered() {
    let h = harness(Arc::new(MemoryBackend::new())).await;
    let keep = h.engine.create_backup().await.unwrap();
    let gone = h.engine.create_backup().await.unwrap();

    let (removed, _) = remove_and_wait(&h, &gone).await;

    assert!(removed);
    assert_eq!(h.engine.list_backups(), vec![keep]);
}

#[tokio::test]
async fn removal_callback_runs_exactly_once() {
    let h = harness(Arc::new(MemoryBackend::new())).await;
    let backup = h.engine.create_backup().await.unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&calls);
    let task = h.engine.remove_backup(&backup, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let mut states = task.subscribe();
    let outcome = task.outcome().await;

    assert!(outcome.removed());
    assert_eq!(*states.borrow_and_update(), RemovalState::Removed);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Creation failures and task states
// ============================================================================

#[tokio::test]
async fn spawned_creation_reports_success() {
    let h = harness(Arc::new(MemoryBackend::new())).await;
    seed(h.backend.as_ref(), make_owner(1), "x").await;

    let task = h.engine.spawn_create_backup();
    let mut states = task.subscribe();
    let backup = task.wait().await.expect("backup");

    assert_eq!(*states.borrow_and_update(), TaskState::Succeeded);
    assert_eq!(backup.owners(), 1);
    assert_eq!(h.engine.list_backups(), vec![backup]);
}

#[tokio::test]
async fn failed_export_registers_nothing() {
    let faulty = FaultyBackend::new(MemoryBackend::new());
    let h = harness(Arc::new(faulty.clone())).await;
    seed(h.backend.as_ref(), make_owner(1), "ok").await;
    seed(h.backend.as_ref(), make_owner(2), "broken").await;
    faulty.fail_export(make_owner(2));

    let task = h.engine.spawn_create_backup();
    let mut states = task.subscribe();
    let err = task.wait().await.unwrap_err();

    assert!(matches!(err, BackupError::ExportFailed { owner, .. } if owner == make_owner(2)));
    assert_eq!(*states.borrow_and_update(), TaskState::Failed);
    assert!(h.engine.list_backups().is_empty());
    assert!(faulty.inner().list_backups().await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_archive_write_registers_nothing() {
    let faulty = FaultyBackend::new(MemoryBackend::new());
    let h = harness(Arc::new(faulty.clone())).await;
    seed(h.backend.as_ref(), make_owner(1), "x").await;
    faulty.fail_archive_writes(true);

    let err = h.engine.create_backup().await.unwrap_err();
    assert!(matches!(err, BackupError::Storage(ref e) if e.is_write()));
    assert!(h.engine.list_backups().is_empty());

    faulty.heal();
    let backup = h.engine.create_backup().await.expect("retry");
    assert_eq!(h.engine.list_backups(), vec![backup]);
}

// ============================================================================
// Restore against live contexts
// ============================================================================

#[tokio::test]
async fn restore_refuses_dirty_context_and_touches_nothing() {
    let h = harness(Arc::new(MemoryBackend::new())).await;
    let owner = make_owner(1);
    seed(h.backend.as_ref(), owner, "before").await;
    let backup = h.engine.create_backup().await.unwrap();
    seed(h.backend.as_ref(), owner, "after").await;
    let live = h.backend.export_owner(owner).await.unwrap();

    let context = h.contexts.load_context(owner).await.unwrap();
    context.get_container(0).unwrap().set_slot(0, Some(item("unsaved"))).unwrap();

    let err = h.engine.restore_backup(&backup).await.unwrap_err();

    assert!(matches!(err, BackupError::OwnersBusy { ref owners } if owners == &vec![owner]));
    assert_eq!(h.backend.export_owner(owner).await.unwrap(), live);
    assert!(!context.is_evicted());
}

#[tokio::test]
async fn restore_refuses_open_container() {
    let h = harness(Arc::new(MemoryBackend::new())).await;
    let owner = make_owner(1);
    seed(h.backend.as_ref(), owner, "x").await;
    let backup = h.engine.create_backup().await.unwrap();
    let context = h.contexts.load_context(owner).await.unwrap();
    assert!(context.open_container_inventory(ViewerId::owner(owner), 1));

    let err = h.engine.restore_backup(&backup).await.unwrap_err();

    assert!(matches!(err, BackupError::OwnersBusy { .. }));
    assert_eq!(h.world.presentation.opened().len(), 1);
}

#[tokio::test]
async fn restore_refuses_edits_left_in_closed_view() {
    let h = harness(Arc::new(MemoryBackend::new())).await;
    let owner = make_owner(1);
    seed(h.backend.as_ref(), owner, "x").await;
    let backup = h.engine.create_backup().await.unwrap();
    let context = h.contexts.load_context(owner).await.unwrap();
    let viewer = ViewerId::owner(owner);
    assert!(context.open_container_inventory(viewer, 1));
    h.world.presentation.set_live(owner, 1, [(2, item("edited"))].into());
    context.get_container(1).unwrap().close_for(viewer);

    let err = h.engine.restore_backup(&backup).await.unwrap_err();

    assert!(matches!(err, BackupError::OwnersBusy { ref owners } if owners == &vec![owner]));
    assert!(!context.is_evicted());
    h.contexts.save_context(owner, true).await.expect("edits still saveable");
    let stored = h.backend.get_container(owner, 1).await.unwrap().unwrap();
    assert_eq!(stored.contents.get(&2), Some(&item("edited")));
}

#[tokio::test]
async fn restore_evicts_clean_contexts() {
    let h = harness(Arc::new(MemoryBackend::new())).await;
    let owner = make_owner(1);
    seed(h.backend.as_ref(), owner, "archived").await;
    let backup = h.engine.create_backup().await.unwrap();
    let archived = h.backend.export_owner(owner).await.unwrap();

    let stale = h.contexts.load_context(owner).await.unwrap();
    stale.get_container(0).unwrap().set_slot(0, Some(item("later"))).unwrap();
    h.contexts.save_context(owner, false).await.unwrap();

    h.engine.restore_backup(&backup).await.expect("restore");

    assert!(stale.is_evicted());
    assert!(h.contexts.get_context(owner).is_none());
    assert!(matches!(stale.save().await, Err(ContextError::Evicted { .. })));

    let fresh = h.contexts.load_context(owner).await.unwrap();
    let restored = &archived.containers[0];
    assert_eq!(fresh.get_container(0).unwrap().contents(), restored.contents);
}

#[tokio::test]
async fn restore_of_unregistered_backup_is_not_found() {
    let h = harness(Arc::new(MemoryBackend::new())).await;
    let backup = h.engine.create_backup().await.unwrap();
    let (removed, _) = remove_and_wait(&h, &backup).await;
    assert!(removed);

    let err = h.engine.restore_backup(&backup).await.unwrap_err();

    assert!(err.is_not_found());
}
