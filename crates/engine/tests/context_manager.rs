//! Context manager behavior against real storage backends.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::sync::Arc;

use coffer_engine::{
    Collaborators, ContextError, ContextManager, EngineConfig, ViewerId,
    testutil::{FakeWorld, item, make_contents, make_owner},
};
use coffer_storage::{
    ContainerLimits, FileBackend, MemoryBackend, SlotMap, StorageBackend,
    testutil::FaultyBackend,
};
use rstest::rstest;
use tokio::task::JoinSet;

fn manager_with(backend: Arc<dyn StorageBackend>, collab: Collaborators) -> ContextManager {
    ContextManager::builder()
        .backend(backend)
        .collaborators(collab)
        .config(EngineConfig::builder().max_containers(6).build().expect("config"))
        .build()
}

// ============================================================================
// One context per owner
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_access_yields_one_context() {
    let world = FakeWorld::new();
    let manager = Arc::new(manager_with(Arc::new(MemoryBackend::new()), world.collaborators()));
    let owner = make_owner(1);

    let mut set = JoinSet::new();
    for _ in 0..16 {
        let manager = Arc::clone(&manager);
        set.spawn(async move { manager.get_or_create_context(owner).await.expect("context") });
    }
    let mut contexts = Vec::new();
    while let Some(result) = set.join_next().await {
        contexts.push(result.expect("task panicked"));
    }

    let first = &contexts[0];
    assert!(contexts.iter().all(|c| Arc::ptr_eq(c, first)));
    assert_eq!(manager.loaded_owners(), vec![owner]);
}

#[tokio::test]
async fn load_context_is_idempotent() {
    let world = FakeWorld::new();
    let manager = manager_with(Arc::new(MemoryBackend::new()), world.collaborators());

    let first = manager.load_context(make_owner(1)).await.unwrap();
    first.get_container(2).unwrap().set_slot(0, Some(item("kept"))).unwrap();
    let second = manager.load_context(make_owner(1)).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert!(second.is_dirty(), "reloading must not discard edits");
}

#[tokio::test]
async fn concurrent_loads_of_an_empty_context_load_once() {
    let world = FakeWorld::new();
    let owner = make_owner(1);
    let manager = Arc::new(
        ContextManager::builder()
            .backend(Arc::new(MemoryBackend::new()))
            .collaborators(world.collaborators())
            .config(
                EngineConfig::builder()
                    .max_containers(4)
                    .use_vanilla_container(true)
                    .build()
                    .unwrap(),
            )
            .build(),
    );
    let context = manager.get_or_create_context(owner).await.unwrap();
    assert!(context.is_empty());

    // Both loads find the context empty and queue behind the held gate.
    let guard = manager.lock_owner(owner).await;
    let first = tokio::spawn({
        let manager = Arc::clone(&manager);
        async move { manager.load_context(owner).await.unwrap() }
    });
    let second = tokio::spawn({
        let manager = Arc::clone(&manager);
        async move { manager.load_context(owner).await.unwrap() }
    });
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    drop(guard);

    let first = first.await.unwrap();
    let viewer = ViewerId::owner(owner);
    let container = first.get_container(1).unwrap();
    assert!(first.open_container_inventory(viewer, 1));
    container.set_slot(0, Some(item("kept"))).unwrap();
    let second = second.await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(world.vanilla.profile_loads(), 1);
    assert!(Arc::ptr_eq(&container, &second.get_container(1).unwrap()));
    assert!(!second.is_unused());
    assert!(second.is_dirty());
    assert_eq!(second.get_container(1).unwrap().contents().get(&0), Some(&item("kept")));
}

// ============================================================================
// Container set
// ============================================================================

#[rstest]
#[case(0)]
#[case(1)]
#[case(4)]
#[case(6)]
#[tokio::test]
async fn load_containers_builds_ordinals_in_order(#[case] count: u32) {
    let world = FakeWorld::new();
    let manager = manager_with(Arc::new(MemoryBackend::new()), world.collaborators());
    let context = manager.get_or_create_context(make_owner(1)).await.unwrap();

    context.load_containers(count).await.unwrap();

    let ordinals: Vec<u32> = context.containers().iter().map(|c| c.ordinal()).collect();
    assert_eq!(ordinals, (0..count).collect::<Vec<_>>());
}

#[rstest]
#[case(&[])]
#[case(&[0])]
#[case(&[1, 3, 5])]
#[case(&[0, 1, 2, 3, 4, 5])]
#[tokio::test]
async fn accessible_count_matches_container_flags(#[case] denied: &[u32]) {
    let world = FakeWorld::new();
    let owner = make_owner(1);
    for ordinal in denied {
        world.access.deny(owner, *ordinal);
    }
    let manager = manager_with(Arc::new(MemoryBackend::new()), world.collaborators());
    let context = manager.load_context(owner).await.unwrap();

    let expected = context.containers().iter().filter(|c| c.is_accessible()).count();
    assert_eq!(context.accessible_count(), expected);
    assert_eq!(context.accessible_count(), 6 - denied.len());

    world.access.allow(owner, 1);
    let expected = context.containers().iter().filter(|c| c.is_accessible()).count();
    assert_eq!(context.accessible_count(), expected);
}

#[tokio::test]
async fn unused_tracks_viewers() {
    let world = FakeWorld::new();
    let owner = make_owner(1);
    let manager = manager_with(Arc::new(MemoryBackend::new()), world.collaborators());
    let context = manager.load_context(owner).await.unwrap();
    let viewer = ViewerId::owner(owner);
    assert!(context.is_unused());

    assert!(context.open_container_inventory(viewer, 3));
    assert!(!context.is_unused());
    assert!(context.get_container(3).unwrap().is_container_used());

    context.get_container(3).unwrap().close_for(viewer);
    assert!(context.is_unused());
}

// ============================================================================
// Persistence
// ============================================================================

#[rstest]
#[case::empty(SlotMap::new())]
#[case::sparse(make_contents("sparse", 3, 7))]
#[case::full(make_contents("full", 3, 1))]
#[tokio::test]
async fn saved_contents_survive_unload(#[case] contents: SlotMap) {
    let dir = tempfile::tempdir().unwrap();
    let file = FileBackend::open(dir.path(), ContainerLimits::default()).unwrap();
    let backend: Arc<dyn StorageBackend> = Arc::new(file);
    let world = FakeWorld::new();
    let owner = make_owner(7);

    let manager = manager_with(Arc::clone(&backend), world.collaborators());
    let context = manager.load_context(owner).await.unwrap();
    context.get_container(4).unwrap().replace_contents(contents.clone()).unwrap();
    manager.save_context(owner, true).await.unwrap();
    assert!(manager.get_context(owner).is_none());

    let reopened = manager_with(backend, world.collaborators());
    let context = reopened.load_context(owner).await.unwrap();
    assert_eq!(context.get_container(4).unwrap().contents(), contents);
}

#[tokio::test]
async fn live_edits_are_pulled_into_save() {
    let backend = MemoryBackend::new();
    let world = FakeWorld::new();
    let owner = make_owner(1);
    let manager = manager_with(Arc::new(backend.clone()), world.collaborators());
    let context = manager.load_context(owner).await.unwrap();
    context.open_container_inventory(ViewerId::owner(owner), 2);

    let live = SlotMap::from([(5, item("picked-up"))]);
    world.presentation.set_live(owner, 2, live.clone());
    manager.save_context(owner, false).await.unwrap();

    let stored = backend.get_container(owner, 2).await.unwrap().unwrap();
    assert_eq!(stored.contents, live);
}

#[tokio::test]
async fn failed_container_does_not_block_the_others() {
    let faulty = FaultyBackend::new(MemoryBackend::new());
    let owner = make_owner(1);
    faulty.fail_save(owner, 1);
    let world = FakeWorld::new();
    let manager = manager_with(Arc::new(faulty.clone()), world.collaborators());
    let context = manager.load_context(owner).await.unwrap();
    for ordinal in 0..3 {
        context.get_container(ordinal).unwrap().set_slot(0, Some(item("x"))).unwrap();
    }

    let err = manager.save_context(owner, true).await.unwrap_err();

    match err {
        ContextError::ContainerWrite { owner: failed_owner, ordinal, source } => {
            assert_eq!(failed_owner, owner);
            assert_eq!(ordinal, 1);
            assert!(source.is_write());
        },
        other => panic!("expected ContainerWrite, got {other:?}"),
    }
    for ordinal in [0, 2] {
        let stored = faulty.inner().get_container(owner, ordinal).await.unwrap().unwrap();
        assert_eq!(stored.contents.get(&0), Some(&item("x")));
    }
    assert!(faulty.inner().get_container(owner, 1).await.unwrap().is_none());
    assert!(context.get_container(1).unwrap().is_dirty());
    assert!(!context.get_container(0).unwrap().is_dirty());
    assert!(manager.get_context(owner).is_some(), "failed context must stay loaded");

    faulty.heal();
    manager.save_context(owner, true).await.unwrap();
    assert!(faulty.inner().get_container(owner, 1).await.unwrap().is_some());
}

#[tokio::test]
async fn save_all_isolates_owners() {
    let faulty = FaultyBackend::new(MemoryBackend::new());
    faulty.fail_save(make_owner(2), 0);
    let world = FakeWorld::new();
    let manager = manager_with(Arc::new(faulty.clone()), world.collaborators());
    for idx in 1..=3 {
        let context = manager.load_context(make_owner(idx)).await.unwrap();
        context.get_container(0).unwrap().set_slot(1, Some(item("gold"))).unwrap();
    }

    let report = manager.save_all(true).await;

    assert_eq!(report.results.len(), 3);
    assert_eq!(report.failed_owners(), vec![make_owner(2)]);
    assert_eq!(report.unloaded, vec![make_owner(1), make_owner(3)]);
    assert_eq!(manager.loaded_owners(), vec![make_owner(2)]);
    assert!(faulty.inner().get_container(make_owner(3), 0).await.unwrap().is_some());
}

// ============================================================================
// Vanilla container
// ============================================================================

#[tokio::test]
async fn offline_owner_profile_makes_vanilla_accessible() {
    let world = FakeWorld::new();
    let owner = make_owner(1);
    let manager = ContextManager::builder()
        .backend(Arc::new(MemoryBackend::new()))
        .collaborators(world.collaborators())
        .config(EngineConfig::builder().use_vanilla_container(true).build().unwrap())
        .build();

    let context = manager.load_context(owner).await.unwrap();

    assert_eq!(world.vanilla.profile_loads(), 1);
    let vanilla = context.get_container(0).unwrap();
    assert!(vanilla.is_vanilla());
    assert!(vanilla.is_accessible());
    assert!(matches!(
        vanilla.set_slot(0, Some(item("nope"))),
        Err(ContextError::ExternallyManaged { ordinal: 0 })
    ));
}
