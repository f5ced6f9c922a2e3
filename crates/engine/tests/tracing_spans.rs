//! Verifies the spans emitted by context saves and backup operations.

#![allow(clippy::expect_used)]

use std::sync::{Arc, Mutex};

use coffer_engine::{
    BackupEngine, ContextManager, EngineConfig,
    testutil::{FakeWorld, ManualClock, item, make_owner},
};
use coffer_storage::{MemoryBackend, StorageBackend};
use tracing::{
    Subscriber,
    field::{Field, Visit},
};
use tracing_subscriber::{layer::SubscriberExt, registry::LookupSpan};

// ---------------------------------------------------------------------------
// Collecting layer: records span names and one chosen field
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct SpanCollector {
    spans: Arc<Mutex<Vec<(String, Vec<(String, String)>)>>>,
}

#[derive(Default)]
struct FieldVisitor(Vec<(String, String)>);

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.0.push((field.name().to_owned(), format!("{value:?}")));
    }
}

impl<S> tracing_subscriber::Layer<S> for SpanCollector
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut visitor = FieldVisitor::default();
        attrs.record(&mut visitor);
        if let Some(span) = ctx.span(id) {
            self.spans.lock().expect("lock poisoned").push((span.name().to_owned(), visitor.0));
        }
    }
}

impl SpanCollector {
    fn field(&self, span: &str, field: &str) -> Option<String> {
        self.spans.lock().expect("lock poisoned").iter().filter(|(name, _)| name == span).find_map(
            |(_, fields)| fields.iter().find(|(name, _)| name == field).map(|(_, v)| v.clone()),
        )
    }

    fn has(&self, span: &str) -> bool {
        self.spans.lock().expect("lock poisoned").iter().any(|(name, _)| name == span)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn context_and_backup_operations_emit_spans() {
    let collector = SpanCollector::default();
    let subscriber = tracing_subscriber::registry().with(collector.clone());
    let _guard = tracing::subscriber::set_default(subscriber);

    let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let world = FakeWorld::new();
    let contexts = Arc::new(
        ContextManager::builder()
            .backend(Arc::clone(&backend))
            .collaborators(world.collaborators())
            .config(EngineConfig::builder().max_containers(2).build().expect("config"))
            .build(),
    );
    let owner = make_owner(42);

    let context = contexts.load_context(owner).await.expect("load");
    context.get_container(1).expect("container").set_slot(0, Some(item("x"))).expect("edit");
    contexts.save_context(owner, true).await.expect("save");

    let engine = BackupEngine::open(backend, contexts, Arc::new(ManualClock::at(0)))
        .await
        .expect("open");
    let backup = engine.create_backup().await.expect("create");
    engine.restore_backup(&backup).await.expect("restore");

    assert_eq!(collector.field("save", "owner"), Some(owner.to_string()));
    assert_eq!(collector.field("load_containers", "owner"), Some(owner.to_string()));
    assert!(collector.has("create_with_permit"));
    assert_eq!(collector.field("restore_backup", "backup"), Some(backup.name().to_owned()));
}
