//! Shared fixtures for unit tests.

use std::sync::{Arc, Mutex};

use crate::block::BlockData;
use crate::listeners::Subscription;
use crate::scheduler::ManualScheduler;
use crate::snapshot::{DocumentSnapshot, NestedBlock};
use crate::sync::{DocumentHandle, InitialSnapshot, MemoryDocumentSource};
use crate::tree::ModelDelta;
use crate::config::DocumentConfig;

/// page("Title")
///   p1("parent")
///     c1("one")
///     c2("two")
///   p2("second")
pub fn sample_page() -> DocumentSnapshot {
    DocumentSnapshot::from_nested(&sample_nested())
}

/// [`sample_page`] as a nested tree.
pub fn sample_nested() -> NestedBlock {
    NestedBlock::new("page", BlockData::Page)
        .text("Title")
        .child(
            NestedBlock::new("p1", BlockData::Paragraph)
                .text("parent")
                .child(NestedBlock::new("c1", BlockData::Paragraph).text("one"))
                .child(NestedBlock::new("c2", BlockData::Paragraph).text("two")),
        )
        .child(NestedBlock::new("p2", BlockData::Paragraph).text("second"))
}

/// A ready document seeded with `snapshot`, driven by a manual scheduler.
pub fn open_document(snapshot: DocumentSnapshot) -> (DocumentHandle, Arc<ManualScheduler>) {
    let source = Arc::new(MemoryDocumentSource::new());
    source.insert("page", InitialSnapshot::Document(snapshot));
    let scheduler = Arc::new(ManualScheduler::new());
    let handle = futures_lite::future::block_on(DocumentHandle::open(
        "page",
        source,
        scheduler.clone(),
        DocumentConfig::default(),
    ))
    .expect("document should load");
    (handle, scheduler)
}

/// Collects every model delta delivered to a listener.
pub struct DeltaRecorder {
    deltas: Arc<Mutex<Vec<ModelDelta>>>,
    _subscription: Subscription,
}

impl DeltaRecorder {
    /// Subscribe to a document's model changes.
    pub fn attach(handle: &DocumentHandle) -> Self {
        let deltas: Arc<Mutex<Vec<ModelDelta>>> = Arc::default();
        let sink = deltas.clone();
        let subscription = handle.on_model_change(move |delta| {
            sink.lock().unwrap().push(delta.clone());
        });
        Self {
            deltas,
            _subscription: subscription,
        }
    }

    /// Deltas received so far.
    pub fn deltas(&self) -> Vec<ModelDelta> {
        self.deltas.lock().unwrap().clone()
    }

    /// Number of deltas received so far.
    pub fn count(&self) -> usize {
        self.deltas.lock().unwrap().len()
    }
}
