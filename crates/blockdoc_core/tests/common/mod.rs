//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use blockdoc_core::{
    BlockData, DocumentConfig, DocumentHandle, DocumentSnapshot, InitialSnapshot,
    ManualScheduler, MemoryDocumentSource, ModelDelta, NestedBlock, NodeId, Subscription,
};
use futures_lite::future::block_on;

pub fn id(s: &str) -> NodeId {
    NodeId::new(s)
}

/// A ready document seeded from `root`.
pub fn open(root: NestedBlock) -> (DocumentHandle, Arc<ManualScheduler>) {
    open_snapshot(DocumentSnapshot::from_nested(&root))
}

pub fn open_snapshot(snapshot: DocumentSnapshot) -> (DocumentHandle, Arc<ManualScheduler>) {
    let source = Arc::new(MemoryDocumentSource::new());
    source.insert("page", InitialSnapshot::Document(snapshot));
    let scheduler = Arc::new(ManualScheduler::new());
    let doc = block_on(DocumentHandle::open(
        "page",
        source,
        scheduler.clone(),
        DocumentConfig::default(),
    ))
    .expect("document should load");
    (doc, scheduler)
}

/// A second replica of `doc`, loaded from its full state and connected.
pub fn replica(doc: &DocumentHandle) -> (DocumentHandle, Arc<ManualScheduler>) {
    let source = Arc::new(MemoryDocumentSource::new());
    source.insert(
        "page",
        InitialSnapshot::Update(doc.encode_state_as_update().unwrap()),
    );
    let scheduler = Arc::new(ManualScheduler::new());
    let peer = block_on(DocumentHandle::open(
        "page",
        source,
        scheduler.clone(),
        DocumentConfig::default(),
    ))
    .expect("replica should load");
    peer.connect().unwrap();
    (peer, scheduler)
}

pub fn page() -> NestedBlock {
    NestedBlock::new("page", BlockData::Page)
}

pub fn paragraph(name: &str, text: &str) -> NestedBlock {
    NestedBlock::new(name, BlockData::Paragraph).text(text)
}

/// Move every queued diff of `from` into `to`.
pub fn pump(from: &DocumentHandle, to: &DocumentHandle) -> usize {
    let updates = from.take_outbound();
    for update in &updates {
        to.apply_remote_update(&update.data).unwrap();
    }
    updates.len()
}

/// Collects the model deltas delivered to a document's listeners.
pub struct Recorder {
    deltas: Arc<Mutex<Vec<ModelDelta>>>,
    _subscription: Subscription,
}

impl Recorder {
    pub fn attach(doc: &DocumentHandle) -> Self {
        let deltas: Arc<Mutex<Vec<ModelDelta>>> = Arc::default();
        let sink = deltas.clone();
        let subscription = doc.on_model_change(move |delta| {
            sink.lock().unwrap().push(delta.clone());
        });
        Self {
            deltas,
            _subscription: subscription,
        }
    }

    pub fn count(&self) -> usize {
        self.deltas.lock().unwrap().len()
    }

    pub fn deltas(&self) -> Vec<ModelDelta> {
        self.deltas.lock().unwrap().clone()
    }
}
