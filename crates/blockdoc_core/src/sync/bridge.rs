//! The per-page sync bridge.
//!
//! [`SyncBridge`] owns the shared document of one page and is the single
//! place where it is written. Local batches, debounced text edits and remote
//! diffs all go through the same path: one CRDT transaction tagged with its
//! origin, a model refresh from the transaction's change events, then
//! notification of model listeners once every internal lock is released.
//! Diffs of local transactions are queued in an outbox and handed to the
//! transport asynchronously through the scheduler.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized --load()--> Loading --> Ready --dispose()--> Disposed
//!        ^                     |
//!        +---- load failed ----+
//! ```
//!
//! Disposing while loading wins: the load discards what it fetched and
//! returns [`BlockDocError::Disposed`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak,
};
use std::time::Duration;

use indexmap::IndexMap;
use serde::Serialize;
use ts_rs::TS;

use super::source::{DocumentSource, InitialSnapshot};
use crate::actions::ActionBatch;
use crate::block::{Node, NodeId, TextId};
use crate::config::DocumentConfig;
use crate::crdt::{
    ChangeEvent, OutboundUpdate, SharedTree, TreeReader, UpdateOrigin, WriteOp, YrsSharedTree,
};
use crate::delta::{self, DeltaOp};
use crate::error::{BlockDocError, Result};
use crate::listeners::{ListenerRegistry, Subscription};
use crate::scheduler::{Scheduler, TaskHandle};
use crate::snapshot::{DocumentSnapshot, NestedBlock};
use crate::tree::{BlockTree, ModelDelta};

/// Lifecycle state of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum DocumentState {
    /// Created, not loaded yet
    Uninitialized,
    /// Waiting for the document source
    Loading,
    /// Accepting transactions
    Ready,
    /// Torn down; every further mutation fails
    Disposed,
}

impl std::fmt::Display for DocumentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DocumentState::Uninitialized => "uninitialized",
            DocumentState::Loading => "loading",
            DocumentState::Ready => "ready",
            DocumentState::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

/// What happened to a remote diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum RemoteApply {
    /// The diff changed the document
    Applied,
    /// The diff was already known (or is waiting for missing history)
    Unchanged,
    /// The bridge is disconnected; the diff was not applied
    Ignored,
}

struct Core {
    tree: Box<dyn SharedTree>,
    // Why the model could not be built from the shared state; local writes
    // are refused until a later remote diff repairs it
    broken: Option<String>,
}

#[derive(Default)]
struct Outbox {
    queue: VecDeque<OutboundUpdate>,
    next_id: i64,
    delivery_scheduled: bool,
}

#[derive(Default)]
struct PendingText {
    edits: IndexMap<TextId, Vec<DeltaOp>>,
    timer: Option<TaskHandle>,
}

/// Owns and synchronizes the shared document of one page.
pub struct SyncBridge {
    page_id: String,
    config: DocumentConfig,
    source: Arc<dyn DocumentSource>,
    scheduler: Arc<dyn Scheduler>,
    weak_self: Weak<SyncBridge>,

    state: Mutex<DocumentState>,
    // Lock order: core, then model, then outbox
    core: Mutex<Option<Core>>,
    model: RwLock<BlockTree>,
    outbox: Mutex<Outbox>,
    pending: Mutex<PendingText>,
    connected: AtomicBool,

    model_listeners: Arc<ListenerRegistry<ModelDelta>>,
    outbound_listeners: Arc<ListenerRegistry<OutboundUpdate>>,
}

impl SyncBridge {
    /// Create an unloaded bridge for `page_id`.
    pub fn new(
        page_id: impl Into<String>,
        source: Arc<dyn DocumentSource>,
        scheduler: Arc<dyn Scheduler>,
        config: DocumentConfig,
    ) -> Arc<Self> {
        let page_id = page_id.into();
        Arc::new_cyclic(|weak_self| Self {
            page_id,
            config,
            source,
            scheduler,
            weak_self: weak_self.clone(),
            state: Mutex::new(DocumentState::Uninitialized),
            core: Mutex::new(None),
            model: RwLock::new(BlockTree::new()),
            outbox: Mutex::new(Outbox::default()),
            pending: Mutex::new(PendingText::default()),
            connected: AtomicBool::new(false),
            model_listeners: Arc::new(ListenerRegistry::new()),
            outbound_listeners: Arc::new(ListenerRegistry::new()),
        })
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// The page this bridge synchronizes.
    pub fn page_id(&self) -> &str {
        &self.page_id
    }

    /// The bridge configuration.
    pub fn config(&self) -> &DocumentConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DocumentState {
        *self.lock_state()
    }

    /// Fetch the initial state from the document source and go ready.
    ///
    /// An empty page is seeded with a page block and, per configuration, one
    /// empty paragraph. A failed load returns the bridge to
    /// [`DocumentState::Uninitialized`] so it can be retried.
    pub async fn load(&self) -> Result<()> {
        {
            let mut state = self.lock_state();
            match *state {
                DocumentState::Uninitialized => *state = DocumentState::Loading,
                DocumentState::Disposed => return Err(self.disposed()),
                other => {
                    return Err(BlockDocError::policy(format!(
                        "document '{}' is already {}",
                        self.page_id, other
                    )));
                }
            }
        }
        log::debug!("Loading document '{}'", self.page_id);

        let prepared = match self.source.load_initial(&self.page_id).await {
            Ok(initial) => self.prepare(initial),
            Err(e) => Err(e),
        };

        let mut state = self.lock_state();
        if *state == DocumentState::Disposed {
            log::debug!(
                "Document '{}' was disposed while loading; discarding it",
                self.page_id
            );
            return Err(self.disposed());
        }
        match prepared {
            Ok((tree, model)) => {
                log::debug!(
                    "Document '{}' is ready with {} blocks",
                    self.page_id,
                    model.len()
                );
                *self.lock_core() = Some(Core {
                    tree: Box::new(tree),
                    broken: None,
                });
                *self.write_model() = model;
                *state = DocumentState::Ready;
                Ok(())
            }
            Err(e) => {
                log::warn!("Failed to load document '{}': {}", self.page_id, e);
                *state = DocumentState::Uninitialized;
                Err(e)
            }
        }
    }

    fn prepare(&self, initial: InitialSnapshot) -> Result<(YrsSharedTree, BlockTree)> {
        let tree = YrsSharedTree::new()?;
        match initial {
            InitialSnapshot::Empty => {}
            InitialSnapshot::Update(update) => {
                tree.apply_update(&update, UpdateOrigin::Sync)?;
            }
            InitialSnapshot::Document(snapshot) => {
                BlockTree::from_snapshot(&snapshot)?;
                tree.seed(&snapshot)?;
            }
        }
        if tree.page_id().is_none() {
            log::debug!("Seeding new document '{}'", self.page_id);
            let snapshot = DocumentSnapshot::new_page(
                NodeId::new(self.page_id.as_str()),
                self.config.seed_empty_paragraph,
            );
            tree.seed(&snapshot)?;
        }
        let mut model = BlockTree::new();
        model.reload(&tree)?;
        Ok((tree, model))
    }

    /// Tear the document down.
    ///
    /// Pending text edits are committed first and queued diffs are delivered
    /// to connected listeners, synchronously. Afterwards every mutation fails
    /// with [`BlockDocError::Disposed`]. Calling it again does nothing.
    pub fn dispose(&self) {
        let previous = self.state();
        if previous == DocumentState::Disposed {
            return;
        }
        if previous == DocumentState::Ready && self.has_pending_text() {
            if let Err(e) = self.flush_pending_text() {
                log::warn!(
                    "Failed to flush text edits of '{}' on dispose: {}",
                    self.page_id,
                    e
                );
            }
        }
        self.deliver_outbound();

        *self.lock_state() = DocumentState::Disposed;
        self.connected.store(false, Ordering::SeqCst);
        self.lock_core().take();
        if let Some(timer) = self.lock_pending().timer.take() {
            timer.cancel();
        }
        self.model_listeners.clear();
        self.outbound_listeners.clear();
        log::debug!("Disposed document '{}'", self.page_id);
    }

    // ========================================================================
    // Connection
    // ========================================================================

    /// Start accepting remote diffs and delivering outbound ones.
    pub fn connect(&self) -> Result<()> {
        if self.state() == DocumentState::Disposed {
            return Err(self.disposed());
        }
        if !self.connected.swap(true, Ordering::SeqCst) {
            log::debug!("Document '{}' connected", self.page_id);
            self.schedule_delivery();
        }
        Ok(())
    }

    /// Stop accepting remote diffs; local diffs wait in the outbox.
    pub fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            log::debug!("Document '{}' disconnected", self.page_id);
        }
    }

    /// Whether the bridge is connected.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Whether the model follows the shared state.
    ///
    /// False after a remote diff left a state no tree can be built from, such
    /// as a missing page block. Local writes are refused until a later
    /// remote diff repairs it.
    pub fn is_in_sync(&self) -> bool {
        self.lock_core()
            .as_ref()
            .is_some_and(|core| core.broken.is_none())
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Run a batch of primitives as one local transaction.
    ///
    /// `build` stages its primitives on a copy of the model. When it fails,
    /// or the staged tree breaks an invariant, nothing is written and no
    /// listener is called. A batch that writes nothing returns an empty delta.
    ///
    /// While the model cannot be built from the shared state (see
    /// [`is_in_sync`](Self::is_in_sync)) every batch fails with
    /// [`BlockDocError::InvariantViolation`] before anything is written.
    pub fn apply_local_transaction<R, F>(&self, build: F) -> Result<(R, ModelDelta)>
    where
        F: FnOnce(&mut ActionBatch) -> Result<R>,
    {
        self.ensure_ready()?;
        self.flush_pending_text()?;

        let (value, delta, failure) = {
            let mut guard = self.lock_core();
            let core = guard.as_mut().ok_or_else(|| self.disposed())?;
            self.ensure_in_sync(core)?;
            let mut batch = ActionBatch::new(self.read_model().clone());
            let value = build(&mut batch)?;
            let (writes, actions) = batch.into_writes()?;
            if writes.is_empty() {
                return Ok((value, ModelDelta::empty(UpdateOrigin::Local)));
            }
            log::debug!(
                "Committing {} actions ({} writes) to '{}'",
                actions.len(),
                writes.len(),
                self.page_id
            );
            let (delta, failure) = self.commit(core, UpdateOrigin::Local, &writes)?;
            (value, delta, failure)
        };

        self.notify(&delta);
        self.schedule_delivery();
        match failure {
            Some(e) => Err(e),
            None => Ok((value, delta)),
        }
    }

    /// Apply a binary diff received from a collaborator.
    ///
    /// Diffs applied here are never queued for sending back. A diff that
    /// cannot be decoded or applied is logged and returned as an error; the
    /// document stays usable.
    pub fn apply_remote_update(&self, update: &[u8]) -> Result<RemoteApply> {
        self.ensure_ready()?;
        if !self.is_connected() {
            log::debug!(
                "Ignoring remote update for '{}' while disconnected",
                self.page_id
            );
            return Ok(RemoteApply::Ignored);
        }
        self.flush_pending_text()?;

        let delta = {
            let mut guard = self.lock_core();
            let core = guard.as_mut().ok_or_else(|| self.disposed())?;
            let outcome = core
                .tree
                .apply_update(update, UpdateOrigin::Remote)
                .inspect_err(|e| {
                    log::warn!(
                        "Dropping remote update for '{}' ({} bytes): {}",
                        self.page_id,
                        update.len(),
                        e
                    )
                })?;
            if !outcome.changed && core.broken.is_none() {
                return Ok(RemoteApply::Unchanged);
            }
            self.refresh_model(core, outcome.events, UpdateOrigin::Remote)?
        };

        self.notify(&delta);
        Ok(RemoteApply::Applied)
    }

    /// Replace the text of a block, coalescing rapid edits.
    ///
    /// The model is updated and listeners are notified right away. The shared
    /// document is written once no further edit arrived for the debounce
    /// window, as the minimal diff between its text and the latest edit. Any
    /// other transaction, and [`dispose`](Self::dispose), flushes first.
    pub fn update_text(&self, id: &NodeId, ops: Vec<DeltaOp>) -> Result<ModelDelta> {
        self.ensure_ready()?;
        if !delta::is_insert_only(&ops) {
            return Err(BlockDocError::policy(
                "replacement text must contain only inserts",
            ));
        }
        let ops = delta::normalize(ops);

        let (text_id, change) = {
            let guard = self.lock_core();
            let core = guard.as_ref().ok_or_else(|| self.disposed())?;
            self.ensure_in_sync(core)?;
            let mut model = self.write_model();
            let node = model.node(id).ok_or_else(|| BlockDocError::not_found(id))?;
            let text_id = node
                .external_text_id
                .clone()
                .ok_or_else(|| BlockDocError::policy(format!("'{}' carries no text", id)))?;
            if model.text(&text_id) == Some(ops.as_slice()) {
                return Ok(ModelDelta::empty(UpdateOrigin::Local));
            }
            model.set_text(text_id.clone(), ops.clone());
            let mut change = ModelDelta::empty(UpdateOrigin::Local);
            change.text_changed.push(text_id.clone());
            (text_id, change)
        };

        {
            let mut pending = self.lock_pending();
            pending.edits.insert(text_id, ops);
            if let Some(timer) = pending.timer.take() {
                timer.cancel();
            }
            let weak = self.weak_self.clone();
            pending.timer = Some(self.scheduler.schedule(
                self.config.text_debounce(),
                Box::new(move || {
                    if let Some(bridge) = weak.upgrade()
                        && let Err(e) = bridge.flush_pending_text()
                    {
                        log::warn!(
                            "Debounced text flush of '{}' failed: {}",
                            bridge.page_id,
                            e
                        );
                    }
                }),
            ));
        }

        self.notify(&change);
        Ok(change)
    }

    /// Commit debounced text edits now.
    pub fn flush_pending_text(&self) -> Result<ModelDelta> {
        let edits = {
            let mut pending = self.lock_pending();
            if let Some(timer) = pending.timer.take() {
                timer.cancel();
            }
            std::mem::take(&mut pending.edits)
        };
        if edits.is_empty() {
            return Ok(ModelDelta::empty(UpdateOrigin::Local));
        }

        let (delta, failure) = {
            let mut guard = self.lock_core();
            let Some(core) = guard.as_mut() else {
                log::warn!(
                    "Dropping {} text edits of '{}': document is gone",
                    edits.len(),
                    self.page_id
                );
                return Err(self.disposed());
            };
            if let Err(e) = self.ensure_in_sync(core) {
                log::warn!("Dropping {} text edits of '{}'", edits.len(), self.page_id);
                return Err(e);
            }
            let writes: Vec<WriteOp> = edits
                .into_iter()
                .filter_map(|(text, target)| {
                    let Some(current) = core.tree.text(&text) else {
                        log::debug!("Text '{}' was removed before its edit was flushed", text);
                        return None;
                    };
                    let change = delta::diff(&current, &target);
                    (!change.is_empty()).then_some(WriteOp::ApplyText {
                        text,
                        delta: change,
                    })
                })
                .collect();
            if writes.is_empty() {
                return Ok(ModelDelta::empty(UpdateOrigin::Local));
            }
            log::debug!(
                "Flushing {} debounced text edits to '{}'",
                writes.len(),
                self.page_id
            );
            self.commit(core, UpdateOrigin::Local, &writes)?
        };

        self.notify(&delta);
        self.schedule_delivery();
        match failure {
            Some(e) => Err(e),
            None => Ok(delta),
        }
    }

    /// Whether text edits are waiting for the debounce window to close.
    pub fn has_pending_text(&self) -> bool {
        !self.lock_pending().edits.is_empty()
    }

    /// Run writes as one transaction and refresh the model.
    ///
    /// A write that fails after the transaction started leaves the earlier
    /// writes committed: their diff is still queued and the model is rebuilt.
    /// The caller gets the delta to notify along with the failure.
    fn commit(
        &self,
        core: &mut Core,
        origin: UpdateOrigin,
        writes: &[WriteOp],
    ) -> Result<(ModelDelta, Option<BlockDocError>)> {
        let outcome = core.tree.transact(origin, writes)?;
        if let Some(update) = outcome.update {
            self.enqueue_outbound(&*core.tree, update);
        }
        match outcome.failure {
            None => Ok((self.refresh_model(core, outcome.events, origin)?, None)),
            Some(failure) => {
                log::error!(
                    "Transaction on '{}' failed part-way, rebuilding the model: {}",
                    self.page_id,
                    failure
                );
                let delta = self.rebuild_model(core, origin)?;
                Ok((delta, Some(BlockDocError::Transaction(failure))))
            }
        }
    }

    fn refresh_model(
        &self,
        core: &mut Core,
        events: Vec<ChangeEvent>,
        origin: UpdateOrigin,
    ) -> Result<ModelDelta> {
        if core.broken.is_some() {
            return self.rebuild_model(core, origin);
        }
        let result = self
            .write_model()
            .apply_change_events(&events, &*core.tree, origin);
        self.track_sync(core, origin, result)
    }

    fn rebuild_model(&self, core: &mut Core, origin: UpdateOrigin) -> Result<ModelDelta> {
        let result = self.write_model().rebuild(&*core.tree, origin);
        self.track_sync(core, origin, result)
    }

    fn track_sync(
        &self,
        core: &mut Core,
        origin: UpdateOrigin,
        result: Result<ModelDelta>,
    ) -> Result<ModelDelta> {
        match result {
            Ok(delta) => {
                if core.broken.take().is_some() {
                    log::info!("Model of '{}' is in sync again", self.page_id);
                }
                Ok(delta)
            }
            Err(e) => {
                log::error!(
                    "Model of '{}' cannot follow a {} transaction: {}",
                    self.page_id,
                    origin,
                    e
                );
                core.broken = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn notify(&self, delta: &ModelDelta) {
        if !delta.is_empty() {
            self.model_listeners.emit(delta);
        }
    }

    // ========================================================================
    // Outbound diffs
    // ========================================================================

    fn enqueue_outbound(&self, tree: &dyn SharedTree, update: Vec<u8>) {
        let mut outbox = self.lock_outbox();
        outbox.next_id += 1;
        let update_id = outbox.next_id;
        outbox
            .queue
            .push_back(OutboundUpdate::new(update_id, &self.page_id, update));

        if outbox.queue.len() > self.config.max_pending_outbound.max(1) {
            let updates: Vec<Vec<u8>> = outbox.queue.iter().map(|u| u.data.clone()).collect();
            match tree.merge_updates(&updates) {
                Ok(data) => {
                    let merged = outbox.queue.iter().map(|u| u.merged).sum();
                    let mut compacted = OutboundUpdate::new(update_id, &self.page_id, data);
                    compacted.merged = merged;
                    outbox.queue.clear();
                    outbox.queue.push_back(compacted);
                    log::debug!(
                        "Compacted {} outbound updates of '{}'",
                        merged,
                        self.page_id
                    );
                }
                Err(e) => log::warn!(
                    "Could not compact outbound updates of '{}': {}",
                    self.page_id,
                    e
                ),
            }
        }
    }

    fn schedule_delivery(&self) {
        if !self.is_connected() {
            return;
        }
        {
            let mut outbox = self.lock_outbox();
            if outbox.delivery_scheduled || outbox.queue.is_empty() {
                return;
            }
            outbox.delivery_scheduled = true;
        }
        let weak = self.weak_self.clone();
        self.scheduler.schedule(
            Duration::ZERO,
            Box::new(move || {
                if let Some(bridge) = weak.upgrade() {
                    bridge.deliver_outbound();
                }
            }),
        );
    }

    fn deliver_outbound(&self) {
        let updates: Vec<OutboundUpdate> = {
            let mut outbox = self.lock_outbox();
            outbox.delivery_scheduled = false;
            if !self.is_connected() || !self.outbound_listeners.has_subscribers() {
                return;
            }
            outbox.queue.drain(..).collect()
        };
        for update in &updates {
            self.outbound_listeners.emit(update);
        }
    }

    /// Take every queued outbound diff, for transports that poll.
    pub fn take_outbound(&self) -> Vec<OutboundUpdate> {
        self.lock_outbox().queue.drain(..).collect()
    }

    /// Number of outbound diffs waiting.
    pub fn pending_outbound_count(&self) -> usize {
        self.lock_outbox().queue.len()
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Be told about every model change, in commit order.
    ///
    /// Listeners run after the bridge released its locks and may call back
    /// into it. Drop the returned [`Subscription`] to stop listening.
    pub fn on_model_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ModelDelta) + Send + Sync + 'static,
    {
        ListenerRegistry::subscribe(&self.model_listeners, listener)
    }

    /// Receive outbound diffs while connected.
    pub fn on_outbound_update<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&OutboundUpdate) + Send + Sync + 'static,
    {
        let subscription = ListenerRegistry::subscribe(&self.outbound_listeners, listener);
        self.schedule_delivery();
        subscription
    }

    // ========================================================================
    // Sync handshake
    // ========================================================================

    /// Encode the state vector of the shared document.
    pub fn encode_state_vector(&self) -> Result<Vec<u8>> {
        self.with_tree(|tree| Ok(tree.encode_state_vector()))
    }

    /// Encode the whole shared document as one diff.
    pub fn encode_state_as_update(&self) -> Result<Vec<u8>> {
        self.with_tree(|tree| Ok(tree.encode_state_as_update()))
    }

    /// Encode what a peer with `state_vector` is missing.
    pub fn encode_diff(&self, state_vector: &[u8]) -> Result<Vec<u8>> {
        self.with_tree(|tree| tree.encode_diff(state_vector))
    }

    fn with_tree<R>(&self, read: impl FnOnce(&dyn SharedTree) -> Result<R>) -> Result<R> {
        self.ensure_ready()?;
        self.flush_pending_text()?;
        let guard = self.lock_core();
        let core = guard.as_ref().ok_or_else(|| self.disposed())?;
        read(&*core.tree)
    }

    // ========================================================================
    // Model reads
    // ========================================================================

    /// A copy of the current model.
    pub fn model(&self) -> BlockTree {
        self.read_model().clone()
    }

    /// Read the current model without copying it.
    ///
    /// The model is locked while `read` runs; do not call back into the
    /// bridge from it.
    pub fn with_model<R>(&self, read: impl FnOnce(&BlockTree) -> R) -> R {
        read(&self.read_model())
    }

    /// A block.
    pub fn node(&self, id: &NodeId) -> Option<Node> {
        self.read_model().node(id).cloned()
    }

    /// The children of a block, in order.
    pub fn children_of(&self, id: &NodeId) -> Vec<NodeId> {
        self.read_model().children_of(id).to_vec()
    }

    /// The parent of a block.
    pub fn parent(&self, id: &NodeId) -> Option<NodeId> {
        self.read_model().parent(id).cloned()
    }

    /// The text of a block, including edits not flushed yet.
    pub fn text_of(&self, id: &NodeId) -> Option<Vec<DeltaOp>> {
        self.read_model().text_of(id).map(<[DeltaOp]>::to_vec)
    }

    /// The document as nested blocks.
    pub fn to_nested(&self) -> Option<NestedBlock> {
        self.read_model().to_nested()
    }

    /// The document in flat form.
    pub fn snapshot(&self) -> Option<DocumentSnapshot> {
        self.read_model().to_snapshot()
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn ensure_ready(&self) -> Result<()> {
        match self.state() {
            DocumentState::Ready => Ok(()),
            DocumentState::Disposed => Err(self.disposed()),
            state => Err(BlockDocError::NotReady {
                page_id: self.page_id.clone(),
                state: state.to_string(),
            }),
        }
    }

    fn ensure_in_sync(&self, core: &Core) -> Result<()> {
        match &core.broken {
            None => Ok(()),
            Some(reason) => Err(BlockDocError::InvariantViolation(format!(
                "document '{}' is out of sync with its shared state: {}",
                self.page_id, reason
            ))),
        }
    }

    fn disposed(&self) -> BlockDocError {
        BlockDocError::Disposed(self.page_id.clone())
    }

    fn lock_state(&self) -> MutexGuard<'_, DocumentState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_core(&self) -> MutexGuard<'_, Option<Core>> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_outbox(&self) -> MutexGuard<'_, Outbox> {
        self.outbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_pending(&self) -> MutexGuard<'_, PendingText> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_model(&self) -> RwLockReadGuard<'_, BlockTree> {
        self.model.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_model(&self) -> RwLockWriteGuard<'_, BlockTree> {
        self.model.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SyncBridge {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for SyncBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncBridge")
            .field("page_id", &self.page_id)
            .field("state", &self.state())
            .field("connected", &self.is_connected())
            .field("pending_outbound", &self.pending_outbound_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockData;
    use crate::scheduler::ManualScheduler;
    use crate::sync::MemoryDocumentSource;
    use crate::test_utils::{DeltaRecorder, open_document, sample_page};
    use futures_lite::future::block_on;
    use std::sync::atomic::AtomicUsize;

    fn id(s: &str) -> NodeId {
        NodeId::new(s)
    }

    fn unloaded(source: MemoryDocumentSource) -> (Arc<SyncBridge>, Arc<ManualScheduler>) {
        let scheduler = Arc::new(ManualScheduler::new());
        let bridge = SyncBridge::new(
            "page",
            Arc::new(source),
            scheduler.clone(),
            DocumentConfig::default(),
        );
        (bridge, scheduler)
    }

    #[test]
    fn test_empty_page_is_seeded() {
        let (bridge, _) = unloaded(MemoryDocumentSource::new());
        assert_eq!(bridge.state(), DocumentState::Uninitialized);
        block_on(bridge.load()).unwrap();
        assert_eq!(bridge.state(), DocumentState::Ready);

        let page = bridge.node(&id("page")).unwrap();
        assert_eq!(page.data, BlockData::Page);
        let children = bridge.children_of(&id("page"));
        assert_eq!(children.len(), 1);
        assert_eq!(bridge.node(&children[0]).unwrap().data, BlockData::Paragraph);
    }

    #[test]
    fn test_load_from_update() {
        let (source_doc, _) = open_document(sample_page());
        let update = source_doc.encode_state_as_update().unwrap();

        let source = MemoryDocumentSource::new();
        source.insert("page", InitialSnapshot::Update(update));
        let (bridge, _) = unloaded(source);
        block_on(bridge.load()).unwrap();
        assert_eq!(bridge.snapshot(), source_doc.snapshot());
    }

    #[test]
    fn test_failed_load_can_be_retried() {
        let source = Arc::new(MemoryDocumentSource::new());
        source.fail("page", "offline");
        let scheduler = Arc::new(ManualScheduler::new());
        let bridge = SyncBridge::new("page", source.clone(), scheduler, DocumentConfig::default());

        let err = block_on(bridge.load()).unwrap_err();
        assert!(matches!(err, BlockDocError::Source(_)));
        assert_eq!(bridge.state(), DocumentState::Uninitialized);
    }

    #[test]
    fn test_invalid_snapshot_is_rejected() {
        let mut snapshot = sample_page();
        snapshot
            .children
            .get_mut(&crate::block::ChildrenListId::new("page"))
            .unwrap()
            .push(id("c1"));
        let source = MemoryDocumentSource::new();
        source.insert("page", InitialSnapshot::Document(snapshot));
        let (bridge, _) = unloaded(source);
        let err = block_on(bridge.load()).unwrap_err();
        assert!(matches!(err, BlockDocError::InvariantViolation(_)));
    }

    #[test]
    fn test_operations_before_load_are_not_ready() {
        let (bridge, _) = unloaded(MemoryDocumentSource::new());
        let err = bridge
            .apply_local_transaction(|batch| batch.delete(&id("x")))
            .unwrap_err();
        assert!(matches!(err, BlockDocError::NotReady { .. }));
    }

    #[test]
    fn test_double_load_is_rejected() {
        let (doc, _) = open_document(sample_page());
        let err = block_on(doc.load()).unwrap_err();
        assert!(matches!(err, BlockDocError::PolicyViolation(_)));
    }

    #[test]
    fn test_local_transaction_notifies_and_queues() {
        let (doc, _) = open_document(sample_page());
        let recorder = DeltaRecorder::attach(&doc);
        let (_, delta) = doc
            .apply_local_transaction(|batch| batch.move_node(&id("c2"), &id("page"), None))
            .unwrap();
        assert_eq!(delta.origin, UpdateOrigin::Local);
        assert_eq!(delta.moved, vec![id("c2")]);
        assert_eq!(recorder.count(), 1);
        assert_eq!(doc.pending_outbound_count(), 1);
    }

    #[test]
    fn test_outbound_delivery_is_asynchronous() {
        let (doc, scheduler) = open_document(sample_page());
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = delivered.clone();
        let _sub = doc.on_outbound_update(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        doc.connect().unwrap();

        doc.apply_local_transaction(|batch| batch.delete(&id("p2")))
            .unwrap();
        assert_eq!(delivered.load(Ordering::SeqCst), 0);
        scheduler.run_until_idle();
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
        assert_eq!(doc.pending_outbound_count(), 0);
    }

    #[test]
    fn test_outbox_compaction() {
        let source = Arc::new(MemoryDocumentSource::new());
        source.insert("page", InitialSnapshot::Document(sample_page()));
        let config = DocumentConfig {
            max_pending_outbound: 2,
            ..DocumentConfig::default()
        };
        let bridge = SyncBridge::new("page", source, Arc::new(ManualScheduler::new()), config);
        block_on(bridge.load()).unwrap();
        let base = bridge.encode_state_as_update().unwrap();

        for name in ["x", "y", "z"] {
            bridge
                .apply_local_transaction(|batch| {
                    let node = Node::with_id(id(name), BlockData::Divider).under(&id("page"));
                    batch.insert(node, None, None)
                })
                .unwrap();
        }
        let queued = bridge.take_outbound();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].merged, 3);

        let peer = YrsSharedTree::new().unwrap();
        peer.apply_update(&base, UpdateOrigin::Sync).unwrap();
        peer.apply_update(&queued[0].data, UpdateOrigin::Remote)
            .unwrap();
        assert_eq!(
            peer.children(&crate::block::ChildrenListId::new("page")),
            Some(bridge.children_of(&id("page")))
        );
        assert!(peer.node(&id("y")).is_some());
    }

    #[test]
    fn test_remote_update_requires_connection() {
        let (a, _) = open_document(sample_page());
        let source = MemoryDocumentSource::new();
        source.insert(
            "page",
            InitialSnapshot::Update(a.encode_state_as_update().unwrap()),
        );
        let (b, _) = unloaded(source);
        block_on(b.load()).unwrap();
        a.apply_local_transaction(|batch| batch.delete(&id("p2")))
            .unwrap();
        let update = a.take_outbound().remove(0);

        assert_eq!(b.apply_remote_update(&update.data).unwrap(), RemoteApply::Ignored);
        b.connect().unwrap();
        assert_eq!(b.apply_remote_update(&update.data).unwrap(), RemoteApply::Applied);
        assert_eq!(b.apply_remote_update(&update.data).unwrap(), RemoteApply::Unchanged);
        assert_eq!(b.pending_outbound_count(), 0);
    }

    #[test]
    fn test_corrupt_remote_update() {
        let (doc, _) = open_document(sample_page());
        doc.connect().unwrap();
        let err = doc.apply_remote_update(&[0xde, 0xad, 0xbe, 0xef]).unwrap_err();
        assert!(matches!(err, BlockDocError::Transaction(_)));
        // still usable
        doc.apply_local_transaction(|batch| batch.delete(&id("p2")))
            .unwrap();
    }

    #[test]
    fn test_unbuildable_remote_state_blocks_local_writes() {
        let (doc, _) = open_document(sample_page());
        doc.connect().unwrap();
        let peer = YrsSharedTree::new().unwrap();
        peer.apply_update(&doc.encode_state_as_update().unwrap(), UpdateOrigin::Sync)
            .unwrap();

        let page_gone = peer
            .transact(
                UpdateOrigin::Local,
                &[WriteOp::RemoveBlock {
                    id: id("page"),
                    children_list_id: crate::block::ChildrenListId::new("page"),
                    text_id: Some(TextId::new("page")),
                }],
            )
            .unwrap();
        let last_good = doc.snapshot();
        let err = doc
            .apply_remote_update(&page_gone.update.unwrap())
            .unwrap_err();
        assert!(matches!(err, BlockDocError::InvariantViolation(_)));
        assert!(!doc.is_in_sync());
        // the last good model stays visible
        assert_eq!(doc.snapshot(), last_good);

        let state = doc.encode_state_vector().unwrap();
        let err = doc
            .apply_local_transaction(|batch| batch.delete(&id("p2")))
            .unwrap_err();
        assert!(matches!(err, BlockDocError::InvariantViolation(_)));
        let err = doc
            .update_text(&id("c1"), vec![DeltaOp::insert("lost")])
            .unwrap_err();
        assert!(matches!(err, BlockDocError::InvariantViolation(_)));
        assert_eq!(doc.pending_outbound_count(), 0);
        assert!(!doc.has_pending_text());
        assert_eq!(doc.encode_state_vector().unwrap(), state);

        // a peer restoring the page block repairs the document
        let restored = peer
            .transact(
                UpdateOrigin::Local,
                &[WriteOp::InsertBlock {
                    node: Node::with_id(id("page"), BlockData::Page),
                    text: None,
                }],
            )
            .unwrap();
        assert_eq!(
            doc.apply_remote_update(&restored.update.unwrap()).unwrap(),
            RemoteApply::Applied
        );
        assert!(doc.is_in_sync());
        assert_eq!(doc.children_of(&id("page")), vec![id("p1"), id("p2")]);
        assert_eq!(doc.children_of(&id("p1")), vec![id("c1"), id("c2")]);
        doc.apply_local_transaction(|batch| batch.delete(&id("p2")))
            .unwrap();
        assert_eq!(doc.pending_outbound_count(), 1);
    }

    #[test]
    fn test_update_text_is_debounced() {
        let (doc, scheduler) = open_document(sample_page());
        let recorder = DeltaRecorder::attach(&doc);

        doc.update_text(&id("c1"), vec![DeltaOp::insert("on")]).unwrap();
        doc.update_text(&id("c1"), vec![DeltaOp::insert("onex")]).unwrap();
        assert_eq!(doc.text_of(&id("c1")), Some(vec![DeltaOp::insert("onex")]));
        assert_eq!(recorder.count(), 2);
        assert!(doc.has_pending_text());
        assert_eq!(doc.pending_outbound_count(), 0);

        scheduler.advance(Duration::from_millis(199));
        assert_eq!(doc.pending_outbound_count(), 0);
        scheduler.advance(Duration::from_millis(1));
        assert!(!doc.has_pending_text());
        assert_eq!(doc.pending_outbound_count(), 1);
        // the commit matches the optimistic model, so no further delta
        assert_eq!(recorder.count(), 2);
    }

    #[test]
    fn test_structural_transaction_flushes_text_first() {
        let (doc, _) = open_document(sample_page());
        doc.update_text(&id("c1"), vec![DeltaOp::insert("uno")]).unwrap();
        doc.apply_local_transaction(|batch| batch.move_node(&id("c1"), &id("page"), None))
            .unwrap();
        assert!(!doc.has_pending_text());
        assert_eq!(doc.pending_outbound_count(), 2);
        assert_eq!(doc.text_of(&id("c1")), Some(vec![DeltaOp::insert("uno")]));
    }

    #[test]
    fn test_dispose_flushes_and_rejects_further_work() {
        let (doc, _) = open_document(sample_page());
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = delivered.clone();
        let _sub = doc.on_outbound_update(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        doc.connect().unwrap();
        doc.update_text(&id("c1"), vec![DeltaOp::insert("bye")]).unwrap();

        doc.dispose();
        assert_eq!(doc.state(), DocumentState::Disposed);
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
        assert!(matches!(
            doc.update_text(&id("c1"), vec![]),
            Err(BlockDocError::Disposed(_))
        ));
        assert!(doc.connect().is_err());
        doc.dispose();
    }

    struct DisposingSource {
        bridge: std::sync::OnceLock<Weak<SyncBridge>>,
    }

    impl DocumentSource for DisposingSource {
        fn load_initial<'a>(
            &'a self,
            _page_id: &'a str,
        ) -> crate::sync::BoxFuture<'a, Result<InitialSnapshot>> {
            Box::pin(async move {
                if let Some(bridge) = self.bridge.get().and_then(Weak::upgrade) {
                    bridge.dispose();
                }
                Ok(InitialSnapshot::Empty)
            })
        }
    }

    #[test]
    fn test_dispose_during_load() {
        let source = Arc::new(DisposingSource {
            bridge: std::sync::OnceLock::new(),
        });
        let bridge = SyncBridge::new(
            "page",
            source.clone(),
            Arc::new(ManualScheduler::new()),
            DocumentConfig::default(),
        );
        source.bridge.set(Arc::downgrade(&bridge)).unwrap();

        let err = block_on(bridge.load()).unwrap_err();
        assert!(matches!(err, BlockDocError::Disposed(_)));
        assert_eq!(bridge.state(), DocumentState::Disposed);
        assert!(bridge.snapshot().is_none());
    }
}
