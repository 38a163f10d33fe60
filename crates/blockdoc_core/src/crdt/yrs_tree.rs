//! yrs implementation of [`SharedTree`].
//!
//! Document layout (all root-level maps):
//!
//! ```text
//! meta:         { page_id: <NodeId> }
//! blocks:       { <NodeId>: Y.Map { id, ty, parent, children, external_id, external_type, data: Y.Map } }
//! children_map: { <ChildrenListId>: Y.Array<NodeId> }
//! text_map:     { <TextId>: Y.Text }
//! ```
//!
//! Deep observers on the four maps turn every committed transaction into
//! [`ChangeEvent`]s, and an update observer captures the binary diff. The
//! update observer inspects the transaction origin: only broadcast origins
//! (local edits) produce a diff for collaborators, so changes received from a
//! peer are never echoed back.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use indexmap::IndexSet;
use yrs::types::{Event, PathSegment};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{
    Any, Array, ArrayPrelim, ArrayRef, DeepObservable, Doc, Map, MapPrelim, MapRef, OffsetKind,
    Options, Out, ReadTxn, StateVector, Subscription, Text, TextPrelim, TextRef, Transact,
    TransactionMut, Update,
};

use super::codec::{self, any_to_json, json_to_any};
use super::shared_tree::{SharedTree, TransactionOutcome, TreeReader, WriteOp};
use super::types::{ChangeEvent, UpdateOrigin};
use crate::block::{BlockData, ChildrenListId, Node, NodeId, TextId};
use crate::delta::{self, DeltaOp};
use crate::error::{BlockDocError, Result};
use crate::snapshot::DocumentSnapshot;

const META: &str = "meta";
const BLOCKS: &str = "blocks";
const CHILDREN_MAP: &str = "children_map";
const TEXT_MAP: &str = "text_map";

const META_PAGE_ID: &str = "page_id";

const FIELD_ID: &str = "id";
const FIELD_TY: &str = "ty";
const FIELD_PARENT: &str = "parent";
const FIELD_CHILDREN: &str = "children";
const FIELD_EXTERNAL_ID: &str = "external_id";
const FIELD_EXTERNAL_TYPE: &str = "external_type";
const FIELD_DATA: &str = "data";

const EXTERNAL_TYPE_TEXT: &str = "text";

/// Everything the observers collected since the last transaction was drained.
#[derive(Default)]
struct Collected {
    events: Vec<ChangeEvent>,
    changed: bool,
    update: Option<Vec<u8>>,
}

type Sink = Arc<Mutex<Collected>>;

/// A block document stored in a yrs [`Doc`].
pub struct YrsSharedTree {
    doc: Doc,
    meta: MapRef,
    blocks: MapRef,
    children_map: MapRef,
    text_map: MapRef,
    sink: Sink,
    _subscriptions: Vec<Subscription>,
}

impl YrsSharedTree {
    /// Create an empty document with observers attached.
    pub fn new() -> Result<Self> {
        let doc = Doc::with_options(Options {
            offset_kind: OffsetKind::Utf16,
            ..Default::default()
        });
        let meta = doc.get_or_insert_map(META);
        let blocks = doc.get_or_insert_map(BLOCKS);
        let children_map = doc.get_or_insert_map(CHILDREN_MAP);
        let text_map = doc.get_or_insert_map(TEXT_MAP);

        let sink: Sink = Arc::default();
        let mut subscriptions = vec![
            observe_keyed(&blocks, sink.clone(), |key| {
                ChangeEvent::Block(NodeId::new(key))
            }),
            observe_keyed(&children_map, sink.clone(), |key| {
                ChangeEvent::Children(ChildrenListId::new(key))
            }),
            observe_keyed(&text_map, sink.clone(), |key| {
                ChangeEvent::Text(TextId::new(key))
            }),
            observe_keyed(&meta, sink.clone(), |_| ChangeEvent::Root),
        ];

        let update_sink = sink.clone();
        let update_subscription = doc
            .observe_update_v1(move |txn, event| {
                let origin = txn
                    .origin()
                    .and_then(|o| std::str::from_utf8(o.as_ref()).ok())
                    .and_then(|s| s.parse::<UpdateOrigin>().ok());
                let mut collected = update_sink.lock().unwrap_or_else(PoisonError::into_inner);
                collected.changed = true;
                if origin.is_some_and(UpdateOrigin::is_broadcast) {
                    collected.update = Some(event.update.clone());
                }
            })
            .map_err(|e| {
                BlockDocError::Transaction(format!("failed to observe document updates: {:?}", e))
            })?;
        subscriptions.push(update_subscription);

        Ok(Self {
            doc,
            meta,
            blocks,
            children_map,
            text_map,
            sink,
            _subscriptions: subscriptions,
        })
    }

    fn drain(&self) -> TransactionOutcome {
        let collected = std::mem::take(
            &mut *self.sink.lock().unwrap_or_else(PoisonError::into_inner),
        );
        let events: IndexSet<ChangeEvent> = collected.events.into_iter().collect();
        TransactionOutcome {
            events: events.into_iter().collect(),
            changed: collected.changed,
            update: collected.update,
            failure: None,
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    fn read_node<T: ReadTxn>(&self, txn: &T, id: &NodeId) -> Option<Node> {
        let Some(Out::YMap(block)) = self.blocks.get(txn, id.as_str()) else {
            return None;
        };
        let ty = read_str(&block, txn, FIELD_TY)?;
        let fields = match block.get(txn, FIELD_DATA) {
            Some(Out::YMap(data)) => map_to_json(&data, txn),
            _ => serde_json::Map::new(),
        };
        let data = BlockData::from_fields(&ty, fields).unwrap_or_else(|e| {
            log::warn!("Block '{}' has malformed '{}' data: {}", id, ty, e);
            BlockData::Unsupported
        });
        let parent_id = read_str(&block, txn, FIELD_PARENT)
            .filter(|p| !p.is_empty())
            .map(NodeId::new);
        let children_list_id = read_str(&block, txn, FIELD_CHILDREN)
            .map(ChildrenListId::new)
            .unwrap_or_else(|| ChildrenListId::new(id.as_str()));
        let external_text_id = read_str(&block, txn, FIELD_EXTERNAL_ID)
            .filter(|t| !t.is_empty())
            .map(TextId::new);

        Some(Node {
            id: id.clone(),
            data,
            parent_id,
            children_list_id,
            external_text_id,
        })
    }

    fn read_children<T: ReadTxn>(&self, txn: &T, list: &str) -> Option<Vec<NodeId>> {
        let Some(Out::YArray(array)) = self.children_map.get(txn, list) else {
            return None;
        };
        Some(
            array
                .iter(txn)
                .filter_map(|value| match value {
                    Out::Any(Any::String(id)) => Some(NodeId::new(id.to_string())),
                    _ => None,
                })
                .collect(),
        )
    }

    fn read_text<T: ReadTxn>(&self, txn: &T, id: &str) -> Option<Vec<DeltaOp>> {
        let Some(Out::YText(text)) = self.text_map.get(txn, id) else {
            return None;
        };
        Some(codec::from_native(txn, &text))
    }

    // ========================================================================
    // Writes
    // ========================================================================

    fn list_or_insert(&self, txn: &mut TransactionMut, list: &ChildrenListId) -> ArrayRef {
        match self.children_map.get(txn, list.as_str()) {
            Some(Out::YArray(array)) => array,
            _ => {
                log::debug!("Recreating missing children list '{}'", list);
                self.children_map
                    .insert(txn, list.as_str(), ArrayPrelim::default())
            }
        }
    }

    /// Check a batch against the stored state before anything is written.
    ///
    /// Blocks and texts created or removed earlier in the batch are tracked,
    /// as is the length of every text the batch edits.
    fn check_writes(&self, writes: &[WriteOp]) -> Result<()> {
        let txn = self.doc.transact();
        let mut blocks: HashMap<&NodeId, bool> = HashMap::new();
        let mut texts: HashMap<&TextId, Option<u32>> = HashMap::new();
        for op in writes {
            match op {
                WriteOp::InsertBlock { node, text } => {
                    if let Some(ops) = text
                        && !delta::is_insert_only(ops)
                    {
                        return Err(BlockDocError::policy(
                            "initial text may only contain insert operations",
                        ));
                    }
                    blocks.insert(&node.id, true);
                    if let Some(text_id) = &node.external_text_id {
                        texts.insert(text_id, Some(text.as_deref().map_or(0, delta::length)));
                    }
                }
                WriteOp::UpdateData { id, .. } | WriteOp::SetParent { id, .. } => {
                    let stored = blocks
                        .get(id)
                        .copied()
                        .unwrap_or_else(|| self.blocks.contains_key(&txn, id.as_str()));
                    if !stored {
                        return Err(BlockDocError::Transaction(format!(
                            "block '{}' is not stored",
                            id
                        )));
                    }
                }
                WriteOp::RemoveBlock { id, text_id, .. } => {
                    blocks.insert(id, false);
                    if let Some(text_id) = text_id {
                        texts.insert(text_id, None);
                    }
                }
                WriteOp::ListInsert { .. } | WriteOp::ListRemove { .. } => {}
                WriteOp::ApplyText { text, delta: change } => {
                    let len = match texts.get(text) {
                        Some(len) => *len,
                        None => match self.text_map.get(&txn, text.as_str()) {
                            Some(Out::YText(native)) => Some(native.len(&txn)),
                            _ => None,
                        },
                    };
                    let len = len.ok_or_else(|| {
                        BlockDocError::Transaction(format!("text '{}' is not stored", text))
                    })?;
                    delta::check_change(change, len)?;
                    let removed: u32 = change
                        .iter()
                        .filter(|op| matches!(op, DeltaOp::Delete { .. }))
                        .map(DeltaOp::len)
                        .sum();
                    let inserted: u32 = change
                        .iter()
                        .filter(|op| op.is_insert())
                        .map(DeltaOp::len)
                        .sum();
                    texts.insert(text, Some(len - removed + inserted));
                }
            }
        }
        Ok(())
    }

    fn block(&self, txn: &TransactionMut, id: &NodeId) -> Result<MapRef> {
        match self.blocks.get(txn, id.as_str()) {
            Some(Out::YMap(block)) => Ok(block),
            _ => Err(BlockDocError::Transaction(format!(
                "block '{}' is not stored",
                id
            ))),
        }
    }

    fn text(&self, txn: &TransactionMut, id: &TextId) -> Result<TextRef> {
        match self.text_map.get(txn, id.as_str()) {
            Some(Out::YText(text)) => Ok(text),
            _ => Err(BlockDocError::Transaction(format!(
                "text '{}' is not stored",
                id
            ))),
        }
    }

    fn insert_block(
        &self,
        txn: &mut TransactionMut,
        node: &Node,
        text: Option<&[DeltaOp]>,
    ) -> Result<()> {
        let block = self.blocks.insert(txn, node.id.as_str(), MapPrelim::default());
        block.insert(txn, FIELD_ID, node.id.as_str());
        block.insert(txn, FIELD_TY, node.block_type().as_str());
        block.insert(
            txn,
            FIELD_PARENT,
            node.parent_id.as_ref().map(NodeId::as_str).unwrap_or(""),
        );
        block.insert(txn, FIELD_CHILDREN, node.children_list_id.as_str());
        let data = block.insert(txn, FIELD_DATA, MapPrelim::default());
        for (key, value) in node.data.to_fields() {
            data.insert(txn, key, json_to_any(&value));
        }

        self.children_map
            .insert(txn, node.children_list_id.as_str(), ArrayPrelim::default());

        if let Some(text_id) = &node.external_text_id {
            block.insert(txn, FIELD_EXTERNAL_ID, text_id.as_str());
            block.insert(txn, FIELD_EXTERNAL_TYPE, EXTERNAL_TYPE_TEXT);
            let native = self
                .text_map
                .insert(txn, text_id.as_str(), TextPrelim::new(""));
            if let Some(ops) = text {
                codec::to_native(txn, &native, ops)?;
            }
        }
        Ok(())
    }

    fn write(&self, txn: &mut TransactionMut, op: &WriteOp) -> Result<()> {
        match op {
            WriteOp::InsertBlock { node, text } => self.insert_block(txn, node, text.as_deref()),
            WriteOp::UpdateData { id, set, remove } => {
                let block = self.block(txn, id)?;
                let data = match block.get(txn, FIELD_DATA) {
                    Some(Out::YMap(data)) => data,
                    _ => block.insert(txn, FIELD_DATA, MapPrelim::default()),
                };
                for (key, value) in set {
                    data.insert(txn, key.as_str(), json_to_any(value));
                }
                for key in remove {
                    data.remove(txn, key);
                }
                Ok(())
            }
            WriteOp::SetParent { id, parent } => {
                let block = self.block(txn, id)?;
                block.insert(
                    txn,
                    FIELD_PARENT,
                    parent.as_ref().map(NodeId::as_str).unwrap_or(""),
                );
                Ok(())
            }
            WriteOp::RemoveBlock {
                id,
                children_list_id,
                text_id,
            } => {
                self.blocks.remove(txn, id.as_str());
                self.children_map.remove(txn, children_list_id.as_str());
                if let Some(text_id) = text_id {
                    self.text_map.remove(txn, text_id.as_str());
                }
                Ok(())
            }
            WriteOp::ListInsert { list, after, id } => {
                let array = self.list_or_insert(txn, list);
                let index = match after {
                    None => 0,
                    Some(after) => match positions(&array, &*txn, after).first() {
                        Some(at) => at + 1,
                        None => {
                            log::debug!(
                                "'{}' left children list '{}'; appending '{}'",
                                after,
                                list,
                                id
                            );
                            array.len(txn)
                        }
                    },
                };
                array.insert(txn, index, id.as_str());
                Ok(())
            }
            WriteOp::ListRemove { list, id } => {
                if let Some(Out::YArray(array)) = self.children_map.get(txn, list.as_str()) {
                    for index in positions(&array, &*txn, id).into_iter().rev() {
                        array.remove_range(txn, index, 1);
                    }
                }
                Ok(())
            }
            WriteOp::ApplyText { text, delta } => {
                let native = self.text(txn, text)?;
                codec::apply_to_native(txn, &native, delta)
            }
        }
    }
}

impl TreeReader for YrsSharedTree {
    fn page_id(&self) -> Option<NodeId> {
        let txn = self.doc.transact();
        read_str(&self.meta, &txn, META_PAGE_ID)
            .filter(|id| !id.is_empty())
            .map(NodeId::new)
    }

    fn node(&self, id: &NodeId) -> Option<Node> {
        let txn = self.doc.transact();
        self.read_node(&txn, id)
    }

    fn children(&self, list: &ChildrenListId) -> Option<Vec<NodeId>> {
        let txn = self.doc.transact();
        self.read_children(&txn, list.as_str())
    }

    fn text(&self, id: &TextId) -> Option<Vec<DeltaOp>> {
        let txn = self.doc.transact();
        self.read_text(&txn, id.as_str())
    }

    fn snapshot(&self) -> Option<DocumentSnapshot> {
        let txn = self.doc.transact();
        let page_id = read_str(&self.meta, &txn, META_PAGE_ID).map(NodeId::new)?;

        let mut snapshot = DocumentSnapshot {
            page_id,
            blocks: Default::default(),
            children: Default::default(),
            texts: Default::default(),
        };
        let block_ids: Vec<String> = self.blocks.keys(&txn).map(str::to_string).collect();
        for id in block_ids {
            let id = NodeId::new(id);
            if let Some(node) = self.read_node(&txn, &id) {
                snapshot.blocks.insert(id, node);
            }
        }
        let list_ids: Vec<String> = self.children_map.keys(&txn).map(str::to_string).collect();
        for list in list_ids {
            if let Some(ids) = self.read_children(&txn, &list) {
                snapshot.children.insert(ChildrenListId::new(list), ids);
            }
        }
        let text_ids: Vec<String> = self.text_map.keys(&txn).map(str::to_string).collect();
        for id in text_ids {
            if let Some(ops) = self.read_text(&txn, &id) {
                snapshot.texts.insert(TextId::new(id), ops);
            }
        }
        Some(snapshot)
    }
}

impl SharedTree for YrsSharedTree {
    fn seed(&self, snapshot: &DocumentSnapshot) -> Result<TransactionOutcome> {
        self.drain();
        let result = (|| -> Result<()> {
            let mut txn = self.doc.transact_mut_with(UpdateOrigin::Sync.as_str());
            self.meta
                .insert(&mut txn, META_PAGE_ID, snapshot.page_id.as_str());
            for node in snapshot.blocks.values() {
                let text = node
                    .external_text_id
                    .as_ref()
                    .and_then(|t| snapshot.texts.get(t))
                    .map(Vec::as_slice);
                self.insert_block(&mut txn, node, text)?;
            }
            for (list, ids) in &snapshot.children {
                let array = match self.children_map.get(&txn, list.as_str()) {
                    Some(Out::YArray(array)) => array,
                    _ => self
                        .children_map
                        .insert(&mut txn, list.as_str(), ArrayPrelim::default()),
                };
                for id in ids {
                    array.push_back(&mut txn, id.as_str());
                }
            }
            Ok(())
        })();
        let outcome = self.drain();
        result.map(|_| outcome)
    }

    fn transact(&self, origin: UpdateOrigin, writes: &[WriteOp]) -> Result<TransactionOutcome> {
        self.check_writes(writes)?;
        self.drain();
        let result = {
            let mut txn = self.doc.transact_mut_with(origin.as_str());
            writes.iter().try_for_each(|op| self.write(&mut txn, op))
        };
        let mut outcome = self.drain();
        if let Err(e) = result {
            log::error!("Write failed inside a {} transaction: {}", origin, e);
            outcome.failure = Some(e.to_string());
        }
        Ok(outcome)
    }

    fn apply_update(&self, update: &[u8], origin: UpdateOrigin) -> Result<TransactionOutcome> {
        let update = Update::decode_v1(update)
            .map_err(|e| BlockDocError::Transaction(format!("failed to decode update: {}", e)))?;
        self.drain();
        let result = {
            let mut txn = self.doc.transact_mut_with(origin.as_str());
            txn.apply_update(update)
        };
        let outcome = self.drain();
        result
            .map(|_| outcome)
            .map_err(|e| BlockDocError::Transaction(format!("failed to apply update: {}", e)))
    }

    fn encode_state_vector(&self) -> Vec<u8> {
        self.doc.transact().state_vector().encode_v1()
    }

    fn encode_state_as_update(&self) -> Vec<u8> {
        self.doc
            .transact()
            .encode_state_as_update_v1(&StateVector::default())
    }

    fn encode_diff(&self, state_vector: &[u8]) -> Result<Vec<u8>> {
        let sv = StateVector::decode_v1(state_vector).map_err(|e| {
            BlockDocError::Transaction(format!("failed to decode state vector: {}", e))
        })?;
        Ok(self.doc.transact().encode_state_as_update_v1(&sv))
    }

    fn merge_updates(&self, updates: &[Vec<u8>]) -> Result<Vec<u8>> {
        yrs::merge_updates_v1(updates)
            .map_err(|e| BlockDocError::Transaction(format!("failed to merge updates: {}", e)))
    }
}

impl std::fmt::Debug for YrsSharedTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let txn = self.doc.transact();
        f.debug_struct("YrsSharedTree")
            .field("page_id", &read_str(&self.meta, &txn, META_PAGE_ID))
            .field("blocks", &self.blocks.len(&txn))
            .finish_non_exhaustive()
    }
}

/// Observe a root map and report the top-level key touched by every nested change.
fn observe_keyed<F>(map: &MapRef, sink: Sink, make: F) -> Subscription
where
    F: Fn(&str) -> ChangeEvent + Send + Sync + 'static,
{
    map.observe_deep(move |txn, events| {
        let mut collected = sink.lock().unwrap_or_else(PoisonError::into_inner);
        for event in events.iter() {
            match event.path().front() {
                Some(PathSegment::Key(key)) => collected.events.push(make(key)),
                Some(PathSegment::Index(_)) => {}
                None => {
                    if let Event::Map(map_event) = event {
                        for key in map_event.keys(txn).keys() {
                            collected.events.push(make(key));
                        }
                    }
                }
            }
        }
    })
}

/// Indices at which `id` is stored in `array`.
fn positions<T: ReadTxn>(array: &ArrayRef, txn: &T, id: &NodeId) -> Vec<u32> {
    array
        .iter(txn)
        .enumerate()
        .filter_map(|(index, value)| match value {
            Out::Any(Any::String(stored)) if &*stored == id.as_str() => Some(index as u32),
            _ => None,
        })
        .collect()
}

fn read_str<T: ReadTxn>(map: &MapRef, txn: &T, key: &str) -> Option<String> {
    match map.get(txn, key) {
        Some(Out::Any(Any::String(s))) => Some(s.to_string()),
        _ => None,
    }
}

fn map_to_json<T: ReadTxn>(map: &MapRef, txn: &T) -> serde_json::Map<String, serde_json::Value> {
    map.iter(txn)
        .filter_map(|(key, value)| match value {
            Out::Any(any) => Some((key.to_string(), any_to_json(&any))),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::NestedBlock;

    fn seeded() -> YrsSharedTree {
        let tree = YrsSharedTree::new().unwrap();
        let page = NestedBlock::new("page", BlockData::Page)
            .text("Title")
            .child(NestedBlock::new("a", BlockData::Paragraph).text("foo"))
            .child(NestedBlock::new("b", BlockData::heading(2)).text("bar"));
        tree.seed(&DocumentSnapshot::from_nested(&page)).unwrap();
        tree
    }

    #[test]
    fn test_seed_and_read_back() {
        let tree = seeded();
        assert_eq!(tree.page_id(), Some(NodeId::new("page")));
        let heading = tree.node(&NodeId::new("b")).unwrap();
        assert_eq!(heading.data, BlockData::Heading { level: 2 });
        assert_eq!(heading.parent_id, Some(NodeId::new("page")));
        assert_eq!(
            tree.children(&ChildrenListId::new("page")).unwrap(),
            vec![NodeId::new("a"), NodeId::new("b")]
        );
        assert_eq!(
            TreeReader::text(&tree, &TextId::new("a")).unwrap(),
            vec![DeltaOp::insert("foo")]
        );

        let snapshot = tree.snapshot().unwrap();
        assert_eq!(snapshot.blocks.len(), 3);
        assert_eq!(snapshot.texts.len(), 3);
    }

    #[test]
    fn test_seed_is_not_broadcast() {
        let tree = YrsSharedTree::new().unwrap();
        let outcome = tree
            .seed(&DocumentSnapshot::new_page(NodeId::new("p"), true))
            .unwrap();
        assert!(outcome.changed);
        assert!(outcome.update.is_none());
        assert!(outcome.events.contains(&ChangeEvent::Root));
    }

    #[test]
    fn test_transact_reports_events_and_update() {
        let tree = seeded();
        let node = Node::with_id(NodeId::new("c"), BlockData::Paragraph).under(&NodeId::new("page"));
        let outcome = tree
            .transact(
                UpdateOrigin::Local,
                &[
                    WriteOp::InsertBlock {
                        node,
                        text: Some(vec![DeltaOp::insert("new")]),
                    },
                    WriteOp::ListInsert {
                        list: ChildrenListId::new("page"),
                        after: Some(NodeId::new("b")),
                        id: NodeId::new("c"),
                    },
                ],
            )
            .unwrap();
        assert!(outcome.update.is_some());
        assert!(outcome.events.contains(&ChangeEvent::Block(NodeId::new("c"))));
        assert!(outcome
            .events
            .contains(&ChangeEvent::Children(ChildrenListId::new("page"))));
        assert!(outcome.events.contains(&ChangeEvent::Text(TextId::new("c"))));
    }

    #[test]
    fn test_field_level_update_event() {
        let tree = seeded();
        let mut set = serde_json::Map::new();
        set.insert("level".into(), serde_json::json!(3));
        let outcome = tree
            .transact(
                UpdateOrigin::Local,
                &[WriteOp::UpdateData {
                    id: NodeId::new("b"),
                    set,
                    remove: vec![],
                }],
            )
            .unwrap();
        assert_eq!(outcome.events, vec![ChangeEvent::Block(NodeId::new("b"))]);
        assert_eq!(
            tree.node(&NodeId::new("b")).unwrap().data,
            BlockData::Heading { level: 3 }
        );
    }

    #[test]
    fn test_remote_update_is_not_rebroadcast() {
        let a = seeded();
        let b = YrsSharedTree::new().unwrap();
        let outcome = b
            .apply_update(&a.encode_state_as_update(), UpdateOrigin::Remote)
            .unwrap();
        assert!(outcome.changed);
        assert!(outcome.update.is_none());
        assert_eq!(b.snapshot(), a.snapshot());

        let again = b
            .apply_update(&a.encode_state_as_update(), UpdateOrigin::Remote)
            .unwrap();
        assert!(!again.changed);
        assert!(again.events.is_empty());
    }

    #[test]
    fn test_corrupt_update_is_transaction_error() {
        let tree = seeded();
        let err = tree
            .apply_update(&[0xff, 0x00, 0x13, 0x37], UpdateOrigin::Remote)
            .unwrap_err();
        assert!(matches!(err, BlockDocError::Transaction(_)));
    }

    #[test]
    fn test_state_vector_diff() {
        let a = seeded();
        let b = YrsSharedTree::new().unwrap();
        let diff = a.encode_diff(&b.encode_state_vector()).unwrap();
        b.apply_update(&diff, UpdateOrigin::Sync).unwrap();
        assert_eq!(b.page_id(), Some(NodeId::new("page")));
    }

    #[test]
    fn test_rejected_batch_writes_nothing() {
        let tree = seeded();
        let before = tree.encode_state_vector();
        let err = tree
            .transact(
                UpdateOrigin::Local,
                &[
                    WriteOp::ListRemove {
                        list: ChildrenListId::new("page"),
                        id: NodeId::new("a"),
                    },
                    WriteOp::ApplyText {
                        text: TextId::new("a"),
                        delta: vec![DeltaOp::retain(2), DeltaOp::insert("!")],
                    },
                    // "fo!o" is four units long
                    WriteOp::ApplyText {
                        text: TextId::new("a"),
                        delta: vec![DeltaOp::retain(4), DeltaOp::delete(1)],
                    },
                ],
            )
            .unwrap_err();
        assert!(matches!(err, BlockDocError::PolicyViolation(_)));
        assert_eq!(tree.encode_state_vector(), before);
        assert_eq!(
            tree.children(&ChildrenListId::new("page")).unwrap(),
            vec![NodeId::new("a"), NodeId::new("b")]
        );

        let err = tree
            .transact(
                UpdateOrigin::Local,
                &[
                    WriteOp::RemoveBlock {
                        id: NodeId::new("b"),
                        children_list_id: ChildrenListId::new("b"),
                        text_id: Some(TextId::new("b")),
                    },
                    WriteOp::SetParent {
                        id: NodeId::new("b"),
                        parent: Some(NodeId::new("a")),
                    },
                ],
            )
            .unwrap_err();
        assert!(matches!(err, BlockDocError::Transaction(_)));
        assert!(tree.node(&NodeId::new("b")).is_some());
    }

    #[test]
    fn test_list_writes_address_ids() {
        let tree = seeded();
        let page = ChildrenListId::new("page");
        let outcome = tree
            .transact(
                UpdateOrigin::Local,
                &[
                    // a lagging model may still think "gone" is listed
                    WriteOp::ListRemove {
                        list: page.clone(),
                        id: NodeId::new("gone"),
                    },
                    WriteOp::ListInsert {
                        list: page.clone(),
                        after: Some(NodeId::new("gone")),
                        id: NodeId::new("a"),
                    },
                    WriteOp::ListInsert {
                        list: ChildrenListId::new("fresh"),
                        after: None,
                        id: NodeId::new("b"),
                    },
                ],
            )
            .unwrap();
        assert!(outcome.failure.is_none());
        assert!(outcome.update.is_some());
        assert_eq!(
            tree.children(&page).unwrap(),
            vec![NodeId::new("a"), NodeId::new("b"), NodeId::new("a")]
        );
        assert_eq!(
            tree.children(&ChildrenListId::new("fresh")).unwrap(),
            vec![NodeId::new("b")]
        );

        tree.transact(
            UpdateOrigin::Local,
            &[WriteOp::ListRemove {
                list: page.clone(),
                id: NodeId::new("a"),
            }],
        )
        .unwrap();
        assert_eq!(tree.children(&page).unwrap(), vec![NodeId::new("b")]);
    }
}
