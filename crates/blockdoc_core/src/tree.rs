//! In-memory block tree model.
//!
//! [`BlockTree`] is the read-side projection of the shared document: nodes,
//! children lists, texts and a derived relation index for O(1) parent
//! lookups. It never writes to the shared document. It is refreshed from the
//! [`ChangeEvent`]s a transaction produced ([`BlockTree::apply_change_events`])
//! and every refresh is validated before it becomes visible, so a subscriber
//! never sees a tree that breaks the single-parent rule.
//!
//! Concurrent structural edits can merge into a shared state that no single
//! replica wrote: a block listed under two parents, a child of a deleted
//! block, or a block listed twice. Such a state is settled by rebuilding the
//! whole model with [`BlockTree::settle_snapshot`], whose result depends on
//! the shared state alone, so every replica shows the same tree.
//!
//! The action layer also clones the tree to stage a batch of primitives and
//! validate the result before anything is written (see [`crate::actions`]).

use std::collections::{HashMap, HashSet};

use indexmap::IndexSet;
use serde::Serialize;
use similar::{Algorithm, DiffOp};
use ts_rs::TS;

use crate::block::{ChildrenListId, Node, NodeId, TextId};
use crate::crdt::{ChangeEvent, TreeReader, UpdateOrigin};
use crate::delta::DeltaOp;
use crate::error::{BlockDocError, Result};
use crate::snapshot::{DocumentSnapshot, NestedBlock};

/// What one transaction changed, as seen by subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ModelDelta {
    /// Origin of the transaction
    pub origin: UpdateOrigin,
    /// Blocks that now exist and did not before
    pub added: Vec<NodeId>,
    /// Blocks that no longer exist
    pub removed: Vec<NodeId>,
    /// Blocks that changed parent or position among their siblings
    pub moved: Vec<NodeId>,
    /// Blocks whose data changed
    pub updated: Vec<NodeId>,
    /// Children lists whose content changed
    pub children_changed: Vec<ChildrenListId>,
    /// Texts whose content changed
    pub text_changed: Vec<TextId>,
}

impl ModelDelta {
    /// A delta describing no change.
    pub fn empty(origin: UpdateOrigin) -> Self {
        Self {
            origin,
            added: Vec::new(),
            removed: Vec::new(),
            moved: Vec::new(),
            updated: Vec::new(),
            children_changed: Vec::new(),
            text_changed: Vec::new(),
        }
    }

    /// Whether nothing changed.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.moved.is_empty()
            && self.updated.is_empty()
            && self.children_changed.is_empty()
            && self.text_changed.is_empty()
    }
}

/// The typed block tree of one document.
#[derive(Debug, Clone, Default)]
pub struct BlockTree {
    root: Option<NodeId>,
    nodes: HashMap<NodeId, Node>,
    lists: HashMap<ChildrenListId, Vec<NodeId>>,
    texts: HashMap<TextId, Vec<DeltaOp>>,
    // Relation map: block -> list containing it -> owner of that list
    containing_list: HashMap<NodeId, ChildrenListId>,
    list_owners: HashMap<ChildrenListId, NodeId>,
    // The last rebuild had conflicts to settle; refresh fully until it has none
    settled_conflicts: bool,
}

impl BlockTree {
    /// An empty tree with no root.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and validate a tree from a snapshot.
    pub fn from_snapshot(snapshot: &DocumentSnapshot) -> Result<Self> {
        let mut tree = Self {
            root: Some(snapshot.page_id.clone()),
            ..Self::default()
        };
        for node in snapshot.blocks.values() {
            tree.put_node(node.clone());
        }
        for (list, ids) in &snapshot.children {
            tree.set_list(list.clone(), ids.clone());
        }
        for (id, ops) in &snapshot.texts {
            tree.texts.insert(id.clone(), crate::delta::normalize(ops.clone()));
        }
        tree.validate()?;
        Ok(tree)
    }

    /// Build a tree from the state of the shared document, settling the
    /// conflicts that concurrent structural edits leave behind.
    ///
    /// Returns the tree and one message per settled conflict:
    ///
    /// - a block stays in a children list only when its stored parent pointer
    ///   names the list's owner, and only its first occurrence is kept;
    /// - entries naming missing blocks and lists without an owner are dropped;
    /// - a block without a children list gets an empty one;
    /// - blocks that are then unreachable from the root (children of a deleted
    ///   block, detached cycles) are appended to the root, one detached
    ///   subtree at a time, in id order.
    ///
    /// Nothing is deleted. Blocks are visited in id order, so the outcome
    /// depends on the snapshot content only.
    pub fn settle_snapshot(snapshot: &DocumentSnapshot) -> Result<(Self, Vec<String>)> {
        let root = snapshot.page_id.clone();
        if !snapshot.blocks.contains_key(&root) {
            return Err(invariant(format!("root block '{}' is missing", root)));
        }
        let mut conflicts = Vec::new();
        let mut tree = Self {
            root: Some(root.clone()),
            ..Self::default()
        };

        let mut ids: Vec<&NodeId> = snapshot.blocks.keys().collect();
        ids.sort();
        for id in &ids {
            let mut node = snapshot.blocks[*id].clone();
            if *id == &root && node.parent_id.take().is_some() {
                conflicts.push(format!("root block '{}' had a parent", root));
            }
            tree.put_node(node);
        }

        let mut lists: Vec<&ChildrenListId> = snapshot.children.keys().collect();
        lists.sort();
        for list in lists {
            let entries = &snapshot.children[list];
            let Some(owner) = tree.list_owners.get(list).cloned() else {
                if !entries.is_empty() {
                    conflicts.push(format!("children list '{}' has no owner block", list));
                }
                continue;
            };
            let mut seen = HashSet::new();
            let mut kept = Vec::with_capacity(entries.len());
            for id in entries {
                let belongs = id != &root
                    && tree
                        .nodes
                        .get(id)
                        .is_some_and(|node| node.parent_id.as_ref() == Some(&owner));
                if belongs && seen.insert(id) {
                    kept.push(id.clone());
                } else {
                    conflicts.push(format!("dropped '{}' from children list '{}'", id, list));
                }
            }
            tree.set_list(list.clone(), kept);
        }
        for id in &ids {
            let list = tree.nodes[*id].children_list_id.clone();
            if !tree.lists.contains_key(&list) {
                conflicts.push(format!("block '{}' had no children list '{}'", id, list));
                tree.lists.insert(list, Vec::new());
            }
        }

        let root_list = tree.nodes[&root].children_list_id.clone();
        let mut reachable: HashSet<NodeId> = tree.descendants_and_self(&root).into_iter().collect();
        for id in ids {
            if reachable.contains(id) {
                continue;
            }
            // Climb to the top of the detached subtree; in a cycle, stop at the first repeat
            let mut top = id.clone();
            let mut climbed = HashSet::new();
            while climbed.insert(top.clone()) {
                match tree.parent(&top) {
                    Some(parent) => top = parent.clone(),
                    None => break,
                }
            }
            if let Some(list) = tree.list_of(&top).cloned() {
                tree.list_remove(&list, &top);
            }
            if let Some(node) = tree.node_mut(&top) {
                node.parent_id = Some(root.clone());
            }
            tree.list_insert(&root_list, usize::MAX, top.clone());
            reachable.extend(tree.descendants_and_self(&top));
            conflicts.push(format!("block '{}' was unreachable and now sits under the root", top));
        }

        for (id, ops) in &snapshot.texts {
            tree.texts.insert(id.clone(), crate::delta::normalize(ops.clone()));
        }
        tree.settled_conflicts = !conflicts.is_empty();
        tree.validate()?;
        Ok((tree, conflicts))
    }

    /// Export as a flat snapshot, children lists in tree order.
    pub fn to_snapshot(&self) -> Option<DocumentSnapshot> {
        let root = self.root.clone()?;
        let mut snapshot = DocumentSnapshot {
            page_id: root.clone(),
            blocks: Default::default(),
            children: Default::default(),
            texts: Default::default(),
        };
        for id in self.descendants_and_self(&root) {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            if let Some(ids) = self.lists.get(&node.children_list_id) {
                snapshot
                    .children
                    .insert(node.children_list_id.clone(), ids.clone());
            }
            if let Some(text_id) = &node.external_text_id
                && let Some(ops) = self.texts.get(text_id)
            {
                snapshot.texts.insert(text_id.clone(), ops.clone());
            }
            snapshot.blocks.insert(id, node.clone());
        }
        Some(snapshot)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Id of the root (page) block.
    pub fn root_id(&self) -> Option<&NodeId> {
        self.root.as_ref()
    }

    /// Look up a block.
    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Whether a block exists.
    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Number of blocks, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree has no blocks.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Content of a children list.
    pub fn children(&self, list: &ChildrenListId) -> Option<&[NodeId]> {
        self.lists.get(list).map(Vec::as_slice)
    }

    /// Children of a block (empty when the block is unknown).
    pub fn children_of(&self, id: &NodeId) -> &[NodeId] {
        self.nodes
            .get(id)
            .and_then(|node| self.children(&node.children_list_id))
            .unwrap_or(&[])
    }

    /// Parent of a block, from the relation map.
    pub fn parent(&self, id: &NodeId) -> Option<&NodeId> {
        self.containing_list
            .get(id)
            .and_then(|list| self.list_owners.get(list))
    }

    /// Position of a block among its siblings.
    pub fn index_in_parent(&self, id: &NodeId) -> Option<usize> {
        let list = self.containing_list.get(id)?;
        self.lists.get(list)?.iter().position(|c| c == id)
    }

    /// Sibling right before a block.
    pub fn prev_sibling(&self, id: &NodeId) -> Option<&NodeId> {
        let index = self.index_in_parent(id)?;
        let list = self.containing_list.get(id)?;
        index.checked_sub(1).and_then(|i| self.lists.get(list)?.get(i))
    }

    /// Sibling right after a block.
    pub fn next_sibling(&self, id: &NodeId) -> Option<&NodeId> {
        let index = self.index_in_parent(id)?;
        let list = self.containing_list.get(id)?;
        self.lists.get(list)?.get(index + 1)
    }

    /// Text content by text id.
    pub fn text(&self, id: &TextId) -> Option<&[DeltaOp]> {
        self.texts.get(id).map(Vec::as_slice)
    }

    /// Text content of a block.
    pub fn text_of(&self, id: &NodeId) -> Option<&[DeltaOp]> {
        let text_id = self.nodes.get(id)?.external_text_id.as_ref()?;
        self.text(text_id)
    }

    /// Whether `id` is `ancestor` or lies somewhere below it.
    pub fn is_descendant(&self, id: &NodeId, ancestor: &NodeId) -> bool {
        let mut current = Some(id);
        let mut steps = 0;
        while let Some(node) = current {
            if node == ancestor {
                return true;
            }
            steps += 1;
            if steps > self.nodes.len() {
                // only reachable on a corrupted relation map
                return false;
            }
            current = self.parent(node);
        }
        false
    }

    /// A block and all blocks below it, in reading order.
    pub fn descendants_and_self(&self, id: &NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![id.clone()];
        while let Some(current) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            stack.extend(self.children_of(&current).iter().rev().cloned());
            out.push(current);
        }
        out
    }

    /// The tree as nested blocks, starting at the root.
    pub fn to_nested(&self) -> Option<NestedBlock> {
        let root = self.root.as_ref()?;
        self.nested_at(root)
    }

    /// A subtree as nested blocks.
    pub fn nested_at(&self, id: &NodeId) -> Option<NestedBlock> {
        let node = self.nodes.get(id)?;
        Some(NestedBlock {
            id: id.clone(),
            data: node.data.clone(),
            text: self.text_of(id).map(<[DeltaOp]>::to_vec),
            children: self
                .children_of(id)
                .iter()
                .filter_map(|child| self.nested_at(child))
                .collect(),
        })
    }

    // ========================================================================
    // Invariants
    // ========================================================================

    /// Check the tree invariants.
    ///
    /// The root exists and has no parent. Every other block appears in exactly
    /// one children list whose owner matches its parent pointer, and every
    /// list entry names an existing block. Every block owns a distinct,
    /// existing children list and is reachable from the root.
    pub fn validate(&self) -> Result<()> {
        let root = self
            .root
            .as_ref()
            .ok_or_else(|| invariant("document has no root block"))?;
        let root_node = self
            .nodes
            .get(root)
            .ok_or_else(|| invariant(format!("root block '{}' is missing", root)))?;
        if root_node.parent_id.is_some() {
            return Err(invariant(format!("root block '{}' has a parent", root)));
        }

        let mut listed_in: HashMap<&NodeId, &ChildrenListId> = HashMap::new();
        for (list, ids) in &self.lists {
            if ids.is_empty() {
                continue;
            }
            if !self.list_owners.contains_key(list) {
                return Err(invariant(format!(
                    "children list '{}' has no owner block",
                    list
                )));
            }
            for id in ids {
                if !self.nodes.contains_key(id) {
                    return Err(invariant(format!(
                        "children list '{}' references missing block '{}'",
                        list, id
                    )));
                }
                if let Some(other) = listed_in.insert(id, list) {
                    return Err(invariant(format!(
                        "block '{}' appears in children lists '{}' and '{}'",
                        id, other, list
                    )));
                }
            }
        }

        for (id, node) in &self.nodes {
            if !self.lists.contains_key(&node.children_list_id) {
                return Err(invariant(format!(
                    "children list '{}' of block '{}' does not exist",
                    node.children_list_id, id
                )));
            }
            if self.list_owners.get(&node.children_list_id) != Some(id) {
                return Err(invariant(format!(
                    "children list '{}' of block '{}' is shared or missing",
                    node.children_list_id, id
                )));
            }
            if id == root {
                if listed_in.contains_key(id) {
                    return Err(invariant(format!("root block '{}' is listed as a child", id)));
                }
                continue;
            }
            let list = listed_in
                .get(id)
                .ok_or_else(|| invariant(format!("block '{}' has no parent", id)))?;
            let owner = self.list_owners.get(*list);
            if node.parent_id.as_ref() != owner {
                return Err(invariant(format!(
                    "block '{}' points at parent {:?} but is listed under {:?}",
                    id,
                    node.parent_id.as_ref().map(NodeId::as_str),
                    owner.map(NodeId::as_str)
                )));
            }
        }

        let reachable = self.descendants_and_self(root).len();
        if reachable != self.nodes.len() {
            return Err(invariant(format!(
                "{} blocks are not reachable from the root",
                self.nodes.len() - reachable
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Refresh from the shared document
    // ========================================================================

    /// Refresh the model from the events of one committed transaction.
    ///
    /// Only the touched blocks, lists and texts are re-read, on a copy that is
    /// validated before it replaces `self`. When the copy breaks an invariant,
    /// or conflicts are still being settled, the model is rebuilt with
    /// [`rebuild`](Self::rebuild) instead. On error `self` is left untouched.
    pub fn apply_change_events(
        &mut self,
        events: &[ChangeEvent],
        reader: &dyn TreeReader,
        origin: UpdateOrigin,
    ) -> Result<ModelDelta> {
        if events.is_empty() {
            return Ok(ModelDelta::empty(origin));
        }
        if self.settled_conflicts {
            return self.rebuild(reader, origin);
        }

        let mut nodes: IndexSet<NodeId> = IndexSet::new();
        let mut lists: IndexSet<ChildrenListId> = IndexSet::new();
        let mut texts: IndexSet<TextId> = IndexSet::new();
        let mut root_changed = false;
        for event in events {
            match event {
                ChangeEvent::Block(id) => {
                    nodes.insert(id.clone());
                }
                ChangeEvent::Children(list) => {
                    lists.insert(list.clone());
                }
                ChangeEvent::Text(id) => {
                    texts.insert(id.clone());
                }
                ChangeEvent::Root => root_changed = true,
            }
        }

        let mut staged = self.clone();
        if root_changed {
            staged.root = reader.page_id();
        }
        for id in &nodes {
            match reader.node(id) {
                Some(node) => staged.put_node(node),
                None => staged.remove_node(id),
            }
        }
        for list in &lists {
            match reader.children(list) {
                Some(ids) => staged.set_list(list.clone(), ids),
                None => staged.remove_list(list),
            }
        }
        for id in &texts {
            match reader.text(id) {
                Some(ops) => {
                    staged.texts.insert(id.clone(), ops);
                }
                None => {
                    staged.texts.remove(id);
                }
            }
        }

        if let Err(e) = staged.validate() {
            log::debug!("Incremental refresh rejected ({}); rebuilding the model", e);
            return self.rebuild(reader, origin);
        }
        let delta = self.delta_to(&staged, &nodes, &lists, &texts, origin);
        *self = staged;
        Ok(delta)
    }

    /// Rebuild the whole model from the shared document, settling conflicts
    /// (see [`settle_snapshot`](Self::settle_snapshot)).
    ///
    /// Each settled conflict is logged. The delta covers every block, list
    /// and text of the old and the new model.
    pub fn rebuild(&mut self, reader: &dyn TreeReader, origin: UpdateOrigin) -> Result<ModelDelta> {
        let snapshot = reader
            .snapshot()
            .ok_or_else(|| invariant("shared document has no root"))?;
        let (next, conflicts) = Self::settle_snapshot(&snapshot)?;
        for conflict in &conflicts {
            log::warn!("Settled a concurrent edit conflict: {}", conflict);
        }

        let nodes = sorted_union(self.nodes.keys(), next.nodes.keys());
        let lists = sorted_union(self.lists.keys(), next.lists.keys());
        let texts = sorted_union(self.texts.keys(), next.texts.keys());
        let delta = self.delta_to(&next, &nodes, &lists, &texts, origin);
        *self = next;
        Ok(delta)
    }

    /// Rebuild the whole model from the shared document.
    pub fn reload(&mut self, reader: &dyn TreeReader) -> Result<()> {
        self.rebuild(reader, UpdateOrigin::Sync).map(|_| ())
    }

    /// Whether the last rebuild had conflicts to settle.
    pub fn has_settled_conflicts(&self) -> bool {
        self.settled_conflicts
    }

    fn delta_to(
        &self,
        next: &BlockTree,
        nodes: &IndexSet<NodeId>,
        lists: &IndexSet<ChildrenListId>,
        texts: &IndexSet<TextId>,
        origin: UpdateOrigin,
    ) -> ModelDelta {
        let mut delta = ModelDelta::empty(origin);

        for id in nodes {
            match (self.nodes.get(id), next.nodes.get(id)) {
                (None, Some(_)) => delta.added.push(id.clone()),
                (Some(_), None) => delta.removed.push(id.clone()),
                (Some(before), Some(after)) if before.data != after.data => {
                    delta.updated.push(id.clone())
                }
                _ => {}
            }
        }

        let mut moved: IndexSet<NodeId> = IndexSet::new();
        for list in lists {
            let before = self.lists.get(list).map(Vec::as_slice).unwrap_or(&[]);
            let after = next.lists.get(list).map(Vec::as_slice).unwrap_or(&[]);
            if before == after {
                continue;
            }
            delta.children_changed.push(list.clone());

            for id in after {
                if self.contains(id) && self.parent(id) != next.parent(id) {
                    moved.insert(id.clone());
                }
            }
            // Reordered within the same list: survivors off the longest common subsequence
            let stayed: Vec<&NodeId> = before.iter().filter(|id| after.contains(id)).collect();
            let kept: Vec<&NodeId> = after.iter().filter(|id| before.contains(id)).collect();
            for op in similar::capture_diff_slices(Algorithm::Myers, &stayed, &kept) {
                if let DiffOp::Insert {
                    new_index, new_len, ..
                }
                | DiffOp::Replace {
                    new_index, new_len, ..
                } = op
                {
                    moved.extend(kept[new_index..new_index + new_len].iter().map(|id| (*id).clone()));
                }
            }
        }
        delta.moved = moved
            .into_iter()
            .filter(|id| !delta.added.contains(id))
            .collect();

        for id in texts {
            if self.texts.get(id) != next.texts.get(id) {
                delta.text_changed.push(id.clone());
            }
        }
        delta
    }

    // ========================================================================
    // Mutation (crate-internal; used for refresh and for staging batches)
    // ========================================================================

    pub(crate) fn put_node(&mut self, node: Node) {
        if let Some(old) = self.nodes.get(&node.id)
            && old.children_list_id != node.children_list_id
            && self.list_owners.get(&old.children_list_id) == Some(&node.id)
        {
            self.list_owners.remove(&old.children_list_id);
        }
        self.list_owners
            .insert(node.children_list_id.clone(), node.id.clone());
        self.nodes.insert(node.id.clone(), node);
    }

    pub(crate) fn remove_node(&mut self, id: &NodeId) {
        if let Some(node) = self.nodes.remove(id)
            && self.list_owners.get(&node.children_list_id) == Some(id)
        {
            self.list_owners.remove(&node.children_list_id);
        }
    }

    pub(crate) fn node_mut(&mut self, id: &NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub(crate) fn set_list(&mut self, list: ChildrenListId, ids: Vec<NodeId>) {
        self.detach_list(&list);
        for id in &ids {
            self.containing_list.insert(id.clone(), list.clone());
        }
        self.lists.insert(list, ids);
    }

    pub(crate) fn remove_list(&mut self, list: &ChildrenListId) {
        self.detach_list(list);
        self.lists.remove(list);
    }

    fn detach_list(&mut self, list: &ChildrenListId) {
        if let Some(old) = self.lists.get(list) {
            for id in old {
                if self.containing_list.get(id) == Some(list) {
                    self.containing_list.remove(id);
                }
            }
        }
    }

    pub(crate) fn list_insert(&mut self, list: &ChildrenListId, index: usize, id: NodeId) {
        let ids = self.lists.entry(list.clone()).or_default();
        let index = index.min(ids.len());
        ids.insert(index, id.clone());
        self.containing_list.insert(id, list.clone());
    }

    pub(crate) fn list_remove(&mut self, list: &ChildrenListId, id: &NodeId) -> Option<usize> {
        let ids = self.lists.get_mut(list)?;
        let index = ids.iter().position(|c| c == id)?;
        ids.remove(index);
        if self.containing_list.get(id) == Some(list) {
            self.containing_list.remove(id);
        }
        Some(index)
    }

    pub(crate) fn list_of(&self, id: &NodeId) -> Option<&ChildrenListId> {
        self.containing_list.get(id)
    }

    pub(crate) fn set_text(&mut self, id: TextId, ops: Vec<DeltaOp>) {
        self.texts.insert(id, ops);
    }

    pub(crate) fn remove_text(&mut self, id: &TextId) {
        self.texts.remove(id);
    }
}

fn sorted_union<'a, T>(
    left: impl Iterator<Item = &'a T>,
    right: impl Iterator<Item = &'a T>,
) -> IndexSet<T>
where
    T: Ord + Clone + std::hash::Hash + 'a,
{
    let mut all: Vec<&T> = left.chain(right).collect();
    all.sort();
    all.dedup();
    all.into_iter().cloned().collect()
}

fn invariant(message: impl Into<String>) -> BlockDocError {
    BlockDocError::InvariantViolation(message.into())
}
