//! The action protocol: the only way a document is mutated.
//!
//! An [`ActionBatch`] stages primitive actions on a private copy of the block
//! tree. Every primitive checks its preconditions against the staged tree,
//! updates it, and records the [`WriteOp`]s that reproduce the change in the
//! shared document. When the batch is finished the staged tree is validated
//! as a whole; only a valid batch is written, as one transaction, by the
//! sync bridge. A failing primitive or a failing validation discards the
//! batch, so nothing is ever partially applied.
//!
//! [`BlockAction`] is the serializable form of the primitives, for replaying
//! a recorded batch. The composite intents of the editing surface (turn
//! into, indent, merge, ...) live in [`ActionController`].

mod intents;

pub use intents::{ActionController, DropPosition, can_indent, can_merge, can_outdent};

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::block::{BlockData, Node, NodeId, TextId};
use crate::crdt::WriteOp;
use crate::delta::{self, DeltaOp};
use crate::error::{BlockDocError, Result};
use crate::tree::BlockTree;

/// One primitive action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "action", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum BlockAction {
    /// Insert a new block after `after`, or at the head of its parent's children
    Insert {
        /// The block; its `parent_id` names the parent when `after` is absent
        node: Node,
        /// Sibling to insert after
        after: Option<NodeId>,
        /// Initial text (insert-only delta)
        text: Option<Vec<DeltaOp>>,
    },
    /// Replace a block's data with data of the same type
    Update {
        /// Block id
        id: NodeId,
        /// New data
        data: BlockData,
    },
    /// Move a block under `parent`, after `after` or at the head
    Move {
        /// Block id
        id: NodeId,
        /// New parent
        parent: NodeId,
        /// New previous sibling
        after: Option<NodeId>,
    },
    /// Delete one block (not its descendants)
    Delete {
        /// Block id
        id: NodeId,
    },
    /// Move several blocks, keeping their relative order
    MoveChildren {
        /// Blocks to move
        children: Vec<NodeId>,
        /// New parent
        parent: NodeId,
        /// Sibling to place them after
        after: Option<NodeId>,
    },
    /// Apply a change delta to a block's text
    ApplyTextDelta {
        /// Block id
        id: NodeId,
        /// Change delta
        delta: Vec<DeltaOp>,
    },
}

/// A batch of primitives staged against a copy of the model.
#[derive(Debug, Clone)]
pub struct ActionBatch {
    tree: BlockTree,
    writes: Vec<WriteOp>,
    actions: Vec<BlockAction>,
}

impl ActionBatch {
    /// Start a batch on a copy of `tree`.
    pub fn new(tree: BlockTree) -> Self {
        Self {
            tree,
            writes: Vec::new(),
            actions: Vec::new(),
        }
    }

    /// The staged tree, with every primitive so far applied.
    pub fn tree(&self) -> &BlockTree {
        &self.tree
    }

    /// Whether the batch writes nothing.
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// The primitives applied so far, in order.
    pub fn actions(&self) -> &[BlockAction] {
        &self.actions
    }

    /// Validate the staged tree and hand out the writes.
    ///
    /// A broken tree invariant here means the batch would corrupt the
    /// document (for example a deleted block whose children were not moved),
    /// which is the caller's mistake and reported as a policy violation.
    pub fn into_writes(self) -> Result<(Vec<WriteOp>, Vec<BlockAction>)> {
        if !self.writes.is_empty() {
            self.tree.validate().map_err(|e| match e {
                BlockDocError::InvariantViolation(message) => BlockDocError::PolicyViolation(
                    format!("batch would break the block tree: {}", message),
                ),
                other => other,
            })?;
        }
        Ok((self.writes, self.actions))
    }

    /// Apply a recorded primitive.
    pub fn apply(&mut self, action: BlockAction) -> Result<()> {
        match action {
            BlockAction::Insert { node, after, text } => self.insert(node, after.as_ref(), text),
            BlockAction::Update { id, data } => self.update(&id, data),
            BlockAction::Move { id, parent, after } => self.move_node(&id, &parent, after.as_ref()),
            BlockAction::Delete { id } => self.delete(&id),
            BlockAction::MoveChildren {
                children,
                parent,
                after,
            } => self.move_children(&children, &parent, after.as_ref()),
            BlockAction::ApplyTextDelta { id, delta } => self.apply_text_delta(&id, delta),
        }
    }

    /// Insert `node` right after `after`, or at the head of the children of
    /// `node.parent_id` when `after` is `None`.
    pub fn insert(
        &mut self,
        mut node: Node,
        after: Option<&NodeId>,
        text: Option<Vec<DeltaOp>>,
    ) -> Result<()> {
        if self.tree.contains(&node.id) {
            return Err(BlockDocError::policy(format!(
                "block '{}' already exists",
                node.id
            )));
        }
        let parent = match after {
            Some(after) => {
                if !self.tree.contains(after) {
                    return Err(BlockDocError::not_found(after));
                }
                self.tree.parent(after).cloned().ok_or_else(|| {
                    BlockDocError::policy(format!("cannot insert a sibling of the root '{}'", after))
                })?
            }
            None => node.parent_id.clone().ok_or_else(|| {
                BlockDocError::policy(format!("block '{}' has no parent to insert into", node.id))
            })?,
        };
        let parent_node = self
            .tree
            .node(&parent)
            .ok_or_else(|| BlockDocError::not_found(&parent))?;
        if !parent_node.block_type().can_have_children() {
            return Err(BlockDocError::policy(format!(
                "'{}' ({}) cannot have children",
                parent,
                parent_node.block_type()
            )));
        }
        let list = parent_node.children_list_id.clone();
        let index = match after {
            Some(after) => self.tree.index_in_parent(after).map_or(0, |i| i + 1),
            None => 0,
        };

        let block_type = node.block_type();
        if block_type.has_text() {
            if node.external_text_id.is_none() {
                node.external_text_id = Some(TextId::new(node.id.as_str()));
            }
        } else if text.as_ref().is_some_and(|t| !t.is_empty()) {
            return Err(BlockDocError::policy(format!(
                "{} blocks carry no text",
                block_type
            )));
        } else {
            node.external_text_id = None;
        }
        if let Some(ops) = &text
            && !delta::is_insert_only(ops)
        {
            return Err(BlockDocError::policy(
                "initial text must contain only inserts",
            ));
        }
        if let Some(text_id) = &node.external_text_id
            && self.tree.text(text_id).is_some()
        {
            return Err(BlockDocError::policy(format!(
                "text '{}' is already in use",
                text_id
            )));
        }
        if self.tree.children(&node.children_list_id).is_some() {
            return Err(BlockDocError::policy(format!(
                "children list '{}' is already in use",
                node.children_list_id
            )));
        }

        node.parent_id = Some(parent.clone());
        let text = text.map(delta::normalize);
        self.tree.set_list(node.children_list_id.clone(), Vec::new());
        if let Some(text_id) = &node.external_text_id {
            self.tree
                .set_text(text_id.clone(), text.clone().unwrap_or_default());
        }
        self.tree.put_node(node.clone());
        self.tree.list_insert(&list, index, node.id.clone());

        self.writes.push(WriteOp::InsertBlock {
            node: node.clone(),
            text: text.clone(),
        });
        self.writes.push(WriteOp::ListInsert {
            list,
            after: self.tree.prev_sibling(&node.id).cloned(),
            id: node.id.clone(),
        });
        self.actions.push(BlockAction::Insert {
            node,
            after: after.cloned(),
            text,
        });
        Ok(())
    }

    /// Replace the data of a block with data of the same type.
    ///
    /// Only the fields that differ are written.
    pub fn update(&mut self, id: &NodeId, data: BlockData) -> Result<()> {
        let node = self.tree.node(id).ok_or_else(|| BlockDocError::not_found(id))?;
        if node.block_type() != data.block_type() {
            return Err(BlockDocError::policy(format!(
                "cannot change '{}' from {} to {}; use turn-into",
                id,
                node.block_type(),
                data.block_type()
            )));
        }
        if node.data == data {
            return Ok(());
        }

        let old = node.data.to_fields();
        let new = data.to_fields();
        let set: serde_json::Map<String, serde_json::Value> = new
            .iter()
            .filter(|(key, value)| old.get(*key) != Some(*value))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        let remove: Vec<String> = old
            .keys()
            .filter(|key| !new.contains_key(*key))
            .cloned()
            .collect();

        if let Some(node) = self.tree.node_mut(id) {
            node.data = data.clone();
        }
        self.writes.push(WriteOp::UpdateData {
            id: id.clone(),
            set,
            remove,
        });
        self.actions.push(BlockAction::Update {
            id: id.clone(),
            data,
        });
        Ok(())
    }

    /// Move a block under `parent`, right after `after` or at the head.
    pub fn move_node(&mut self, id: &NodeId, parent: &NodeId, after: Option<&NodeId>) -> Result<()> {
        let node = self.tree.node(id).ok_or_else(|| BlockDocError::not_found(id))?;
        if self.tree.root_id() == Some(id) {
            return Err(BlockDocError::policy("the page block cannot be moved"));
        }
        let parent_node = self
            .tree
            .node(parent)
            .ok_or_else(|| BlockDocError::not_found(parent))?;
        if self.tree.is_descendant(parent, id) {
            return Err(BlockDocError::Cycle {
                node: id.to_string(),
                target: parent.to_string(),
            });
        }
        if !parent_node.block_type().can_have_children() {
            return Err(BlockDocError::policy(format!(
                "'{}' ({}) cannot have children",
                parent,
                parent_node.block_type()
            )));
        }
        if let Some(after) = after {
            if after == id {
                return Err(BlockDocError::policy(format!(
                    "cannot place '{}' after itself",
                    id
                )));
            }
            if !self.tree.contains(after) {
                return Err(BlockDocError::not_found(after));
            }
            if self.tree.parent(after) != Some(parent) {
                return Err(BlockDocError::policy(format!(
                    "'{}' is not a child of '{}'",
                    after, parent
                )));
            }
        }
        let old_parent = node.parent_id.clone();
        let new_list = parent_node.children_list_id.clone();

        if let Some(old_list) = self.tree.list_of(id).cloned()
            && self.tree.list_remove(&old_list, id).is_some()
        {
            self.writes.push(WriteOp::ListRemove {
                list: old_list,
                id: id.clone(),
            });
        }
        let index = match after {
            Some(after) => self.tree.index_in_parent(after).map_or(0, |i| i + 1),
            None => 0,
        };
        self.tree.list_insert(&new_list, index, id.clone());
        self.writes.push(WriteOp::ListInsert {
            list: new_list,
            after: after.cloned(),
            id: id.clone(),
        });
        if old_parent.as_ref() != Some(parent)
            && let Some(node) = self.tree.node_mut(id)
        {
            node.parent_id = Some(parent.clone());
        }
        // Rewritten even when unchanged: the stored pointer decides which
        // list keeps the block when two moves of it race
        self.writes.push(WriteOp::SetParent {
            id: id.clone(),
            parent: Some(parent.clone()),
        });
        self.actions.push(BlockAction::Move {
            id: id.clone(),
            parent: parent.clone(),
            after: after.cloned(),
        });
        Ok(())
    }

    /// Delete one block with its children list and text.
    ///
    /// Descendants are not deleted. A block that still has children when the
    /// batch is finished leaves them without a parent, and the batch is
    /// rejected; move or delete them within the same batch.
    pub fn delete(&mut self, id: &NodeId) -> Result<()> {
        let node = self
            .tree
            .node(id)
            .cloned()
            .ok_or_else(|| BlockDocError::not_found(id))?;
        if self.tree.root_id() == Some(id) {
            return Err(BlockDocError::policy("the page block cannot be deleted"));
        }
        // The containing list is gone already when the parent was deleted earlier in the batch
        if let Some(list) = self.tree.list_of(id).cloned()
            && self.tree.list_remove(&list, id).is_some()
        {
            self.writes.push(WriteOp::ListRemove {
                list,
                id: id.clone(),
            });
        }
        self.tree.remove_list(&node.children_list_id);
        if let Some(text_id) = &node.external_text_id {
            self.tree.remove_text(text_id);
        }
        self.tree.remove_node(id);
        self.writes.push(WriteOp::RemoveBlock {
            id: id.clone(),
            children_list_id: node.children_list_id,
            text_id: node.external_text_id,
        });
        self.actions.push(BlockAction::Delete { id: id.clone() });
        Ok(())
    }

    /// Move several blocks under `parent`, after `after` (or at the head),
    /// keeping their relative order.
    pub fn move_children(
        &mut self,
        children: &[NodeId],
        parent: &NodeId,
        after: Option<&NodeId>,
    ) -> Result<()> {
        let mut previous = after.cloned();
        for child in children {
            self.move_node(child, parent, previous.as_ref())?;
            previous = Some(child.clone());
        }
        Ok(())
    }

    /// Apply a change delta to the text of a block.
    pub fn apply_text_delta(&mut self, id: &NodeId, change: Vec<DeltaOp>) -> Result<()> {
        let node = self.tree.node(id).ok_or_else(|| BlockDocError::not_found(id))?;
        let text_id = node
            .external_text_id
            .clone()
            .ok_or_else(|| BlockDocError::policy(format!("'{}' carries no text", id)))?;
        let change = delta::normalize(change);
        if change.is_empty() {
            return Ok(());
        }
        let current = self.tree.text(&text_id).unwrap_or(&[]);
        let updated = delta::compose(current, &change)?;

        self.tree.set_text(text_id.clone(), updated);
        self.writes.push(WriteOp::ApplyText {
            text: text_id,
            delta: change.clone(),
        });
        self.actions.push(BlockAction::ApplyTextDelta {
            id: id.clone(),
            delta: change,
        });
        Ok(())
    }
}
