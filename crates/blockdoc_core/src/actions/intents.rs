//! Composite editing intents.
//!
//! Each intent reads the current model, expresses itself as primitives on an
//! [`ActionBatch`] and commits them as one local transaction through the
//! document handle. Either the whole intent lands or nothing does.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use super::{ActionBatch, BlockAction};
use crate::block::{BlockData, Node, NodeId, SplitPlacement};
use crate::delta::{self, Attributes, DeltaOp};
use crate::error::{BlockDocError, Result};
use crate::sync::DocumentHandle;
use crate::tree::{BlockTree, ModelDelta};

/// Where a dragged block lands relative to the drop target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum DropPosition {
    /// Right before the target, same parent
    Before,
    /// Right after the target, same parent
    After,
    /// Last child of the target
    Inside,
}

/// Translates editing intents into atomic batches of primitive actions.
///
/// The controller is stateless; every call names the document it acts on.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActionController;

impl ActionController {
    /// Create a controller.
    pub fn new() -> Self {
        Self
    }

    // ========================================================================
    // Primitives
    // ========================================================================

    /// Insert a block, see [`ActionBatch::insert`].
    pub fn insert(
        &self,
        doc: &DocumentHandle,
        node: Node,
        after: Option<&NodeId>,
        text: Option<Vec<DeltaOp>>,
    ) -> Result<ModelDelta> {
        commit(doc, |batch| batch.insert(node, after, text))
    }

    /// Update a block's data, see [`ActionBatch::update`].
    pub fn update(&self, doc: &DocumentHandle, id: &NodeId, data: BlockData) -> Result<ModelDelta> {
        commit(doc, |batch| batch.update(id, data))
    }

    /// Move a block, see [`ActionBatch::move_node`].
    pub fn move_node(
        &self,
        doc: &DocumentHandle,
        id: &NodeId,
        parent: &NodeId,
        after: Option<&NodeId>,
    ) -> Result<ModelDelta> {
        commit(doc, |batch| batch.move_node(id, parent, after))
    }

    /// Delete a block, see [`ActionBatch::delete`].
    pub fn delete(&self, doc: &DocumentHandle, id: &NodeId) -> Result<ModelDelta> {
        commit(doc, |batch| batch.delete(id))
    }

    /// Move several blocks, see [`ActionBatch::move_children`].
    pub fn move_children(
        &self,
        doc: &DocumentHandle,
        children: &[NodeId],
        parent: &NodeId,
        after: Option<&NodeId>,
    ) -> Result<ModelDelta> {
        commit(doc, |batch| batch.move_children(children, parent, after))
    }

    /// Apply a change delta to a block's text right away.
    pub fn apply_text_delta(
        &self,
        doc: &DocumentHandle,
        id: &NodeId,
        change: Vec<DeltaOp>,
    ) -> Result<ModelDelta> {
        commit(doc, |batch| batch.apply_text_delta(id, change))
    }

    /// Replay recorded primitives as one transaction.
    pub fn replay(&self, doc: &DocumentHandle, actions: Vec<BlockAction>) -> Result<ModelDelta> {
        commit(doc, |batch| actions.into_iter().try_for_each(|a| batch.apply(a)))
    }

    // ========================================================================
    // Intents
    // ========================================================================

    /// Change the type of a block.
    ///
    /// A new block of the target type takes the source's place and text; the
    /// source's children move under it, or become its following siblings when
    /// the new type cannot have children. The source is deleted. Returns the
    /// id of the new block.
    pub fn turn_into(&self, doc: &DocumentHandle, id: &NodeId, data: BlockData) -> Result<NodeId> {
        let new_id = NodeId::generate();
        doc.apply_local_transaction(|batch| {
            let tree = batch.tree();
            if !tree.contains(id) {
                return Err(BlockDocError::not_found(id));
            }
            let parent = tree
                .parent(id)
                .cloned()
                .ok_or_else(|| BlockDocError::policy("the page block cannot change type"))?;
            let new_type = data.block_type();
            let text = if new_type.has_text() {
                tree.text_of(id).map(<[DeltaOp]>::to_vec)
            } else {
                None
            };
            let children = tree.children_of(id).to_vec();

            let node = Node::with_id(new_id.clone(), data).under(&parent);
            batch.insert(node, Some(id), text)?;
            if new_type.can_have_children() {
                batch.move_children(&children, &new_id, None)?;
            } else {
                batch.move_children(&children, &parent, Some(&new_id))?;
            }
            batch.delete(id)
        })?;
        Ok(new_id)
    }

    /// Make a block the last child of its previous sibling.
    ///
    /// The block's own children become its following siblings. When the
    /// block has no previous sibling or that sibling cannot have children,
    /// nothing happens and the returned delta is empty.
    pub fn indent(&self, doc: &DocumentHandle, id: &NodeId) -> Result<ModelDelta> {
        commit(doc, |batch| {
            let tree = batch.tree();
            if !tree.contains(id) {
                return Err(BlockDocError::not_found(id));
            }
            if can_indent(tree, id).is_err() {
                return Ok(());
            }
            let Some(prev) = tree.prev_sibling(id).cloned() else {
                return Ok(());
            };
            let last = tree.children_of(&prev).last().cloned();
            let children = tree.children_of(id).to_vec();
            batch.move_node(id, &prev, last.as_ref())?;
            batch.move_children(&children, &prev, Some(id))
        })
    }

    /// Make a block the next sibling of its parent.
    ///
    /// The siblings that followed it become its trailing children, when it
    /// can have children. Blocks directly under the page stay put.
    pub fn outdent(&self, doc: &DocumentHandle, id: &NodeId) -> Result<ModelDelta> {
        commit(doc, |batch| {
            let tree = batch.tree();
            let node = tree.node(id).ok_or_else(|| BlockDocError::not_found(id))?;
            if can_outdent(tree, id).is_err() {
                return Ok(());
            }
            let Some(parent) = tree.parent(id).cloned() else {
                return Ok(());
            };
            let Some(grandparent) = tree.parent(&parent).cloned() else {
                return Ok(());
            };
            let following: Vec<NodeId> = match tree.index_in_parent(id) {
                Some(index) if node.block_type().can_have_children() => {
                    tree.children_of(&parent)[index + 1..].to_vec()
                }
                _ => Vec::new(),
            };
            let last = tree.children_of(id).last().cloned();
            batch.move_node(id, &grandparent, Some(&parent))?;
            batch.move_children(&following, id, last.as_ref())
        })
    }

    /// Append the text of `source` to `target` and delete `source`.
    ///
    /// Runs keep their own attributes across the seam. The source's children
    /// go under the target at the source's position when the source was a
    /// child of the target, after the target's last child otherwise, and
    /// after the target itself when the target cannot have children.
    pub fn merge(&self, doc: &DocumentHandle, source: &NodeId, target: &NodeId) -> Result<ModelDelta> {
        commit(doc, |batch| {
            let tree = batch.tree();
            can_merge(tree, source, target)?;
            let target_node = tree
                .node(target)
                .ok_or_else(|| BlockDocError::not_found(target))?;
            let target_text = tree.text_of(target).unwrap_or(&[]);
            let source_text = tree.text_of(source).unwrap_or(&[]).to_vec();
            let children = tree.children_of(source).to_vec();

            let (parent, after) = if target_node.block_type().can_have_children() {
                let after = if tree.parent(source) == Some(target) {
                    tree.prev_sibling(source).cloned()
                } else {
                    tree.children_of(target).last().cloned()
                };
                (target.clone(), after)
            } else {
                let parent = tree.parent(target).cloned().ok_or_else(|| {
                    BlockDocError::policy(format!("'{}' has no parent to lift children into", target))
                })?;
                (parent, Some(target.clone()))
            };

            if !source_text.is_empty() {
                let mut change = vec![DeltaOp::retain(delta::length(target_text))];
                change.extend(source_text);
                batch.apply_text_delta(target, change)?;
            }
            batch.move_children(&children, &parent, after.as_ref())?;
            batch.delete(source)
        })
    }

    /// Move a dragged block relative to a drop target.
    pub fn drag_move(
        &self,
        doc: &DocumentHandle,
        dragged: &NodeId,
        target: &NodeId,
        position: DropPosition,
    ) -> Result<ModelDelta> {
        commit(doc, |batch| {
            let tree = batch.tree();
            if !tree.contains(dragged) {
                return Err(BlockDocError::not_found(dragged));
            }
            if !tree.contains(target) {
                return Err(BlockDocError::not_found(target));
            }
            if dragged == target && position != DropPosition::Inside {
                return Ok(());
            }
            let (parent, after) = match position {
                DropPosition::Inside => {
                    let after = tree
                        .children_of(target)
                        .iter()
                        .filter(|c| *c != dragged)
                        .last()
                        .cloned();
                    (target.clone(), after)
                }
                DropPosition::After => {
                    let parent = tree.parent(target).cloned().ok_or_else(|| {
                        BlockDocError::policy("cannot drop beside the page block")
                    })?;
                    (parent, Some(target.clone()))
                }
                DropPosition::Before => {
                    let parent = tree.parent(target).cloned().ok_or_else(|| {
                        BlockDocError::policy("cannot drop beside the page block")
                    })?;
                    let siblings: Vec<&NodeId> = tree
                        .children_of(&parent)
                        .iter()
                        .filter(|c| *c != dragged)
                        .collect();
                    let after = siblings
                        .iter()
                        .position(|c| *c == target)
                        .and_then(|i| i.checked_sub(1))
                        .map(|i| siblings[i].clone());
                    (parent, after)
                }
            };
            batch.move_node(dragged, &parent, after.as_ref())
        })
    }

    /// Split a block's text at a UTF-16 offset.
    ///
    /// The text after the offset moves to a new block whose type and place
    /// follow the source type (list items continue as list items, an
    /// expanded toggle and the page title put the new block first among
    /// their children). Returns the id of the new block.
    pub fn split(&self, doc: &DocumentHandle, id: &NodeId, offset: u32) -> Result<NodeId> {
        let new_id = NodeId::generate();
        doc.apply_local_transaction(|batch| {
            let tree = batch.tree();
            let node = tree.node(id).ok_or_else(|| BlockDocError::not_found(id))?;
            if !node.block_type().has_text() {
                return Err(BlockDocError::policy(format!(
                    "{} blocks carry no text",
                    node.block_type()
                )));
            }
            let text = tree.text_of(id).unwrap_or(&[]);
            let len = delta::length(text);
            if offset > len {
                return Err(BlockDocError::policy(format!(
                    "offset {} is past the end of '{}' (length {})",
                    offset, id, len
                )));
            }
            let tail = delta::slice(text, offset, len);
            let (data, placement) = node.data.split_successor();
            let placement = if tree.root_id() == Some(id) {
                SplitPlacement::FirstChild
            } else {
                placement
            };
            let parent = tree.parent(id).cloned();
            let children = tree.children_of(id).to_vec();

            if offset < len {
                batch.apply_text_delta(id, vec![DeltaOp::retain(offset), DeltaOp::delete(len - offset)])?;
            }
            match (placement, parent) {
                (SplitPlacement::NextSibling, Some(parent)) => {
                    let node = Node::with_id(new_id.clone(), data).under(&parent);
                    batch.insert(node, Some(id), Some(tail))?;
                    batch.move_children(&children, &new_id, None)
                }
                _ => {
                    let node = Node::with_id(new_id.clone(), data).under(id);
                    batch.insert(node, None, Some(tail))
                }
            }
        })?;
        Ok(new_id)
    }

    /// Deep-copy a block (data, text and descendants) right after itself.
    ///
    /// Returns the id of the copy.
    pub fn duplicate(&self, doc: &DocumentHandle, id: &NodeId) -> Result<NodeId> {
        let (copy, _) = doc.apply_local_transaction(|batch| {
            let tree = batch.tree();
            if !tree.contains(id) {
                return Err(BlockDocError::not_found(id));
            }
            let parent = tree
                .parent(id)
                .cloned()
                .ok_or_else(|| BlockDocError::policy("the page block cannot be duplicated"))?;
            copy_subtree(batch, id, &parent, Some(id))
        })?;
        Ok(copy)
    }

    /// Delete a block and everything below it.
    pub fn delete_subtree(&self, doc: &DocumentHandle, id: &NodeId) -> Result<ModelDelta> {
        commit(doc, |batch| {
            if !batch.tree().contains(id) {
                return Err(BlockDocError::not_found(id));
            }
            let ids = batch.tree().descendants_and_self(id);
            ids.iter().rev().try_for_each(|node| batch.delete(node))
        })
    }

    /// Set (or, with null values, clear) attributes on a range of a block's text.
    pub fn format_text(
        &self,
        doc: &DocumentHandle,
        id: &NodeId,
        index: u32,
        len: u32,
        attributes: Attributes,
    ) -> Result<ModelDelta> {
        commit(doc, |batch| {
            if len == 0 || attributes.is_empty() {
                return Ok(());
            }
            batch.apply_text_delta(
                id,
                vec![DeltaOp::retain(index), DeltaOp::retain_with(len, attributes)],
            )
        })
    }

    /// Replace a block's text with `ops`, coalescing rapid edits.
    ///
    /// The model changes immediately; the shared document is written once
    /// the typing pauses (see [`SyncBridge::update_text`](crate::sync::SyncBridge::update_text)).
    pub fn update_text(&self, doc: &DocumentHandle, id: &NodeId, ops: Vec<DeltaOp>) -> Result<ModelDelta> {
        doc.update_text(id, ops)
    }
}

fn commit<F>(doc: &DocumentHandle, build: F) -> Result<ModelDelta>
where
    F: FnOnce(&mut ActionBatch) -> Result<()>,
{
    doc.apply_local_transaction(build).map(|((), delta)| delta)
}

fn copy_subtree(
    batch: &mut ActionBatch,
    source: &NodeId,
    parent: &NodeId,
    after: Option<&NodeId>,
) -> Result<NodeId> {
    let tree = batch.tree();
    let node = tree
        .node(source)
        .ok_or_else(|| BlockDocError::not_found(source))?;
    let copy = Node::new(node.data.clone()).under(parent);
    let text = tree.text_of(source).map(<[DeltaOp]>::to_vec);
    let children = tree.children_of(source).to_vec();
    let copy_id = copy.id.clone();

    batch.insert(copy, after, text)?;
    let mut previous: Option<NodeId> = None;
    for child in &children {
        previous = Some(copy_subtree(batch, child, &copy_id, previous.as_ref())?);
    }
    Ok(copy_id)
}

// ============================================================================
// Preconditions
// ============================================================================

/// Why a block cannot be indented, if it cannot.
pub fn can_indent(tree: &BlockTree, id: &NodeId) -> Result<()> {
    if !tree.contains(id) {
        return Err(BlockDocError::not_found(id));
    }
    let prev = tree
        .prev_sibling(id)
        .ok_or_else(|| BlockDocError::policy(format!("'{}' has no previous sibling", id)))?;
    let prev_type = tree
        .node(prev)
        .map(Node::block_type)
        .ok_or_else(|| BlockDocError::not_found(prev))?;
    if !prev_type.can_have_children() {
        return Err(BlockDocError::policy(format!(
            "'{}' ({}) cannot have children",
            prev, prev_type
        )));
    }
    Ok(())
}

/// Why a block cannot be outdented, if it cannot.
pub fn can_outdent(tree: &BlockTree, id: &NodeId) -> Result<()> {
    if !tree.contains(id) {
        return Err(BlockDocError::not_found(id));
    }
    let parent = tree
        .parent(id)
        .ok_or_else(|| BlockDocError::policy("the page block cannot be outdented"))?;
    if tree.parent(parent).is_none() {
        return Err(BlockDocError::policy(format!(
            "'{}' is already at the top level",
            id
        )));
    }
    Ok(())
}

/// Why `source` cannot be merged into `target`, if it cannot.
pub fn can_merge(tree: &BlockTree, source: &NodeId, target: &NodeId) -> Result<()> {
    let source_node = tree
        .node(source)
        .ok_or_else(|| BlockDocError::not_found(source))?;
    let target_node = tree
        .node(target)
        .ok_or_else(|| BlockDocError::not_found(target))?;
    if source == target {
        return Err(BlockDocError::policy("cannot merge a block into itself"));
    }
    if tree.root_id() == Some(source) {
        return Err(BlockDocError::policy("the page block cannot be merged away"));
    }
    if tree.is_descendant(target, source) {
        return Err(BlockDocError::policy(format!(
            "cannot merge '{}' into its descendant '{}'",
            source, target
        )));
    }
    for node in [source_node, target_node] {
        if !node.block_type().has_text() {
            return Err(BlockDocError::policy(format!(
                "{} blocks carry no text",
                node.block_type()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockType;
    use crate::test_utils::{DeltaRecorder, open_document, sample_page};

    fn id(s: &str) -> NodeId {
        NodeId::new(s)
    }

    #[test]
    fn test_turn_into_heading_keeps_children_and_text() {
        let (doc, _) = open_document(sample_page());
        let heading = ActionController
            .turn_into(&doc, &id("p1"), BlockData::heading(2))
            .unwrap();

        assert!(doc.node(&id("p1")).is_none());
        let node = doc.node(&heading).unwrap();
        assert_eq!(node.data, BlockData::Heading { level: 2 });
        assert_eq!(doc.children_of(&heading), vec![id("c1"), id("c2")]);
        assert_eq!(doc.children_of(&id("page")), vec![heading.clone(), id("p2")]);
        assert_eq!(doc.text_of(&heading), Some(vec![DeltaOp::insert("parent")]));
    }

    #[test]
    fn test_turn_into_leaf_type_lifts_children() {
        let (doc, _) = open_document(sample_page());
        let divider = ActionController
            .turn_into(&doc, &id("p1"), BlockData::Divider)
            .unwrap();
        assert_eq!(
            doc.children_of(&id("page")),
            vec![divider.clone(), id("c1"), id("c2"), id("p2")]
        );
        assert_eq!(doc.node(&divider).unwrap().block_type(), BlockType::Divider);
    }

    #[test]
    fn test_indent_and_outdent() {
        let (doc, _) = open_document(sample_page());
        ActionController.indent(&doc, &id("p2")).unwrap();
        assert_eq!(doc.children_of(&id("p1")), vec![id("c1"), id("c2"), id("p2")]);

        ActionController.outdent(&doc, &id("c2")).unwrap();
        assert_eq!(doc.children_of(&id("page")), vec![id("p1"), id("c2")]);
        assert_eq!(doc.children_of(&id("c2")), vec![id("p2")]);
        assert_eq!(doc.children_of(&id("p1")), vec![id("c1")]);
    }

    #[test]
    fn test_indent_first_child_is_noop() {
        let (doc, _) = open_document(sample_page());
        let recorder = DeltaRecorder::attach(&doc);
        let delta = ActionController.indent(&doc, &id("p1")).unwrap();
        assert!(delta.is_empty());
        assert_eq!(recorder.count(), 0);
        assert!(can_indent(&doc.model(), &id("p1")).is_err());
    }

    #[test]
    fn test_indent_moves_own_children_to_siblings() {
        let (doc, _) = open_document(sample_page());
        ActionController.indent(&doc, &id("c2")).unwrap();
        ActionController.outdent(&doc, &id("c2")).unwrap();
        // c2 is back under p1, nothing followed it
        assert_eq!(doc.children_of(&id("p1")), vec![id("c1"), id("c2")]);

        ActionController.indent(&doc, &id("p2")).unwrap();
        ActionController.indent(&doc, &id("c1")).unwrap();
        assert!(doc.children_of(&id("c1")).is_empty());
    }

    #[test]
    fn test_merge_appends_text_and_adopts_children() {
        let (doc, _) = open_document(sample_page());
        ActionController.merge(&doc, &id("p1"), &id("page")).unwrap();
        assert_eq!(
            doc.text_of(&id("page")),
            Some(vec![DeltaOp::insert("Titleparent")])
        );
        assert_eq!(
            doc.children_of(&id("page")),
            vec![id("c1"), id("c2"), id("p2")]
        );
    }

    #[test]
    fn test_merge_rejects_descendant_target() {
        let (doc, _) = open_document(sample_page());
        let err = ActionController.merge(&doc, &id("p1"), &id("c1")).unwrap_err();
        assert!(matches!(err, BlockDocError::PolicyViolation(_)));
        assert!(doc.node(&id("p1")).is_some());
    }

    #[test]
    fn test_drag_before_and_after() {
        let (doc, _) = open_document(sample_page());
        ActionController
            .drag_move(&doc, &id("p2"), &id("c1"), DropPosition::Before)
            .unwrap();
        assert_eq!(doc.children_of(&id("p1")), vec![id("p2"), id("c1"), id("c2")]);

        ActionController
            .drag_move(&doc, &id("p2"), &id("c1"), DropPosition::After)
            .unwrap();
        assert_eq!(doc.children_of(&id("p1")), vec![id("c1"), id("p2"), id("c2")]);

        ActionController
            .drag_move(&doc, &id("c2"), &id("c1"), DropPosition::Before)
            .unwrap();
        assert_eq!(doc.children_of(&id("p1")), vec![id("c2"), id("c1"), id("p2")]);
    }

    #[test]
    fn test_drag_inside_itself_is_cycle() {
        let (doc, _) = open_document(sample_page());
        let err = ActionController
            .drag_move(&doc, &id("p1"), &id("p1"), DropPosition::Inside)
            .unwrap_err();
        assert!(matches!(err, BlockDocError::Cycle { .. }));
    }

    #[test]
    fn test_split_paragraph() {
        let (doc, _) = open_document(sample_page());
        let tail = ActionController.split(&doc, &id("p1"), 3).unwrap();
        assert_eq!(doc.text_of(&id("p1")), Some(vec![DeltaOp::insert("par")]));
        assert_eq!(doc.text_of(&tail), Some(vec![DeltaOp::insert("ent")]));
        assert_eq!(doc.children_of(&id("page")), vec![id("p1"), tail.clone(), id("p2")]);
        assert_eq!(doc.children_of(&tail), vec![id("c1"), id("c2")]);
    }

    #[test]
    fn test_split_title_inserts_first_child() {
        let (doc, _) = open_document(sample_page());
        let body = ActionController.split(&doc, &id("page"), 5).unwrap();
        assert_eq!(doc.children_of(&id("page"))[0], body);
        assert_eq!(doc.text_of(&body), Some(vec![]));
    }

    #[test]
    fn test_split_past_end_fails() {
        let (doc, _) = open_document(sample_page());
        let err = ActionController.split(&doc, &id("c1"), 4).unwrap_err();
        assert!(matches!(err, BlockDocError::PolicyViolation(_)));
    }

    #[test]
    fn test_duplicate_deep_copies() {
        let (doc, _) = open_document(sample_page());
        let copy = ActionController.duplicate(&doc, &id("p1")).unwrap();
        assert_eq!(doc.children_of(&id("page")), vec![id("p1"), copy.clone(), id("p2")]);
        let children = doc.children_of(&copy);
        assert_eq!(children.len(), 2);
        assert_eq!(doc.text_of(&children[1]), Some(vec![DeltaOp::insert("two")]));
        assert!(!children.contains(&id("c1")));
    }

    #[test]
    fn test_delete_subtree() {
        let (doc, _) = open_document(sample_page());
        let delta = ActionController.delete_subtree(&doc, &id("p1")).unwrap();
        assert_eq!(delta.removed.len(), 3);
        assert_eq!(doc.children_of(&id("page")), vec![id("p2")]);
        assert!(doc.node(&id("c2")).is_none());
    }

    #[test]
    fn test_format_text() {
        let (doc, _) = open_document(sample_page());
        ActionController
            .format_text(&doc, &id("c1"), 1, 2, delta::attrs([("bold", serde_json::json!(true))]))
            .unwrap();
        assert_eq!(
            doc.text_of(&id("c1")),
            Some(vec![
                DeltaOp::insert("o"),
                DeltaOp::insert_with("ne", delta::attrs([("bold", serde_json::json!(true))])),
            ])
        );
    }

    #[test]
    fn test_failed_intent_changes_nothing() {
        let (doc, _) = open_document(sample_page());
        let recorder = DeltaRecorder::attach(&doc);
        let before = doc.snapshot().unwrap();
        let err = ActionController
            .replay(
                &doc,
                vec![
                    BlockAction::Move {
                        id: id("c1"),
                        parent: id("page"),
                        after: None,
                    },
                    BlockAction::Delete { id: id("ghost") },
                ],
            )
            .unwrap_err();
        assert!(matches!(err, BlockDocError::NotFound(_)));
        assert_eq!(doc.snapshot().unwrap(), before);
        assert_eq!(recorder.count(), 0);
        assert_eq!(doc.pending_outbound_count(), 0);
    }
}
