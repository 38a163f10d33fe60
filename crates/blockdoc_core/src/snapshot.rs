//! Plain-data document formats.
//!
//! [`DocumentSnapshot`] is the flat layout of a document (blocks, children
//! lists and texts keyed by id), used to seed a document at load time and to
//! export one. [`NestedBlock`] is the same content as a recursive tree, which
//! is what importers and the editing surface usually produce and consume.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::block::{BlockData, ChildrenListId, Node, NodeId, TextId};
use crate::delta::DeltaOp;
use crate::error::{BlockDocError, Result};

/// Flat, id-keyed document content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct DocumentSnapshot {
    /// Root block (type page)
    pub page_id: NodeId,
    /// All blocks by id
    pub blocks: IndexMap<NodeId, Node>,
    /// All children lists by id
    pub children: IndexMap<ChildrenListId, Vec<NodeId>>,
    /// All texts by id
    #[serde(default)]
    pub texts: IndexMap<TextId, Vec<DeltaOp>>,
}

impl DocumentSnapshot {
    /// A new page with an empty title and, optionally, one empty paragraph.
    pub fn new_page(page_id: NodeId, with_paragraph: bool) -> Self {
        let mut page = NestedBlock::new(page_id, BlockData::Page);
        if with_paragraph {
            page = page.child(NestedBlock::new(NodeId::generate(), BlockData::Paragraph));
        }
        Self::from_nested(&page)
    }

    /// Flatten a nested tree whose root is the page.
    pub fn from_nested(root: &NestedBlock) -> Self {
        let mut snapshot = Self {
            page_id: root.id.clone(),
            blocks: IndexMap::new(),
            children: IndexMap::new(),
            texts: IndexMap::new(),
        };
        snapshot.push_nested(root, None);
        snapshot
    }

    fn push_nested(&mut self, block: &NestedBlock, parent: Option<&NodeId>) {
        let mut node = Node::with_id(block.id.clone(), block.data.clone());
        node.parent_id = parent.cloned();
        if let Some(text_id) = &node.external_text_id {
            self.texts
                .insert(text_id.clone(), block.text.clone().unwrap_or_default());
        }
        self.children.insert(
            node.children_list_id.clone(),
            block.children.iter().map(|c| c.id.clone()).collect(),
        );
        self.blocks.insert(node.id.clone(), node);
        for child in &block.children {
            self.push_nested(child, Some(&block.id));
        }
    }

    /// Parse from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// The root node.
    pub fn root(&self) -> Result<&Node> {
        self.blocks
            .get(&self.page_id)
            .ok_or_else(|| BlockDocError::not_found(&self.page_id))
    }
}

/// A block and its descendants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct NestedBlock {
    /// Block id
    pub id: NodeId,
    /// Payload
    pub data: BlockData,
    /// Text content, for types that carry text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<Vec<DeltaOp>>,
    /// Children in display order
    #[serde(default)]
    pub children: Vec<NestedBlock>,
}

impl NestedBlock {
    /// A block without text or children.
    pub fn new(id: impl Into<NodeId>, data: BlockData) -> Self {
        Self {
            id: id.into(),
            data,
            text: None,
            children: Vec::new(),
        }
    }

    /// Set plain text.
    pub fn text(mut self, text: &str) -> Self {
        self.text = Some(vec![DeltaOp::insert(text)]);
        self
    }

    /// Set rich text.
    pub fn delta(mut self, ops: Vec<DeltaOp>) -> Self {
        self.text = Some(ops);
        self
    }

    /// Append a child.
    pub fn child(mut self, child: NestedBlock) -> Self {
        self.children.push(child);
        self
    }

    /// Ids in reading order (pre-order), including this block.
    pub fn reading_order(&self) -> Vec<NodeId> {
        let mut out = vec![self.id.clone()];
        for child in &self.children {
            out.extend(child.reading_order());
        }
        out
    }
}
