//! The narrow interface between the block tree and the CRDT dependency.
//!
//! The model and the action layer never talk to the CRDT directly. They read
//! through [`TreeReader`] and express writes as [`WriteOp`]s, which a
//! [`SharedTree`] applies inside one transaction. Any converging replicated
//! structure able to store maps, ordered id lists and rich text can implement
//! these traits; [`YrsSharedTree`](super::YrsSharedTree) is the yrs-backed one.

use crate::block::{ChildrenListId, Node, NodeId, TextId};
use crate::delta::DeltaOp;
use crate::error::Result;
use crate::snapshot::DocumentSnapshot;

use super::types::{ChangeEvent, UpdateOrigin};

/// Read access to the authoritative shared structure.
pub trait TreeReader {
    /// Id of the root block, once the document has one.
    fn page_id(&self) -> Option<NodeId>;

    /// A block as currently stored.
    fn node(&self, id: &NodeId) -> Option<Node>;

    /// A children list as currently stored.
    fn children(&self, list: &ChildrenListId) -> Option<Vec<NodeId>>;

    /// A text buffer as a document delta.
    fn text(&self, id: &TextId) -> Option<Vec<DeltaOp>>;

    /// Everything, in flat form.
    fn snapshot(&self) -> Option<DocumentSnapshot>;
}

/// One primitive write against the shared structure.
///
/// List entries are addressed by id, never by index, so a write computed
/// from a model that lags behind the shared state still lands. Ops are
/// applied strictly in order.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Store a new block with an empty children list and, when given, its text
    InsertBlock {
        /// The block
        node: Node,
        /// Initial text (a document delta)
        text: Option<Vec<DeltaOp>>,
    },
    /// Field-level update of a block's data
    UpdateData {
        /// Block id
        id: NodeId,
        /// Fields to set
        set: serde_json::Map<String, serde_json::Value>,
        /// Fields to remove
        remove: Vec<String>,
    },
    /// Rewrite a block's parent pointer
    SetParent {
        /// Block id
        id: NodeId,
        /// New parent
        parent: Option<NodeId>,
    },
    /// Remove a block together with its children list and text
    RemoveBlock {
        /// Block id
        id: NodeId,
        /// Its children list
        children_list_id: ChildrenListId,
        /// Its text
        text_id: Option<TextId>,
    },
    /// Insert an id into a children list, right after `after` or at the head.
    ///
    /// When `after` is not in the stored list the id is appended. A missing
    /// list is created.
    ListInsert {
        /// List id
        list: ChildrenListId,
        /// Sibling to insert after
        after: Option<NodeId>,
        /// Inserted id
        id: NodeId,
    },
    /// Remove every occurrence of an id from a children list
    ListRemove {
        /// List id
        list: ChildrenListId,
        /// Removed id
        id: NodeId,
    },
    /// Apply a change delta to a text
    ApplyText {
        /// Text id
        text: TextId,
        /// Change delta
        delta: Vec<DeltaOp>,
    },
}

/// What a transaction produced.
#[derive(Debug, Clone, Default)]
pub struct TransactionOutcome {
    /// Structural changes observed during the transaction, deduplicated and in order
    pub events: Vec<ChangeEvent>,
    /// Whether the document state changed at all
    pub changed: bool,
    /// The binary diff to send to collaborators; only set for broadcast origins
    pub update: Option<Vec<u8>>,
    /// Set when a write failed after the transaction had started. Whatever
    /// was written before it is committed and described by the other fields.
    pub failure: Option<String>,
}

/// A replicated document that can be mutated transactionally and exchanged as binary diffs.
pub trait SharedTree: TreeReader + Send + Sync {
    /// Replace the (empty) document content with a snapshot, tagged as a sync transaction.
    fn seed(&self, snapshot: &DocumentSnapshot) -> Result<TransactionOutcome>;

    /// Apply writes in one transaction tagged with `origin`.
    ///
    /// Writes are checked against the stored state first; an error means
    /// nothing was written. A write that still fails mid-way is reported in
    /// [`TransactionOutcome::failure`].
    fn transact(&self, origin: UpdateOrigin, writes: &[WriteOp]) -> Result<TransactionOutcome>;

    /// Apply a binary diff from a peer in one transaction tagged with `origin`.
    fn apply_update(&self, update: &[u8], origin: UpdateOrigin) -> Result<TransactionOutcome>;

    /// Encode the state vector, for a sync handshake.
    fn encode_state_vector(&self) -> Vec<u8>;

    /// Encode the full state as one update.
    fn encode_state_as_update(&self) -> Vec<u8>;

    /// Encode what a peer with `state_vector` is missing.
    fn encode_diff(&self, state_vector: &[u8]) -> Result<Vec<u8>>;

    /// Merge several diffs into one equivalent diff.
    fn merge_updates(&self, updates: &[Vec<u8>]) -> Result<Vec<u8>>;
}
