//! Core types shared by the CRDT layer and the sync bridge.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::block::{ChildrenListId, NodeId, TextId};

/// Origin of a CRDT transaction, used to distinguish local vs remote changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum UpdateOrigin {
    /// Update originated from a local user action
    Local,

    /// Update received from a remote peer
    Remote,

    /// Initial load or sync handshake
    Sync,
}

impl UpdateOrigin {
    /// Tag attached to the CRDT transaction.
    pub fn as_str(self) -> &'static str {
        match self {
            UpdateOrigin::Local => "local",
            UpdateOrigin::Remote => "remote",
            UpdateOrigin::Sync => "sync",
        }
    }

    /// Whether diffs produced under this origin are sent to collaborators.
    pub fn is_broadcast(self) -> bool {
        self == UpdateOrigin::Local
    }
}

impl std::fmt::Display for UpdateOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UpdateOrigin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(UpdateOrigin::Local),
            "remote" => Ok(UpdateOrigin::Remote),
            "sync" => Ok(UpdateOrigin::Sync),
            _ => Err(format!("Unknown update origin: {}", s)),
        }
    }
}

/// A low-level structural change reported by the shared tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChangeEvent {
    /// A block was added, removed or had a field changed
    Block(NodeId),
    /// A children list was created, removed or reordered
    Children(ChildrenListId),
    /// A text buffer was created, removed or edited
    Text(TextId),
    /// Document metadata (the root id) changed
    Root,
}

/// A diff produced by a local transaction, waiting to be sent to collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct OutboundUpdate {
    /// Monotonic id within this document session
    pub update_id: i64,

    /// Page the update belongs to
    pub page_id: String,

    /// Binary yrs update (v1 encoding)
    pub data: Vec<u8>,

    /// Unix timestamp when this update was created (milliseconds)
    pub timestamp: i64,

    /// Number of local transactions merged into this update
    pub merged: u32,
}

impl OutboundUpdate {
    /// Wrap a freshly produced diff.
    pub fn new(update_id: i64, page_id: &str, data: Vec<u8>) -> Self {
        Self {
            update_id,
            page_id: page_id.to_string(),
            data,
            timestamp: chrono::Utc::now().timestamp_millis(),
            merged: 1,
        }
    }
}
