#![doc = include_str!(concat!(env!("OUT_DIR"), "/README.md"))]
#![warn(missing_docs)]

/// Editing primitives, transactions and intent operations
pub mod actions;

/// Block types, ids and nodes
pub mod block;

/// Configuration options
pub mod config;

/// Shared (CRDT) document storage
pub mod crdt;

/// Rich-text deltas
pub mod delta;

/// Error (common error types)
pub mod error;

/// Listener registries and subscriptions
pub mod listeners;

/// Delayed task execution
pub mod scheduler;

/// Flat and nested document snapshots
pub mod snapshot;

/// Document lifecycle and synchronization
pub mod sync;

/// The in-memory block tree model
pub mod tree;

/// Shared test fixtures
#[cfg(test)]
pub mod test_utils;

pub use actions::{ActionBatch, ActionController, BlockAction, DropPosition};
pub use block::{BlockData, BlockType, ChildrenListId, Node, NodeId, TextId};
pub use config::DocumentConfig;
pub use crdt::{OutboundUpdate, UpdateOrigin};
pub use delta::DeltaOp;
pub use error::{BlockDocError, Result};
pub use listeners::Subscription;
pub use scheduler::{ManualScheduler, Scheduler, TaskHandle};
pub use snapshot::{DocumentSnapshot, NestedBlock};
pub use sync::{
    DocumentHandle, DocumentSource, DocumentState, InitialSnapshot, MemoryDocumentSource,
    RemoteApply, SyncBridge,
};
pub use tree::{BlockTree, ModelDelta};
