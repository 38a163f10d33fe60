#![doc = include_str!(concat!(env!("OUT_DIR"), "/crdt_README.md"))]

pub mod codec;
mod shared_tree;
mod types;
mod yrs_tree;

pub use shared_tree::{SharedTree, TransactionOutcome, TreeReader, WriteOp};
pub use types::{ChangeEvent, OutboundUpdate, UpdateOrigin};
pub use yrs_tree::YrsSharedTree;
