//! Document lifecycle and synchronization.
//!
//! A [`DocumentHandle`] wraps the [`SyncBridge`] of one page. The bridge loads
//! the page from a [`DocumentSource`], runs local transactions, coalesces text
//! edits, applies remote diffs and queues outbound ones for the transport.

mod bridge;
mod handle;
mod source;

pub use bridge::{DocumentState, RemoteApply, SyncBridge};
pub use handle::DocumentHandle;
pub use source::{BoxFuture, DocumentSource, InitialSnapshot, MemoryDocumentSource};
