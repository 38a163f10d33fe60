//! Where a document's initial content comes from.
//!
//! The bridge asks a [`DocumentSource`] for the initial state of a page when
//! it loads. Fetching the page from a backend, a local database or a fixture
//! is the source's business; the bridge only sees the result.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};

use crate::error::{BlockDocError, Result};
use crate::snapshot::DocumentSnapshot;

/// A boxed future for object-safe async methods.
///
/// On native targets, this requires `Send` for compatibility with
/// multi-threaded runtimes.
#[cfg(not(target_arch = "wasm32"))]
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A boxed future for object-safe async methods.
///
/// WASM version without `Send` requirement - JavaScript is single-threaded.
#[cfg(target_arch = "wasm32")]
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// The initial state of a page.
#[derive(Debug, Clone, PartialEq)]
pub enum InitialSnapshot {
    /// The page has no content yet
    Empty,
    /// The full document state as a binary CRDT update
    Update(Vec<u8>),
    /// Plain document content, for pages that were never shared
    Document(DocumentSnapshot),
}

/// Provides the initial state of documents.
pub trait DocumentSource: Send + Sync {
    /// Fetch the initial state of `page_id`.
    fn load_initial<'a>(&'a self, page_id: &'a str) -> BoxFuture<'a, Result<InitialSnapshot>>;
}

/// An in-memory [`DocumentSource`].
///
/// Unknown pages load as [`InitialSnapshot::Empty`]. Pages can be marked as
/// failing to exercise error paths.
#[derive(Debug, Default)]
pub struct MemoryDocumentSource {
    pages: Mutex<HashMap<String, InitialSnapshot>>,
    failing: Mutex<HashMap<String, String>>,
}

impl MemoryDocumentSource {
    /// An empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the initial state of a page.
    pub fn insert(&self, page_id: impl Into<String>, snapshot: InitialSnapshot) {
        self.pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(page_id.into(), snapshot);
    }

    /// Make loads of `page_id` fail with `message`.
    pub fn fail(&self, page_id: impl Into<String>, message: impl Into<String>) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(page_id.into(), message.into());
    }
}

impl DocumentSource for MemoryDocumentSource {
    fn load_initial<'a>(&'a self, page_id: &'a str) -> BoxFuture<'a, Result<InitialSnapshot>> {
        Box::pin(async move {
            if let Some(message) = self
                .failing
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(page_id)
            {
                return Err(BlockDocError::Source(format!(
                    "failed to load '{}': {}",
                    page_id, message
                )));
            }
            Ok(self
                .pages
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(page_id)
                .cloned()
                .unwrap_or(InitialSnapshot::Empty))
        })
    }
}
