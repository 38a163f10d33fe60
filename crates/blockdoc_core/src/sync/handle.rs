//! Cloneable handle to an open document.

use std::ops::Deref;
use std::sync::Arc;

use super::bridge::SyncBridge;
use super::source::DocumentSource;
use crate::config::DocumentConfig;
use crate::error::Result;
use crate::scheduler::Scheduler;

/// A shared reference to the [`SyncBridge`] of one page.
///
/// Clones point at the same document. The bridge is disposed when the last
/// handle goes away, or earlier through [`SyncBridge::dispose`].
#[derive(Clone)]
pub struct DocumentHandle {
    bridge: Arc<SyncBridge>,
}

impl DocumentHandle {
    /// Create a handle to an unloaded document.
    pub fn new(
        page_id: impl Into<String>,
        source: Arc<dyn DocumentSource>,
        scheduler: Arc<dyn Scheduler>,
        config: DocumentConfig,
    ) -> Self {
        Self {
            bridge: SyncBridge::new(page_id, source, scheduler, config),
        }
    }

    /// Create a handle and load the document.
    pub async fn open(
        page_id: impl Into<String>,
        source: Arc<dyn DocumentSource>,
        scheduler: Arc<dyn Scheduler>,
        config: DocumentConfig,
    ) -> Result<Self> {
        let handle = Self::new(page_id, source, scheduler, config);
        handle.bridge.load().await?;
        Ok(handle)
    }

    /// The underlying bridge.
    pub fn bridge(&self) -> &Arc<SyncBridge> {
        &self.bridge
    }
}

impl Deref for DocumentHandle {
    type Target = SyncBridge;

    fn deref(&self) -> &SyncBridge {
        &self.bridge
    }
}

impl std::fmt::Debug for DocumentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DocumentHandle").field(&self.bridge).finish()
    }
}
