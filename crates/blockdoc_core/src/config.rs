//! Configuration types for block documents.
//!
//! [`DocumentConfig`] holds the tunables of a [`SyncBridge`](crate::sync::SyncBridge):
//! how long text edits are coalesced, how empty documents are seeded and how many
//! outbound diffs may queue up before they are compacted. Configuration is
//! persisted as TOML.
//!
//! # Example
//!
//! ```ignore
//! use blockdoc_core::config::DocumentConfig;
//!
//! let config = DocumentConfig::from_toml_str("text_debounce_ms = 50")?;
//! assert_eq!(config.text_debounce().as_millis(), 50);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

fn default_text_debounce_ms() -> u64 {
    200
}

fn default_max_pending_outbound() -> usize {
    64
}

fn default_true() -> bool {
    true
}

/// Per-document settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentConfig {
    /// Inactivity window before debounced text edits are committed (milliseconds)
    #[serde(default = "default_text_debounce_ms")]
    pub text_debounce_ms: u64,

    /// Append one empty paragraph when a brand-new document is created
    #[serde(default = "default_true")]
    pub seed_empty_paragraph: bool,

    /// Outbound diffs allowed to wait while disconnected before they are merged into one
    #[serde(default = "default_max_pending_outbound")]
    pub max_pending_outbound: usize,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            text_debounce_ms: default_text_debounce_ms(),
            seed_empty_paragraph: true,
            max_pending_outbound: default_max_pending_outbound(),
        }
    }
}

impl DocumentConfig {
    /// Parse a config from TOML. Missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load a config file from disk.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Serialize to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string(self)?)
    }

    /// Save to a file, creating parent directories as needed.
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    /// The debounce window as a [`Duration`].
    pub fn text_debounce(&self) -> Duration {
        Duration::from_millis(self.text_debounce_ms)
    }

    /// Builder-style override of the debounce window.
    pub fn with_text_debounce_ms(mut self, ms: u64) -> Self {
        self.text_debounce_ms = ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BlockDocError;

    #[test]
    fn test_defaults_from_empty_toml() {
        let config = DocumentConfig::from_toml_str("").unwrap();
        assert_eq!(config, DocumentConfig::default());
        assert_eq!(config.text_debounce(), Duration::from_millis(200));
    }

    #[test]
    fn test_partial_toml() {
        let config =
            DocumentConfig::from_toml_str("text_debounce_ms = 50\nseed_empty_paragraph = false")
                .unwrap();
        assert_eq!(config.text_debounce_ms, 50);
        assert!(!config.seed_empty_paragraph);
        assert_eq!(config.max_pending_outbound, 64);
    }

    #[test]
    fn test_invalid_toml() {
        let err = DocumentConfig::from_toml_str("text_debounce_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, BlockDocError::ConfigParse(_)));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("document.toml");
        let config = DocumentConfig::default().with_text_debounce_ms(10);
        config.save_to(&path).unwrap();

        let loaded = DocumentConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = DocumentConfig::load_from(dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, BlockDocError::Io(_)));
    }
}
