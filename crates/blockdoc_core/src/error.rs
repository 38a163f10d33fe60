use serde::Serialize;
use thiserror::Error;
use ts_rs::TS;

/// Unified error type for block document operations
#[derive(Debug, Error)]
pub enum BlockDocError {
    // Stale references
    /// A block id no longer (or never) exists in the document
    #[error("Block '{0}' not found")]
    NotFound(String),

    // Structural errors
    /// A move would place a block inside its own subtree
    #[error("Cannot move '{node}' under '{target}': target is the node itself or one of its descendants")]
    Cycle {
        /// The block being moved
        node: String,
        /// The requested new parent
        target: String,
    },

    /// The request breaks a rule of the block type policy or of the action
    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    /// A tree broke one of the block tree invariants
    #[error("Tree invariant violated: {0}")]
    InvariantViolation(String),

    // Lifecycle errors
    /// The document was disposed
    #[error("Document '{0}' has been disposed")]
    Disposed(String),

    /// The document is not loaded yet
    #[error("Document '{page_id}' is not ready (state: {state})")]
    NotReady {
        /// Page of the document
        page_id: String,
        /// Its lifecycle state
        state: String,
    },

    // CRDT errors
    /// The shared document rejected a write or a diff
    #[error("Transaction failed: {0}")]
    Transaction(String),

    /// The document source failed to provide the initial state
    #[error("Document source error: {0}")]
    Source(String),

    // IO and serialization
    /// Reading or writing a file failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration file is not valid TOML for [`DocumentConfig`](crate::config::DocumentConfig)
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// A configuration could not be written as TOML
    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    /// JSON (de)serialization of snapshots or actions failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for block document operations
pub type Result<T> = std::result::Result<T, BlockDocError>;

/// A serializable representation of [`BlockDocError`] for IPC with the editing surface.
#[derive(Debug, Clone, Serialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SerializableError {
    /// Error kind/variant name
    pub kind: String,
    /// Human-readable error message
    pub message: String,
}

impl BlockDocError {
    /// Short variant name, stable across releases.
    pub fn kind(&self) -> &'static str {
        match self {
            BlockDocError::NotFound(_) => "NotFound",
            BlockDocError::Cycle { .. } => "Cycle",
            BlockDocError::PolicyViolation(_) => "PolicyViolation",
            BlockDocError::InvariantViolation(_) => "InvariantViolation",
            BlockDocError::Disposed(_) => "Disposed",
            BlockDocError::NotReady { .. } => "NotReady",
            BlockDocError::Transaction(_) => "Transaction",
            BlockDocError::Source(_) => "Source",
            BlockDocError::Io(_) => "Io",
            BlockDocError::ConfigParse(_) => "ConfigParse",
            BlockDocError::ConfigSerialize(_) => "ConfigSerialize",
            BlockDocError::Json(_) => "Json",
        }
    }

    /// Whether the editing surface should treat this as a silent no-op.
    ///
    /// Stale ids and lifecycle races are expected during collaboration; cycles
    /// and policy violations mean the caller skipped a precondition check.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BlockDocError::NotFound(_)
                | BlockDocError::Disposed(_)
                | BlockDocError::NotReady { .. }
        )
    }

    /// Convert to a serializable representation for IPC
    pub fn to_serializable(&self) -> SerializableError {
        SerializableError::from(self)
    }

    pub(crate) fn not_found(id: impl std::fmt::Display) -> Self {
        BlockDocError::NotFound(id.to_string())
    }

    pub(crate) fn policy(message: impl Into<String>) -> Self {
        BlockDocError::PolicyViolation(message.into())
    }
}

impl From<&BlockDocError> for SerializableError {
    fn from(err: &BlockDocError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<BlockDocError> for SerializableError {
    fn from(err: BlockDocError) -> Self {
        SerializableError::from(&err)
    }
}
