//! Errors surfaced by the graph API.

use crate::types::ValueRef;
use graphrt_kernels::DataType;

/// Every failure a [`ComputeGraph`](crate::ComputeGraph) can report.
///
/// Failures are reported synchronously and never retried. Anything the
/// execution context reports, other than an allocation failure, is carried
/// unchanged in [`GraphError::Device`].
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// Handle is out of range, or names a value with the wrong role.
    #[error("invalid value handle {handle}: {reason}")]
    InvalidHandle { handle: ValueRef, reason: String },

    /// The context could not provide device memory.
    #[error("failed to allocate {bytes} bytes of device memory")]
    Allocation {
        bytes: u64,
        #[source]
        source: anyhow::Error,
    },

    #[error("graph is frozen after encoding; no further values or nodes may be added")]
    GraphFrozen,

    #[error("graph must be encoded before it can execute")]
    EncodingRequired,

    #[error("graph is already encoded")]
    AlreadyEncoded,

    #[error("outputs are not available until the graph has executed")]
    NotExecutedYet,

    /// A node without an encode routine was reached while encoding.
    #[error("node `{node}` does not implement encode")]
    UnimplementedEncode { node: String },

    #[error("graph is poisoned by an earlier failure and must be rebuilt")]
    GraphPoisoned,

    #[error("type mismatch: expected {expected} value, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("dtype mismatch: expected {expected}, got {found}")]
    DTypeMismatch { expected: DataType, found: DataType },

    #[error("shape mismatch: expected {expected:?}, got {found:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("host buffer holds {found} bytes but the tensor needs {expected}")]
    HostSizeMismatch { expected: usize, found: usize },

    #[error("invalid node `{node}`: {reason}")]
    InvalidNode { node: String, reason: String },

    #[error(transparent)]
    Device(#[from] anyhow::Error),
}

impl GraphError {
    pub fn invalid_handle(handle: ValueRef, reason: impl Into<String>) -> Self {
        GraphError::InvalidHandle {
            handle,
            reason: reason.into(),
        }
    }

    pub fn invalid_node(node: impl Into<String>, reason: impl Into<String>) -> Self {
        GraphError::InvalidNode {
            node: node.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = GraphError> = std::result::Result<T, E>;
