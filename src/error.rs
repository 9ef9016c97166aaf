//! Error taxonomy
//!
//! `VcsError` covers store, graph, and protocol failures. Per-operation
//! failures are split out as [`OperationError`] so they can be collected
//! into push results (and sent over the wire) instead of aborting a push.
//!
//! Author: Moroya Sakamoto

use serde::{Deserialize, Serialize};

use crate::branch::BranchRef;
use crate::ids::NodeId;
use crate::store::ChunkHash;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, VcsError>;

/// Failure of a single tree operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum OperationError {
    #[error("node {id:#x} not found")]
    NodeNotFound { id: NodeId },

    #[error("node id {id:#x} is already in use")]
    DuplicateId { id: NodeId },

    #[error("the root node cannot be removed or moved")]
    RootImmutable,

    #[error("cannot move node {child:#x} below its own descendant {parent:#x}")]
    CyclicMove { child: NodeId, parent: NodeId },
}

/// Coarse error classification, stable across the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    PushContention,
    MalformedMessage,
    AlreadyExists,
    Corrupt,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    #[error("chunk {0} not found")]
    ChunkNotFound(ChunkHash),

    #[error("version {0} not found")]
    VersionNotFound(ChunkHash),

    #[error("branch {0} not found")]
    BranchNotFound(BranchRef),

    #[error("branch {0} already exists")]
    BranchExists(BranchRef),

    #[error("repository {0} is already initialized")]
    RepositoryExists(String),

    #[error(transparent)]
    Operation(#[from] OperationError),

    #[error("versions {left} and {right} share no common ancestor")]
    NoCommonAncestor { left: ChunkHash, right: ChunkHash },

    #[error("push to {branch} abandoned after {attempts} contended attempts")]
    PushContention { branch: BranchRef, attempts: u32 },

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("corrupt chunk {hash}: {reason}")]
    CorruptChunk { hash: ChunkHash, reason: String },

    #[error("a version has at most two parents, got {0}")]
    InvalidParents(usize),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("server rejected request ({kind:?}): {message}")]
    Remote { kind: ErrorKind, message: String },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl VcsError {
    /// Classification used when the error crosses the wire.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ChunkNotFound(_) | Self::VersionNotFound(_) | Self::BranchNotFound(_) => {
                ErrorKind::NotFound
            }
            Self::BranchExists(_) | Self::RepositoryExists(_) => ErrorKind::AlreadyExists,
            Self::Operation(OperationError::NodeNotFound { .. }) => ErrorKind::NotFound,
            Self::Operation(_) | Self::NoCommonAncestor { .. } => ErrorKind::Conflict,
            Self::PushContention { .. } => ErrorKind::PushContention,
            Self::MalformedMessage(_) => ErrorKind::MalformedMessage,
            Self::CorruptChunk { .. } => ErrorKind::Corrupt,
            Self::Remote { kind, .. } => *kind,
            Self::InvalidParents(_) | Self::InvalidConfig(_) | Self::Io(_) => ErrorKind::Internal,
        }
    }

    /// True for failures the caller may resolve by resubmitting.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::PushContention
    }
}

impl From<serde_json::Error> for VcsError {
    fn from(value: serde_json::Error) -> Self {
        Self::MalformedMessage(value.to_string())
    }
}
