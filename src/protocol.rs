//! JSON wire messages
//!
//! `MessageFromClient` carries a push: a change-set id, the base version
//! hash, and the operation list. `MessageFromServer` answers with the
//! resulting head, per-operation conflicts, or an error.
//!
//! Author: Moroya Sakamoto

use serde::{Deserialize, Serialize};

use crate::branch::BranchRef;
use crate::error::{ErrorKind, OperationError, Result, VcsError};
use crate::ids::NodeId;
use crate::merge::Conflict;
use crate::operation::Operation;
use crate::replication::{PushOutcome, PushRequest, PushResult};
use crate::store::ChunkHash;

/// Push message sent by a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageFromClient {
    pub change_set_id: i64,
    #[serde(default)]
    pub operations: Option<Vec<OperationData>>,
    pub base_version_hash: String,
    #[serde(default)]
    pub base_change_set: Option<i64>,
}

impl MessageFromClient {
    /// Decode into a push against `branch`.
    pub fn to_push_request(&self, branch: &BranchRef) -> Result<PushRequest> {
        let base: ChunkHash = self.base_version_hash.parse()?;
        let operations = self
            .operations
            .iter()
            .flatten()
            .cloned()
            .map(Operation::from)
            .collect();
        Ok(PushRequest::new(branch.clone(), base, operations))
    }
}

/// Wire form of [`Operation`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OperationData {
    #[serde(rename_all = "camelCase")]
    AddChild {
        parent_id: NodeId,
        role: String,
        index: i64,
        child_id: NodeId,
        #[serde(default)]
        concept: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    RemoveChild { node_id: NodeId },
    #[serde(rename_all = "camelCase")]
    MoveChild {
        parent_id: NodeId,
        role: String,
        index: i64,
        child_id: NodeId,
    },
    #[serde(rename_all = "camelCase")]
    SetProperty {
        node_id: NodeId,
        role: String,
        #[serde(default)]
        value: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    SetReference {
        node_id: NodeId,
        role: String,
        #[serde(default)]
        target: Option<NodeId>,
    },
    #[serde(rename_all = "camelCase")]
    SetConcept {
        node_id: NodeId,
        #[serde(default)]
        concept: Option<String>,
    },
}

impl From<OperationData> for Operation {
    fn from(data: OperationData) -> Self {
        match data {
            OperationData::AddChild {
                parent_id,
                role,
                index,
                child_id,
                concept,
            } => Operation::AddChild {
                parent: parent_id,
                role,
                index,
                child: child_id,
                concept,
            },
            OperationData::RemoveChild { node_id } => Operation::RemoveChild { node: node_id },
            OperationData::MoveChild {
                parent_id,
                role,
                index,
                child_id,
            } => Operation::MoveChild {
                parent: parent_id,
                role,
                index,
                child: child_id,
            },
            OperationData::SetProperty {
                node_id,
                role,
                value,
            } => Operation::SetProperty {
                node: node_id,
                role,
                value,
            },
            OperationData::SetReference {
                node_id,
                role,
                target,
            } => Operation::SetReference {
                node: node_id,
                role,
                target,
            },
            OperationData::SetConcept { node_id, concept } => Operation::SetConcept {
                node: node_id,
                concept,
            },
        }
    }
}

impl From<&Operation> for OperationData {
    fn from(op: &Operation) -> Self {
        match op.clone() {
            Operation::AddChild {
                parent,
                role,
                index,
                child,
                concept,
            } => OperationData::AddChild {
                parent_id: parent,
                role,
                index,
                child_id: child,
                concept,
            },
            Operation::RemoveChild { node } => OperationData::RemoveChild { node_id: node },
            Operation::MoveChild {
                parent,
                role,
                index,
                child,
            } => OperationData::MoveChild {
                parent_id: parent,
                role,
                index,
                child_id: child,
            },
            Operation::SetProperty { node, role, value } => OperationData::SetProperty {
                node_id: node,
                role,
                value,
            },
            Operation::SetReference { node, role, target } => OperationData::SetReference {
                node_id: node,
                role,
                target,
            },
            Operation::SetConcept { node, concept } => OperationData::SetConcept {
                node_id: node,
                concept,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeSummary {
    pub root_hash: ChunkHash,
    pub node_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictData {
    pub index: usize,
    pub operation: OperationData,
    pub reason: OperationError,
}

impl From<&Conflict> for ConflictData {
    fn from(conflict: &Conflict) -> Self {
        Self {
            index: conflict.index,
            operation: OperationData::from(&conflict.operation),
            reason: conflict.error.clone(),
        }
    }
}

impl From<ConflictData> for Conflict {
    fn from(data: ConflictData) -> Self {
        Self {
            index: data.index,
            operation: Operation::from(data.operation),
            error: data.reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorData {
    pub kind: ErrorKind,
    pub message: String,
}

/// Server response to a push
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageFromServer {
    pub change_set_id: Option<i64>,
    pub base_change_set: Option<i64>,
    pub version_hash: Option<ChunkHash>,
    pub outcome: Option<PushOutcome>,
    pub tree: Option<TreeSummary>,
    #[serde(default)]
    pub conflicts: Vec<ConflictData>,
    pub error: Option<ErrorData>,
}

impl MessageFromServer {
    pub fn from_push(request: &MessageFromClient, result: &PushResult) -> Result<Self> {
        let tree = result.version.tree();
        Ok(Self {
            change_set_id: Some(request.change_set_id),
            base_change_set: request.base_change_set,
            version_hash: Some(result.version.hash()),
            outcome: Some(result.outcome),
            tree: Some(TreeSummary {
                root_hash: tree.root_hash(),
                node_count: tree.node_count()?,
            }),
            conflicts: result.conflicts.iter().map(ConflictData::from).collect(),
            error: None,
        })
    }

    pub fn failure(change_set_id: Option<i64>, base_change_set: Option<i64>, error: &VcsError) -> Self {
        Self {
            change_set_id,
            base_change_set,
            version_hash: None,
            outcome: None,
            tree: None,
            conflicts: Vec::new(),
            error: Some(ErrorData {
                kind: error.kind(),
                message: error.to_string(),
            }),
        }
    }

    /// Turn an error response back into an error.
    pub fn check(self) -> Result<Self> {
        match self.error {
            Some(ErrorData { kind, message }) => Err(VcsError::Remote { kind, message }),
            None => Ok(self),
        }
    }
}
