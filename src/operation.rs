//! Tree operations
//!
//! The edit primitives recorded by working branches and replayed by the
//! server: add, remove, and move children, set properties, references,
//! and concepts. Applying one yields an [`AppliedOperation`] describing
//! what it actually changed.
//!
//! Author: Moroya Sakamoto

use crate::codec::encode_operations;
use crate::ids::NodeId;
use crate::store::ChunkHash;

/// Edit operation on a tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Create `child` under `parent`. Negative or out-of-range indexes append.
    AddChild {
        parent: NodeId,
        role: String,
        index: i64,
        child: NodeId,
        concept: Option<String>,
    },
    /// Delete a node and its subtree
    RemoveChild { node: NodeId },
    /// Re-attach `child` under `parent`
    MoveChild {
        parent: NodeId,
        role: String,
        index: i64,
        child: NodeId,
    },
    /// `None` clears the property
    SetProperty {
        node: NodeId,
        role: String,
        value: Option<String>,
    },
    /// `None` clears the reference
    SetReference {
        node: NodeId,
        role: String,
        target: Option<NodeId>,
    },
    SetConcept {
        node: NodeId,
        concept: Option<String>,
    },
}

impl Operation {
    pub fn add_child(parent: NodeId, role: &str, index: i64, child: NodeId) -> Self {
        Self::AddChild {
            parent,
            role: String::from(role),
            index,
            child,
            concept: None,
        }
    }

    pub fn set_property(node: NodeId, role: &str, value: Option<&str>) -> Self {
        Self::SetProperty {
            node,
            role: String::from(role),
            value: value.map(String::from),
        }
    }

    pub fn set_reference(node: NodeId, role: &str, target: Option<NodeId>) -> Self {
        Self::SetReference {
            node,
            role: String::from(role),
            target,
        }
    }

    /// The node an operation edits (the parent, for insertions)
    pub fn target_node(&self) -> NodeId {
        match self {
            Operation::AddChild { parent, .. } => *parent,
            Operation::RemoveChild { node } => *node,
            Operation::MoveChild { child, .. } => *child,
            Operation::SetProperty { node, .. } => *node,
            Operation::SetReference { node, .. } => *node,
            Operation::SetConcept { node, .. } => *node,
        }
    }

    /// Wire tag of the variant
    pub fn kind_name(&self) -> &'static str {
        match self {
            Operation::AddChild { .. } => "AddChild",
            Operation::RemoveChild { .. } => "RemoveChild",
            Operation::MoveChild { .. } => "MoveChild",
            Operation::SetProperty { .. } => "SetProperty",
            Operation::SetReference { .. } => "SetReference",
            Operation::SetConcept { .. } => "SetConcept",
        }
    }
}

/// Digest of an operation list in submission order.
pub fn operations_digest(ops: &[Operation]) -> ChunkHash {
    ChunkHash::of(&encode_operations(ops))
}

/// Effect of an operation, including the state it replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppliedOperation {
    ChildAdded {
        parent: NodeId,
        role: String,
        index: usize,
        child: NodeId,
    },
    SubtreeRemoved {
        parent: NodeId,
        role: String,
        index: usize,
        /// Removed ids, the subtree root first
        removed: Vec<NodeId>,
    },
    ChildMoved {
        child: NodeId,
        from: (NodeId, String, usize),
        to: (NodeId, String, usize),
    },
    PropertySet {
        node: NodeId,
        role: String,
        previous: Option<String>,
    },
    ReferenceSet {
        node: NodeId,
        role: String,
        previous: Option<NodeId>,
    },
    ConceptSet {
        node: NodeId,
        previous: Option<String>,
    },
}

impl AppliedOperation {
    /// Operation that undoes this one, when a single operation can.
    ///
    /// Subtree removals cannot be undone by one operation and yield `None`.
    pub fn inverse(&self) -> Option<Operation> {
        match self {
            AppliedOperation::ChildAdded { child, .. } => {
                Some(Operation::RemoveChild { node: *child })
            }
            AppliedOperation::SubtreeRemoved { .. } => None,
            AppliedOperation::ChildMoved { child, from, .. } => Some(Operation::MoveChild {
                parent: from.0,
                role: from.1.clone(),
                index: from.2 as i64,
                child: *child,
            }),
            AppliedOperation::PropertySet {
                node,
                role,
                previous,
            } => Some(Operation::SetProperty {
                node: *node,
                role: role.clone(),
                value: previous.clone(),
            }),
            AppliedOperation::ReferenceSet {
                node,
                role,
                previous,
            } => Some(Operation::SetReference {
                node: *node,
                role: role.clone(),
                target: *previous,
            }),
            AppliedOperation::ConceptSet { node, previous } => Some(Operation::SetConcept {
                node: *node,
                concept: previous.clone(),
            }),
        }
    }
}
