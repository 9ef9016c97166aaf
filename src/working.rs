//! Working branches
//!
//! A working branch is a single-writer editing session over a base tree.
//! Every edit is applied to an in-memory overlay and recorded in an
//! operation log; the log and the materialized tree are handed over
//! together when the session ends.
//!
//! Author: Moroya Sakamoto

use std::sync::Arc;

use crate::error::Result;
use crate::ids::{IdGenerator, NodeId};
use crate::node::NodeData;
use crate::operation::{AppliedOperation, Operation};
use crate::overlay::TreeOverlay;
use crate::store::ChunkHash;
use crate::tree::PersistentTree;
use crate::version::Version;

/// Result of closing a working branch
#[derive(Debug)]
pub struct OperationsAndTree {
    /// Every operation since the base, in order
    pub operations: Vec<Operation>,
    pub tree: PersistentTree,
    /// Version the session started from, if any
    pub base_version: Option<ChunkHash>,
}

pub struct WorkingBranch {
    overlay: TreeOverlay,
    log: Vec<Operation>,
    base_version: Option<ChunkHash>,
    ids: Arc<IdGenerator>,
}

impl WorkingBranch {
    pub fn new(base: PersistentTree, ids: Arc<IdGenerator>) -> Self {
        Self {
            overlay: TreeOverlay::new(base),
            log: Vec::new(),
            base_version: None,
            ids,
        }
    }

    /// Start editing on top of `version`'s tree.
    pub fn from_version(version: &Version, ids: Arc<IdGenerator>) -> Self {
        Self {
            base_version: Some(version.hash()),
            ..Self::new(version.tree().clone(), ids)
        }
    }

    pub fn base_version(&self) -> Option<ChunkHash> {
        self.base_version
    }

    pub fn base_tree(&self) -> &PersistentTree {
        self.overlay.base()
    }

    /// Operations recorded so far
    pub fn operations(&self) -> &[Operation] {
        &self.log
    }

    pub fn get_node(&self, id: NodeId) -> Result<Option<Arc<NodeData>>> {
        self.overlay.node(id)
    }

    pub fn children(&self, parent: NodeId, role: Option<&str>) -> Result<Vec<NodeId>> {
        self.overlay.children(parent, role)
    }

    /// Run `f` with write access. If `f` fails, none of its edits remain.
    pub fn run_write<R, F>(&mut self, f: F) -> Result<R>
    where
        F: FnOnce(&mut WriteTransaction<'_>) -> Result<R>,
    {
        let snapshot = self.overlay.clone();
        let logged = self.log.len();
        let result = f(&mut WriteTransaction {
            overlay: &mut self.overlay,
            log: &mut self.log,
            ids: &self.ids,
        });
        if result.is_err() {
            self.overlay = snapshot;
            self.log.truncate(logged);
        }
        result
    }

    /// Close the session, returning its log and the tree it produced.
    pub fn operations_and_tree(self) -> Result<OperationsAndTree> {
        let tree = self.overlay.commit()?;
        Ok(OperationsAndTree {
            operations: self.log,
            tree,
            base_version: self.base_version,
        })
    }
}

/// Write access within [`WorkingBranch::run_write`]
pub struct WriteTransaction<'a> {
    overlay: &'a mut TreeOverlay,
    log: &'a mut Vec<Operation>,
    ids: &'a IdGenerator,
}

impl WriteTransaction<'_> {
    /// Apply and record an operation.
    pub fn apply(&mut self, op: Operation) -> Result<AppliedOperation> {
        let applied = self.overlay.apply(&op)?;
        self.log.push(op);
        Ok(applied)
    }

    /// Add a child with a freshly generated id and return the id.
    pub fn add_new_child(
        &mut self,
        parent: NodeId,
        role: &str,
        index: i64,
        concept: Option<&str>,
    ) -> Result<NodeId> {
        let child = self.ids.generate();
        self.add_child(parent, role, index, child, concept)?;
        Ok(child)
    }

    pub fn add_child(
        &mut self,
        parent: NodeId,
        role: &str,
        index: i64,
        child: NodeId,
        concept: Option<&str>,
    ) -> Result<AppliedOperation> {
        self.apply(Operation::AddChild {
            parent,
            role: String::from(role),
            index,
            child,
            concept: concept.map(String::from),
        })
    }

    pub fn move_child(
        &mut self,
        parent: NodeId,
        role: &str,
        index: i64,
        child: NodeId,
    ) -> Result<AppliedOperation> {
        self.apply(Operation::MoveChild {
            parent,
            role: String::from(role),
            index,
            child,
        })
    }

    pub fn remove_child(&mut self, node: NodeId) -> Result<AppliedOperation> {
        self.apply(Operation::RemoveChild { node })
    }

    pub fn set_property(
        &mut self,
        node: NodeId,
        role: &str,
        value: Option<&str>,
    ) -> Result<AppliedOperation> {
        self.apply(Operation::set_property(node, role, value))
    }

    pub fn set_reference(
        &mut self,
        node: NodeId,
        role: &str,
        target: Option<NodeId>,
    ) -> Result<AppliedOperation> {
        self.apply(Operation::set_reference(node, role, target))
    }

    pub fn set_concept(&mut self, node: NodeId, concept: Option<&str>) -> Result<AppliedOperation> {
        self.apply(Operation::SetConcept {
            node,
            concept: concept.map(String::from),
        })
    }

    pub fn get_node(&self, id: NodeId) -> Result<Option<Arc<NodeData>>> {
        self.overlay.node(id)
    }

    pub fn children(&self, parent: NodeId, role: Option<&str>) -> Result<Vec<NodeId>> {
        self.overlay.children(parent, role)
    }
}
