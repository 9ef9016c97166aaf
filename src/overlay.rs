//! Mutable overlay over a persistent tree
//!
//! Operations are validated against the current view and then recorded as
//! replaced or deleted node records. A failed operation leaves the overlay
//! exactly as it was. `commit` turns the accumulated records into a new
//! `PersistentTree` in one index update.
//!
//! Author: Moroya Sakamoto

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{OperationError, Result};
use crate::ids::{NodeId, ROOT_ID};
use crate::node::NodeData;
use crate::operation::{AppliedOperation, Operation};
use crate::tree::PersistentTree;

#[derive(Clone)]
pub struct TreeOverlay {
    base: PersistentTree,
    /// `None` marks a deleted node
    changes: BTreeMap<NodeId, Option<Arc<NodeData>>>,
}

impl TreeOverlay {
    pub fn new(base: PersistentTree) -> Self {
        Self {
            base,
            changes: BTreeMap::new(),
        }
    }

    pub fn base(&self) -> &PersistentTree {
        &self.base
    }

    /// True when nothing has been recorded since `new`
    pub fn is_clean(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Result<Option<Arc<NodeData>>> {
        match self.changes.get(&id) {
            Some(entry) => Ok(entry.clone()),
            None => self.base.get_node(id),
        }
    }

    pub fn children(&self, parent: NodeId, role: Option<&str>) -> Result<Vec<NodeId>> {
        Ok(self.require(parent)?.children(role))
    }

    fn require(&self, id: NodeId) -> Result<Arc<NodeData>> {
        self.node(id)?
            .ok_or_else(|| OperationError::NodeNotFound { id }.into())
    }

    fn put(&mut self, node: NodeData) {
        self.changes.insert(node.id, Some(Arc::new(node)));
    }

    /// Apply one operation to the overlay.
    pub fn apply(&mut self, op: &Operation) -> Result<AppliedOperation> {
        match op {
            Operation::AddChild {
                parent,
                role,
                index,
                child,
                concept,
            } => {
                let mut parent_node = NodeData::clone(&*self.require(*parent)?);
                if self.node(*child)?.is_some() {
                    return Err(OperationError::DuplicateId { id: *child }.into());
                }
                let at = parent_node.insert_child(role, *index, *child);
                self.put(parent_node);
                self.put(
                    NodeData::new(*child)
                        .with_parent(*parent, role)
                        .with_concept(concept.clone()),
                );
                Ok(AppliedOperation::ChildAdded {
                    parent: *parent,
                    role: role.clone(),
                    index: at,
                    child: *child,
                })
            }
            Operation::RemoveChild { node } => self.remove_subtree(*node),
            Operation::MoveChild {
                parent,
                role,
                index,
                child,
            } => self.move_child(*parent, role, *index, *child),
            Operation::SetProperty { node, role, value } => {
                let current = self.require(*node)?;
                let previous = current.properties.get(role).cloned();
                if previous != *value {
                    let mut updated = NodeData::clone(&current);
                    match value {
                        Some(v) => updated.properties.insert(role.clone(), v.clone()),
                        None => updated.properties.remove(role),
                    };
                    self.put(updated);
                }
                Ok(AppliedOperation::PropertySet {
                    node: *node,
                    role: role.clone(),
                    previous,
                })
            }
            Operation::SetReference { node, role, target } => {
                let current = self.require(*node)?;
                let previous = current.reference(role);
                if previous != *target {
                    let mut updated = NodeData::clone(&current);
                    match target {
                        Some(t) => updated.references.insert(role.clone(), *t),
                        None => updated.references.remove(role),
                    };
                    self.put(updated);
                }
                Ok(AppliedOperation::ReferenceSet {
                    node: *node,
                    role: role.clone(),
                    previous,
                })
            }
            Operation::SetConcept { node, concept } => {
                let current = self.require(*node)?;
                let previous = current.concept.clone();
                if previous != *concept {
                    let mut updated = NodeData::clone(&current);
                    updated.concept = concept.clone();
                    self.put(updated);
                }
                Ok(AppliedOperation::ConceptSet {
                    node: *node,
                    previous,
                })
            }
        }
    }

    fn remove_subtree(&mut self, id: NodeId) -> Result<AppliedOperation> {
        if id == ROOT_ID {
            return Err(OperationError::RootImmutable.into());
        }
        let target = self.require(id)?;
        let parent_id = target.parent.ok_or(OperationError::RootImmutable)?;
        let mut parent = NodeData::clone(&*self.require(parent_id)?);
        let (role, index) = parent
            .position_of(id)
            .map(|(role, idx)| (String::from(role), idx))
            .ok_or(OperationError::NodeNotFound { id })?;

        // Depth-first, subtree root first
        let mut removed = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            removed.push(current);
            if let Some(node) = self.node(current)? {
                let mut kids = node.children(None);
                kids.reverse();
                stack.extend(kids);
            }
        }

        parent.remove_child(id);
        self.put(parent);
        for gone in &removed {
            self.changes.insert(*gone, None);
        }
        Ok(AppliedOperation::SubtreeRemoved {
            parent: parent_id,
            role,
            index,
            removed,
        })
    }

    fn move_child(
        &mut self,
        new_parent: NodeId,
        role: &str,
        index: i64,
        child: NodeId,
    ) -> Result<AppliedOperation> {
        if child == ROOT_ID {
            return Err(OperationError::RootImmutable.into());
        }
        let child_node = self.require(child)?;
        self.require(new_parent)?;

        // The destination must not sit inside the moved subtree
        let mut cursor = Some(new_parent);
        while let Some(id) = cursor {
            if id == child {
                return Err(OperationError::CyclicMove {
                    child,
                    parent: new_parent,
                }
                .into());
            }
            cursor = self.node(id)?.and_then(|n| n.parent);
        }

        let old_parent_id = child_node.parent.ok_or(OperationError::RootImmutable)?;
        let mut old_parent = NodeData::clone(&*self.require(old_parent_id)?);
        let from = old_parent
            .position_of(child)
            .map(|(r, idx)| (old_parent_id, String::from(r), idx))
            .ok_or(OperationError::NodeNotFound { id: child })?;
        old_parent.remove_child(child);

        let at = if old_parent_id == new_parent {
            let at = old_parent.insert_child(role, index, child);
            self.put(old_parent);
            at
        } else {
            let mut target = NodeData::clone(&*self.require(new_parent)?);
            let at = target.insert_child(role, index, child);
            self.put(old_parent);
            self.put(target);
            at
        };

        let mut moved = NodeData::clone(&child_node);
        moved.parent = Some(new_parent);
        moved.role_in_parent = Some(String::from(role));
        self.put(moved);

        Ok(AppliedOperation::ChildMoved {
            child,
            from,
            to: (new_parent, String::from(role), at),
        })
    }

    /// Materialize the overlay as a new persistent tree.
    pub fn commit(&self) -> Result<PersistentTree> {
        if self.changes.is_empty() {
            return Ok(self.base.clone());
        }
        self.base.with_changes(&self.changes)
    }
}
