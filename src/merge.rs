//! Operation replay
//!
//! Integrates a client's operation log onto a tree that may have moved on
//! since the client started. Each operation is re-applied in order; one
//! that no longer applies becomes a [`Conflict`] and is skipped, and the
//! rest still land. Edits to the same field resolve last-writer-wins.
//!
//! Author: Moroya Sakamoto

use crate::error::{OperationError, Result, VcsError};
use crate::operation::Operation;
use crate::overlay::TreeOverlay;
use crate::tree::PersistentTree;

/// Submitted operation that could not be applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    /// Position in the submitted list
    pub index: usize,
    pub operation: Operation,
    pub error: OperationError,
}

#[derive(Debug)]
pub struct ReplayResult {
    pub tree: PersistentTree,
    /// Operations that applied, in order
    pub applied: Vec<Operation>,
    pub conflicts: Vec<Conflict>,
}

impl ReplayResult {
    /// True if every operation applied
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

/// Replay `ops` onto `base`, collecting the ones that fail.
///
/// Only operation failures become conflicts; store errors abort the replay.
pub fn replay_operations(base: &PersistentTree, ops: &[Operation]) -> Result<ReplayResult> {
    let mut overlay = TreeOverlay::new(base.clone());
    let mut applied = Vec::with_capacity(ops.len());
    let mut conflicts = Vec::new();

    for (index, op) in ops.iter().enumerate() {
        match overlay.apply(op) {
            Ok(_) => applied.push(op.clone()),
            Err(VcsError::Operation(error)) => {
                tracing::warn!(
                    index,
                    op = op.kind_name(),
                    node = op.target_node(),
                    %error,
                    "operation conflicts"
                );
                conflicts.push(Conflict {
                    index,
                    operation: op.clone(),
                    error,
                });
            }
            Err(other) => return Err(other),
        }
    }

    Ok(ReplayResult {
        tree: overlay.commit()?,
        applied,
        conflicts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ROOT_ID;
    use crate::store::InMemoryChunkStore;

    fn base() -> PersistentTree {
        PersistentTree::empty(InMemoryChunkStore::shared())
            .unwrap()
            .with_operations(&[
                Operation::add_child(ROOT_ID, "r", -1, 10),
                Operation::add_child(ROOT_ID, "r", -1, 20),
            ])
            .unwrap()
    }

    #[test]
    fn test_clean_replay() {
        let ops = vec![
            Operation::set_property(10, "name", Some("a")),
            Operation::add_child(20, "c", -1, 21),
        ];
        let result = replay_operations(&base(), &ops).unwrap();
        assert!(result.is_clean());
        assert_eq!(result.applied, ops);
        assert_eq!(result.tree, base().with_operations(&ops).unwrap());
    }

    #[test]
    fn test_edit_of_removed_node_conflicts() {
        let tree = base()
            .with_operations(&[Operation::RemoveChild { node: 10 }])
            .unwrap();
        let ops = vec![
            Operation::set_property(10, "name", Some("lost")),
            Operation::set_property(20, "name", Some("kept")),
        ];
        let result = replay_operations(&tree, &ops).unwrap();
        assert!(!result.is_clean());
        assert_eq!(
            result.conflicts,
            vec![Conflict {
                index: 0,
                operation: ops[0].clone(),
                error: OperationError::NodeNotFound { id: 10 },
            }]
        );
        assert_eq!(result.applied, vec![ops[1].clone()]);
        let node = result.tree.get_node(20).unwrap().unwrap();
        assert_eq!(node.property("name"), Some("kept"));
    }

    #[test]
    fn test_last_writer_wins() {
        let tree = base()
            .with_operations(&[Operation::set_property(10, "name", Some("first"))])
            .unwrap();
        let result =
            replay_operations(&tree, &[Operation::set_property(10, "name", Some("second"))]).unwrap();
        assert!(result.is_clean());
        let node = result.tree.get_node(10).unwrap().unwrap();
        assert_eq!(node.property("name"), Some("second"));
    }

    #[test]
    fn test_later_ops_see_earlier_ones() {
        let ops = vec![
            Operation::add_child(10, "c", -1, 11),
            Operation::add_child(11, "c", -1, 12),
            Operation::RemoveChild { node: 11 },
        ];
        let result = replay_operations(&base(), &ops).unwrap();
        assert!(result.is_clean());
        assert!(result.tree.get_node(12).unwrap().is_none());
    }

    #[test]
    fn test_empty_replay_returns_base() {
        let tree = base();
        let result = replay_operations(&tree, &[]).unwrap();
        assert_eq!(result.tree, tree);
        assert!(result.applied.is_empty());
    }
}
