//! Content inspection
//!
//! Read-only views of a tree for browsing: an outline labelled by each
//! node's `name` property, and a detail view listing a node's roles.
//!
//! Author: Moroya Sakamoto

use serde::Serialize;

use crate::error::{OperationError, Result};
use crate::ids::NodeId;
use crate::node::NodeData;
use crate::tree::PersistentTree;

const NAME_PROPERTY: &str = "name";
const UNNAMED: &str = "Unnamed Node";
const NO_CONCEPT: &str = "No concept reference";

/// Outline entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeOutline {
    pub id: NodeId,
    pub label: String,
    pub concept: String,
    pub role: Option<String>,
    pub children: Vec<NodeOutline>,
    /// True when children exist below the depth limit
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDetails {
    pub id: NodeId,
    pub label: String,
    pub concept: String,
    pub parent: Option<NodeId>,
    pub role_in_parent: Option<String>,
    pub properties: Vec<PropertyRow>,
    pub references: Vec<ReferenceRow>,
    /// (role, child count)
    pub child_roles: Vec<(String, usize)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropertyRow {
    pub role: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceRow {
    pub role: String,
    pub target: NodeId,
    /// Label of the target when it exists in this tree
    pub target_label: Option<String>,
}

pub fn display_label(node: &NodeData) -> String {
    node.property(NAME_PROPERTY).unwrap_or(UNNAMED).to_string()
}

fn concept_label(node: &NodeData) -> String {
    node.concept.clone().unwrap_or_else(|| String::from(NO_CONCEPT))
}

/// Outline of the subtree at `id`; `max_depth` of `Some(0)` lists only `id`.
pub fn outline(tree: &PersistentTree, id: NodeId, max_depth: Option<usize>) -> Result<NodeOutline> {
    // Pre-order walk; every entry lands after its parent
    let mut flat: Vec<(NodeOutline, Vec<usize>)> = Vec::new();
    let mut stack = vec![(id, max_depth, None::<usize>)];
    while let Some((current, depth, parent)) = stack.pop() {
        let node = tree
            .get_node(current)?
            .ok_or(OperationError::NodeNotFound { id: current })?;
        let child_ids = node.children(None);
        let index = flat.len();
        let truncated = match depth {
            Some(0) => !child_ids.is_empty(),
            _ => {
                let next = depth.map(|d| d - 1);
                stack.extend(child_ids.into_iter().rev().map(|child| (child, next, Some(index))));
                false
            }
        };
        if let Some(parent) = parent {
            flat[parent].1.push(index);
        }
        flat.push((
            NodeOutline {
                id: current,
                label: display_label(&node),
                concept: concept_label(&node),
                role: node.role_in_parent.clone(),
                children: Vec::new(),
                truncated,
            },
            Vec::new(),
        ));
    }

    let mut built: Vec<Option<NodeOutline>> = vec![None; flat.len()];
    for (index, (mut entry, children)) in flat.into_iter().enumerate().rev() {
        entry.children = children.into_iter().filter_map(|c| built[c].take()).collect();
        built[index] = Some(entry);
    }
    built
        .into_iter()
        .next()
        .flatten()
        .ok_or_else(|| OperationError::NodeNotFound { id }.into())
}

pub fn node_details(tree: &PersistentTree, id: NodeId) -> Result<NodeDetails> {
    let node = tree
        .get_node(id)?
        .ok_or(OperationError::NodeNotFound { id })?;
    let properties = node
        .properties
        .iter()
        .map(|(role, value)| PropertyRow {
            role: role.clone(),
            value: value.clone(),
        })
        .collect();
    let mut references = Vec::with_capacity(node.references.len());
    for (role, &target) in &node.references {
        references.push(ReferenceRow {
            role: role.clone(),
            target,
            target_label: tree.get_node(target)?.map(|t| display_label(&t)),
        });
    }
    Ok(NodeDetails {
        id,
        label: display_label(&node),
        concept: concept_label(&node),
        parent: node.parent,
        role_in_parent: node.role_in_parent.clone(),
        properties,
        references,
        child_roles: node
            .children
            .iter()
            .map(|(role, ids)| (role.clone(), ids.len()))
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VcsError;
    use crate::ids::ROOT_ID;
    use crate::operation::Operation;
    use crate::store::InMemoryChunkStore;

    fn sample() -> PersistentTree {
        PersistentTree::empty(InMemoryChunkStore::shared())
            .unwrap()
            .with_operations(&[
                Operation::AddChild {
                    parent: ROOT_ID,
                    role: String::from("classes"),
                    index: -1,
                    child: 10,
                    concept: Some(String::from("c:Class")),
                },
                Operation::set_property(10, "name", Some("Point")),
                Operation::add_child(10, "fields", -1, 11),
                Operation::set_reference(11, "type", Some(10)),
                Operation::set_reference(11, "dangling", Some(999)),
            ])
            .unwrap()
    }

    #[test]
    fn test_outline_labels() {
        let tree = sample();
        let root = outline(&tree, ROOT_ID, None).unwrap();
        assert_eq!(root.label, "Unnamed Node");
        assert_eq!(root.concept, "No concept reference");
        let class = &root.children[0];
        assert_eq!(class.label, "Point");
        assert_eq!(class.concept, "c:Class");
        assert_eq!(class.role.as_deref(), Some("classes"));
        assert_eq!(class.children[0].id, 11);
    }

    #[test]
    fn test_outline_depth_limit() {
        let tree = sample();
        let root = outline(&tree, ROOT_ID, Some(1)).unwrap();
        let class = &root.children[0];
        assert!(class.children.is_empty());
        assert!(class.truncated);
        assert!(!root.truncated);
    }

    #[test]
    fn test_node_details() {
        let tree = sample();
        let details = node_details(&tree, 11).unwrap();
        assert_eq!(details.parent, Some(10));
        assert_eq!(details.references.len(), 2);
        let dangling = details.references.iter().find(|r| r.role == "dangling").unwrap();
        assert!(dangling.target_label.is_none());
        let typed = details.references.iter().find(|r| r.role == "type").unwrap();
        assert_eq!(typed.target_label.as_deref(), Some("Point"));

        let class = node_details(&tree, 10).unwrap();
        assert_eq!(class.properties, vec![PropertyRow {
            role: String::from("name"),
            value: String::from("Point"),
        }]);
        assert_eq!(class.child_roles, vec![(String::from("fields"), 1)]);
    }

    #[test]
    fn test_missing_node() {
        let err = node_details(&sample(), 77).unwrap_err();
        assert!(matches!(
            err,
            VcsError::Operation(OperationError::NodeNotFound { id: 77 })
        ));
    }

    #[test]
    fn test_outline_of_deep_chain() {
        const DEPTH: u64 = 10_000;
        let ops: Vec<Operation> = (0..DEPTH)
            .map(|i| {
                let parent = if i == 0 { ROOT_ID } else { 100 + i - 1 };
                Operation::add_child(parent, "next", -1, 100 + i)
            })
            .collect();
        let tree = PersistentTree::empty(InMemoryChunkStore::shared())
            .unwrap()
            .with_operations(&ops)
            .unwrap();

        let mut current = outline(&tree, ROOT_ID, None).unwrap();
        let mut depth = 0;
        while let Some(child) = current.children.pop() {
            assert!(current.children.is_empty());
            depth += 1;
            current = child;
        }
        assert_eq!(depth, DEPTH);
        assert_eq!(current.id, 100 + DEPTH - 1);
        assert!(!current.truncated);
    }

    #[test]
    fn test_outline_serializes() {
        let json = serde_json::to_value(outline(&sample(), 10, Some(0)).unwrap()).unwrap();
        assert_eq!(json["label"], "Point");
        assert_eq!(json["truncated"], true);
    }
}
