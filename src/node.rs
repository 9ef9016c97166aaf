//! Node records
//!
//! A node carries an optional concept UID, string properties, references
//! to other node ids, and children grouped by role. All maps are ordered
//! so that serialization is canonical.
//!
//! Author: Moroya Sakamoto

use std::collections::BTreeMap;

use crate::ids::{NodeId, ROOT_ID};

/// Node record stored as one chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeData {
    /// Unique identifier within the repository
    pub id: NodeId,
    /// Opaque concept UID (never resolved by the engine)
    pub concept: Option<String>,
    /// Containing node, `None` only for the root
    pub parent: Option<NodeId>,
    /// Role under `parent`
    pub role_in_parent: Option<String>,
    /// Property role -> value
    pub properties: BTreeMap<String, String>,
    /// Reference role -> target id
    pub references: BTreeMap<String, NodeId>,
    /// Child role -> ordered child ids
    pub children: BTreeMap<String, Vec<NodeId>>,
}

impl NodeData {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            concept: None,
            parent: None,
            role_in_parent: None,
            properties: BTreeMap::new(),
            references: BTreeMap::new(),
            children: BTreeMap::new(),
        }
    }

    /// The root record of an empty tree
    pub fn root() -> Self {
        Self::new(ROOT_ID)
    }

    pub fn with_concept(mut self, concept: Option<String>) -> Self {
        self.concept = concept;
        self
    }

    pub fn with_parent(mut self, parent: NodeId, role: &str) -> Self {
        self.parent = Some(parent);
        self.role_in_parent = Some(String::from(role));
        self
    }

    pub fn property(&self, role: &str) -> Option<&str> {
        self.properties.get(role).map(String::as_str)
    }

    pub fn reference(&self, role: &str) -> Option<NodeId> {
        self.references.get(role).copied()
    }

    /// Children under `role`, or every child grouped by role then index.
    pub fn children(&self, role: Option<&str>) -> Vec<NodeId> {
        match role {
            Some(role) => self.children.get(role).cloned().unwrap_or_default(),
            None => self.children.values().flatten().copied().collect(),
        }
    }

    pub fn child_count(&self) -> usize {
        self.children.values().map(Vec::len).sum()
    }

    /// Position of `child` as (role, index)
    pub fn position_of(&self, child: NodeId) -> Option<(&str, usize)> {
        self.children.iter().find_map(|(role, ids)| {
            ids.iter()
                .position(|&c| c == child)
                .map(|idx| (role.as_str(), idx))
        })
    }

    /// Insert `child` under `role`; negative or past-the-end indexes append.
    /// Returns the index actually used.
    pub(crate) fn insert_child(&mut self, role: &str, index: i64, child: NodeId) -> usize {
        let list = self.children.entry(String::from(role)).or_default();
        let at = clamp_index(index, list.len());
        list.insert(at, child);
        at
    }

    /// Detach `child`, dropping the role entry once it is empty.
    pub(crate) fn remove_child(&mut self, child: NodeId) -> bool {
        let mut emptied = None;
        let mut found = false;
        for (role, ids) in self.children.iter_mut() {
            if let Some(idx) = ids.iter().position(|&c| c == child) {
                ids.remove(idx);
                found = true;
                if ids.is_empty() {
                    emptied = Some(role.clone());
                }
                break;
            }
        }
        if let Some(role) = emptied {
            self.children.remove(&role);
        }
        found
    }
}

/// Clamp-to-append index policy
pub(crate) fn clamp_index(index: i64, len: usize) -> usize {
    if index < 0 {
        len
    } else {
        (index as u64).min(len as u64) as usize
    }
}
