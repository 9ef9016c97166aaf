//! Persistent trees
//!
//! A `PersistentTree` is an immutable snapshot: a root hash naming an id
//! index whose leaves point at node-record chunks. Deriving a new tree
//! writes only the changed records and the index blocks above them.
//!
//! Author: Moroya Sakamoto

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::codec;
use crate::error::{OperationError, Result, VcsError};
use crate::ids::{NodeId, ROOT_ID};
use crate::index::{self, IndexBlock};
use crate::node::NodeData;
use crate::operation::{AppliedOperation, Operation};
use crate::overlay::TreeOverlay;
use crate::store::{ChunkHash, SharedChunkStore};

/// Chunk access with decoded-chunk caches, shared by trees derived from
/// one another.
pub(crate) struct TreeStorage {
    store: SharedChunkStore,
    nodes: RwLock<HashMap<ChunkHash, Arc<NodeData>>>,
    blocks: RwLock<HashMap<ChunkHash, Arc<IndexBlock>>>,
}

impl TreeStorage {
    pub(crate) fn new(store: SharedChunkStore) -> Self {
        Self {
            store,
            nodes: RwLock::new(HashMap::new()),
            blocks: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn store(&self) -> &SharedChunkStore {
        &self.store
    }

    pub(crate) fn load_node(&self, hash: &ChunkHash) -> Result<Arc<NodeData>> {
        if let Some(node) = self.nodes.read().get(hash) {
            return Ok(Arc::clone(node));
        }
        let bytes = self.store.get(hash)?;
        let node = Arc::new(codec::decode_node(hash, &bytes)?);
        self.nodes.write().insert(*hash, Arc::clone(&node));
        Ok(node)
    }

    pub(crate) fn put_node(&self, node: Arc<NodeData>) -> Result<ChunkHash> {
        let hash = self.store.put(&codec::encode_node(&node))?;
        self.nodes.write().entry(hash).or_insert(node);
        Ok(hash)
    }

    pub(crate) fn load_block(&self, hash: &ChunkHash) -> Result<Arc<IndexBlock>> {
        if let Some(block) = self.blocks.read().get(hash) {
            return Ok(Arc::clone(block));
        }
        let bytes = self.store.get(hash)?;
        let block = Arc::new(codec::decode_index_block(hash, &bytes)?);
        self.blocks.write().insert(*hash, Arc::clone(&block));
        Ok(block)
    }

    pub(crate) fn put_block(&self, block: IndexBlock) -> Result<ChunkHash> {
        let hash = self.store.put(&codec::encode_index_block(&block))?;
        self.blocks.write().entry(hash).or_insert_with(|| Arc::new(block));
        Ok(hash)
    }
}

/// Immutable tree snapshot identified by its root hash
#[derive(Clone)]
pub struct PersistentTree {
    storage: Arc<TreeStorage>,
    root: ChunkHash,
}

impl PersistentTree {
    /// Tree holding only the root node
    pub fn empty(store: SharedChunkStore) -> Result<Self> {
        let storage = Arc::new(TreeStorage::new(store));
        let record = storage.put_node(Arc::new(NodeData::root()))?;
        let root = index::singleton(&storage, ROOT_ID, record)?;
        Ok(Self { storage, root })
    }

    /// Open a stored tree; fails if the root block is missing or corrupt.
    pub fn load(store: SharedChunkStore, root_hash: ChunkHash) -> Result<Self> {
        let storage = Arc::new(TreeStorage::new(store));
        storage.load_block(&root_hash)?;
        Ok(Self {
            storage,
            root: root_hash,
        })
    }

    pub fn root_hash(&self) -> ChunkHash {
        self.root
    }

    pub fn store(&self) -> &SharedChunkStore {
        self.storage.store()
    }

    pub fn get_node(&self, id: NodeId) -> Result<Option<Arc<NodeData>>> {
        let Some(record) = index::lookup(&self.storage, &self.root, id)? else {
            return Ok(None);
        };
        let node = self.storage.load_node(&record)?;
        if node.id != id {
            return Err(VcsError::CorruptChunk {
                hash: record,
                reason: format!("indexed as {id:#x} but holds {:#x}", node.id),
            });
        }
        Ok(Some(node))
    }

    pub fn contains(&self, id: NodeId) -> Result<bool> {
        Ok(index::lookup(&self.storage, &self.root, id)?.is_some())
    }

    /// Children of `parent` under `role`, or all of them when `role` is `None`.
    pub fn children(&self, parent: NodeId, role: Option<&str>) -> Result<Vec<NodeId>> {
        let node = self
            .get_node(parent)?
            .ok_or(OperationError::NodeNotFound { id: parent })?;
        Ok(node.children(role))
    }

    pub fn parent_of(&self, id: NodeId) -> Result<Option<NodeId>> {
        let node = self
            .get_node(id)?
            .ok_or(OperationError::NodeNotFound { id })?;
        Ok(node.parent)
    }

    /// Chunk holding the record of `id`
    pub fn node_chunk(&self, id: NodeId) -> Result<Option<ChunkHash>> {
        index::lookup(&self.storage, &self.root, id)
    }

    /// All node ids, ascending
    pub fn node_ids(&self) -> Result<Vec<NodeId>> {
        let mut ids: Vec<NodeId> = index::entries(&self.storage, &self.root)?
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    pub fn node_count(&self) -> Result<usize> {
        Ok(index::entries(&self.storage, &self.root)?.len())
    }

    /// Derive the tree with `op` applied. `self` is unchanged.
    pub fn with_operation(&self, op: &Operation) -> Result<(PersistentTree, AppliedOperation)> {
        let mut overlay = TreeOverlay::new(self.clone());
        let applied = overlay.apply(op)?;
        Ok((overlay.commit()?, applied))
    }

    /// Apply `ops` in order; the first failure aborts the whole batch.
    pub fn with_operations(&self, ops: &[Operation]) -> Result<PersistentTree> {
        let mut overlay = TreeOverlay::new(self.clone());
        for op in ops {
            overlay.apply(op)?;
        }
        overlay.commit()
    }

    /// Write changed records and rebuild the index paths above them.
    pub(crate) fn with_changes(
        &self,
        changes: &BTreeMap<NodeId, Option<Arc<NodeData>>>,
    ) -> Result<PersistentTree> {
        let mut updates = Vec::with_capacity(changes.len());
        for (&id, change) in changes {
            let record = match change {
                Some(node) => Some(self.storage.put_node(Arc::clone(node))?),
                None => None,
            };
            updates.push((id, record));
        }
        let root = index::update(&self.storage, &self.root, updates)?;
        tracing::trace!(changed = changes.len(), root = %root, "derived tree");
        Ok(Self {
            storage: Arc::clone(&self.storage),
            root,
        })
    }
}

impl PartialEq for PersistentTree {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root
    }
}

impl Eq for PersistentTree {}

impl fmt::Debug for PersistentTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentTree").field("root", &self.root).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryChunkStore;

    fn empty() -> PersistentTree {
        PersistentTree::empty(InMemoryChunkStore::shared()).unwrap()
    }

    fn add(parent: NodeId, role: &str, child: NodeId) -> Operation {
        Operation::add_child(parent, role, -1, child)
    }

    #[test]
    fn test_empty_tree_has_only_root() {
        let tree = empty();
        assert_eq!(tree.node_ids().unwrap(), vec![ROOT_ID]);
        let root = tree.get_node(ROOT_ID).unwrap().unwrap();
        assert!(root.parent.is_none());
        assert!(tree.children(ROOT_ID, None).unwrap().is_empty());
    }

    #[test]
    fn test_empty_trees_share_a_hash() {
        assert_eq!(empty().root_hash(), empty().root_hash());
    }

    #[test]
    fn test_with_operation_leaves_original_untouched() {
        let tree = empty();
        let (next, applied) = tree.with_operation(&add(ROOT_ID, "r", 10)).unwrap();
        assert_eq!(
            applied,
            AppliedOperation::ChildAdded {
                parent: ROOT_ID,
                role: String::from("r"),
                index: 0,
                child: 10
            }
        );
        assert!(tree.get_node(10).unwrap().is_none());
        assert_eq!(next.children(ROOT_ID, Some("r")).unwrap(), vec![10]);
        assert_eq!(next.parent_of(10).unwrap(), Some(ROOT_ID));
    }

    #[test]
    fn test_same_content_same_hash_regardless_of_path() {
        let tree = empty();
        let a = tree
            .with_operations(&[
                add(ROOT_ID, "r", 10),
                Operation::set_property(10, "name", Some("x")),
                add(ROOT_ID, "r", 11),
            ])
            .unwrap();
        let b = tree
            .with_operations(&[
                add(ROOT_ID, "r", 10),
                add(ROOT_ID, "r", 11),
                Operation::set_property(10, "name", Some("temp")),
                Operation::set_property(10, "name", Some("x")),
            ])
            .unwrap();
        assert_eq!(a.root_hash(), b.root_hash());
    }

    #[test]
    fn test_add_then_remove_restores_hash() {
        let tree = empty();
        let grown = tree.with_operations(&[add(ROOT_ID, "r", 10), add(10, "c", 11)]).unwrap();
        let shrunk = grown
            .with_operations(&[Operation::RemoveChild { node: 10 }])
            .unwrap();
        assert_eq!(shrunk.root_hash(), tree.root_hash());
    }

    #[test]
    fn test_load_by_hash() {
        let store = InMemoryChunkStore::shared();
        let tree = PersistentTree::empty(store.clone())
            .unwrap()
            .with_operations(&[add(ROOT_ID, "r", 10)])
            .unwrap();
        let loaded = PersistentTree::load(store, tree.root_hash()).unwrap();
        assert_eq!(loaded, tree);
        assert_eq!(loaded.children(ROOT_ID, None).unwrap(), vec![10]);
    }

    #[test]
    fn test_load_missing_root_fails() {
        let store = InMemoryChunkStore::shared();
        let err = PersistentTree::load(store, ChunkHash::of(b"nothing")).unwrap_err();
        assert!(matches!(err, VcsError::ChunkNotFound(_)));
    }

    #[test]
    fn test_children_of_missing_parent() {
        let err = empty().children(42, None).unwrap_err();
        assert!(matches!(
            err,
            VcsError::Operation(OperationError::NodeNotFound { id: 42 })
        ));
    }

    #[test]
    fn test_failed_batch_aborts() {
        let tree = empty();
        let err = tree
            .with_operations(&[add(ROOT_ID, "r", 10), add(99, "r", 11)])
            .unwrap_err();
        assert!(matches!(err, VcsError::Operation(_)));
    }

    #[test]
    fn test_unchanged_records_are_shared() {
        let tree = empty()
            .with_operations(&[add(ROOT_ID, "r", 10), add(ROOT_ID, "r", 11)])
            .unwrap();
        let next = tree
            .with_operations(&[Operation::set_property(11, "name", Some("n"))])
            .unwrap();
        assert_eq!(tree.node_chunk(10).unwrap(), next.node_chunk(10).unwrap());
        assert_ne!(tree.node_chunk(11).unwrap(), next.node_chunk(11).unwrap());
    }

    #[test]
    fn test_node_count() {
        let tree = empty()
            .with_operations(&[add(ROOT_ID, "r", 10), add(10, "c", 11), add(10, "c", 12)])
            .unwrap();
        assert_eq!(tree.node_count().unwrap(), 4);
        assert_eq!(tree.node_ids().unwrap(), vec![ROOT_ID, 10, 11, 12]);
    }
}
