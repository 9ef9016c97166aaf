//! Node id index
//!
//! A hash-array-mapped trie from node id to node-record chunk. Each level
//! consumes 6 bits of the id (low bits first). A leaf lives at the
//! shallowest level where its id prefix is unique, and blocks that shrink
//! to a single leaf are folded into their parent, so the shape of the trie
//! depends only on the set of ids. Two trees with the same content
//! therefore always have the same root hash.
//!
//! Updates rewrite only the blocks on the paths they touch; every other
//! block is shared with the previous tree.
//!
//! Author: Moroya Sakamoto

use std::collections::BTreeMap;

use crate::error::Result;
use crate::ids::NodeId;
use crate::store::ChunkHash;
use crate::tree::TreeStorage;

const BITS_PER_LEVEL: u32 = 6;
const SLOT_MASK: u64 = (1 << BITS_PER_LEVEL) - 1;

/// Entry of an index block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot {
    /// A node id and the chunk holding its record
    Leaf { id: NodeId, node: ChunkHash },
    /// Deeper block shared by several ids
    Child(ChunkHash),
}

/// One trie level: populated slots in ascending slot order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexBlock {
    pub entries: Vec<(u8, Slot)>,
}

impl IndexBlock {
    pub fn get(&self, slot: u8) -> Option<&Slot> {
        self.entries
            .binary_search_by_key(&slot, |(s, _)| *s)
            .ok()
            .map(|i| &self.entries[i].1)
    }
}

#[inline]
fn slot_of(id: NodeId, level: u32) -> u8 {
    ((id >> (level * BITS_PER_LEVEL)) & SLOT_MASK) as u8
}

/// Index with a single entry; used for the root-only tree.
pub(crate) fn singleton(storage: &TreeStorage, id: NodeId, node: ChunkHash) -> Result<ChunkHash> {
    storage.put_block(IndexBlock {
        entries: vec![(slot_of(id, 0), Slot::Leaf { id, node })],
    })
}

/// Chunk of the record for `id`, if present.
pub(crate) fn lookup(storage: &TreeStorage, root: &ChunkHash, id: NodeId) -> Result<Option<ChunkHash>> {
    let mut block = storage.load_block(root)?;
    let mut level = 0;
    loop {
        let next = match block.get(slot_of(id, level)) {
            None => return Ok(None),
            Some(Slot::Leaf { id: found, node }) => {
                return Ok((*found == id).then_some(*node));
            }
            Some(Slot::Child(hash)) => *hash,
        };
        block = storage.load_block(&next)?;
        level += 1;
    }
}

/// Apply `(id, Some(record))` upserts and `(id, None)` deletions.
///
/// Returns the new root block hash. The root block is never folded away.
pub(crate) fn update(
    storage: &TreeStorage,
    root: &ChunkHash,
    updates: Vec<(NodeId, Option<ChunkHash>)>,
) -> Result<ChunkHash> {
    if updates.is_empty() {
        return Ok(*root);
    }
    let block = storage.load_block(root)?;
    let updated = update_block(storage, &block, 0, updates)?;
    storage.put_block(updated)
}

fn update_block(
    storage: &TreeStorage,
    block: &IndexBlock,
    level: u32,
    updates: Vec<(NodeId, Option<ChunkHash>)>,
) -> Result<IndexBlock> {
    let mut groups: BTreeMap<u8, Vec<(NodeId, Option<ChunkHash>)>> = BTreeMap::new();
    for (id, change) in updates {
        groups.entry(slot_of(id, level)).or_default().push((id, change));
    }

    let mut entries: BTreeMap<u8, Slot> = block.entries.iter().cloned().collect();
    for (slot, group) in groups {
        let existing = entries.remove(&slot);
        if let Some(updated) = update_slot(storage, existing, level + 1, group)? {
            entries.insert(slot, updated);
        }
    }
    Ok(IndexBlock {
        entries: entries.into_iter().collect(),
    })
}

fn update_slot(
    storage: &TreeStorage,
    existing: Option<Slot>,
    child_level: u32,
    updates: Vec<(NodeId, Option<ChunkHash>)>,
) -> Result<Option<Slot>> {
    if let Some(Slot::Child(hash)) = existing {
        let child = storage.load_block(&hash)?;
        let updated = update_block(storage, &child, child_level, updates)?;
        return fold(storage, updated);
    }

    let mut leaves: BTreeMap<NodeId, ChunkHash> = BTreeMap::new();
    if let Some(Slot::Leaf { id, node }) = existing {
        leaves.insert(id, node);
    }
    for (id, change) in updates {
        match change {
            Some(node) => {
                leaves.insert(id, node);
            }
            None => {
                leaves.remove(&id);
            }
        }
    }

    match leaves.len() {
        0 => Ok(None),
        1 => Ok(leaves
            .into_iter()
            .next()
            .map(|(id, node)| Slot::Leaf { id, node })),
        _ => {
            let inserts = leaves.into_iter().map(|(id, n)| (id, Some(n))).collect();
            let block = update_block(storage, &IndexBlock::default(), child_level, inserts)?;
            fold(storage, block)
        }
    }
}

/// Canonical form of a non-root block: empty disappears, a lone leaf
/// moves up, anything else is stored.
fn fold(storage: &TreeStorage, block: IndexBlock) -> Result<Option<Slot>> {
    match block.entries.as_slice() {
        [] => Ok(None),
        [(_, leaf @ Slot::Leaf { .. })] => Ok(Some(leaf.clone())),
        _ => Ok(Some(Slot::Child(storage.put_block(block)?))),
    }
}

/// Every `(id, record chunk)` pair, in trie order.
pub(crate) fn entries(storage: &TreeStorage, root: &ChunkHash) -> Result<Vec<(NodeId, ChunkHash)>> {
    let mut out = Vec::new();
    let mut pending = vec![*root];
    while let Some(hash) = pending.pop() {
        let block = storage.load_block(&hash)?;
        for (_, slot) in &block.entries {
            match slot {
                Slot::Leaf { id, node } => out.push((*id, *node)),
                Slot::Child(child) => pending.push(*child),
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryChunkStore;

    fn storage() -> TreeStorage {
        TreeStorage::new(InMemoryChunkStore::shared())
    }

    fn h(n: u64) -> ChunkHash {
        ChunkHash::of(&n.to_le_bytes())
    }

    fn build(storage: &TreeStorage, ids: &[NodeId]) -> ChunkHash {
        let root = singleton(storage, ids[0], h(ids[0])).unwrap();
        ids[1..].iter().fold(root, |root, &id| {
            update(storage, &root, vec![(id, Some(h(id)))]).unwrap()
        })
    }

    #[test]
    fn test_lookup_after_inserts() {
        let s = storage();
        let ids = [1, 2, 65, 129, 1 << 32 | 1, u64::MAX];
        let root = build(&s, &ids);
        for id in ids {
            assert_eq!(lookup(&s, &root, id).unwrap(), Some(h(id)));
        }
        assert_eq!(lookup(&s, &root, 3).unwrap(), None);
    }

    #[test]
    fn test_colliding_prefixes_nest() {
        let s = storage();
        // 1 and 65 share slot 1 at level 0
        let root = build(&s, &[1, 65]);
        let block = s.load_block(&root).unwrap();
        assert_eq!(block.entries.len(), 1);
        assert!(matches!(block.get(1), Some(Slot::Child(_))));
    }

    #[test]
    fn test_insertion_order_does_not_change_root() {
        let s = storage();
        let a = build(&s, &[1, 65, 129, 7, 1 << 40]);
        let b = build(&s, &[1, 1 << 40, 7, 129, 65]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_delete_folds_back_to_canonical_shape() {
        let s = storage();
        let small = build(&s, &[1, 7]);
        let grown = update(&s, &small, vec![(65, Some(h(65)))]).unwrap();
        assert_ne!(grown, small);
        let shrunk = update(&s, &grown, vec![(65, None)]).unwrap();
        assert_eq!(shrunk, small);
    }

    #[test]
    fn test_deep_collision_folds_completely() {
        let s = storage();
        // share the low 60 bits, differ only at the last level
        let a = 5u64;
        let b = 5u64 | (1 << 60);
        let base = build(&s, &[1]);
        let both = update(&s, &base, vec![(a, Some(h(a))), (b, Some(h(b)))]).unwrap();
        assert_eq!(lookup(&s, &both, a).unwrap(), Some(h(a)));
        assert_eq!(lookup(&s, &both, b).unwrap(), Some(h(b)));
        let one = update(&s, &both, vec![(b, None)]).unwrap();
        assert_eq!(one, build(&s, &[1, a]));
    }

    #[test]
    fn test_deleting_absent_id_is_noop() {
        let s = storage();
        let root = build(&s, &[1, 2]);
        assert_eq!(update(&s, &root, vec![(99, None)]).unwrap(), root);
    }

    #[test]
    fn test_empty_update_returns_same_root() {
        let s = storage();
        let root = build(&s, &[1]);
        assert_eq!(update(&s, &root, vec![]).unwrap(), root);
    }

    #[test]
    fn test_entries_lists_every_leaf() {
        let s = storage();
        let ids = [1, 65, 129, 3, 1 << 33];
        let root = build(&s, &ids);
        let mut found: Vec<_> = entries(&s, &root).unwrap().into_iter().map(|(id, _)| id).collect();
        found.sort_unstable();
        let mut expected = ids.to_vec();
        expected.sort_unstable();
        assert_eq!(found, expected);
    }

    #[test]
    fn test_upsert_replaces_record() {
        let s = storage();
        let root = build(&s, &[1, 2]);
        let updated = update(&s, &root, vec![(2, Some(h(99)))]).unwrap();
        assert_eq!(lookup(&s, &updated, 2).unwrap(), Some(h(99)));
        assert_eq!(lookup(&s, &root, 2).unwrap(), Some(h(2)));
    }
}
