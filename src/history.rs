//! Version graph traversal
//!
//! Breadth-first walks over parent links: nearest common ancestor,
//! ancestry tests, and linear history listings. Walks read only version
//! records, never trees.
//!
//! Author: Moroya Sakamoto

use std::collections::{HashSet, VecDeque};

use crate::error::Result;
use crate::store::{ChunkHash, SharedChunkStore};
use crate::version::{Version, VersionRecord};

// ── Common Ancestor ───────────────────────────────────────────────────

/// Nearest version reachable from both `left` and `right` (each counts as
/// its own ancestor).
pub fn common_ancestor(
    store: &SharedChunkStore,
    left: &ChunkHash,
    right: &ChunkHash,
) -> Result<Option<ChunkHash>> {
    common_ancestor_within(store, left, right, usize::MAX)
}

/// As [`common_ancestor`], giving up after visiting `limit` versions.
pub fn common_ancestor_within(
    store: &SharedChunkStore,
    left: &ChunkHash,
    right: &ChunkHash,
    limit: usize,
) -> Result<Option<ChunkHash>> {
    if left == right {
        return Ok(Some(*left));
    }
    let mut sides = [Frontier::new(*left), Frontier::new(*right)];
    let mut visited = 2usize;

    // Alternate one level per side so the first meeting point is nearest
    while !(sides[0].queue.is_empty() && sides[1].queue.is_empty()) {
        for side in 0..2 {
            let other = 1 - side;
            let level: Vec<ChunkHash> = sides[side].queue.drain(..).collect();
            for hash in level {
                for parent in VersionRecord::load(store, &hash)?.parents {
                    if sides[other].seen.contains(&parent) {
                        return Ok(Some(parent));
                    }
                    if sides[side].seen.insert(parent) {
                        visited += 1;
                        if visited > limit {
                            tracing::warn!(limit, "ancestor search limit reached");
                            return Ok(None);
                        }
                        sides[side].queue.push_back(parent);
                    }
                }
            }
        }
    }
    Ok(None)
}

struct Frontier {
    seen: HashSet<ChunkHash>,
    queue: VecDeque<ChunkHash>,
}

impl Frontier {
    fn new(start: ChunkHash) -> Self {
        Self {
            seen: HashSet::from([start]),
            queue: VecDeque::from([start]),
        }
    }
}

// ── Ancestry Walks ────────────────────────────────────────────────────

/// True if `ancestor` is `descendant` or reachable from it.
pub fn is_ancestor(
    store: &SharedChunkStore,
    ancestor: &ChunkHash,
    descendant: &ChunkHash,
) -> Result<bool> {
    Ok(find_in_ancestry(store, descendant, usize::MAX, |hash, _| hash == ancestor)?.is_some())
}

/// First version (in breadth-first order from `head`, inclusive) that
/// satisfies `pred`, visiting at most `limit` versions.
pub(crate) fn find_in_ancestry<F>(
    store: &SharedChunkStore,
    head: &ChunkHash,
    limit: usize,
    mut pred: F,
) -> Result<Option<ChunkHash>>
where
    F: FnMut(&ChunkHash, &VersionRecord) -> bool,
{
    let mut seen = HashSet::from([*head]);
    let mut queue = VecDeque::from([*head]);
    while let Some(hash) = queue.pop_front() {
        if seen.len() > limit {
            break;
        }
        let record = VersionRecord::load(store, &hash)?;
        if pred(&hash, &record) {
            return Ok(Some(hash));
        }
        for parent in record.parents {
            if seen.insert(parent) {
                queue.push_back(parent);
            }
        }
    }
    Ok(None)
}

/// Visit every version record reachable from any of `heads` once.
pub(crate) fn walk_ancestry<F>(store: &SharedChunkStore, heads: &[ChunkHash], mut visit: F) -> Result<()>
where
    F: FnMut(&ChunkHash, &VersionRecord),
{
    let mut seen: HashSet<ChunkHash> = heads.iter().copied().collect();
    let mut queue: VecDeque<ChunkHash> = seen.iter().copied().collect();
    while let Some(hash) = queue.pop_front() {
        let record = VersionRecord::load(store, &hash)?;
        visit(&hash, &record);
        for parent in &record.parents {
            if seen.insert(*parent) {
                queue.push_back(*parent);
            }
        }
    }
    Ok(())
}

/// Up to `limit` versions reachable from `head`, nearest first.
pub fn history(store: &SharedChunkStore, head: &ChunkHash, limit: usize) -> Result<Vec<Version>> {
    let mut out = Vec::new();
    let mut seen = HashSet::from([*head]);
    let mut queue = VecDeque::from([*head]);
    while let Some(hash) = queue.pop_front() {
        if out.len() >= limit {
            break;
        }
        let version = Version::load(store, &hash)?;
        for parent in version.parents() {
            if seen.insert(*parent) {
                queue.push_back(*parent);
            }
        }
        out.push(version);
    }
    Ok(out)
}

// ── Tests ──────────────────────────────────────────────────────────────
