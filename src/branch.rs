//! Repositories and branch pointers
//!
//! A branch is a named, movable pointer to a version hash. Pointers only
//! move through compare-and-set, which is what makes concurrent pushes
//! safe.
//!
//! Author: Moroya Sakamoto

use std::fmt;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::ChunkHash;

/// Repository identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepositoryId(String);

impl RepositoryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn branch(&self, name: &str) -> BranchRef {
        BranchRef {
            repository: self.clone(),
            name: String::from(name),
        }
    }
}

impl fmt::Display for RepositoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// (repository, branch name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BranchRef {
    pub repository: RepositoryId,
    pub name: String,
}

impl BranchRef {
    pub fn new(repository: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            repository: RepositoryId::new(repository),
            name: name.into(),
        }
    }
}

impl fmt::Display for BranchRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.repository, self.name)
    }
}

/// Branch pointer storage with atomic compare-and-set.
pub trait BranchStore: Send + Sync {
    /// Current head, `None` if the branch does not exist
    fn head(&self, branch: &BranchRef) -> Result<Option<ChunkHash>>;

    /// Move `branch` to `new` iff its head is still `expected`
    /// (`None` meaning absent). Returns whether the swap happened.
    fn compare_and_set(
        &self,
        branch: &BranchRef,
        expected: Option<ChunkHash>,
        new: ChunkHash,
    ) -> Result<bool>;

    /// Branches of one repository, sorted by name
    fn branches(&self, repository: &RepositoryId) -> Result<Vec<BranchRef>>;

    /// Repositories with at least one branch, sorted
    fn repositories(&self) -> Result<Vec<RepositoryId>>;
}

/// In-process branch store
#[derive(Debug, Default)]
pub struct InMemoryBranchStore {
    heads: DashMap<BranchRef, ChunkHash>,
}

impl InMemoryBranchStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BranchStore for InMemoryBranchStore {
    fn head(&self, branch: &BranchRef) -> Result<Option<ChunkHash>> {
        Ok(self.heads.get(branch).map(|h| *h))
    }

    fn compare_and_set(
        &self,
        branch: &BranchRef,
        expected: Option<ChunkHash>,
        new: ChunkHash,
    ) -> Result<bool> {
        // The entry guard holds the shard lock across the check and the write
        let swapped = match self.heads.entry(branch.clone()) {
            Entry::Occupied(mut slot) => {
                if Some(*slot.get()) == expected {
                    slot.insert(new);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(slot) => {
                if expected.is_none() {
                    slot.insert(new);
                    true
                } else {
                    false
                }
            }
        };
        if swapped {
            tracing::trace!(%branch, head = %new, "branch moved");
        }
        Ok(swapped)
    }

    fn branches(&self, repository: &RepositoryId) -> Result<Vec<BranchRef>> {
        let mut out: Vec<BranchRef> = self
            .heads
            .iter()
            .filter(|e| &e.key().repository == repository)
            .map(|e| e.key().clone())
            .collect();
        out.sort();
        Ok(out)
    }

    fn repositories(&self) -> Result<Vec<RepositoryId>> {
        let mut out: Vec<RepositoryId> = self
            .heads
            .iter()
            .map(|e| e.key().repository.clone())
            .collect();
        out.sort();
        out.dedup();
        Ok(out)
    }
}
