//! Versions
//!
//! A version is an immutable history node: a tree, up to two parents, the
//! operations that produced it, and authorship metadata. Versions are
//! stored as chunks and identified by their hash.
//!
//! Author: Moroya Sakamoto

use chrono::{DateTime, TimeZone, Utc};

use crate::codec;
use crate::error::{Result, VcsError};
use crate::operation::Operation;
use crate::store::{ChunkHash, SharedChunkStore};
use crate::tree::PersistentTree;

/// Encoded form of a version chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct VersionRecord {
    pub tree: ChunkHash,
    pub parents: Vec<ChunkHash>,
    pub author: Option<String>,
    pub timestamp_ms: i64,
    /// Digest of the client-submitted operations, for pushes
    pub submitted: Option<ChunkHash>,
    pub operations: Vec<Operation>,
}

impl VersionRecord {
    pub(crate) fn load(store: &SharedChunkStore, hash: &ChunkHash) -> Result<Self> {
        let bytes = store.get(hash).map_err(|e| match e {
            VcsError::ChunkNotFound(h) => VcsError::VersionNotFound(h),
            other => other,
        })?;
        codec::decode_version(hash, &bytes)
    }
}

/// Authorship of a new version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMeta {
    pub author: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl VersionMeta {
    /// Stamped with the current time, at millisecond precision
    pub fn now(author: Option<&str>) -> Self {
        let now = Utc::now();
        let timestamp = Utc
            .timestamp_millis_opt(now.timestamp_millis())
            .single()
            .unwrap_or(now);
        Self {
            author: author.map(String::from),
            timestamp,
        }
    }
}

/// Immutable history node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    hash: ChunkHash,
    tree: PersistentTree,
    parents: Vec<ChunkHash>,
    operations: Vec<Operation>,
    author: Option<String>,
    timestamp: DateTime<Utc>,
    submitted: Option<ChunkHash>,
}

impl Version {
    /// Persist a new version. Merge versions carry two parents.
    pub fn create(
        tree: PersistentTree,
        parents: Vec<ChunkHash>,
        operations: Vec<Operation>,
        meta: VersionMeta,
    ) -> Result<Self> {
        Self::create_with_digest(tree, parents, operations, meta, None)
    }

    pub(crate) fn create_with_digest(
        tree: PersistentTree,
        parents: Vec<ChunkHash>,
        operations: Vec<Operation>,
        meta: VersionMeta,
        submitted: Option<ChunkHash>,
    ) -> Result<Self> {
        if parents.len() > 2 {
            return Err(VcsError::InvalidParents(parents.len()));
        }
        let record = VersionRecord {
            tree: tree.root_hash(),
            parents,
            author: meta.author,
            timestamp_ms: meta.timestamp.timestamp_millis(),
            submitted,
            operations,
        };
        let hash = tree.store().put(&codec::encode_version(&record))?;
        tracing::debug!(version = %hash, parents = record.parents.len(), "created version");
        Ok(Self {
            hash,
            tree,
            parents: record.parents,
            operations: record.operations,
            author: record.author,
            timestamp: meta.timestamp,
            submitted,
        })
    }

    /// Load a stored version and open its tree.
    pub fn load(store: &SharedChunkStore, hash: &ChunkHash) -> Result<Self> {
        let record = VersionRecord::load(store, hash)?;
        let timestamp = Utc
            .timestamp_millis_opt(record.timestamp_ms)
            .single()
            .ok_or_else(|| VcsError::CorruptChunk {
                hash: *hash,
                reason: format!("timestamp {} out of range", record.timestamp_ms),
            })?;
        let tree = PersistentTree::load(store.clone(), record.tree)?;
        Ok(Self {
            hash: *hash,
            tree,
            parents: record.parents,
            operations: record.operations,
            author: record.author,
            timestamp,
            submitted: record.submitted,
        })
    }

    pub fn hash(&self) -> ChunkHash {
        self.hash
    }

    pub fn tree(&self) -> &PersistentTree {
        &self.tree
    }

    pub fn parents(&self) -> &[ChunkHash] {
        &self.parents
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn is_merge(&self) -> bool {
        self.parents.len() == 2
    }

    /// Digest of the operations a client submitted, if this came from a push
    pub fn submitted_digest(&self) -> Option<ChunkHash> {
        self.submitted
    }
}
