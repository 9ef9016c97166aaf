//! Replication service
//!
//! The server side of synchronization. A push names a branch, the version
//! the client started from, and the operations it recorded. The service
//! integrates them against whatever the branch head is now, commits a new
//! version, and advances the branch with compare-and-set, retrying a
//! bounded number of times when another push wins the race.
//!
//! Outcomes:
//! - head == base: operations apply on base (single parent)
//! - head is an ancestor of base: fast-forward onto base
//! - diverged: operations replay onto head, merge version `(head, base)`
//! - branch absent: created at a version on top of base
//! - resubmission of an already committed push: the earlier version
//!
//! Author: Moroya Sakamoto

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::branch::{BranchRef, BranchStore, InMemoryBranchStore, RepositoryId};
use crate::config::ReplicationConfig;
use crate::error::{Result, VcsError};
use crate::history::{common_ancestor_within, find_in_ancestry, walk_ancestry};
use crate::ids::client_of;
use crate::merge::{replay_operations, Conflict};
use crate::operation::{operations_digest, Operation};
use crate::protocol::{MessageFromClient, MessageFromServer};
use crate::store::{ChunkHash, InMemoryChunkStore, SharedChunkStore};
use crate::tree::PersistentTree;
use crate::version::{Version, VersionMeta};

/// How a push was integrated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PushOutcome {
    /// Head was the base; operations applied directly
    Committed,
    /// Head was behind the base; branch moved onto the base's line
    FastForward,
    /// Head had diverged; operations were replayed onto it
    Merged,
    /// The branch did not exist and was created
    Created,
    /// Same push was already committed; nothing new was written
    Duplicate,
    /// No operations; head returned unchanged
    UpToDate,
}

/// Push request
#[derive(Debug, Clone)]
pub struct PushRequest {
    pub branch: BranchRef,
    pub base: ChunkHash,
    pub operations: Vec<Operation>,
    pub author: Option<String>,
}

impl PushRequest {
    pub fn new(branch: BranchRef, base: ChunkHash, operations: Vec<Operation>) -> Self {
        Self {
            branch,
            base,
            operations,
            author: None,
        }
    }

    pub fn with_author(mut self, author: &str) -> Self {
        self.author = Some(String::from(author));
        self
    }
}

/// Result of a push
#[derive(Debug, Clone)]
pub struct PushResult {
    /// The branch head after the push
    pub version: Version,
    pub outcome: PushOutcome,
    /// Submitted operations that could not be applied
    pub conflicts: Vec<Conflict>,
}

pub struct ReplicationService {
    chunks: SharedChunkStore,
    branches: Arc<dyn BranchStore>,
    config: ReplicationConfig,
    next_client_id: AtomicU32,
}

impl ReplicationService {
    pub fn new(
        chunks: SharedChunkStore,
        branches: Arc<dyn BranchStore>,
        config: ReplicationConfig,
    ) -> Self {
        Self {
            chunks,
            branches,
            config,
            next_client_id: AtomicU32::new(1),
        }
    }

    /// Service over stores that may already hold history. Client ids
    /// resume past every client that minted a node in any branch's history.
    pub fn open(
        chunks: SharedChunkStore,
        branches: Arc<dyn BranchStore>,
        config: ReplicationConfig,
    ) -> Result<Self> {
        let service = Self::new(chunks, branches, config);
        let mut heads = Vec::new();
        for repository in service.branches.repositories()? {
            for branch in service.branches.branches(&repository)? {
                heads.extend(service.branches.head(&branch)?);
            }
        }
        let mut highest = 0u32;
        walk_ancestry(&service.chunks, &heads, |_, record| {
            for op in &record.operations {
                if let Operation::AddChild { child, .. } = op {
                    highest = highest.max(client_of(*child));
                }
            }
        })?;
        let next = highest.saturating_add(1);
        service.next_client_id.store(next, Ordering::Relaxed);
        tracing::info!(heads = heads.len(), next_client_id = next, "opened replication service");
        Ok(service)
    }

    /// Service over in-memory stores with default config
    pub fn in_memory() -> Self {
        Self::new(
            InMemoryChunkStore::shared(),
            Arc::new(InMemoryBranchStore::new()),
            ReplicationConfig::default(),
        )
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    pub fn chunk_store(&self) -> &SharedChunkStore {
        &self.chunks
    }

    /// Fresh non-zero client id for node id generation.
    pub fn allocate_client_id(&self) -> u32 {
        self.next_client_id.fetch_add(1, Ordering::Relaxed)
    }

    // ── Repositories & Branches ───────────────────────────────────────

    /// Create a repository with an empty tree on the default branch.
    pub fn init_repository(&self, repository: &RepositoryId) -> Result<Version> {
        if !self.branches.branches(repository)?.is_empty() {
            return Err(VcsError::RepositoryExists(repository.to_string()));
        }
        let tree = PersistentTree::empty(self.chunks.clone())?;
        let version = Version::create(tree, vec![], vec![], VersionMeta::now(None))?;
        let branch = repository.branch(&self.config.default_branch);
        if !self.branches.compare_and_set(&branch, None, version.hash())? {
            return Err(VcsError::RepositoryExists(repository.to_string()));
        }
        tracing::info!(%repository, %branch, version = %version.hash(), "initialized repository");
        Ok(version)
    }

    /// New branch `name` pointing at the head of `source`.
    pub fn create_branch(&self, source: &BranchRef, name: &str) -> Result<BranchRef> {
        let head = self.head_hash(source)?;
        let branch = source.repository.branch(name);
        if !self.branches.compare_and_set(&branch, None, head)? {
            return Err(VcsError::BranchExists(branch));
        }
        tracing::info!(%branch, from = %source, head = %head, "created branch");
        Ok(branch)
    }

    pub fn list_branches(&self, repository: &RepositoryId) -> Result<Vec<BranchRef>> {
        self.branches.branches(repository)
    }

    pub fn list_repositories(&self) -> Result<Vec<RepositoryId>> {
        self.branches.repositories()
    }

    pub fn head_hash(&self, branch: &BranchRef) -> Result<ChunkHash> {
        self.branches
            .head(branch)?
            .ok_or_else(|| VcsError::BranchNotFound(branch.clone()))
    }

    /// Current head version of `branch`
    pub fn head(&self, branch: &BranchRef) -> Result<Version> {
        self.load_version(&self.head_hash(branch)?)
    }

    pub fn load_version(&self, hash: &ChunkHash) -> Result<Version> {
        Version::load(&self.chunks, hash)
    }

    // ── Push ──────────────────────────────────────────────────────────

    /// Integrate a client's operations into a branch.
    pub fn push(&self, request: &PushRequest) -> Result<PushResult> {
        let base = self.load_version(&request.base)?;
        let digest = operations_digest(&request.operations);
        let attempts = self.config.max_push_attempts;

        for attempt in 1..=attempts {
            let head = self.branches.head(&request.branch)?;
            let (result, expected) = match head {
                None => (self.create_on_base(request, &base, digest)?, None),
                Some(head) if request.operations.is_empty() => {
                    return Ok(PushResult {
                        version: self.load_version(&head)?,
                        outcome: PushOutcome::UpToDate,
                        conflicts: Vec::new(),
                    });
                }
                Some(head) => {
                    if let Some(earlier) = self.find_duplicate(&head, &request.base, digest)? {
                        tracing::warn!(branch = %request.branch, version = %earlier, "duplicate push");
                        return Ok(PushResult {
                            version: self.load_version(&earlier)?,
                            outcome: PushOutcome::Duplicate,
                            conflicts: Vec::new(),
                        });
                    }
                    (self.integrate(request, &base, &head, digest)?, Some(head))
                }
            };

            let new_head = result.version.hash();
            if self.branches.compare_and_set(&request.branch, expected, new_head)? {
                tracing::info!(
                    branch = %request.branch,
                    version = %new_head,
                    outcome = ?result.outcome,
                    conflicts = result.conflicts.len(),
                    "push committed"
                );
                return Ok(result);
            }
            tracing::debug!(branch = %request.branch, attempt, "branch moved during push, retrying");
        }

        Err(VcsError::PushContention {
            branch: request.branch.clone(),
            attempts,
        })
    }

    /// Version for a branch that does not exist yet.
    fn create_on_base(
        &self,
        request: &PushRequest,
        base: &Version,
        digest: ChunkHash,
    ) -> Result<PushResult> {
        if request.operations.is_empty() {
            return Ok(PushResult {
                version: base.clone(),
                outcome: PushOutcome::Created,
                conflicts: Vec::new(),
            });
        }
        let replay = replay_operations(base.tree(), &request.operations)?;
        let version = Version::create_with_digest(
            replay.tree,
            vec![base.hash()],
            replay.applied,
            VersionMeta::now(request.author.as_deref()),
            Some(digest),
        )?;
        Ok(PushResult {
            version,
            outcome: PushOutcome::Created,
            conflicts: replay.conflicts,
        })
    }

    /// Commit the operations relative to the current `head`.
    fn integrate(
        &self,
        request: &PushRequest,
        base: &Version,
        head: &ChunkHash,
        digest: ChunkHash,
    ) -> Result<PushResult> {
        let (tree, parents, outcome) = if *head == base.hash() {
            (base.tree().clone(), vec![base.hash()], PushOutcome::Committed)
        } else if self.head_behind(head, base)? {
            tracing::debug!(branch = %request.branch, "fast-forward onto base");
            (base.tree().clone(), vec![base.hash()], PushOutcome::FastForward)
        } else {
            common_ancestor_within(
                &self.chunks,
                head,
                &base.hash(),
                self.config.ancestry_search_limit,
            )?
            .ok_or(VcsError::NoCommonAncestor {
                left: *head,
                right: base.hash(),
            })?;
            let current = self.load_version(head)?;
            (
                current.tree().clone(),
                vec![*head, base.hash()],
                PushOutcome::Merged,
            )
        };

        let replay = replay_operations(&tree, &request.operations)?;
        let version = Version::create_with_digest(
            replay.tree,
            parents,
            replay.applied,
            VersionMeta::now(request.author.as_deref()),
            Some(digest),
        )?;
        Ok(PushResult {
            version,
            outcome,
            conflicts: replay.conflicts,
        })
    }

    /// True if `head` is in the ancestry of `base`.
    fn head_behind(&self, head: &ChunkHash, base: &Version) -> Result<bool> {
        let found = find_in_ancestry(
            &self.chunks,
            &base.hash(),
            self.config.ancestry_search_limit,
            |hash, _| hash == head,
        )?;
        Ok(found.is_some())
    }

    /// An already committed version produced by the same submission.
    fn find_duplicate(
        &self,
        head: &ChunkHash,
        base: &ChunkHash,
        digest: ChunkHash,
    ) -> Result<Option<ChunkHash>> {
        find_in_ancestry(
            &self.chunks,
            head,
            self.config.duplicate_search_depth,
            |_, record| record.submitted == Some(digest) && record.parents.contains(base),
        )
    }

    // ── Wire ──────────────────────────────────────────────────────────

    /// Handle a decoded push message addressed to `branch`.
    pub fn handle_message(
        &self,
        branch: &BranchRef,
        message: &MessageFromClient,
    ) -> Result<MessageFromServer> {
        let request = message.to_push_request(branch)?;
        let result = self.push(&request)?;
        MessageFromServer::from_push(message, &result)
    }

    /// JSON in, JSON out. Failures are encoded in the response.
    pub fn handle_json(&self, branch: &BranchRef, json: &str) -> String {
        let response = match serde_json::from_str::<MessageFromClient>(json) {
            Ok(message) => self.handle_message(branch, &message).unwrap_or_else(|e| {
                tracing::warn!(%branch, error = %e, "push rejected");
                MessageFromServer::failure(Some(message.change_set_id), message.base_change_set, &e)
            }),
            Err(e) => {
                let error = VcsError::from(e);
                tracing::warn!(%branch, %error, "malformed push message");
                MessageFromServer::failure(None, None, &error)
            }
        };
        match serde_json::to_string(&response) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode response");
                serde_json::json!({ "error": { "kind": "internal", "message": e.to_string() } })
                    .to_string()
            }
        }
    }
}
