//! In-process model client
//!
//! Holds a client id and node id generator, opens working branches on
//! pulled versions, and pushes them to a [`ReplicationService`] through
//! the JSON wire protocol.
//!
//! Author: Moroya Sakamoto

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::branch::{BranchRef, RepositoryId};
use crate::error::{Result, VcsError};
use crate::ids::IdGenerator;
use crate::merge::Conflict;
use crate::operation::Operation;
use crate::protocol::{MessageFromClient, MessageFromServer, OperationData};
use crate::replication::{PushResult, ReplicationService};
use crate::store::ChunkHash;
use crate::version::Version;
use crate::working::WorkingBranch;

pub struct ModelClient {
    service: Arc<ReplicationService>,
    ids: Arc<IdGenerator>,
    next_change_set: AtomicI64,
    /// Last change set the server acknowledged
    acknowledged: Mutex<Option<i64>>,
}

impl ModelClient {
    /// Register with `service` and take a fresh client id.
    pub fn connect(service: Arc<ReplicationService>) -> Self {
        let client_id = service.allocate_client_id();
        tracing::debug!(client_id, "client connected");
        Self {
            service,
            ids: Arc::new(IdGenerator::new(client_id)),
            next_change_set: AtomicI64::new(1),
            acknowledged: Mutex::new(None),
        }
    }

    pub fn client_id(&self) -> u32 {
        self.ids.client_id()
    }

    pub fn init_repository(&self, repository: &RepositoryId) -> Result<Version> {
        self.service.init_repository(repository)
    }

    pub fn list_repositories(&self) -> Result<Vec<RepositoryId>> {
        self.service.list_repositories()
    }

    pub fn list_branches(&self, repository: &RepositoryId) -> Result<Vec<BranchRef>> {
        self.service.list_branches(repository)
    }

    /// Head version of `branch`
    pub fn pull(&self, branch: &BranchRef) -> Result<Version> {
        self.service.head(branch)
    }

    pub fn load_version(&self, hash: &ChunkHash) -> Result<Version> {
        self.service.load_version(hash)
    }

    /// Start editing on top of `version`.
    pub fn working_branch(&self, version: &Version) -> WorkingBranch {
        WorkingBranch::from_version(version, Arc::clone(&self.ids))
    }

    /// Push everything recorded in `work` to `branch`.
    pub fn push(&self, branch: &BranchRef, work: WorkingBranch) -> Result<PushResult> {
        let closed = work.operations_and_tree()?;
        let base = closed.base_version.ok_or_else(|| {
            VcsError::MalformedMessage(String::from("working branch has no base version"))
        })?;
        self.push_operations(branch, &base, &closed.operations)
    }

    /// Send `operations` recorded against `base` as one change set.
    pub fn push_operations(
        &self,
        branch: &BranchRef,
        base: &ChunkHash,
        operations: &[Operation],
    ) -> Result<PushResult> {
        let change_set_id = self.next_change_set.fetch_add(1, Ordering::Relaxed);
        let message = MessageFromClient {
            change_set_id,
            operations: Some(operations.iter().map(OperationData::from).collect()),
            base_version_hash: base.to_hex(),
            base_change_set: *self.acknowledged.lock(),
        };
        let request = serde_json::to_string(&message)?;
        let reply = self.service.handle_json(branch, &request);
        let response: MessageFromServer = serde_json::from_str(&reply)?;
        let response = response.check()?;

        let hash = response
            .version_hash
            .ok_or_else(|| VcsError::MalformedMessage(String::from("response has no version")))?;
        let outcome = response
            .outcome
            .ok_or_else(|| VcsError::MalformedMessage(String::from("response has no outcome")))?;
        *self.acknowledged.lock() = Some(change_set_id);
        tracing::debug!(%branch, change_set_id, version = %hash, ?outcome, "push acknowledged");

        Ok(PushResult {
            version: self.service.load_version(&hash)?,
            outcome,
            conflicts: response.conflicts.into_iter().map(Conflict::from).collect(),
        })
    }
}
