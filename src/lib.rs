//! ALICE-Model-VCS: Versioned Typed Trees
//!
//! Git for models. Trees are immutable and content-addressed, versions form
//! a DAG, and a replication service rebases concurrent operation logs onto
//! a shared branch head.
//!
//! - Persistent trees with structural sharing (equal content, equal hash)
//! - Working branches that record edits as replayable operations
//! - Server-side replay with per-operation conflicts
//! - Branch pointers advanced only by compare-and-set
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`store`] | SHA-256 content-addressed chunk stores (memory, directory) |
//! | [`codec`] | Canonical binary encoding of chunks and operation logs |
//! | [`node`] | Node records: concept, properties, references, children |
//! | [`index`] | Canonical id-to-record trie |
//! | [`tree`] | Immutable persistent trees |
//! | [`overlay`] | Copy-on-write overlay materialized on commit |
//! | [`operation`] | Edit operations and their applied effects |
//! | [`version`] | Versions and their metadata |
//! | [`history`] | Common ancestors and ancestry walks |
//! | [`branch`] | Repository ids and compare-and-set branch pointers |
//! | [`merge`] | Operation replay with conflict collection |
//! | [`working`] | Single-writer editing sessions |
//! | [`replication`] | Push integration and branch management |
//! | [`protocol`] | JSON wire messages |
//! | [`client`] | In-process client over the wire protocol |
//! | [`content`] | Outline and detail views for browsing |
//! | [`config`] | Engine configuration |
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use alice_model_vcs::{ModelClient, ReplicationService, RepositoryId, ROOT_ID};
//!
//! let service = Arc::new(ReplicationService::in_memory());
//! let client = ModelClient::connect(Arc::clone(&service));
//! let repo = RepositoryId::new("repo1");
//! let initial = client.init_repository(&repo)?;
//!
//! // Record an edit locally
//! let mut work = client.working_branch(&initial);
//! let child = work.run_write(|t| t.add_new_child(ROOT_ID, "role", -1, None))?;
//!
//! // Pushing to a branch that does not exist yet creates it
//! let pushed = client.push(&repo.branch("my-branch"), work)?;
//! assert_eq!(pushed.version.tree().children(ROOT_ID, None)?, vec![child]);
//! assert_eq!(client.list_branches(&repo)?.len(), 2);
//! # Ok::<(), alice_model_vcs::VcsError>(())
//! ```
//!
//! Author: Moroya Sakamoto

pub mod branch;
pub mod client;
pub mod codec;
pub mod config;
pub mod content;
pub mod error;
pub mod history;
pub mod ids;
pub mod index;
pub mod merge;
pub mod node;
pub mod operation;
pub mod overlay;
pub mod protocol;
pub mod replication;
pub mod store;
pub mod tree;
pub mod version;
pub mod working;

pub use branch::{BranchRef, BranchStore, InMemoryBranchStore, RepositoryId};
pub use client::ModelClient;
pub use config::ReplicationConfig;
pub use content::{node_details, outline, NodeDetails, NodeOutline};
pub use error::{ErrorKind, OperationError, Result, VcsError};
pub use history::{common_ancestor, history, is_ancestor};
pub use ids::{client_of, IdGenerator, NodeId, ROOT_ID};
pub use merge::{replay_operations, Conflict, ReplayResult};
pub use node::NodeData;
pub use operation::{operations_digest, AppliedOperation, Operation};
pub use overlay::TreeOverlay;
pub use protocol::{MessageFromClient, MessageFromServer, OperationData};
pub use replication::{PushOutcome, PushRequest, PushResult, ReplicationService};
pub use store::{ChunkHash, ChunkStore, FileChunkStore, InMemoryChunkStore, SharedChunkStore};
pub use tree::PersistentTree;
pub use version::{Version, VersionMeta};
pub use working::{OperationsAndTree, WorkingBranch, WriteTransaction};
