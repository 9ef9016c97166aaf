//! End-to-end replication scenarios
//!
//! Clients, the JSON wire protocol, and the replication service together.

use std::sync::Arc;
use std::thread;

use alice_model_vcs::{
    BranchRef, BranchStore, ChunkHash, ErrorKind, FileChunkStore, InMemoryBranchStore,
    InMemoryChunkStore, MessageFromServer, ModelClient, Operation, PushOutcome, PushRequest,
    ReplicationConfig, ReplicationService, RepositoryId, Result, VcsError, ROOT_ID,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn service() -> Arc<ReplicationService> {
    Arc::new(ReplicationService::in_memory())
}

// ============================================================================
// Repository scenario
// ============================================================================

#[test]
fn test_push_to_new_branch() {
    init_tracing();
    let client = ModelClient::connect(service());
    let repo = RepositoryId::new("repo1");

    let initial = client.init_repository(&repo).unwrap();
    assert!(initial.tree().children(ROOT_ID, None).unwrap().is_empty());

    let mut work = client.working_branch(&initial);
    work.run_write(|t| t.add_new_child(ROOT_ID, "role", -1, None))
        .unwrap();

    let branch = repo.branch("my-branch");
    let pushed = client.push(&branch, work).unwrap();
    assert_eq!(pushed.outcome, PushOutcome::Created);
    assert_eq!(pushed.version.tree().children(ROOT_ID, None).unwrap().len(), 1);

    let head = client.pull(&branch).unwrap();
    assert_eq!(head.hash(), pushed.version.hash());
    assert_eq!(
        client.list_branches(&repo).unwrap(),
        vec![
            BranchRef::new("repo1", "default"),
            BranchRef::new("repo1", "my-branch")
        ]
    );
    assert_eq!(client.list_repositories().unwrap(), vec![repo]);
}

// ============================================================================
// Concurrent edits
// ============================================================================

#[test]
fn test_later_committer_wins_same_field() {
    init_tracing();
    let service = service();
    let alice = ModelClient::connect(Arc::clone(&service));
    let bob = ModelClient::connect(Arc::clone(&service));
    let repo = RepositoryId::new("repo1");
    let branch = repo.branch("default");

    let initial = alice.init_repository(&repo).unwrap();
    let mut setup = alice.working_branch(&initial);
    let node = setup
        .run_write(|t| t.add_new_child(ROOT_ID, "items", -1, None))
        .unwrap();
    let shared = alice.push(&branch, setup).unwrap().version;

    let mut a = alice.working_branch(&shared);
    a.run_write(|t| t.set_property(node, "name", Some("A"))).unwrap();
    let mut b = bob.working_branch(&shared);
    b.run_write(|t| t.set_property(node, "name", Some("B"))).unwrap();

    let first = alice.push(&branch, a).unwrap();
    assert_eq!(first.outcome, PushOutcome::Committed);
    let second = bob.push(&branch, b).unwrap();
    assert_eq!(second.outcome, PushOutcome::Merged);
    assert!(second.conflicts.is_empty());
    assert_eq!(
        second.version.parents(),
        &[first.version.hash(), shared.hash()]
    );

    let head = service.head(&branch).unwrap();
    let value = head.tree().get_node(node).unwrap().unwrap();
    assert_eq!(value.property("name"), Some("B"));
}

#[test]
fn test_edit_of_concurrently_removed_node() {
    init_tracing();
    let service = service();
    let client = ModelClient::connect(Arc::clone(&service));
    let repo = RepositoryId::new("repo1");
    let branch = repo.branch("default");
    let initial = client.init_repository(&repo).unwrap();

    let mut setup = client.working_branch(&initial);
    let (doomed, kept) = setup
        .run_write(|t| {
            let doomed = t.add_new_child(ROOT_ID, "items", -1, None)?;
            let kept = t.add_new_child(ROOT_ID, "items", -1, None)?;
            Ok((doomed, kept))
        })
        .unwrap();
    let shared = client.push(&branch, setup).unwrap().version;

    let mut remover = client.working_branch(&shared);
    remover.run_write(|t| t.remove_child(doomed)).unwrap();
    client.push(&branch, remover).unwrap();

    let mut editor = client.working_branch(&shared);
    editor
        .run_write(|t| {
            t.set_property(doomed, "name", Some("lost"))?;
            t.set_property(kept, "name", Some("kept"))
        })
        .unwrap();
    let result = client.push(&branch, editor).unwrap();

    assert_eq!(result.conflicts.len(), 1);
    assert_eq!(result.conflicts[0].index, 0);
    let tree = result.version.tree();
    assert!(tree.get_node(doomed).unwrap().is_none());
    assert_eq!(
        tree.get_node(kept).unwrap().unwrap().property("name"),
        Some("kept")
    );
}

#[test]
fn test_parallel_pushes_all_land() {
    init_tracing();
    let service = service();
    let repo = RepositoryId::new("repo1");
    let branch = repo.branch("default");
    let initial = service.init_repository(&repo).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let service = Arc::clone(&service);
            let branch = branch.clone();
            let initial = initial.clone();
            thread::spawn(move || -> Result<u64> {
                let client = ModelClient::connect(service);
                let mut work = client.working_branch(&initial);
                let id = work.run_write(|t| t.add_new_child(ROOT_ID, "items", -1, None))?;
                client.push(&branch, work)?;
                Ok(id)
            })
        })
        .collect();

    let mut ids: Vec<u64> = handles
        .into_iter()
        .map(|h| h.join().unwrap().unwrap())
        .collect();
    ids.sort_unstable();

    let head = service.head(&branch).unwrap();
    let mut children = head.tree().children(ROOT_ID, Some("items")).unwrap();
    children.sort_unstable();
    assert_eq!(children, ids);
}

// ============================================================================
// Wire protocol
// ============================================================================

#[test]
fn test_json_resubmission_is_idempotent() {
    init_tracing();
    let service = service();
    let repo = RepositoryId::new("repo1");
    let branch = repo.branch("default");
    let initial = service.init_repository(&repo).unwrap();

    let json = format!(
        r#"{{"changeSetId": 1,
            "operations": [{{"type": "AddChild", "parentId": 1, "role": "role",
                             "index": -1, "childId": 4294967297, "concept": null}}],
            "baseVersionHash": "{}",
            "baseChangeSet": null}}"#,
        initial.hash()
    );

    let first: MessageFromServer = serde_json::from_str(&service.handle_json(&branch, &json)).unwrap();
    let second: MessageFromServer = serde_json::from_str(&service.handle_json(&branch, &json)).unwrap();

    assert_eq!(first.outcome, Some(PushOutcome::Committed));
    assert_eq!(second.outcome, Some(PushOutcome::Duplicate));
    assert_eq!(first.version_hash, second.version_hash);
    assert_eq!(first.tree.unwrap().node_count, 2);

    let head = service.head(&branch).unwrap();
    assert_eq!(head.tree().children(ROOT_ID, None).unwrap(), vec![4294967297]);
}

#[test]
fn test_malformed_json_changes_nothing() {
    init_tracing();
    let service = service();
    let repo = RepositoryId::new("repo1");
    let branch = repo.branch("default");
    let initial = service.init_repository(&repo).unwrap();

    for body in [
        "{not json",
        r#"{"changeSetId": 1, "operations": [{"type": "Nope"}], "baseVersionHash": "00"}"#,
        r#"{"changeSetId": 1, "operations": [], "baseVersionHash": "zz"}"#,
    ] {
        let reply: MessageFromServer = serde_json::from_str(&service.handle_json(&branch, body)).unwrap();
        let error = reply.error.expect("error response");
        assert_eq!(error.kind, ErrorKind::MalformedMessage);
        assert!(reply.version_hash.is_none());
    }
    assert_eq!(service.head_hash(&branch).unwrap(), initial.hash());
}

#[test]
fn test_unknown_base_reported_as_not_found() {
    let service = service();
    let repo = RepositoryId::new("repo1");
    let branch = repo.branch("default");
    service.init_repository(&repo).unwrap();

    let json = format!(
        r#"{{"changeSetId": 7, "operations": null, "baseVersionHash": "{}"}}"#,
        ChunkHash::of(b"unknown")
    );
    let reply: MessageFromServer = serde_json::from_str(&service.handle_json(&branch, &json)).unwrap();
    assert_eq!(reply.change_set_id, Some(7));
    assert_eq!(reply.error.unwrap().kind, ErrorKind::NotFound);
}

// ============================================================================
// Contention
// ============================================================================

/// Branch store whose pointers never move once they exist
struct AlwaysRacing {
    inner: InMemoryBranchStore,
}

impl BranchStore for AlwaysRacing {
    fn head(&self, branch: &BranchRef) -> Result<Option<ChunkHash>> {
        self.inner.head(branch)
    }

    fn compare_and_set(
        &self,
        branch: &BranchRef,
        expected: Option<ChunkHash>,
        new: ChunkHash,
    ) -> Result<bool> {
        if expected.is_some() {
            return Ok(false);
        }
        self.inner.compare_and_set(branch, expected, new)
    }

    fn branches(&self, repository: &RepositoryId) -> Result<Vec<BranchRef>> {
        self.inner.branches(repository)
    }

    fn repositories(&self) -> Result<Vec<RepositoryId>> {
        self.inner.repositories()
    }
}

#[test]
fn test_contention_budget_exhausted() {
    init_tracing();
    let config = ReplicationConfig {
        max_push_attempts: 3,
        ..ReplicationConfig::default()
    };
    let service = ReplicationService::new(
        InMemoryChunkStore::shared(),
        Arc::new(AlwaysRacing {
            inner: InMemoryBranchStore::new(),
        }),
        config,
    );
    let repo = RepositoryId::new("repo1");
    let branch = repo.branch("default");
    let initial = service.init_repository(&repo).unwrap();

    let err = service
        .push(&PushRequest::new(
            branch.clone(),
            initial.hash(),
            vec![Operation::add_child(ROOT_ID, "role", -1, 10)],
        ))
        .unwrap_err();
    match err {
        VcsError::PushContention { branch: b, attempts } => {
            assert_eq!(b, branch);
            assert_eq!(attempts, 3);
        }
        other => panic!("expected contention, got {other:?}"),
    }
    assert!(service.head(&branch).unwrap().tree().children(ROOT_ID, None).unwrap().is_empty());
}

// ============================================================================
// Durable chunks
// ============================================================================

#[test]
fn test_history_survives_on_disk() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let branches = Arc::new(InMemoryBranchStore::new());
    let repo = RepositoryId::new("repo1");
    let branch = repo.branch("default");

    let pushed = {
        let chunks = Arc::new(FileChunkStore::open(dir.path()).unwrap());
        let service = Arc::new(ReplicationService::new(
            chunks,
            branches.clone(),
            ReplicationConfig::default(),
        ));
        let client = ModelClient::connect(Arc::clone(&service));
        let initial = client.init_repository(&repo).unwrap();
        let mut work = client.working_branch(&initial);
        work.run_write(|t| {
            let id = t.add_new_child(ROOT_ID, "role", -1, Some("c:Thing"))?;
            t.set_property(id, "name", Some("persisted"))
        })
        .unwrap();
        client.push(&branch, work).unwrap().version
    };

    let chunks = Arc::new(FileChunkStore::open(dir.path()).unwrap());
    let reopened = Arc::new(
        ReplicationService::open(chunks, branches, ReplicationConfig::default()).unwrap(),
    );
    let head = reopened.head(&branch).unwrap();
    assert_eq!(head.hash(), pushed.hash());
    assert_eq!(head.tree().root_hash(), pushed.tree().root_hash());
    let child = head.tree().children(ROOT_ID, None).unwrap()[0];
    let node = head.tree().get_node(child).unwrap().unwrap();
    assert_eq!(node.property("name"), Some("persisted"));
    assert_eq!(node.concept.as_deref(), Some("c:Thing"));

    // Clients of the reopened service must not mint ids already in the tree
    let client = ModelClient::connect(Arc::clone(&reopened));
    let mut work = client.working_branch(&head);
    let fresh = work
        .run_write(|t| t.add_new_child(ROOT_ID, "role", -1, None))
        .unwrap();
    assert_ne!(fresh, child);
    let next = client.push(&branch, work).unwrap();
    assert_eq!(next.version.tree().children(ROOT_ID, None).unwrap(), vec![child, fresh]);
}
