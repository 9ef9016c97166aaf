//! Content-addressed chunk store
//!
//! Every node record, index block, and version is stored as an immutable
//! chunk keyed by the SHA-256 of its bytes. Identical payloads collapse to
//! one entry, so deduplication is automatic and a second `put` is a no-op.
//! There is no update or delete.
//!
//! Author: Moroya Sakamoto

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::{Result, VcsError};

/// Content hash (SHA-256)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkHash([u8; 32]);

impl ChunkHash {
    pub const LEN: usize = 32;

    /// Hash of `bytes`
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hasher.finalize().into())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex, the wire form
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for ChunkHash {
    type Err = VcsError;

    fn from_str(s: &str) -> Result<Self> {
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out)
            .map_err(|e| VcsError::MalformedMessage(format!("invalid hash {s:?}: {e}")))?;
        Ok(Self(out))
    }
}

impl fmt::Display for ChunkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ChunkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkHash({})", &self.to_hex()[..12])
    }
}

impl Serialize for ChunkHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ChunkHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ── Store contract ─────────────────────────────────────────────────────

/// Get/put-by-hash contract implemented by durable storage backends.
pub trait ChunkStore: Send + Sync {
    /// Store `bytes`, returning their hash. Idempotent.
    fn put(&self, bytes: &[u8]) -> Result<ChunkHash>;

    /// Fetch a chunk; `ChunkNotFound` if absent.
    fn get(&self, hash: &ChunkHash) -> Result<Arc<[u8]>>;

    fn contains(&self, hash: &ChunkHash) -> Result<bool>;
}

/// Shared handle used by trees and versions
pub type SharedChunkStore = Arc<dyn ChunkStore>;

// ── In-memory store ────────────────────────────────────────────────────

/// In-memory chunk store (O(1) lookup via HashMap)
#[derive(Default)]
pub struct InMemoryChunkStore {
    chunks: RwLock<HashMap<ChunkHash, Arc<[u8]>>>,
}

impl InMemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor returning a shared handle
    pub fn shared() -> SharedChunkStore {
        Arc::new(Self::new())
    }

    /// Total stored chunks
    pub fn len(&self) -> usize {
        self.chunks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.read().is_empty()
    }
}

impl ChunkStore for InMemoryChunkStore {
    fn put(&self, bytes: &[u8]) -> Result<ChunkHash> {
        let hash = ChunkHash::of(bytes);
        if self.chunks.read().contains_key(&hash) {
            return Ok(hash);
        }
        self.chunks
            .write()
            .entry(hash)
            .or_insert_with(|| Arc::from(bytes));
        tracing::trace!(chunk = %hash, len = bytes.len(), "stored chunk");
        Ok(hash)
    }

    fn get(&self, hash: &ChunkHash) -> Result<Arc<[u8]>> {
        self.chunks
            .read()
            .get(hash)
            .cloned()
            .ok_or(VcsError::ChunkNotFound(*hash))
    }

    fn contains(&self, hash: &ChunkHash) -> Result<bool> {
        Ok(self.chunks.read().contains_key(hash))
    }
}

// ── Directory store ────────────────────────────────────────────────────

/// One file per chunk under `<root>/<first two hex digits>/<rest>`.
///
/// Writes go to a temporary file and are renamed into place, so readers
/// never observe a partial chunk. Reads re-hash the payload.
pub struct FileChunkStore {
    root: PathBuf,
}

impl FileChunkStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, hash: &ChunkHash) -> PathBuf {
        let hex = hash.to_hex();
        self.root.join(&hex[..2]).join(&hex[2..])
    }
}

impl ChunkStore for FileChunkStore {
    fn put(&self, bytes: &[u8]) -> Result<ChunkHash> {
        let hash = ChunkHash::of(bytes);
        let path = self.path_for(&hash);
        if path.exists() {
            return Ok(hash);
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        // Unique per writer so concurrent puts of one chunk don't share a temp file.
        let tmp = path.with_extension(format!(
            "tmp-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(bytes)?;
            f.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        tracing::trace!(chunk = %hash, len = bytes.len(), "wrote chunk file");
        Ok(hash)
    }

    fn get(&self, hash: &ChunkHash) -> Result<Arc<[u8]>> {
        let bytes = match fs::read(self.path_for(hash)) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(VcsError::ChunkNotFound(*hash))
            }
            Err(err) => return Err(err.into()),
        };
        if ChunkHash::of(&bytes) != *hash {
            return Err(VcsError::CorruptChunk {
                hash: *hash,
                reason: String::from("content does not match its hash"),
            });
        }
        Ok(Arc::from(bytes))
    }

    fn contains(&self, hash: &ChunkHash) -> Result<bool> {
        Ok(self.path_for(hash).exists())
    }
}
