//! Node identifiers
//!
//! Node ids are 64-bit and never reused within a repository. Clients
//! mint them as `(client_id << 32) | counter`, so two clients can add
//! nodes concurrently without coordinating.
//!
//! Author: Moroya Sakamoto

use std::sync::atomic::{AtomicU64, Ordering};

/// Unique node identifier
pub type NodeId = u64;

/// Fixed id of every tree's root node
pub const ROOT_ID: NodeId = 1;

/// Client that minted `id` (0 for the root and server-side ids)
pub fn client_of(id: NodeId) -> u32 {
    (id >> 32) as u32
}

/// Per-client node id source.
#[derive(Debug)]
pub struct IdGenerator {
    client_id: u32,
    counter: AtomicU64,
}

impl IdGenerator {
    /// `client_id` must be non-zero; id 0 is reserved for the server.
    pub fn new(client_id: u32) -> Self {
        Self {
            client_id,
            counter: AtomicU64::new(0),
        }
    }

    pub fn client_id(&self) -> u32 {
        self.client_id
    }

    /// Next fresh id. Counter wraps only after 2^32 ids per client.
    pub fn generate(&self) -> NodeId {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        ((self.client_id as u64) << 32) | (n & 0xFFFF_FFFF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_carry_client_prefix() {
        let ids = IdGenerator::new(7);
        let a = ids.generate();
        assert_eq!(a >> 32, 7);
        assert_eq!(a & 0xFFFF_FFFF, 1);
    }

    #[test]
    fn test_client_of_recovers_prefix() {
        let ids = IdGenerator::new(42);
        assert_eq!(client_of(ids.generate()), 42);
        assert_eq!(client_of(ROOT_ID), 0);
    }

    #[test]
    fn test_ids_are_monotonic() {
        let ids = IdGenerator::new(1);
        let a = ids.generate();
        let b = ids.generate();
        assert!(b > a);
    }

    #[test]
    fn test_distinct_clients_never_collide() {
        let a = IdGenerator::new(1);
        let b = IdGenerator::new(2);
        let xs: Vec<_> = (0..100).map(|_| a.generate()).collect();
        let ys: Vec<_> = (0..100).map(|_| b.generate()).collect();
        assert!(xs.iter().all(|x| !ys.contains(x)));
    }

    #[test]
    fn test_generated_ids_never_equal_root() {
        let ids = IdGenerator::new(1);
        for _ in 0..10 {
            assert_ne!(ids.generate(), ROOT_ID);
        }
    }
}
