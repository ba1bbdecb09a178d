//! Replication strategy abstractions.
//!
//! A replication strategy decides which ring members hold a key: the first
//! node it returns is the primary, the rest are backups.

pub mod simple;

pub use simple::SimpleStrategy;

use corelib::node::NodeId;
use corelib::ring::HashRing;

/// Trait for replication strategies.
///
/// Implementations must be pure functions of the ring and the key, so every
/// node that holds the same topology snapshot computes the same owners.
pub trait ReplicationStrategy: Send + Sync + std::fmt::Debug + 'static {
    /// Number of copies per key, primary included.
    fn replication_factor(&self) -> usize;

    /// Replica nodes for `key`, primary first. Empty on an empty ring.
    fn replicas_for_key(&self, ring: &HashRing, key: &[u8]) -> Vec<NodeId>;

    /// Strategy name (for logging/debugging).
    fn name(&self) -> &'static str;
}
