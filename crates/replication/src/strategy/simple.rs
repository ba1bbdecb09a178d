//! Simple replication strategy.
//!
//! Places replicas sequentially around the ring: the primary is the first
//! node clockwise from the key's token, backups are the next distinct nodes.
//! Works well for single data center deployments where failure domains do
//! not matter.

use crate::strategy::ReplicationStrategy;
use corelib::node::NodeId;
use corelib::ring::HashRing;

/// Primary plus `backups` distinct successors.
#[derive(Debug, Clone)]
pub struct SimpleStrategy {
    replication_factor: usize,
}

impl SimpleStrategy {
    pub fn new(replication_factor: usize) -> Self {
        Self { replication_factor }
    }

    /// Strategy keeping one primary and `backups` backup copies.
    pub fn with_backups(backups: usize) -> Self {
        Self::new(backups + 1)
    }
}

impl Default for SimpleStrategy {
    fn default() -> Self {
        Self::with_backups(1)
    }
}

impl ReplicationStrategy for SimpleStrategy {
    fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    fn replicas_for_key(&self, ring: &HashRing, key: &[u8]) -> Vec<NodeId> {
        ring.successors(key, self.replication_factor)
    }

    fn name(&self) -> &'static str {
        "SimpleStrategy"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corelib::node::Node;

    #[test]
    fn test_simple_strategy_replication_factor() {
        assert_eq!(SimpleStrategy::new(3).replication_factor(), 3);
        assert_eq!(SimpleStrategy::with_backups(1).replication_factor(), 2);
    }

    #[test]
    fn test_simple_strategy_replicas() {
        let ring = HashRing::new();
        ring.add_node(Node::new(NodeId(1), "node1"), 4);
        ring.add_node(Node::new(NodeId(2), "node2"), 4);
        ring.add_node(Node::new(NodeId(3), "node3"), 4);

        let strategy = SimpleStrategy::new(3);
        let replicas = strategy.replicas_for_key(&ring, b"test-key");

        assert_eq!(replicas.len(), 3);
        assert_eq!(replicas[0], ring.lookup(b"test-key").unwrap());
        let unique: std::collections::HashSet<_> = replicas.iter().collect();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn test_small_ring_caps_replicas() {
        let ring = HashRing::new();
        ring.add_node(Node::new(NodeId(1), "node1"), 4);

        let replicas = SimpleStrategy::new(3).replicas_for_key(&ring, b"k");
        assert_eq!(replicas, vec![NodeId(1)]);
        assert!(SimpleStrategy::new(3)
            .replicas_for_key(&HashRing::new(), b"k")
            .is_empty());
    }
}
