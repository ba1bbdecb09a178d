//! Topology view: the versioned owner map every attempt resolves against.
//!
//! Membership publishes a fresh immutable [`TopologySnapshot`] per change; the
//! view swaps the `Arc` in one step. An attempt grabs one snapshot and resolves
//! primary and backups from it, so it can never mix owners from two versions.

use std::sync::Arc;

use parking_lot::RwLock;

use corelib::{HashRing, NodeId, Owners, TopologyVersion};

use crate::error::{CacheError, Result};
use crate::strategy::ReplicationStrategy;
use crate::types::CacheKey;

#[derive(Debug)]
pub struct TopologySnapshot {
    version: TopologyVersion,
    ring: HashRing,
    strategy: Arc<dyn ReplicationStrategy>,
}

impl TopologySnapshot {
    pub fn new(
        version: TopologyVersion,
        ring: HashRing,
        strategy: Arc<dyn ReplicationStrategy>,
    ) -> Self {
        Self {
            version,
            ring,
            strategy,
        }
    }

    /// Version 0: no members, nothing resolvable.
    pub fn empty(strategy: Arc<dyn ReplicationStrategy>) -> Self {
        Self::new(TopologyVersion::INITIAL, HashRing::new(), strategy)
    }

    pub fn version(&self) -> TopologyVersion {
        self.version
    }

    pub fn ring(&self) -> &HashRing {
        &self.ring
    }

    pub fn members(&self) -> Vec<NodeId> {
        self.ring.nodes().into_iter().map(|n| n.id).collect()
    }

    pub fn resolve_owners(&self, key: &CacheKey) -> Result<Owners> {
        let replicas = self.strategy.replicas_for_key(&self.ring, key.as_bytes());
        Owners::from_replicas(replicas, self.version).ok_or(CacheError::TopologyUnavailable {
            version: self.version,
        })
    }

    pub fn is_primary(&self, node: NodeId, key: &CacheKey) -> bool {
        self.ring.lookup(key.as_bytes()) == Some(node)
    }
}

/// Shared slot holding the latest snapshot.
///
/// Readers only hold the lock long enough to clone the `Arc`.
#[derive(Debug)]
pub struct TopologyView {
    slot: RwLock<Arc<TopologySnapshot>>,
}

impl TopologyView {
    pub fn new(initial: TopologySnapshot) -> Self {
        Self {
            slot: RwLock::new(Arc::new(initial)),
        }
    }

    pub fn current(&self) -> Arc<TopologySnapshot> {
        self.slot.read().clone()
    }

    pub fn version(&self) -> TopologyVersion {
        self.slot.read().version
    }

    /// Resolve against whatever snapshot is current right now.
    pub fn resolve_owners(&self, key: &CacheKey) -> Result<Owners> {
        self.current().resolve_owners(key)
    }

    /// Swap in a newer snapshot. Versions must strictly increase.
    pub fn publish(&self, snapshot: TopologySnapshot) -> corelib::Result<Arc<TopologySnapshot>> {
        let mut slot = self.slot.write();
        if snapshot.version <= slot.version {
            return Err(corelib::Error::StaleTopology {
                current: slot.version.0,
                offered: snapshot.version.0,
            });
        }
        let snapshot = Arc::new(snapshot);
        *slot = Arc::clone(&snapshot);
        tracing::debug!(
            topology = %snapshot.version,
            members = snapshot.ring.node_count(),
            "published topology snapshot"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::SimpleStrategy;
    use corelib::{Node, RingBuilder};

    fn snapshot(version: u64, members: &[u128]) -> TopologySnapshot {
        let ring = RingBuilder::new()
            .with_vnodes(16)
            .add_nodes(members.iter().copied().map(Node::numbered))
            .build()
            .unwrap();
        TopologySnapshot::new(
            TopologyVersion(version),
            ring,
            Arc::new(SimpleStrategy::with_backups(1)),
        )
    }

    #[test]
    fn test_empty_topology_is_unavailable() {
        let view = TopologyView::new(TopologySnapshot::empty(Arc::new(SimpleStrategy::default())));
        let key = CacheKey::encode(&1u32).unwrap();
        let err = view.resolve_owners(&key).unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(
            err,
            CacheError::TopologyUnavailable { version } if version == TopologyVersion(0)
        ));
    }

    #[test]
    fn test_owners_come_from_one_version() {
        let view = TopologyView::new(snapshot(1, &[1, 2, 3, 4]));
        let key = CacheKey::encode(&"k").unwrap();

        let owners = view.resolve_owners(&key).unwrap();
        assert_eq!(owners.version, TopologyVersion(1));
        assert_eq!(owners.backups.len(), 1);
        assert_ne!(owners.primary, owners.backups[0]);
        assert!(view.current().is_primary(owners.primary, &key));

        // Same key, same version: same answer.
        assert_eq!(view.resolve_owners(&key).unwrap(), owners);
    }

    #[test]
    fn test_publish_is_monotonic() {
        let view = TopologyView::new(snapshot(1, &[1, 2]));
        let held = view.current();

        view.publish(snapshot(2, &[1, 2, 3])).unwrap();
        assert_eq!(view.version(), TopologyVersion(2));
        // An attempt that grabbed the old snapshot keeps a consistent view.
        assert_eq!(held.version(), TopologyVersion(1));
        assert_eq!(held.members().len(), 2);

        let err = view.publish(snapshot(2, &[1])).unwrap_err();
        assert_eq!(err, corelib::Error::StaleTopology { current: 2, offered: 2 });
    }
}
