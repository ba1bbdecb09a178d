//! Membership service.
//!
//! Owns the member set. Every join or leave bumps the topology version by
//! exactly one, rebuilds the ring and publishes the new snapshot.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use corelib::{Error, Node, NodeId, RingBuilder, TopologyVersion};

use crate::strategy::ReplicationStrategy;
use crate::topology::{TopologySnapshot, TopologyView};

#[derive(Debug)]
struct Members {
    nodes: BTreeMap<NodeId, Node>,
    version: TopologyVersion,
}

#[derive(Debug)]
pub struct Membership {
    topology: Arc<TopologyView>,
    strategy: Arc<dyn ReplicationStrategy>,
    vnodes: usize,
    members: Mutex<Members>,
}

impl Membership {
    pub fn new(
        topology: Arc<TopologyView>,
        strategy: Arc<dyn ReplicationStrategy>,
        vnodes: usize,
    ) -> Self {
        let version = topology.version();
        Self {
            topology,
            strategy,
            vnodes,
            members: Mutex::new(Members {
                nodes: BTreeMap::new(),
                version,
            }),
        }
    }

    /// Add `node`. Joining twice is a no-op that returns the current snapshot.
    pub fn join(&self, node: Node) -> corelib::Result<Arc<TopologySnapshot>> {
        let mut members = self.members.lock();
        if members.nodes.contains_key(&node.id) {
            return Ok(self.topology.current());
        }
        let id = node.id;
        members.nodes.insert(id, node);
        let snapshot = self.publish(&mut members)?;
        tracing::info!(node = %id, topology = %snapshot.version(), "node joined");
        Ok(snapshot)
    }

    pub fn leave(&self, id: NodeId) -> corelib::Result<Arc<TopologySnapshot>> {
        let mut members = self.members.lock();
        if members.nodes.remove(&id).is_none() {
            return Err(Error::UnknownNode(id));
        }
        let snapshot = self.publish(&mut members)?;
        tracing::info!(node = %id, topology = %snapshot.version(), "node left");
        Ok(snapshot)
    }

    pub fn members(&self) -> Vec<NodeId> {
        self.members.lock().nodes.keys().copied().collect()
    }

    pub fn is_member(&self, id: NodeId) -> bool {
        self.members.lock().nodes.contains_key(&id)
    }

    pub fn version(&self) -> TopologyVersion {
        self.members.lock().version
    }

    fn publish(&self, members: &mut Members) -> corelib::Result<Arc<TopologySnapshot>> {
        let ring = RingBuilder::new()
            .with_vnodes(self.vnodes)
            .add_nodes(members.nodes.values().cloned())
            .build()?;
        let version = members.version.next();
        let snapshot = self
            .topology
            .publish(TopologySnapshot::new(version, ring, Arc::clone(&self.strategy)))?;
        members.version = version;
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::SimpleStrategy;

    fn membership() -> (Arc<TopologyView>, Membership) {
        let strategy: Arc<dyn ReplicationStrategy> = Arc::new(SimpleStrategy::with_backups(1));
        let view = Arc::new(TopologyView::new(TopologySnapshot::empty(Arc::clone(&strategy))));
        let membership = Membership::new(Arc::clone(&view), strategy, 16);
        (view, membership)
    }

    #[test]
    fn test_each_change_bumps_version_once() {
        let (view, membership) = membership();
        membership.join(Node::numbered(0)).unwrap();
        membership.join(Node::numbered(1)).unwrap();
        assert_eq!(view.version(), TopologyVersion(2));

        // Rejoining an existing member changes nothing.
        membership.join(Node::numbered(1)).unwrap();
        assert_eq!(view.version(), TopologyVersion(2));

        let snapshot = membership.leave(NodeId(0)).unwrap();
        assert_eq!(snapshot.version(), TopologyVersion(3));
        assert_eq!(snapshot.members(), vec![NodeId(1)]);
        assert_eq!(membership.members(), vec![NodeId(1)]);
        assert_eq!(membership.version(), view.version());
    }

    #[test]
    fn test_unknown_leave_is_an_error() {
        let (view, membership) = membership();
        assert_eq!(membership.leave(NodeId(5)).unwrap_err(), Error::UnknownNode(NodeId(5)));
        assert_eq!(view.version(), TopologyVersion::INITIAL);
    }

    #[test]
    fn test_last_member_leaving_empties_topology() {
        let (view, membership) = membership();
        membership.join(Node::numbered(0)).unwrap();
        membership.leave(NodeId(0)).unwrap();
        let key = crate::types::CacheKey::from_bytes(vec![1]);
        assert!(view.resolve_owners(&key).is_err());
    }
}
