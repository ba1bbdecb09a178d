//! Node-to-node transport.
//!
//! [`NodeTransport`] is the seam between the client, primaries and backups.
//! [`LocalTransport`] delivers in-process and simulates the failures a real
//! network would show: stopped nodes, stalled nodes, lost responses, slow
//! replies and one-off transient faults.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use corelib::NodeId;

use crate::error::{CacheError, Result};
use crate::node::CacheNode;
use crate::types::{ApplyOutcome, BackupWrite, CacheKey, Entry, PrimaryWrite, WriteAck};

/// Delivery is at-least-once with possible total loss; an unreachable peer is
/// reported as [`CacheError::NodeUnavailable`].
#[async_trait]
pub trait NodeTransport: Send + Sync {
    async fn send_write(&self, primary: NodeId, request: PrimaryWrite) -> Result<WriteAck>;

    async fn send_backup(&self, backup: NodeId, request: BackupWrite) -> Result<ApplyOutcome>;

    async fn read(&self, node: NodeId, key: &CacheKey) -> Result<Option<Entry>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Up,
    /// Alive and a member, but not answering.
    Paused,
    Down,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeState::Up => f.write_str("up"),
            NodeState::Paused => f.write_str("paused"),
            NodeState::Down => f.write_str("down"),
        }
    }
}

#[derive(Debug)]
struct Endpoint {
    node: Arc<CacheNode>,
    state: NodeState,
    /// Bumped on every stop; responses from an older incarnation are lost.
    incarnation: u64,
    injected_failures: u32,
    /// Held before each reply travels back.
    latency: Duration,
}

#[derive(Debug, Default)]
pub struct LocalTransport {
    endpoints: DashMap<NodeId, Endpoint>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, node: Arc<CacheNode>) {
        let id = node.id();
        self.endpoints.insert(
            id,
            Endpoint {
                node,
                state: NodeState::Up,
                incarnation: 0,
                injected_failures: 0,
                latency: Duration::ZERO,
            },
        );
    }

    pub fn node(&self, id: NodeId) -> Option<Arc<CacheNode>> {
        self.endpoints.get(&id).map(|e| Arc::clone(&e.node))
    }

    pub fn state(&self, id: NodeId) -> Option<NodeState> {
        self.endpoints.get(&id).map(|e| e.state)
    }

    /// Returns the previous state, or `None` for an unknown node.
    pub fn set_state(&self, id: NodeId, state: NodeState) -> Option<NodeState> {
        let mut endpoint = self.endpoints.get_mut(&id)?;
        let previous = endpoint.state;
        if state == NodeState::Down && previous != NodeState::Down {
            endpoint.incarnation += 1;
        }
        endpoint.state = state;
        tracing::debug!(node = %id, from = %previous, to = %state, "node state changed");
        Some(previous)
    }

    /// Make the next `count` requests addressed to `id` fail as unreachable.
    pub fn inject_failures(&self, id: NodeId, count: u32) {
        if let Some(mut endpoint) = self.endpoints.get_mut(&id) {
            endpoint.injected_failures += count;
        }
    }

    /// Delay every reply `id` sends from now on. The request itself is
    /// handled at once; only the answer is late.
    pub fn set_latency(&self, id: NodeId, latency: Duration) {
        if let Some(mut endpoint) = self.endpoints.get_mut(&id) {
            endpoint.latency = latency;
        }
    }

    /// Nodes that still hold data: up or paused.
    pub fn running_nodes(&self) -> Vec<Arc<CacheNode>> {
        let mut nodes: Vec<_> = self
            .endpoints
            .iter()
            .filter(|e| e.state != NodeState::Down)
            .map(|e| Arc::clone(&e.node))
            .collect();
        nodes.sort_by_key(|n| n.id());
        nodes
    }

    fn reach(&self, id: NodeId) -> Result<(Arc<CacheNode>, u64)> {
        let unavailable = CacheError::NodeUnavailable { node: id };
        let mut endpoint = self.endpoints.get_mut(&id).ok_or_else(|| unavailable.clone())?;
        if endpoint.state != NodeState::Up {
            return Err(unavailable);
        }
        if endpoint.injected_failures > 0 {
            endpoint.injected_failures -= 1;
            tracing::trace!(node = %id, "injected transient failure");
            return Err(unavailable);
        }
        Ok((Arc::clone(&endpoint.node), endpoint.incarnation))
    }

    async fn delay_reply(&self, id: NodeId) {
        let latency = self
            .endpoints
            .get(&id)
            .map(|e| e.latency)
            .unwrap_or_default();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    /// The reply only makes it back if the node is still up and has not
    /// restarted since it took the request.
    fn confirm(&self, id: NodeId, incarnation: u64) -> Result<()> {
        match self.endpoints.get(&id) {
            Some(e) if e.state == NodeState::Up && e.incarnation == incarnation => Ok(()),
            _ => Err(CacheError::NodeUnavailable { node: id }),
        }
    }
}

#[async_trait]
impl NodeTransport for LocalTransport {
    async fn send_write(&self, primary: NodeId, request: PrimaryWrite) -> Result<WriteAck> {
        let (node, incarnation) = self.reach(primary)?;
        let result = node.handle_write(request, self).await;
        self.delay_reply(primary).await;
        self.confirm(primary, incarnation)?;
        result
    }

    async fn send_backup(&self, backup: NodeId, request: BackupWrite) -> Result<ApplyOutcome> {
        let (node, incarnation) = self.reach(backup)?;
        let result = node.handle_backup(request);
        self.delay_reply(backup).await;
        self.confirm(backup, incarnation)?;
        result
    }

    async fn read(&self, node: NodeId, key: &CacheKey) -> Result<Option<Entry>> {
        let (target, _) = self.reach(node)?;
        Ok(target.read(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::strategy::SimpleStrategy;
    use crate::topology::{TopologySnapshot, TopologyView};
    use crate::version::VersionClock;

    fn transport_with(ids: &[u128]) -> LocalTransport {
        let topology = Arc::new(TopologyView::new(TopologySnapshot::empty(Arc::new(
            SimpleStrategy::default(),
        ))));
        let config = Arc::new(CacheConfig::default());
        let clock = Arc::new(VersionClock::new());
        let transport = LocalTransport::new();
        for &id in ids {
            transport.register(Arc::new(CacheNode::new(
                NodeId(id),
                Arc::clone(&config),
                Arc::clone(&topology),
                Arc::clone(&clock),
            )));
        }
        transport
    }

    #[tokio::test]
    async fn test_down_and_paused_nodes_are_unreachable() {
        let transport = transport_with(&[1, 2]);
        let key = CacheKey::from_bytes(vec![1]);

        assert!(transport.read(NodeId(1), &key).await.unwrap().is_none());

        transport.set_state(NodeId(1), NodeState::Paused);
        let err = transport.read(NodeId(1), &key).await.unwrap_err();
        assert!(matches!(err, CacheError::NodeUnavailable { node } if node == NodeId(1)));

        transport.set_state(NodeId(2), NodeState::Down);
        assert!(transport.read(NodeId(2), &key).await.is_err());
        assert_eq!(transport.running_nodes().len(), 1);

        assert!(transport.read(NodeId(9), &key).await.is_err());
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let transport = transport_with(&[1]);
        let key = CacheKey::from_bytes(vec![1]);
        transport.inject_failures(NodeId(1), 2);

        assert!(transport.read(NodeId(1), &key).await.is_err());
        assert!(transport.read(NodeId(1), &key).await.is_err());
        assert!(transport.read(NodeId(1), &key).await.is_ok());
    }

    #[test]
    fn test_stop_bumps_incarnation() {
        let transport = transport_with(&[1]);
        let (_, before) = transport.reach(NodeId(1)).unwrap();

        assert_eq!(transport.set_state(NodeId(1), NodeState::Down), Some(NodeState::Up));
        transport.set_state(NodeId(1), NodeState::Up);

        // A reply taken under the old incarnation is lost.
        assert!(transport.confirm(NodeId(1), before).is_err());
        let (_, after) = transport.reach(NodeId(1)).unwrap();
        assert!(transport.confirm(NodeId(1), after).is_ok());
        assert_eq!(transport.set_state(NodeId(7), NodeState::Up), None);
    }

    #[tokio::test]
    async fn test_slow_reply_is_lost_if_node_stops_meanwhile() {
        let transport = Arc::new(transport_with(&[1]));
        transport.set_latency(NodeId(1), Duration::from_millis(50));
        let entry = Entry {
            key: CacheKey::from_bytes(vec![1]),
            value: vec![1],
            version: crate::version::EntryVersion::new(corelib::TopologyVersion(0), 1, NodeId(9)),
        };
        let request = BackupWrite {
            entry,
            topology: corelib::TopologyVersion(0),
            from: NodeId(9),
            force: true,
        };

        let (result, _) = tokio::join!(transport.send_backup(NodeId(1), request), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            transport.set_state(NodeId(1), NodeState::Down);
        });

        // Applied on arrival, but the answer never made it back.
        assert!(matches!(result, Err(CacheError::NodeUnavailable { .. })));
        assert!(transport.node(NodeId(1)).unwrap().read(&CacheKey::from_bytes(vec![1])).is_some());
    }
}
