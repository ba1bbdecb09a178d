//! In-process cluster: N cache nodes, membership, transport and rebalancing
//! wired together.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use corelib::{Node, NodeId};

use crate::config::{CacheConfig, ConfigError};
use crate::coordinator::CacheClient;
use crate::membership::Membership;
use crate::node::CacheNode;
use crate::rebalance::{rebalance, RebalanceStats};
use crate::strategy::{ReplicationStrategy, SimpleStrategy};
use crate::topology::{TopologySnapshot, TopologyView};
use crate::transport::{LocalTransport, NodeState, NodeTransport};
use crate::version::VersionClock;

/// Time between a node going down and membership noticing.
pub const DEFAULT_FAILURE_DETECTION: Duration = Duration::from_millis(10);

/// Client ids live far above node ids so the two never collide.
const CLIENT_ID_BASE: u128 = 1 << 64;

#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("membership: {0}")]
    Membership(#[from] corelib::Error),
}

#[derive(Debug)]
pub struct LocalCluster {
    config: Arc<CacheConfig>,
    topology: Arc<TopologyView>,
    membership: Membership,
    transport: Arc<LocalTransport>,
    clock: Arc<VersionClock>,
    failure_detection: Duration,
    next_client: AtomicU64,
}

impl LocalCluster {
    /// Start nodes `0..nodes`, all joined and up.
    pub fn start(nodes: usize, config: CacheConfig) -> Result<Self, ClusterError> {
        config.validate()?;
        let config = Arc::new(config);
        let strategy: Arc<dyn ReplicationStrategy> =
            Arc::new(SimpleStrategy::with_backups(config.backups));
        let topology = Arc::new(TopologyView::new(TopologySnapshot::empty(Arc::clone(
            &strategy,
        ))));
        let membership = Membership::new(
            Arc::clone(&topology),
            strategy,
            config.vnodes_per_node,
        );
        let transport = Arc::new(LocalTransport::new());
        let clock = Arc::new(VersionClock::new());

        for n in 0..nodes as u128 {
            transport.register(Arc::new(CacheNode::new(
                NodeId(n),
                Arc::clone(&config),
                Arc::clone(&topology),
                Arc::clone(&clock),
            )));
            membership.join(Node::numbered(n))?;
        }
        tracing::info!(
            cache = %config.name,
            nodes,
            backups = config.backups,
            mode = %config.write_order_mode,
            topology = %topology.version(),
            "local cluster started"
        );

        Ok(Self {
            config,
            topology,
            membership,
            transport,
            clock,
            failure_detection: DEFAULT_FAILURE_DETECTION,
            next_client: AtomicU64::new(0),
        })
    }

    pub fn with_failure_detection(mut self, delay: Duration) -> Self {
        self.failure_detection = delay;
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn topology(&self) -> &Arc<TopologyView> {
        &self.topology
    }

    pub fn transport(&self) -> &Arc<LocalTransport> {
        &self.transport
    }

    /// A new client with its own id, sharing the cluster's clock.
    pub fn client(&self) -> CacheClient {
        let n = self.next_client.fetch_add(1, Ordering::Relaxed) as u128;
        let transport: Arc<dyn NodeTransport> = self.transport.clone();
        CacheClient::new(
            NodeId(CLIENT_ID_BASE + n),
            Arc::clone(&self.config),
            Arc::clone(&self.topology),
            transport,
            Arc::clone(&self.clock),
        )
    }

    pub fn node(&self, id: NodeId) -> Option<Arc<CacheNode>> {
        self.transport.node(id)
    }

    /// Members of the current topology.
    pub fn live_nodes(&self) -> Vec<NodeId> {
        self.membership.members()
    }

    /// Crash `id`: it stops answering and loses its data, then leaves the
    /// membership once the failure is detected.
    pub async fn stop_node(&self, id: NodeId) -> Result<(), ClusterError> {
        let node = self.node(id).ok_or(corelib::Error::UnknownNode(id))?;
        self.transport.set_state(id, NodeState::Down);
        node.reset();
        tracing::info!(node = %id, "node stopped");

        if !self.failure_detection.is_zero() {
            tokio::time::sleep(self.failure_detection).await;
        }
        let snapshot = self.membership.leave(id)?;
        self.rebalance(&snapshot);
        Ok(())
    }

    /// Bring `id` back empty and rejoin it; rebalancing refills it.
    pub async fn start_node(&self, id: NodeId) -> Result<(), ClusterError> {
        let node = self.node(id).ok_or(corelib::Error::UnknownNode(id))?;
        node.reset();
        self.transport.set_state(id, NodeState::Up);
        let snapshot = self.membership.join(Node::numbered(id.0))?;
        tracing::info!(node = %id, topology = %snapshot.version(), "node started");
        self.rebalance(&snapshot);
        Ok(())
    }

    pub async fn restart_node(&self, id: NodeId, downtime: Duration) -> Result<(), ClusterError> {
        self.stop_node(id).await?;
        if !downtime.is_zero() {
            tokio::time::sleep(downtime).await;
        }
        self.start_node(id).await
    }

    /// Stall `id` without a membership change.
    pub fn pause_node(&self, id: NodeId) -> Result<(), ClusterError> {
        self.transport
            .set_state(id, NodeState::Paused)
            .map(|_| ())
            .ok_or_else(|| corelib::Error::UnknownNode(id).into())
    }

    /// Undo [`pause_node`](Self::pause_node) and resynchronize the node with
    /// the writes it was excluded from while stalled. A stopped node needs
    /// [`start_node`](Self::start_node) instead and is left alone.
    pub fn resume_node(&self, id: NodeId) -> Result<(), ClusterError> {
        match self.transport.state(id) {
            None => Err(corelib::Error::UnknownNode(id).into()),
            Some(NodeState::Paused) => {
                // Up before the copy: a write that excluded the node already
                // sits on its primary, and later writes reach it directly.
                self.transport.set_state(id, NodeState::Up);
                let stats = self.rebalance(&self.topology.current());
                tracing::info!(node = %id, installed = stats.installed, "node resumed");
                Ok(())
            }
            Some(_) => Ok(()),
        }
    }

    fn rebalance(&self, snapshot: &TopologySnapshot) -> RebalanceStats {
        rebalance(snapshot, &self.transport.running_nodes())
    }
}
