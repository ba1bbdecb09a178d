//! Virtual node abstractions.
//!
//! # Virtual Nodes (VNodes) Concept
//!
//! Instead of each physical node having a single token on the ring, each node
//! has multiple tokens (virtual nodes). This provides:
//!
//! 1. **Better Load Distribution**: More tokens = smoother distribution of keys
//! 2. **Gradual Rebalancing**: When nodes join/leave, only a fraction of keys move
//! 3. **Fault Tolerance**: Failure of one node spreads its keys over many successors
//!
//! Vnode tokens are derived from `"<node_id>:<index>"`, so a node that leaves and
//! rejoins lands on exactly the same positions and reclaims exactly the same keys.

use crate::node::NodeId;
use crate::token::{HashToken, Token};

/// A virtual node on the hash ring.
///
/// # Invariants
///
/// - Every `VirtualNode` belongs to exactly one physical node
/// - Tokens are ordered; the ring is the sorted sequence of vnode tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualNode {
    /// Token position on the ring.
    pub token: HashToken,

    /// The physical node that owns this virtual node.
    pub node_id: NodeId,
}

impl VirtualNode {
    #[inline]
    pub fn new(token: HashToken, node_id: NodeId) -> Self {
        Self { token, node_id }
    }

    /// Create a virtual node from a node ID and vnode index.
    ///
    /// The token is the hash of `"node_id:vnode_index"`, which makes the
    /// placement a pure function of the pair.
    pub fn from_index(node_id: NodeId, vnode_index: usize) -> Self {
        let vnode_key = format!("{}:{}", node_id.0, vnode_index);
        Self::new(HashToken::from_key(&vnode_key), node_id)
    }

    #[inline]
    pub fn token(&self) -> HashToken {
        self.token
    }

    #[inline]
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Clockwise distance to another virtual node.
    #[inline]
    pub fn distance_to(&self, other: &Self) -> HashToken {
        self.token.distance_to(&other.token)
    }
}

impl std::fmt::Display for VirtualNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VNode(token={:016x}, node={})", self.token.0, self.node_id)
    }
}
