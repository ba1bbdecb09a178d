//! Node abstractions for the consistent hash ring.
//!
//! Nodes represent logical participants in the cluster. They are identified by
//! a compact `NodeId` that is cheap to compare and hash; the id also breaks
//! ties between otherwise equal entry versions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Compact identifier for a node in the cluster.
///
/// Newtype over `u128` so comparisons and hashing are very fast while giving
/// plenty of space for uniqueness.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct NodeId(pub u128);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// Logical node participating in the ring.
///
/// Keep this struct small and cheap to clone; heavy mutable state (stores,
/// locks, connection state) lives in the replication crate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    /// Human-readable name or hostname.
    pub name: String,
}

impl Node {
    /// Construct a new node with basic metadata.
    pub fn new(id: NodeId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    /// Node named after its numeric id, as used by in-process clusters.
    pub fn numbered(n: u128) -> Self {
        Self::new(NodeId(n), format!("node{}", n))
    }
}
