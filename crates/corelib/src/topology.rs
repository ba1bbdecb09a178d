//! Topology value types shared by every crate in the workspace.
//!
//! A [`TopologyVersion`] identifies one membership snapshot; [`Owners`] is the
//! answer to "who holds this key" under exactly one such version.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::node::NodeId;

/// Monotonic counter identifying a membership snapshot.
///
/// Bumped exactly once per join or leave. Version 0 is the empty cluster.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TopologyVersion(pub u64);

impl TopologyVersion {
    pub const INITIAL: TopologyVersion = TopologyVersion(0);

    #[must_use]
    pub fn next(self) -> Self {
        TopologyVersion(self.0 + 1)
    }
}

impl fmt::Display for TopologyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Primary and backup owners of a key, all drawn from one topology version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Owners {
    pub primary: NodeId,
    pub backups: Vec<NodeId>,
    pub version: TopologyVersion,
}

impl Owners {
    /// Split an ordered replica list (primary first). `None` if it is empty.
    pub fn from_replicas(mut replicas: Vec<NodeId>, version: TopologyVersion) -> Option<Self> {
        if replicas.is_empty() {
            return None;
        }
        let primary = replicas.remove(0);
        Some(Self {
            primary,
            backups: replicas,
            version,
        })
    }

    /// Primary followed by the backups.
    pub fn all(&self) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::once(self.primary).chain(self.backups.iter().copied())
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.primary == id || self.backups.contains(&id)
    }

    pub fn is_backup(&self, id: NodeId) -> bool {
        self.backups.contains(&id)
    }
}
