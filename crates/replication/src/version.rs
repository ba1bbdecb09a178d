//! Entry versions and the logical clock that issues them.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use corelib::{NodeId, TopologyVersion};

/// Version attached to every stored entry.
///
/// Ordered by topology first, then the mode-specific order value, then the
/// originating node. The higher version wins a conflict; the node component
/// makes ties deterministic.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryVersion {
    pub topology: TopologyVersion,
    /// Clock reading (`CLOCK`) or per-key sequence (`PRIMARY`).
    pub order: u64,
    pub node: NodeId,
}

impl EntryVersion {
    pub fn new(topology: TopologyVersion, order: u64, node: NodeId) -> Self {
        Self {
            topology,
            order,
            node,
        }
    }
}

impl fmt::Display for EntryVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}@{}", self.topology, self.order, self.node.0)
    }
}

/// Loosely synchronized logical clock.
///
/// Readings follow wall-clock microseconds but never go backwards and never
/// repeat, and `observe` pulls the clock past any version seen from another
/// node.
#[derive(Debug, Default)]
pub struct VersionClock {
    last: AtomicU64,
}

impl VersionClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u64 {
        let wall = wall_micros();
        let mut current = self.last.load(Ordering::Acquire);
        loop {
            let candidate = wall.max(current + 1);
            match self.last.compare_exchange_weak(
                current,
                candidate,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return candidate,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn observe(&self, seen: u64) {
        self.last.fetch_max(seen, Ordering::AcqRel);
    }

    pub fn last(&self) -> u64 {
        self.last.load(Ordering::Acquire)
    }
}

fn wall_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}
