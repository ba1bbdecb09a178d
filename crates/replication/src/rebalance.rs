//! Push entries to their owners after a membership change.

use std::sync::Arc;

use corelib::NodeId;

use crate::node::CacheNode;
use crate::topology::TopologySnapshot;
use crate::types::{ApplyOutcome, Entry};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RebalanceStats {
    /// Entries read from source nodes.
    pub scanned: usize,
    /// Copies that replaced an older (or missing) version on an owner.
    pub installed: usize,
}

/// Copy every entry held by `nodes` to each of its owners under `snapshot`.
///
/// Only what the nodes held when the pass started is copied; entries a node
/// receives during the pass are not pushed on again. Installs go through
/// version-wins, so running this concurrently with live writes, or more than
/// once, never regresses a value. Owners not in `nodes` are skipped.
pub fn rebalance(snapshot: &TopologySnapshot, nodes: &[Arc<CacheNode>]) -> RebalanceStats {
    let mut stats = RebalanceStats::default();
    // Empty topology: nobody to hand to.
    if !snapshot.ring().is_empty() {
        let held: Vec<(NodeId, Vec<Entry>)> =
            nodes.iter().map(|n| (n.id(), n.entries())).collect();
        for (source, entries) in held {
            for entry in entries {
                stats.scanned += 1;
                let Ok(owners) = snapshot.resolve_owners(&entry.key) else {
                    continue;
                };
                for owner in owners.all() {
                    if owner == source {
                        continue;
                    }
                    if let Some(target) = nodes.iter().find(|n| n.id() == owner) {
                        if target.install(entry.clone()) == ApplyOutcome::Applied {
                            stats.installed += 1;
                        }
                    }
                }
            }
        }
    }

    metrics::counter!("cache_rebalanced_entries_total").increment(stats.installed as u64);
    tracing::info!(
        topology = %snapshot.version(),
        scanned = stats.scanned,
        installed = stats.installed,
        "rebalanced"
    );
    stats
}
