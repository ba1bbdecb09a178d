//! Hash ring data structure.
//!
//! Holds a `BTreeMap<HashToken, NodeId>` of vnode positions plus the member
//! metadata. A key is owned by the first vnode at or after its token, wrapping
//! around at the end of the token space.

use std::collections::{BTreeMap, HashSet};

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::node::{Node, NodeId};
use crate::partitioner::{Partitioner, SipPartitioner};
use crate::token::{HashToken, Token};
use crate::vnode::VirtualNode;

/// Virtual nodes per member when the builder is not told otherwise.
pub const DEFAULT_VNODES: usize = 256;

#[derive(Debug, Default)]
struct RingInner {
    tokens: BTreeMap<HashToken, NodeId>,
    /// Member metadata and the number of vnodes it has been given so far.
    nodes: BTreeMap<NodeId, (Node, usize)>,
}

/// Consistent hash ring.
///
/// Safe to share across threads; mutation takes a short write lock. Rings
/// published inside a topology snapshot are never mutated again, so lookups
/// on them only ever contend with other readers.
#[derive(Debug, Default)]
pub struct HashRing {
    partitioner: SipPartitioner,
    inner: RwLock<RingInner>,
}

impl HashRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `vnodes` virtual nodes for `node`.
    ///
    /// Adding a node that is already a member gives it additional vnodes;
    /// indices continue from the ones it already has.
    pub fn add_node(&self, node: Node, vnodes: usize) {
        let mut inner = self.inner.write();
        let start = inner.nodes.get(&node.id).map(|(_, n)| *n).unwrap_or(0);
        for index in start..start + vnodes {
            let vnode = VirtualNode::from_index(node.id, index);
            inner.tokens.insert(vnode.token(), vnode.node_id());
        }
        inner.nodes.insert(node.id, (node, start + vnodes));
    }

    /// Remove a node and all its vnodes. Returns false if it was not a member.
    pub fn remove_node(&self, id: &NodeId) -> bool {
        let mut inner = self.inner.write();
        if inner.nodes.remove(id).is_none() {
            return false;
        }
        inner.tokens.retain(|_, owner| owner != id);
        true
    }

    /// Primary owner of `key`, or `None` on an empty ring.
    pub fn lookup(&self, key: &[u8]) -> Option<NodeId> {
        let token = self.partitioner.partition(key);
        let inner = self.inner.read();
        Self::first_at_or_after(&inner, token)
    }

    /// Metadata of the primary owner of `key`.
    pub fn lookup_node(&self, key: &[u8]) -> Option<Node> {
        let id = self.lookup(key)?;
        self.get_node(&id)
    }

    /// Up to `count` distinct nodes walking clockwise from `key`'s token,
    /// primary first.
    pub fn successors(&self, key: &[u8], count: usize) -> Vec<NodeId> {
        let token = self.partitioner.partition(key);
        let inner = self.inner.read();
        let wanted = count.min(inner.nodes.len());
        let mut found = Vec::with_capacity(wanted);
        if wanted == 0 {
            return found;
        }

        let mut seen = HashSet::with_capacity(wanted);
        let clockwise = inner
            .tokens
            .range(token..)
            .chain(inner.tokens.range(..token))
            .map(|(_, id)| *id);
        for id in clockwise {
            if seen.insert(id) {
                found.push(id);
                if found.len() == wanted {
                    break;
                }
            }
        }
        found
    }

    pub fn get_node(&self, id: &NodeId) -> Option<Node> {
        self.inner.read().nodes.get(id).map(|(node, _)| node.clone())
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.inner.read().nodes.contains_key(id)
    }

    /// All members, ordered by id.
    pub fn nodes(&self) -> Vec<Node> {
        self.inner
            .read()
            .nodes
            .values()
            .map(|(node, _)| node.clone())
            .collect()
    }

    /// All vnode positions in ring order.
    pub fn tokens(&self) -> Vec<(HashToken, NodeId)> {
        self.inner
            .read()
            .tokens
            .iter()
            .map(|(token, id)| (*token, *id))
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.inner.read().nodes.len()
    }

    pub fn token_count(&self) -> usize {
        self.inner.read().tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().tokens.is_empty()
    }

    pub fn partitioner_name(&self) -> &'static str {
        self.partitioner.name()
    }

    /// Fraction of the token space owned by each member (primary ownership).
    pub fn ownership(&self) -> BTreeMap<NodeId, f64> {
        let inner = self.inner.read();
        let mut shares: BTreeMap<NodeId, f64> =
            inner.nodes.keys().map(|id| (*id, 0.0)).collect();
        if inner.tokens.len() == 1 {
            if let Some(id) = inner.tokens.values().next() {
                shares.insert(*id, 1.0);
            }
            return shares;
        }

        let Some((&last, _)) = inner.tokens.iter().next_back() else {
            return shares;
        };
        let mut prev = last;
        let space = <HashToken as Token>::max().0 as f64 + 1.0;
        for (token, id) in &inner.tokens {
            let width = prev.distance_to(token).0 as f64;
            *shares.entry(*id).or_insert(0.0) += width / space;
            prev = *token;
        }
        shares
    }

    fn first_at_or_after(inner: &RingInner, token: HashToken) -> Option<NodeId> {
        inner
            .tokens
            .range(token..)
            .next()
            .or_else(|| inner.tokens.iter().next())
            .map(|(_, id)| *id)
    }
}

/// Builder for rings with a uniform (or per-node) vnode count.
#[derive(Debug)]
pub struct RingBuilder {
    vnodes: usize,
    nodes: Vec<(Node, Option<usize>)>,
}

impl Default for RingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RingBuilder {
    pub fn new() -> Self {
        Self {
            vnodes: DEFAULT_VNODES,
            nodes: Vec::new(),
        }
    }

    /// Vnode count for nodes added without an explicit count.
    pub fn with_vnodes(mut self, vnodes: usize) -> Self {
        self.vnodes = vnodes;
        self
    }

    pub fn add_node(mut self, node: Node) -> Self {
        self.nodes.push((node, None));
        self
    }

    pub fn add_node_with_vnodes(mut self, node: Node, vnodes: usize) -> Self {
        self.nodes.push((node, Some(vnodes)));
        self
    }

    pub fn add_nodes(mut self, nodes: impl IntoIterator<Item = Node>) -> Self {
        self.nodes.extend(nodes.into_iter().map(|node| (node, None)));
        self
    }

    /// Build the ring, rejecting duplicate ids and zero vnode counts.
    pub fn build(self) -> Result<HashRing> {
        let ring = HashRing::new();
        for (node, vnodes) in self.nodes {
            let vnodes = vnodes.unwrap_or(self.vnodes);
            if vnodes == 0 {
                return Err(Error::NoVirtualNodes(node.id));
            }
            if ring.contains(&node.id) {
                return Err(Error::DuplicateNode(node.id));
            }
            ring.add_node(node, vnodes);
        }
        Ok(ring)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wraparound_lookup() {
        let ring = HashRing::new();
        ring.add_node(Node::numbered(1), 1);
        ring.add_node(Node::numbered(2), 1);

        // Whatever the key hashes to, it lands on one of the two vnodes.
        for i in 0..64u32 {
            let owner = ring.lookup(&i.to_le_bytes()).unwrap();
            assert!(owner == NodeId(1) || owner == NodeId(2));
        }
    }

    #[test]
    fn test_successors_distinct_primary_first() {
        let ring = RingBuilder::new()
            .with_vnodes(16)
            .add_nodes((1..=4).map(Node::numbered))
            .build()
            .unwrap();

        let owners = ring.successors(b"key", 3);
        assert_eq!(owners.len(), 3);
        assert_eq!(owners[0], ring.lookup(b"key").unwrap());
        let unique: HashSet<_> = owners.iter().collect();
        assert_eq!(unique.len(), 3);

        // Asking for more than the member count yields every member once.
        assert_eq!(ring.successors(b"key", 10).len(), 4);
        assert!(ring.successors(b"key", 0).is_empty());
    }

    #[test]
    fn test_ownership_sums_to_one() {
        let ring = RingBuilder::new()
            .with_vnodes(32)
            .add_nodes((1..=3).map(Node::numbered))
            .build()
            .unwrap();

        let total: f64 = ring.ownership().values().sum();
        assert!((total - 1.0).abs() < 1e-9, "total share was {}", total);
    }

    #[test]
    fn test_builder_rejects_duplicates_and_zero_vnodes() {
        let dup = RingBuilder::new()
            .add_node(Node::numbered(1))
            .add_node(Node::numbered(1))
            .build();
        assert_eq!(dup.unwrap_err(), Error::DuplicateNode(NodeId(1)));

        let empty = RingBuilder::new()
            .add_node_with_vnodes(Node::numbered(7), 0)
            .build();
        assert_eq!(empty.unwrap_err(), Error::NoVirtualNodes(NodeId(7)));
    }
}
