//! Error types for the core library.

use std::fmt;

use crate::node::NodeId;

/// Result type alias for the core library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building rings and membership views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A node was registered with zero virtual nodes.
    NoVirtualNodes(NodeId),
    /// The same node id was added twice to one builder.
    DuplicateNode(NodeId),
    /// The node is not a member of the ring.
    UnknownNode(NodeId),
    /// A topology snapshot was published out of order.
    StaleTopology { current: u64, offered: u64 },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NoVirtualNodes(id) => write!(f, "node {} has no virtual nodes", id),
            Error::DuplicateNode(id) => write!(f, "node {} added twice", id),
            Error::UnknownNode(id) => write!(f, "node {} is not a ring member", id),
            Error::StaleTopology { current, offered } => write!(
                f,
                "stale topology: offered version {} but current is {}",
                offered, current
            ),
        }
    }
}

impl std::error::Error for Error {}
