//! Error taxonomy for the put path.
//!
//! Every failure a caller can observe is a [`CacheError`]. Transient kinds
//! (`TopologyUnavailable`, `NodeUnavailable`, `ClusterTopologyChanged`) are
//! absorbed by the retry coordinator unless retries are disabled; the rest are
//! terminal.

use std::fmt;
use std::time::Duration;

use corelib::{NodeId, TopologyVersion};

use crate::partial::PartialUpdateError;

pub type Result<T> = std::result::Result<T, CacheError>;

#[derive(thiserror::Error, Debug, Clone)]
pub enum CacheError {
    #[error("no primary resolvable under topology {version}")]
    TopologyUnavailable { version: TopologyVersion },

    #[error("{node} is unavailable")]
    NodeUnavailable { node: NodeId },

    #[error("cluster topology changed: request resolved under {expected}, node is at {actual}")]
    ClusterTopologyChanged {
        expected: TopologyVersion,
        actual: TopologyVersion,
    },

    #[error("retries exhausted after {attempts} attempts in {elapsed:?}: {last}")]
    RetriesExhausted {
        attempts: u32,
        elapsed: Duration,
        #[source]
        last: Box<CacheError>,
    },

    #[error(transparent)]
    PartialUpdate(PartialUpdateError),

    #[error("rejected: {reason}")]
    Rejected { reason: String },

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse classification of a [`CacheError`], convenient for matching and
/// metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    TopologyUnavailable,
    NodeUnavailable,
    ClusterTopologyChanged,
    RetriesExhausted,
    PartialUpdate,
    Rejected,
    Serialization,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::TopologyUnavailable => "topology_unavailable",
            ErrorKind::NodeUnavailable => "node_unavailable",
            ErrorKind::ClusterTopologyChanged => "cluster_topology_changed",
            ErrorKind::RetriesExhausted => "retries_exhausted",
            ErrorKind::PartialUpdate => "partial_update",
            ErrorKind::Rejected => "rejected",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CacheError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CacheError::TopologyUnavailable { .. } => ErrorKind::TopologyUnavailable,
            CacheError::NodeUnavailable { .. } => ErrorKind::NodeUnavailable,
            CacheError::ClusterTopologyChanged { .. } => ErrorKind::ClusterTopologyChanged,
            CacheError::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
            CacheError::PartialUpdate(_) => ErrorKind::PartialUpdate,
            CacheError::Rejected { .. } => ErrorKind::Rejected,
            CacheError::Serialization(_) => ErrorKind::Serialization,
            CacheError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// True for failures expected to clear up once membership settles.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::TopologyUnavailable
                | ErrorKind::NodeUnavailable
                | ErrorKind::ClusterTopologyChanged
        )
    }

    /// True if this error, or the error it wraps, signals a topology change
    /// or an unreachable node.
    pub fn has_topology_cause(&self) -> bool {
        match self {
            CacheError::RetriesExhausted { last, .. } => last.has_topology_cause(),
            other => other.is_retryable(),
        }
    }

    pub(crate) fn topology_changed(expected: TopologyVersion, actual: TopologyVersion) -> Self {
        CacheError::ClusterTopologyChanged { expected, actual }
    }

    pub(crate) fn rejected(reason: impl Into<String>) -> Self {
        CacheError::Rejected {
            reason: reason.into(),
        }
    }
}

impl From<bincode::Error> for CacheError {
    fn from(err: bincode::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}
