//! Retry-safe replicated puts over a consistent-hash ring.
//!
//! This crate provides:
//! - A versioned topology view resolving primary and backup owners per key
//! - `CLOCK` and `PRIMARY` write ordering
//! - The primary/backup replication protocol
//! - A client that retries transient failures under a deadline
//! - An in-process cluster (membership, transport, rebalancing) to run it on

pub mod cluster;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod membership;
pub mod node;
pub mod order;
pub mod partial;
pub mod protocol;
pub mod rebalance;
pub mod store;
pub mod strategy;
pub mod topology;
pub mod transport;
pub mod types;
pub mod version;

pub use cluster::{ClusterError, LocalCluster};
pub use config::{CacheConfig, ConfigError, DurabilityThreshold};
pub use coordinator::{CacheClient, WriteReceipt};
pub use error::{CacheError, ErrorKind, Result};
pub use membership::Membership;
pub use node::CacheNode;
pub use order::{WriteOrderMode, WriteOrderPolicy};
pub use partial::{KeyOutcome, PartialUpdateError, PartialUpdateReport};
pub use protocol::{AttemptPhase, WriteAttempt};
pub use rebalance::{rebalance, RebalanceStats};
pub use store::VersionedStore;
pub use strategy::{ReplicationStrategy, SimpleStrategy};
pub use topology::{TopologySnapshot, TopologyView};
pub use transport::{LocalTransport, NodeState, NodeTransport};
pub use types::{ApplyOutcome, BackupWrite, CacheKey, Entry, PrimaryWrite, WriteAck};
pub use version::{EntryVersion, VersionClock};
