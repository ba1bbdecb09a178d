//! A cache node: local store plus the primary and backup write handlers.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use corelib::NodeId;

use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::order::WriteOrderPolicy;
use crate::protocol;
use crate::store::VersionedStore;
use crate::topology::TopologyView;
use crate::transport::NodeTransport;
use crate::types::{ApplyOutcome, BackupWrite, CacheKey, Entry, PrimaryWrite, WriteAck};
use crate::version::VersionClock;

#[derive(Debug)]
pub struct CacheNode {
    id: NodeId,
    config: Arc<CacheConfig>,
    policy: Arc<dyn WriteOrderPolicy>,
    topology: Arc<TopologyView>,
    clock: Arc<VersionClock>,
    store: VersionedStore,
    /// Per-key update locks, only taken under `PRIMARY` order.
    key_locks: DashMap<CacheKey, Arc<Mutex<()>>>,
}

impl CacheNode {
    pub fn new(
        id: NodeId,
        config: Arc<CacheConfig>,
        topology: Arc<TopologyView>,
        clock: Arc<VersionClock>,
    ) -> Self {
        let policy = config.write_order_mode.policy();
        Self {
            id,
            config,
            policy,
            topology,
            clock,
            store: VersionedStore::new(),
            key_locks: DashMap::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn policy(&self) -> &dyn WriteOrderPolicy {
        self.policy.as_ref()
    }

    pub fn topology(&self) -> &TopologyView {
        &self.topology
    }

    pub fn clock(&self) -> &VersionClock {
        &self.clock
    }

    pub fn store(&self) -> &VersionedStore {
        &self.store
    }

    /// Accept a client write as primary and replicate it to the backups.
    pub async fn handle_write(
        &self,
        request: PrimaryWrite,
        transport: &dyn NodeTransport,
    ) -> Result<WriteAck> {
        protocol::replicate(self, transport, request).await
    }

    /// Apply a write forwarded by a primary.
    pub fn handle_backup(&self, request: BackupWrite) -> Result<ApplyOutcome> {
        if request.force {
            return Ok(self.install(request.entry));
        }

        let current = self.topology.version();
        if current != request.topology {
            return Err(CacheError::topology_changed(request.topology, current));
        }

        let order = request.entry.version.order;
        let outcome = self
            .store
            .apply_with(request.entry, |stored, incoming| self.policy.accept(stored, incoming));
        if outcome == ApplyOutcome::Applied {
            self.clock.observe(order);
        }
        tracing::trace!(node = %self.id, from = %request.from, ?outcome, "backup write");
        Ok(outcome)
    }

    pub fn read(&self, key: &CacheKey) -> Option<Entry> {
        self.store.get(key)
    }

    /// Version-wins install used by rebalancing and catch-up.
    pub fn install(&self, entry: Entry) -> ApplyOutcome {
        let order = entry.version.order;
        let outcome = self.store.install(entry);
        if outcome == ApplyOutcome::Applied {
            self.clock.observe(order);
        }
        outcome
    }

    pub fn entries(&self) -> Vec<Entry> {
        self.store.entries()
    }

    /// Drop all in-memory state, as a process restart would.
    pub fn reset(&self) {
        self.store.clear();
        self.key_locks.clear();
    }

    pub(crate) fn validate(&self, request: &PrimaryWrite) -> Result<()> {
        if request.key.len() > self.config.max_key_bytes {
            return Err(CacheError::rejected(format!(
                "key of {} bytes exceeds limit of {}",
                request.key.len(),
                self.config.max_key_bytes
            )));
        }
        if request.value.len() > self.config.max_value_bytes {
            return Err(CacheError::rejected(format!(
                "value of {} bytes exceeds limit of {}",
                request.value.len(),
                self.config.max_value_bytes
            )));
        }
        Ok(())
    }

    pub(crate) async fn lock_key(&self, key: &CacheKey) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(&self.key_locks.entry(key.clone()).or_default());
        lock.lock_owned().await
    }
}
