//! Backup replication protocol.
//!
//! One write attempt on the primary walks
//! `Resolved -> PrimaryAccepted -> BackupsNotified -> Acknowledged`, or drops
//! into `Failed` from any phase before `Acknowledged`. [`WriteAttempt`] holds
//! the state and refuses illegal transitions; [`replicate`] drives it.

use corelib::{NodeId, Owners};

use crate::error::{CacheError, Result};
use crate::node::CacheNode;
use crate::transport::NodeTransport;
use crate::types::{ApplyOutcome, BackupWrite, CacheKey, Entry, PrimaryWrite, WriteAck};
use crate::version::EntryVersion;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptPhase {
    Resolved,
    PrimaryAccepted,
    BackupsNotified,
    Acknowledged,
    Failed,
}

#[derive(Debug, Clone)]
pub enum AttemptState {
    Resolved {
        owners: Owners,
    },
    PrimaryAccepted {
        owners: Owners,
        version: EntryVersion,
    },
    BackupsNotified {
        owners: Owners,
        version: EntryVersion,
        acked: Vec<NodeId>,
        excluded: Vec<NodeId>,
    },
    Acknowledged(WriteAck),
    Failed(CacheError),
}

impl AttemptState {
    pub fn phase(&self) -> AttemptPhase {
        match self {
            AttemptState::Resolved { .. } => AttemptPhase::Resolved,
            AttemptState::PrimaryAccepted { .. } => AttemptPhase::PrimaryAccepted,
            AttemptState::BackupsNotified { .. } => AttemptPhase::BackupsNotified,
            AttemptState::Acknowledged(_) => AttemptPhase::Acknowledged,
            AttemptState::Failed(_) => AttemptPhase::Failed,
        }
    }
}

/// State of one write attempt for one key.
#[derive(Debug)]
pub struct WriteAttempt {
    key: CacheKey,
    state: AttemptState,
    history: Vec<AttemptPhase>,
}

impl WriteAttempt {
    pub fn resolved(key: CacheKey, owners: Owners) -> Self {
        Self {
            key,
            state: AttemptState::Resolved { owners },
            history: vec![AttemptPhase::Resolved],
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn state(&self) -> &AttemptState {
        &self.state
    }

    pub fn phase(&self) -> AttemptPhase {
        self.state.phase()
    }

    /// Phases visited so far, in order.
    pub fn history(&self) -> &[AttemptPhase] {
        &self.history
    }

    pub fn accept(&mut self, version: EntryVersion) -> Result<()> {
        match &self.state {
            AttemptState::Resolved { owners } => {
                let owners = owners.clone();
                self.enter(AttemptState::PrimaryAccepted { owners, version });
                Ok(())
            }
            _ => Err(self.illegal(AttemptPhase::PrimaryAccepted)),
        }
    }

    pub fn notify(&mut self, acked: Vec<NodeId>, excluded: Vec<NodeId>) -> Result<()> {
        match &self.state {
            AttemptState::PrimaryAccepted { owners, version } => {
                let (owners, version) = (owners.clone(), *version);
                self.enter(AttemptState::BackupsNotified {
                    owners,
                    version,
                    acked,
                    excluded,
                });
                Ok(())
            }
            _ => Err(self.illegal(AttemptPhase::BackupsNotified)),
        }
    }

    pub fn acknowledge(&mut self) -> Result<WriteAck> {
        match &self.state {
            AttemptState::BackupsNotified {
                version,
                acked,
                excluded,
                ..
            } => {
                let ack = WriteAck {
                    version: *version,
                    replicas: 1 + acked.len(),
                    excluded: excluded.clone(),
                };
                self.enter(AttemptState::Acknowledged(ack.clone()));
                Ok(ack)
            }
            _ => Err(self.illegal(AttemptPhase::Acknowledged)),
        }
    }

    /// Move to `Failed` and hand the error back for propagation.
    ///
    /// An attempt that already reached `Acknowledged` stays there; the error
    /// is still returned.
    pub fn fail(&mut self, err: CacheError) -> CacheError {
        if self.phase() != AttemptPhase::Acknowledged {
            self.enter(AttemptState::Failed(err.clone()));
        }
        err
    }

    fn enter(&mut self, state: AttemptState) {
        self.history.push(state.phase());
        self.state = state;
    }

    fn illegal(&mut self, to: AttemptPhase) -> CacheError {
        let err = CacheError::Internal(format!(
            "illegal write attempt transition {:?} -> {:?}",
            self.phase(),
            to
        ));
        self.fail(err)
    }
}

/// Run one attempt of `request` on `node`, which the client resolved as the
/// key's primary.
pub async fn replicate(
    node: &CacheNode,
    transport: &dyn NodeTransport,
    request: PrimaryWrite,
) -> Result<WriteAck> {
    let snapshot = node.topology().current();
    if snapshot.version() != request.topology {
        return Err(CacheError::topology_changed(
            request.topology,
            snapshot.version(),
        ));
    }
    let owners = snapshot.resolve_owners(&request.key)?;
    let mut attempt = WriteAttempt::resolved(request.key.clone(), owners.clone());

    if owners.primary != node.id() {
        return Err(attempt.fail(CacheError::topology_changed(
            request.topology,
            snapshot.version(),
        )));
    }
    node.validate(&request).map_err(|e| attempt.fail(e))?;

    // Held through accept and forward, released before the ack goes back.
    let _key_guard = if node.policy().serializes_on_primary() {
        Some(node.lock_key(&request.key).await)
    } else {
        None
    };

    let stored = node.store().version(&request.key);
    let version = node
        .policy()
        .primary_version(
            request.version,
            stored.as_ref(),
            snapshot.version(),
            node.id(),
            node.clock(),
        )
        .map_err(|e| attempt.fail(e))?;
    let entry = Entry {
        key: request.key,
        value: request.value,
        version,
    };
    node.install(entry.clone());
    attempt.accept(version)?;

    let mut acked = Vec::with_capacity(owners.backups.len());
    let mut excluded = Vec::new();
    for &backup in &owners.backups {
        match forward(node, transport, backup, &entry, snapshot.version()).await {
            Ok(()) => acked.push(backup),
            Err(CacheError::NodeUnavailable { node: unreachable }) => {
                tracing::warn!(
                    node = %node.id(),
                    backup = %unreachable,
                    topology = %snapshot.version(),
                    "backup unreachable, excluding it from this write"
                );
                metrics::counter!("cache_backup_excluded_total").increment(1);
                excluded.push(unreachable);
            }
            Err(err) => return Err(attempt.fail(err)),
        }
    }

    let required = node.config().durability.required(owners.backups.len());
    let acked_count = acked.len();
    let first_excluded = excluded.first().copied();
    attempt.notify(acked, excluded)?;
    if acked_count < required {
        let unreachable = first_excluded.unwrap_or(owners.primary);
        return Err(attempt.fail(CacheError::NodeUnavailable { node: unreachable }));
    }

    // Ownership may have moved while we were forwarding.
    let now = node.topology().version();
    if now != snapshot.version() {
        return Err(attempt.fail(CacheError::topology_changed(snapshot.version(), now)));
    }

    let ack = attempt.acknowledge()?;
    tracing::debug!(
        node = %node.id(),
        version = %ack.version,
        replicas = ack.replicas,
        phases = ?attempt.history(),
        "write acknowledged"
    );
    Ok(ack)
}

async fn forward(
    node: &CacheNode,
    transport: &dyn NodeTransport,
    backup: NodeId,
    entry: &Entry,
    topology: corelib::TopologyVersion,
) -> Result<()> {
    let request = BackupWrite {
        entry: entry.clone(),
        topology,
        from: node.id(),
        force: false,
    };
    match transport.send_backup(backup, request).await? {
        ApplyOutcome::OutOfOrder { expected, got } => {
            tracing::debug!(
                node = %node.id(),
                backup = %backup,
                expected,
                got,
                "backup is missing earlier writes, sending catch-up"
            );
            let catch_up = BackupWrite {
                entry: entry.clone(),
                topology,
                from: node.id(),
                force: true,
            };
            transport.send_backup(backup, catch_up).await?;
            Ok(())
        }
        ApplyOutcome::Applied | ApplyOutcome::Duplicate => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corelib::TopologyVersion;

    fn owners() -> Owners {
        Owners::from_replicas(vec![NodeId(1), NodeId(2)], TopologyVersion(3)).unwrap()
    }

    fn version() -> EntryVersion {
        EntryVersion::new(TopologyVersion(3), 1, NodeId(1))
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut attempt = WriteAttempt::resolved(CacheKey::from_bytes(vec![1]), owners());
        attempt.accept(version()).unwrap();
        attempt.notify(vec![NodeId(2)], Vec::new()).unwrap();
        let ack = attempt.acknowledge().unwrap();

        assert_eq!(ack.replicas, 2);
        assert_eq!(ack.version, version());
        assert_eq!(
            attempt.history(),
            &[
                AttemptPhase::Resolved,
                AttemptPhase::PrimaryAccepted,
                AttemptPhase::BackupsNotified,
                AttemptPhase::Acknowledged,
            ]
        );
    }

    #[test]
    fn test_excluded_backup_shrinks_replica_count() {
        let mut attempt = WriteAttempt::resolved(CacheKey::from_bytes(vec![1]), owners());
        attempt.accept(version()).unwrap();
        attempt.notify(Vec::new(), vec![NodeId(2)]).unwrap();
        let ack = attempt.acknowledge().unwrap();
        assert_eq!(ack.replicas, 1);
        assert_eq!(ack.excluded, vec![NodeId(2)]);
    }

    #[test]
    fn test_skipping_a_phase_is_rejected() {
        let mut attempt = WriteAttempt::resolved(CacheKey::from_bytes(vec![1]), owners());
        let err = attempt.acknowledge().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Internal);
        assert_eq!(attempt.phase(), AttemptPhase::Failed);
    }

    #[test]
    fn test_fail_records_reason() {
        let mut attempt = WriteAttempt::resolved(CacheKey::from_bytes(vec![1]), owners());
        attempt.accept(version()).unwrap();
        let err = attempt.fail(CacheError::NodeUnavailable { node: NodeId(2) });
        assert!(err.is_retryable());
        assert!(matches!(attempt.state(), AttemptState::Failed(CacheError::NodeUnavailable { .. })));
        assert_eq!(
            attempt.history(),
            &[AttemptPhase::Resolved, AttemptPhase::PrimaryAccepted, AttemptPhase::Failed]
        );
    }
}
