//! Write order policies.
//!
//! A cache picks one [`WriteOrderMode`] at configuration time and every node
//! and client derives the same [`WriteOrderPolicy`] from it:
//!
//! - `PRIMARY`: the primary assigns `(topology, per-key sequence, primary)`
//!   under a per-key lock; backups apply sequence numbers strictly in order.
//! - `CLOCK`: the client stamps the write from a [`VersionClock`] once and
//!   reuses the stamp on every retry; replicas keep whichever version is
//!   higher and acknowledge the rest as already applied.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use corelib::{NodeId, TopologyVersion};

use crate::error::{CacheError, Result};
use crate::types::ApplyOutcome;
use crate::version::{EntryVersion, VersionClock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WriteOrderMode {
    Clock,
    Primary,
}

impl WriteOrderMode {
    pub fn policy(self) -> Arc<dyn WriteOrderPolicy> {
        match self {
            WriteOrderMode::Clock => Arc::new(ClockOrder),
            WriteOrderMode::Primary => Arc::new(PrimaryOrder),
        }
    }
}

impl fmt::Display for WriteOrderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteOrderMode::Clock => f.write_str("CLOCK"),
            WriteOrderMode::Primary => f.write_str("PRIMARY"),
        }
    }
}

impl FromStr for WriteOrderMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CLOCK" => Ok(WriteOrderMode::Clock),
            "PRIMARY" => Ok(WriteOrderMode::Primary),
            other => Err(format!("unknown write order mode: {}", other)),
        }
    }
}

/// Rules for stamping versions and for accepting writes on each replica.
pub trait WriteOrderPolicy: Send + Sync + fmt::Debug {
    fn mode(&self) -> WriteOrderMode;

    /// Version the client attaches before its first attempt, if this mode
    /// versions on the client.
    fn client_version(
        &self,
        topology: TopologyVersion,
        origin: NodeId,
        clock: &VersionClock,
    ) -> Option<EntryVersion>;

    /// Version the primary stores the write under.
    fn primary_version(
        &self,
        requested: Option<EntryVersion>,
        stored: Option<&EntryVersion>,
        topology: TopologyVersion,
        primary: NodeId,
        clock: &VersionClock,
    ) -> Result<EntryVersion>;

    /// Whether a replica holding `stored` takes `incoming`.
    fn accept(&self, stored: Option<&EntryVersion>, incoming: &EntryVersion) -> ApplyOutcome;

    /// Whether the primary holds a per-key lock across accept and forward.
    fn serializes_on_primary(&self) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ClockOrder;

impl WriteOrderPolicy for ClockOrder {
    fn mode(&self) -> WriteOrderMode {
        WriteOrderMode::Clock
    }

    fn client_version(
        &self,
        topology: TopologyVersion,
        origin: NodeId,
        clock: &VersionClock,
    ) -> Option<EntryVersion> {
        Some(EntryVersion::new(topology, clock.next(), origin))
    }

    fn primary_version(
        &self,
        requested: Option<EntryVersion>,
        _stored: Option<&EntryVersion>,
        _topology: TopologyVersion,
        _primary: NodeId,
        clock: &VersionClock,
    ) -> Result<EntryVersion> {
        let version = requested.ok_or_else(|| {
            CacheError::Internal("clock-ordered write arrived without a version".into())
        })?;
        clock.observe(version.order);
        Ok(version)
    }

    fn accept(&self, stored: Option<&EntryVersion>, incoming: &EntryVersion) -> ApplyOutcome {
        version_wins(stored, incoming)
    }

    fn serializes_on_primary(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PrimaryOrder;

impl WriteOrderPolicy for PrimaryOrder {
    fn mode(&self) -> WriteOrderMode {
        WriteOrderMode::Primary
    }

    fn client_version(
        &self,
        _topology: TopologyVersion,
        _origin: NodeId,
        _clock: &VersionClock,
    ) -> Option<EntryVersion> {
        None
    }

    fn primary_version(
        &self,
        _requested: Option<EntryVersion>,
        stored: Option<&EntryVersion>,
        topology: TopologyVersion,
        primary: NodeId,
        _clock: &VersionClock,
    ) -> Result<EntryVersion> {
        let sequence = match stored {
            Some(s) if s.topology > topology => {
                return Err(CacheError::topology_changed(topology, s.topology));
            }
            Some(s) if s.topology == topology => s.order + 1,
            _ => 1,
        };
        Ok(EntryVersion::new(topology, sequence, primary))
    }

    fn accept(&self, stored: Option<&EntryVersion>, incoming: &EntryVersion) -> ApplyOutcome {
        match stored {
            Some(s) if incoming <= s => ApplyOutcome::Duplicate,
            Some(s) if s.topology == incoming.topology && s.node == incoming.node => {
                if incoming.order == s.order + 1 {
                    ApplyOutcome::Applied
                } else {
                    ApplyOutcome::OutOfOrder {
                        expected: s.order + 1,
                        got: incoming.order,
                    }
                }
            }
            _ if incoming.order == 1 => ApplyOutcome::Applied,
            _ => ApplyOutcome::OutOfOrder {
                expected: 1,
                got: incoming.order,
            },
        }
    }

    fn serializes_on_primary(&self) -> bool {
        true
    }
}

/// Higher version wins; equal or lower is a duplicate.
pub fn version_wins(stored: Option<&EntryVersion>, incoming: &EntryVersion) -> ApplyOutcome {
    match stored {
        Some(s) if incoming <= s => ApplyOutcome::Duplicate,
        _ => ApplyOutcome::Applied,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(t: u64, o: u64, n: u128) -> EntryVersion {
        EntryVersion::new(TopologyVersion(t), o, NodeId(n))
    }

    #[test]
    fn test_mode_parsing_and_serde() {
        assert_eq!("clock".parse::<WriteOrderMode>().unwrap(), WriteOrderMode::Clock);
        assert_eq!("PRIMARY".parse::<WriteOrderMode>().unwrap(), WriteOrderMode::Primary);
        assert!("fifo".parse::<WriteOrderMode>().is_err());
        assert_eq!(serde_json::to_string(&WriteOrderMode::Clock).unwrap(), "\"CLOCK\"");
        assert_eq!(WriteOrderMode::Primary.policy().mode(), WriteOrderMode::Primary);
    }

    #[test]
    fn test_clock_reuses_client_stamp() {
        let clock = VersionClock::new();
        let policy = ClockOrder;
        let stamp = policy
            .client_version(TopologyVersion(3), NodeId(100), &clock)
            .unwrap();

        let at_primary = policy
            .primary_version(Some(stamp), None, TopologyVersion(4), NodeId(1), &clock)
            .unwrap();
        assert_eq!(at_primary, stamp);
        assert!(policy
            .primary_version(None, None, TopologyVersion(4), NodeId(1), &clock)
            .is_err());
    }

    #[test]
    fn test_clock_accepts_newer_discards_older() {
        let policy = ClockOrder;
        assert_eq!(policy.accept(None, &v(1, 5, 1)), ApplyOutcome::Applied);
        assert_eq!(policy.accept(Some(&v(1, 5, 1)), &v(1, 9, 1)), ApplyOutcome::Applied);
        assert_eq!(policy.accept(Some(&v(1, 5, 1)), &v(1, 5, 1)), ApplyOutcome::Duplicate);
        assert_eq!(policy.accept(Some(&v(1, 5, 1)), &v(1, 2, 7)), ApplyOutcome::Duplicate);
        // Out-of-order arrivals are fine under CLOCK.
        assert_eq!(policy.accept(Some(&v(1, 5, 1)), &v(1, 50, 1)), ApplyOutcome::Applied);
    }

    #[test]
    fn test_primary_sequences_per_topology() {
        let clock = VersionClock::new();
        let policy = PrimaryOrder;
        let first = policy
            .primary_version(None, None, TopologyVersion(2), NodeId(1), &clock)
            .unwrap();
        assert_eq!(first, v(2, 1, 1));

        let second = policy
            .primary_version(None, Some(&first), TopologyVersion(2), NodeId(1), &clock)
            .unwrap();
        assert_eq!(second, v(2, 2, 1));

        // New topology restarts the sequence but still outranks the old one.
        let after_change = policy
            .primary_version(None, Some(&second), TopologyVersion(3), NodeId(4), &clock)
            .unwrap();
        assert_eq!(after_change, v(3, 1, 4));
        assert!(after_change > second);

        let stale = policy.primary_version(None, Some(&after_change), TopologyVersion(2), NodeId(1), &clock);
        assert_eq!(
            stale.unwrap_err().kind(),
            crate::error::ErrorKind::ClusterTopologyChanged
        );
    }

    #[test]
    fn test_primary_backup_rejects_gaps() {
        let policy = PrimaryOrder;
        assert_eq!(policy.accept(None, &v(2, 1, 1)), ApplyOutcome::Applied);
        assert_eq!(policy.accept(Some(&v(2, 1, 1)), &v(2, 2, 1)), ApplyOutcome::Applied);
        assert_eq!(
            policy.accept(Some(&v(2, 1, 1)), &v(2, 3, 1)),
            ApplyOutcome::OutOfOrder { expected: 2, got: 3 }
        );
        assert_eq!(
            policy.accept(None, &v(2, 4, 1)),
            ApplyOutcome::OutOfOrder { expected: 1, got: 4 }
        );
        assert_eq!(policy.accept(Some(&v(2, 2, 1)), &v(2, 2, 1)), ApplyOutcome::Duplicate);
        // First write of a new topology follows any older entry.
        assert_eq!(policy.accept(Some(&v(1, 9, 3)), &v(2, 1, 1)), ApplyOutcome::Applied);
    }
}
