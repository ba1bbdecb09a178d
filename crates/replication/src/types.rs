//! Keys, entries, and the messages exchanged between clients, primaries and
//! backups.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use corelib::{NodeId, TopologyVersion};

use crate::error::Result;
use crate::version::EntryVersion;

/// Encoded cache key. Ownership is computed on these bytes.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CacheKey(Vec<u8>);

impl CacheKey {
    pub fn encode<K: Serialize + ?Sized>(key: &K) -> Result<Self> {
        Ok(CacheKey(bincode::serialize(key)?))
    }

    pub fn decode<K: DeserializeOwned>(&self) -> Result<K> {
        Ok(bincode::deserialize(&self.0)?)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        CacheKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey(")?;
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, ")")
    }
}

/// A stored value and the version that put it there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub key: CacheKey,
    pub value: Vec<u8>,
    pub version: EntryVersion,
}

/// Client → primary.
#[derive(Debug, Clone)]
pub struct PrimaryWrite {
    pub key: CacheKey,
    pub value: Vec<u8>,
    /// Topology the client resolved the owners under.
    pub topology: TopologyVersion,
    /// Client-assigned version (`CLOCK` mode only).
    pub version: Option<EntryVersion>,
}

/// Primary → backup.
#[derive(Debug, Clone)]
pub struct BackupWrite {
    pub entry: Entry,
    pub topology: TopologyVersion,
    pub from: NodeId,
    /// Catch-up install: skip sequence checks, apply under version-wins.
    pub force: bool,
}

/// Primary → client, sent once the write reached `Acknowledged`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteAck {
    pub version: EntryVersion,
    /// Primary plus every backup that acknowledged.
    pub replicas: usize,
    /// Backups that were unreachable and excluded from this write.
    pub excluded: Vec<NodeId>,
}

/// Result of applying an entry to a node's store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Equal or newer version already stored; treated as already applied.
    Duplicate,
    /// `PRIMARY` mode only: the backup is missing earlier sequence numbers.
    OutOfOrder { expected: u64, got: u64 },
}

impl ApplyOutcome {
    pub fn is_acknowledged(&self) -> bool {
        !matches!(self, ApplyOutcome::OutOfOrder { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_roundtrip_and_stability() {
        let key = CacheKey::encode(&42u32).unwrap();
        assert_eq!(key.decode::<u32>().unwrap(), 42);
        assert_eq!(key, CacheKey::encode(&42u32).unwrap());
        assert_ne!(key, CacheKey::encode(&43u32).unwrap());
    }

    #[test]
    fn test_decode_wrong_type_is_serialization_error() {
        let key = CacheKey::from_bytes(vec![1]);
        let err = key.decode::<u64>().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Serialization);
    }
}
