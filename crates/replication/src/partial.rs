//! Per-key outcomes of a multi-key update.

use std::collections::BTreeMap;

use crate::error::{CacheError, Result};
use crate::types::CacheKey;

#[derive(Debug, Clone)]
pub enum KeyOutcome {
    Succeeded,
    Failed(CacheError),
}

/// Collects one outcome per key while a batch is in flight.
#[derive(Debug, Default)]
pub struct PartialUpdateReport {
    outcomes: BTreeMap<CacheKey, KeyOutcome>,
}

impl PartialUpdateReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self, key: CacheKey) {
        self.outcomes.insert(key, KeyOutcome::Succeeded);
    }

    pub fn record_failure(&mut self, key: CacheKey, err: CacheError) {
        self.outcomes.insert(key, KeyOutcome::Failed(err));
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// `Ok` when every key landed. A single-key batch surfaces that key's own
    /// error; anything larger becomes a [`PartialUpdateError`].
    pub fn finish(self) -> Result<()> {
        let total = self.outcomes.len();
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        for (key, outcome) in self.outcomes {
            match outcome {
                KeyOutcome::Succeeded => succeeded.push(key),
                KeyOutcome::Failed(err) => failed.push((key, err)),
            }
        }

        if failed.is_empty() {
            return Ok(());
        }
        if total == 1 {
            if let Some((_, err)) = failed.pop() {
                return Err(err);
            }
        }
        Err(CacheError::PartialUpdate(PartialUpdateError { succeeded, failed }))
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error(
    "partial update: {} of {} keys failed",
    .failed.len(),
    .failed.len() + .succeeded.len()
)]
pub struct PartialUpdateError {
    succeeded: Vec<CacheKey>,
    failed: Vec<(CacheKey, CacheError)>,
}

impl PartialUpdateError {
    pub fn succeeded(&self) -> &[CacheKey] {
        &self.succeeded
    }

    pub fn failed(&self) -> &[(CacheKey, CacheError)] {
        &self.failed
    }

    pub fn failed_keys(&self) -> impl Iterator<Item = &CacheKey> {
        self.failed.iter().map(|(k, _)| k)
    }

    /// Why `key` failed, if it did.
    pub fn reason(&self, key: &CacheKey) -> Option<&CacheError> {
        self.failed.iter().find(|(k, _)| k == key).map(|(_, e)| e)
    }

    pub fn has_topology_cause(&self) -> bool {
        self.failed.iter().any(|(_, e)| e.has_topology_cause())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corelib::NodeId;

    fn key(b: u8) -> CacheKey {
        CacheKey::from_bytes(vec![b])
    }

    #[test]
    fn test_all_succeeded() {
        let mut report = PartialUpdateReport::new();
        report.record_success(key(1));
        report.record_success(key(2));
        assert!(report.finish().is_ok());
    }

    #[test]
    fn test_empty_batch_is_ok() {
        assert!(PartialUpdateReport::new().finish().is_ok());
    }

    #[test]
    fn test_single_key_surfaces_own_error() {
        let mut report = PartialUpdateReport::new();
        report.record_failure(key(1), CacheError::NodeUnavailable { node: NodeId(3) });
        let err = report.finish().unwrap_err();
        assert!(matches!(err, CacheError::NodeUnavailable { node } if node == NodeId(3)));
    }

    #[test]
    fn test_mixed_batch_lists_both_sides() {
        let mut report = PartialUpdateReport::new();
        report.record_success(key(1));
        report.record_failure(key(2), CacheError::rejected("too big"));
        report.record_success(key(3));

        match report.finish().unwrap_err() {
            CacheError::PartialUpdate(partial) => {
                assert_eq!(partial.succeeded(), &[key(1), key(3)]);
                assert_eq!(partial.failed_keys().cloned().collect::<Vec<_>>(), vec![key(2)]);
                assert!(matches!(partial.reason(&key(2)), Some(CacheError::Rejected { .. })));
                assert!(partial.reason(&key(1)).is_none());
                assert!(!partial.has_topology_cause());
                assert_eq!(partial.to_string(), "partial update: 1 of 3 keys failed");
            }
            other => panic!("expected partial update, got {:?}", other),
        }
    }
}
