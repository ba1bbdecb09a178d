//! Retry coordinator: the client-facing put path.
//!
//! Each `put` resolves owners against the latest topology, sends one attempt
//! to the primary and, on a transient failure, re-resolves and tries again
//! after a capped exponential backoff. The loop is bounded by a deadline, not
//! an attempt count.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::Instant;

use corelib::NodeId;

use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::order::WriteOrderPolicy;
use crate::partial::PartialUpdateReport;
use crate::topology::TopologyView;
use crate::transport::NodeTransport;
use crate::types::{CacheKey, Entry, PrimaryWrite, WriteAck};
use crate::version::{EntryVersion, VersionClock};

/// What a successful `put` committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    pub version: EntryVersion,
    /// Attempts sent, including the successful one.
    pub attempts: u32,
    /// Primary plus acknowledging backups.
    pub replicas: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    pub(crate) fn new(initial: Duration, max: Duration) -> Self {
        Self { next: initial, max }
    }

    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }
}

/// Survives across the attempts of one put.
#[derive(Debug, Default)]
struct PutState {
    /// `CLOCK` stamp, taken once and reused on every retry.
    stamp: Option<EntryVersion>,
    /// Primary the current attempt went to.
    primary: Option<NodeId>,
}

struct ClientInner {
    id: NodeId,
    config: Arc<CacheConfig>,
    policy: Arc<dyn WriteOrderPolicy>,
    topology: Arc<TopologyView>,
    transport: Arc<dyn NodeTransport>,
    clock: Arc<VersionClock>,
}

#[derive(Clone)]
pub struct CacheClient {
    inner: Arc<ClientInner>,
    retries: bool,
    deadline: Option<Duration>,
}

impl std::fmt::Debug for CacheClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheClient")
            .field("id", &self.inner.id)
            .field("mode", &self.inner.policy.mode())
            .field("retries", &self.retries)
            .field("deadline", &self.deadline)
            .finish()
    }
}

impl CacheClient {
    pub fn new(
        id: NodeId,
        config: Arc<CacheConfig>,
        topology: Arc<TopologyView>,
        transport: Arc<dyn NodeTransport>,
        clock: Arc<VersionClock>,
    ) -> Self {
        let deadline = config.retry_deadline();
        Self {
            inner: Arc::new(ClientInner {
                id,
                policy: config.write_order_mode.policy(),
                config,
                topology,
                transport,
                clock,
            }),
            retries: true,
            deadline,
        }
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// A client that surfaces the first failure of any kind.
    pub fn with_no_retries(&self) -> Self {
        Self {
            retries: false,
            ..self.clone()
        }
    }

    /// Override the configured deadline; `None` retries without bound.
    pub fn with_deadline(&self, deadline: Option<Duration>) -> Self {
        Self {
            deadline,
            ..self.clone()
        }
    }

    pub fn retries_enabled(&self) -> bool {
        self.retries
    }

    pub async fn put<K, V>(&self, key: &K, value: &V) -> Result<WriteReceipt>
    where
        K: Serialize + ?Sized,
        V: Serialize + ?Sized,
    {
        let key = CacheKey::encode(key)?;
        let value = bincode::serialize(value)?;
        // A deadline past the clock's range is no deadline.
        let deadline = self.deadline.and_then(|d| Instant::now().checked_add(d));
        self.put_encoded(key, value, deadline).await
    }

    /// Write every entry; each key is its own put sharing one deadline.
    ///
    /// A repeated key keeps its last value.
    pub async fn put_all<K, V, I>(&self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Serialize,
        V: Serialize,
    {
        let mut batch = BTreeMap::new();
        for (key, value) in entries {
            batch.insert(CacheKey::encode(&key)?, bincode::serialize(&value)?);
        }
        if batch.is_empty() {
            return Ok(());
        }

        let deadline = self.deadline.and_then(|d| Instant::now().checked_add(d));
        let mut tasks = JoinSet::new();
        for (key, value) in batch {
            let client = self.clone();
            tasks.spawn(async move {
                let result = client.put_encoded(key.clone(), value, deadline).await;
                (key, result)
            });
        }

        let mut report = PartialUpdateReport::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((key, Ok(_))) => report.record_success(key),
                Ok((key, Err(err))) => report.record_failure(key, err),
                Err(err) => return Err(CacheError::Internal(format!("put task failed: {}", err))),
            }
        }
        report.finish()
    }

    /// Highest-versioned copy among the key's reachable owners.
    pub async fn get<K, V>(&self, key: &K) -> Result<Option<V>>
    where
        K: Serialize + ?Sized,
        V: DeserializeOwned,
    {
        let key = CacheKey::encode(key)?;
        let owners = self.inner.topology.resolve_owners(&key)?;

        let mut newest: Option<Entry> = None;
        let mut last_err = None;
        let mut reached = 0;
        for node in owners.all() {
            match self.inner.transport.read(node, &key).await {
                Ok(found) => {
                    reached += 1;
                    if let Some(entry) = found {
                        if newest.as_ref().map_or(true, |n| entry.version > n.version) {
                            newest = Some(entry);
                        }
                    }
                }
                Err(err) => last_err = Some(err),
            }
        }

        match (newest, last_err) {
            (Some(entry), _) => Ok(Some(bincode::deserialize(&entry.value)?)),
            (None, Some(err)) if reached == 0 => Err(err),
            (None, _) => Ok(None),
        }
    }

    pub(crate) async fn put_encoded(
        &self,
        key: CacheKey,
        value: Vec<u8>,
        deadline: Option<Instant>,
    ) -> Result<WriteReceipt> {
        let started = Instant::now();
        let mut backoff = Backoff::new(
            self.inner.config.backoff_initial(),
            self.inner.config.backoff_max(),
        );
        let mut state = PutState::default();
        let mut attempts = 0u32;
        let mut last: Option<CacheError> = None;

        loop {
            attempts += 1;
            metrics::counter!("cache_put_attempts_total").increment(1);

            let attempt = self.attempt(&key, &value, &mut state);
            let outcome = match deadline {
                Some(at) => match tokio::time::timeout_at(at, attempt).await {
                    Ok(outcome) => outcome,
                    Err(_) => return Err(self.exhausted(attempts, started, last, &state)),
                },
                None => attempt.await,
            };

            match outcome {
                Ok(ack) => {
                    tracing::debug!(
                        client = %self.inner.id,
                        key = ?key,
                        version = %ack.version,
                        attempts,
                        "put acknowledged"
                    );
                    return Ok(WriteReceipt {
                        version: ack.version,
                        attempts,
                        replicas: ack.replicas,
                    });
                }
                Err(err) if !self.retries || !err.is_retryable() => {
                    metrics::counter!("cache_put_failures_total", "kind" => err.kind().as_str())
                        .increment(1);
                    return Err(err);
                }
                Err(err) => {
                    tracing::debug!(
                        client = %self.inner.id,
                        key = ?key,
                        attempt = attempts,
                        error = %err,
                        "transient put failure, retrying"
                    );
                    metrics::counter!("cache_put_retries_total").increment(1);
                    last = Some(err);
                }
            }

            let pause = backoff.next_delay();
            match deadline {
                Some(at) => {
                    tokio::time::sleep_until((Instant::now() + pause).min(at)).await;
                    if Instant::now() >= at {
                        return Err(self.exhausted(attempts, started, last, &state));
                    }
                }
                None => tokio::time::sleep(pause).await,
            }
        }
    }

    async fn attempt(
        &self,
        key: &CacheKey,
        value: &[u8],
        state: &mut PutState,
    ) -> Result<WriteAck> {
        let snapshot = self.inner.topology.current();
        let owners = snapshot.resolve_owners(key)?;
        state.primary = Some(owners.primary);

        if state.stamp.is_none() {
            state.stamp =
                self.inner
                    .policy
                    .client_version(snapshot.version(), self.inner.id, &self.inner.clock);
        }

        let request = PrimaryWrite {
            key: key.clone(),
            value: value.to_vec(),
            topology: snapshot.version(),
            version: state.stamp,
        };
        self.inner.transport.send_write(owners.primary, request).await
    }

    fn exhausted(
        &self,
        attempts: u32,
        started: Instant,
        last: Option<CacheError>,
        state: &PutState,
    ) -> CacheError {
        let last = last.unwrap_or_else(|| match state.primary {
            Some(node) => CacheError::NodeUnavailable { node },
            None => CacheError::TopologyUnavailable {
                version: self.inner.topology.version(),
            },
        });
        let elapsed = started.elapsed();
        tracing::warn!(
            client = %self.inner.id,
            attempts,
            ?elapsed,
            last = %last,
            "put deadline exceeded"
        );
        metrics::counter!("cache_put_failures_total", "kind" => "retries_exhausted").increment(1);
        CacheError::RetriesExhausted {
            attempts,
            elapsed,
            last: Box::new(last),
        }
    }
}
