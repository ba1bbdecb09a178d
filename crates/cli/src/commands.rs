//! Subcommands.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Args, Subcommand};
use serde::Serialize;

use corelib::{Node, NodeId, RingBuilder, TopologyVersion};
use replication::{
    CacheConfig, CacheKey, ClusterError, LocalCluster, SimpleStrategy, TopologySnapshot,
    WriteOrderMode,
};

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show token ownership per node and the owners of the given keys.
    Owners(OwnersArgs),
    /// Put keys into an in-process cluster while one node keeps restarting.
    Churn(ChurnArgs),
}

#[derive(Debug, Args)]
pub struct OwnersArgs {
    #[arg(long, default_value_t = 4)]
    pub nodes: u64,
    #[arg(long, default_value_t = 1)]
    pub backups: usize,
    #[arg(long, default_value_t = 64)]
    pub vnodes: usize,
    /// String keys to place.
    pub keys: Vec<String>,
}

#[derive(Debug, Args)]
pub struct ChurnArgs {
    /// JSON cache config; flags below override it.
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long, default_value_t = 4)]
    pub nodes: u64,
    #[arg(long)]
    pub backups: Option<usize>,
    /// CLOCK or PRIMARY.
    #[arg(long)]
    pub mode: Option<WriteOrderMode>,
    #[arg(long, default_value_t = 1000)]
    pub keys: u32,
    #[arg(long, default_value_t = 3)]
    pub restart_node: u64,
    /// Pause between restarts.
    #[arg(long, default_value_t = 300)]
    pub interval_ms: u64,
    /// How long the node stays down on each restart.
    #[arg(long, default_value_t = 50)]
    pub downtime_ms: u64,
    #[arg(long)]
    pub deadline_ms: Option<u64>,
    /// Fail each put on its first error.
    #[arg(long)]
    pub no_retry: bool,
}

/// Name/value output of one command.
#[derive(Debug, Serialize)]
pub struct CommandResult {
    pub command: &'static str,
    pub fields: Vec<(String, String)>,
}

impl CommandResult {
    fn new(command: &'static str) -> Self {
        Self {
            command,
            fields: Vec::new(),
        }
    }

    fn push(&mut self, name: impl Into<String>, value: impl ToString) {
        self.fields.push((name.into(), value.to_string()));
    }

    pub fn render(&self, json: bool) -> anyhow::Result<String> {
        if json {
            let fields: serde_json::Map<String, serde_json::Value> = self
                .fields
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            let doc = serde_json::json!({ "command": self.command, "result": fields });
            return Ok(serde_json::to_string_pretty(&doc)?);
        }
        let width = self.fields.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
        let mut out = format!("{}:", self.command);
        for (name, value) in &self.fields {
            out.push_str(&format!("\n  {:<width$}  {}", name, value, width = width));
        }
        Ok(out)
    }
}

impl Command {
    pub async fn execute(self) -> anyhow::Result<CommandResult> {
        match self {
            Command::Owners(args) => owners(args),
            Command::Churn(args) => churn(args).await,
        }
    }
}

fn owners(args: OwnersArgs) -> anyhow::Result<CommandResult> {
    let ring = RingBuilder::new()
        .with_vnodes(args.vnodes)
        .add_nodes((0..args.nodes as u128).map(Node::numbered))
        .build()?;
    let snapshot = TopologySnapshot::new(
        TopologyVersion(1),
        ring,
        Arc::new(SimpleStrategy::with_backups(args.backups)),
    );

    let mut result = CommandResult::new("owners");
    result.push("partitioner", snapshot.ring().partitioner_name());
    result.push("tokens", snapshot.ring().token_count());
    for (node, share) in snapshot.ring().ownership() {
        result.push(node.to_string(), format!("{:.2}%", share * 100.0));
    }
    for key in &args.keys {
        let owners = snapshot.resolve_owners(&CacheKey::encode(key.as_str())?)?;
        let backups: Vec<String> = owners.backups.iter().map(NodeId::to_string).collect();
        result.push(
            format!("key {:?}", key),
            format!("primary {} backups [{}]", owners.primary, backups.join(", ")),
        );
    }
    Ok(result)
}

async fn churn(args: ChurnArgs) -> anyhow::Result<CommandResult> {
    let mut config = match &args.config {
        Some(path) => CacheConfig::from_path(path)?,
        None => CacheConfig::default(),
    };
    if let Some(backups) = args.backups {
        config.backups = backups;
    }
    if let Some(mode) = args.mode {
        config.write_order_mode = mode;
    }
    if let Some(ms) = args.deadline_ms {
        config.retry_deadline_ms = Some(ms);
    }
    let mode = config.write_order_mode;

    let cluster = Arc::new(LocalCluster::start(args.nodes as usize, config)?);
    let target = NodeId(args.restart_node as u128);
    anyhow::ensure!(
        cluster.node(target).is_some(),
        "{} is not part of a {}-node cluster",
        target,
        args.nodes
    );

    let stop = Arc::new(AtomicBool::new(false));
    let interval = Duration::from_millis(args.interval_ms);
    let downtime = Duration::from_millis(args.downtime_ms);
    let churn = tokio::spawn({
        let cluster = Arc::clone(&cluster);
        let stop = Arc::clone(&stop);
        async move {
            let mut restarts = 0u32;
            loop {
                tokio::time::sleep(interval).await;
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                cluster.restart_node(target, downtime).await?;
                restarts += 1;
            }
            Ok::<_, ClusterError>(restarts)
        }
    });

    let client = if args.no_retry {
        cluster.client().with_no_retries()
    } else {
        cluster.client()
    };

    let started = Instant::now();
    let mut acked = Vec::with_capacity(args.keys as usize);
    let mut retried = 0u32;
    let mut failures: BTreeMap<&'static str, u32> = BTreeMap::new();
    for key in 0..args.keys {
        match client.put(&key, &key).await {
            Ok(receipt) => {
                if receipt.attempts > 1 {
                    retried += 1;
                }
                acked.push(key);
            }
            Err(err) => {
                tracing::warn!(key, error = %err, "put failed");
                *failures.entry(err.kind().as_str()).or_default() += 1;
            }
        }
    }
    let elapsed = started.elapsed();

    stop.store(true, Ordering::Relaxed);
    let restarts = churn.await??;

    let mut lost = Vec::new();
    for &key in &acked {
        if client.get::<_, u32>(&key).await? != Some(key) {
            lost.push(key);
        }
    }

    let mut result = CommandResult::new("churn");
    result.push("mode", mode);
    result.push("retries", if args.no_retry { "disabled" } else { "enabled" });
    result.push("nodes", args.nodes);
    result.push("restarts", restarts);
    result.push("puts", args.keys);
    result.push("acknowledged", acked.len());
    result.push("retried", retried);
    for (kind, count) in &failures {
        result.push(format!("failed {}", kind), count);
    }
    result.push("lost", lost.len());
    result.push("elapsed", format!("{:?}", elapsed));

    anyhow::ensure!(
        lost.is_empty(),
        "{} acknowledged keys did not read back, first {:?}",
        lost.len(),
        lost.first()
    );
    Ok(result)
}
