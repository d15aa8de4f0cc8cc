//! The simulation driver: builds the network and replicas, runs a proposing
//! client for the configured duration, then tears everything down and
//! aggregates the per-replica metrics into one result.
//!
//! Teardown is strict so consecutive runs can share one process: the driver
//! cancels the shutdown token, waits for the network to drain every
//! in-flight delivery, and joins every replica and client task before
//! returning.

use std::sync::Arc;

use bytes::Bytes;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::config::{ConfigError, SimConfig};
use crate::network::SimulatedNetwork;
use crate::protocol::leader_for_view;
use crate::replica::{spawn_replica, ReplicaHandle};
use crate::types::Block;

#[cfg(test)]
#[path = "driver_test.rs"]
mod driver_test;

/// Replica whose commits and latency samples represent the run. Counting a
/// single replica avoids multiplying each consensus decision by the cluster
/// size; replica 1 is used so a leaderless observer is measured.
const DESIGNATED_REPLICA: usize = 1;

/// Aggregated outcome of one simulation run.
#[derive(Clone, Debug)]
pub struct RunResult {
    /// The configuration that produced this result.
    pub config: SimConfig,
    /// Commits observed at the designated replica.
    pub total_commits: usize,
    /// Bytes sent, summed across all replicas.
    pub total_bytes_sent: u64,
    /// View changes, integer-averaged across the cluster.
    pub view_changes: usize,
    /// Latency samples (milliseconds) from the designated replica.
    pub latencies_ms: Vec<f64>,
}

impl RunResult {
    /// Committed payload bits per wall-clock second. NaN and infinities
    /// collapse to zero.
    pub fn throughput_bps(&self) -> f64 {
        #[allow(clippy::as_conversions)]
        let committed_bits = (self.total_commits * self.config.block_size * 8) as f64;
        let bps = committed_bits / self.config.sim_duration.as_secs_f64();
        if bps.is_finite() { bps } else { 0.0 }
    }

    /// Mean commit latency in milliseconds; zero when nothing committed.
    pub fn avg_latency_ms(&self) -> f64 {
        if self.latencies_ms.is_empty() {
            return 0.0;
        }
        #[allow(clippy::as_conversions)]
        let count = self.latencies_ms.len() as f64;
        self.latencies_ms.iter().sum::<f64>() / count
    }

    /// The CSV row published for this run.
    pub fn to_csv_record(&self) -> CsvRecord {
        CsvRecord {
            experiment_name: self.config.name.clone(),
            run_id: self.config.run_id,
            protocol: self.config.protocol.to_string(),
            num_nodes: self.config.num_nodes,
            block_size: self.config.block_size,
            packet_loss: self.config.packet_loss_prob,
            throughput_bps: self.throughput_bps(),
            avg_latency_ms: self.avg_latency_ms(),
            view_changes: self.view_changes,
        }
    }
}

/// One CSV line per completed run. Field order is the emission order.
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CsvRecord {
    pub experiment_name: String,
    pub run_id: u64,
    pub protocol: String,
    pub num_nodes: usize,
    pub block_size: usize,
    pub packet_loss: f64,
    pub throughput_bps: f64,
    pub avg_latency_ms: f64,
    pub view_changes: usize,
}

/// Runs one complete simulation: spawn, propose, wait, tear down, aggregate.
pub async fn run(config: SimConfig) -> Result<RunResult, ConfigError> {
    config.validate()?;
    info!(
        name = %config.name,
        run_id = config.run_id,
        protocol = %config.protocol,
        num_nodes = config.num_nodes,
        "START_RUN"
    );

    let cancel = CancellationToken::new();
    let tracker = TaskTracker::new();
    let network = Arc::new(SimulatedNetwork::new(&config, cancel.child_token()));

    let handles: Vec<ReplicaHandle> = (0..config.num_nodes)
        .map(|id| spawn_replica(id, &config, Arc::clone(&network), cancel.child_token(), &tracker))
        .collect();

    tracker.spawn(run_client(config.clone(), handles.clone(), cancel.child_token()));

    tokio::time::sleep(config.sim_duration).await;

    // Stop everything and wait for quiescence before reading metrics.
    cancel.cancel();
    for handle in &handles {
        handle.stop();
    }
    network.shutdown().await;
    tracker.close();
    tracker.wait().await;

    let result = aggregate(config, &handles);
    info!(
        commits = result.total_commits,
        bytes_sent = result.total_bytes_sent,
        view_changes = result.view_changes,
        "END_RUN"
    );
    Ok(result)
}

// The proposing client. Each tick it asks replica 0 for its view, derives
// the leader from it, and invites that leader to propose a fresh random
// block. Proposing to a stale leader is harmless: non-leaders ignore it.
async fn run_client(config: SimConfig, handles: Vec<ReplicaHandle>, cancel: CancellationToken) {
    let mut rng = ChaCha8Rng::seed_from_u64(config.client_seed());
    let mut ticker = tokio::time::interval(config.proposal_interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("client stopped");
                return;
            }
            _ = ticker.tick() => {}
        }
        let view = handles[0].current_view();
        let leader = leader_for_view(view, config.num_nodes);

        let mut data = vec![0u8; config.block_size];
        rng.fill_bytes(&mut data);
        let block = Block::new(leader, view, Bytes::from(data));
        debug!(leader, view, hash = %block.id, "client proposing");

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = handles[leader].propose(block) => {}
        }
    }
}

fn aggregate(config: SimConfig, handles: &[ReplicaHandle]) -> RunResult {
    let mut total_commits = 0;
    let mut latencies_ms = Vec::new();
    let mut total_bytes_sent = 0u64;
    let mut total_view_changes = 0usize;

    for handle in handles {
        let snapshot = handle.metrics_snapshot();
        total_bytes_sent += snapshot.bytes_sent;
        total_view_changes += snapshot.view_changes;
        if handle.id() == DESIGNATED_REPLICA {
            total_commits = snapshot.commits;
            latencies_ms = snapshot.latencies_ms;
        }
    }

    RunResult {
        total_commits,
        total_bytes_sent,
        view_changes: total_view_changes / config.num_nodes,
        latencies_ms,
        config,
    }
}
