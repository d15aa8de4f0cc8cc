//! The replica shell: owns one protocol instance and drives it from the
//! replica's inbound queue, its view-change timer, and client proposals.
//!
//! The shell serializes every input to the protocol (messages, proposals and
//! timer expiries are handled one at a time), so protocol state needs no
//! internal locking. All cross-replica communication flows through the
//! simulated network; replicas share no memory.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace};

use crate::config::SimConfig;
use crate::metrics::{MetricsSnapshot, ReplicaMetrics};
use crate::network::SimulatedNetwork;
use crate::protocol::{build_protocol, ConsensusProtocol, ProtocolRequest};
use crate::types::{Block, ReplicaId, View};

#[cfg(test)]
#[path = "replica_test.rs"]
mod replica_test;

// Client proposals waiting for the replica loop; the client tick is much
// slower than the loop, so a shallow queue suffices.
const PROPOSAL_QUEUE_CAPACITY: usize = 16;

/// Handle to a spawned replica, used by the driver and the proposing client.
#[derive(Clone)]
pub struct ReplicaHandle {
    id: ReplicaId,
    proposal_tx: mpsc::Sender<Block>,
    view: Arc<AtomicU64>,
    metrics: Arc<ReplicaMetrics>,
    cancel: CancellationToken,
}

impl ReplicaHandle {
    /// The replica's index in the cluster.
    pub fn id(&self) -> ReplicaId {
        self.id
    }

    /// Invites the replica to propose `block`. Non-leaders ignore the
    /// invitation; a replica that already shut down drops it.
    pub async fn propose(&self, block: Block) {
        if self.proposal_tx.send(block).await.is_err() {
            trace!(replica = self.id, "proposal dropped, replica already stopped");
        }
    }

    /// The view last published by the replica loop.
    pub fn current_view(&self) -> View {
        self.view.load(Ordering::Relaxed)
    }

    /// A point-in-time copy of the replica's counters.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Asks the replica loop to exit. Idempotent; the driver's run-wide
    /// shutdown signal reaches the loop through the same token.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

/// Spawns the event loop of replica `id` onto `tracker` and returns its
/// handle. The loop exits when `cancel` fires.
pub fn spawn_replica(
    id: ReplicaId,
    config: &SimConfig,
    network: Arc<SimulatedNetwork>,
    cancel: CancellationToken,
    tracker: &TaskTracker,
) -> ReplicaHandle {
    let metrics = Arc::new(ReplicaMetrics::new());
    let mut protocol = build_protocol(config, id, Arc::clone(&metrics));
    let mut inbox = network.take_inbox(id);
    let (proposal_tx, mut proposal_rx) = mpsc::channel(PROPOSAL_QUEUE_CAPACITY);
    let view = Arc::new(AtomicU64::new(0));
    let timeout = config.consensus_timeout;

    let handle = ReplicaHandle {
        id,
        proposal_tx,
        view: Arc::clone(&view),
        metrics: Arc::clone(&metrics),
        cancel: cancel.clone(),
    };

    tracker.spawn(async move {
        info!(replica = id, "replica started");
        // One timer per replica; any inbound message silences it.
        let mut deadline = Instant::now() + timeout;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(replica = id, "replica stopped");
                    return;
                }
                maybe_msg = inbox.recv() => {
                    let Some(msg) = maybe_msg else { return };
                    deadline = Instant::now() + timeout;
                    let requests = protocol.handle_message(msg);
                    execute_requests(id, &network, requests);
                }
                maybe_block = proposal_rx.recv() => {
                    let Some(block) = maybe_block else { return };
                    let requests = protocol.propose(block);
                    execute_requests(id, &network, requests);
                }
                _ = tokio::time::sleep_until(deadline) => {
                    deadline = Instant::now() + timeout;
                    let requests = protocol.handle_timeout();
                    execute_requests(id, &network, requests);
                }
            }
            view.store(protocol.current_view(), Ordering::Relaxed);
        }
    });

    handle
}

fn execute_requests(
    id: ReplicaId,
    network: &SimulatedNetwork,
    requests: impl IntoIterator<Item = ProtocolRequest>,
) {
    for request in requests {
        match request {
            ProtocolRequest::Broadcast(payload) => network.broadcast(id, payload),
            ProtocolRequest::DecisionReached(hash) => {
                info!(replica = id, %hash, "DECISION_REACHED");
            }
        }
    }
}
