//! Classical three-phase PBFT: pre-prepare, prepare, commit.
//!
//! The leader of the current view ships the entire block to every replica in
//! a single pre-prepare. Replicas echo a prepare for the block's hash, enter
//! the commit phase once `2f` unique prepares are held, and commit once
//! `2f + 1` unique commit intents are held. A replica's own prepare/commit is
//! recorded in its tallies when broadcast, alongside those of its peers.
//!
//! View change is timer-driven and purely local: no view-change messages are
//! exchanged, each replica bumps its own view when its timer fires.

#[cfg(test)]
#[path = "pbft_test.rs"]
mod pbft_test;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, trace};

use crate::config::SimConfig;
use crate::metrics::ReplicaMetrics;
use crate::protocol::{leader_for_view, ConsensusProtocol, ProtocolRequest};
use crate::quorum::{QuorumThresholds, VoteTracker};
use crate::types::{Block, BlockHash, Message, Payload, ReplicaId, View};

pub struct PbftProtocol {
    id: ReplicaId,
    num_nodes: usize,
    thresholds: QuorumThresholds,
    current_view: View,
    prepares: VoteTracker,
    commits: VoteTracker,
    // Hashes for which this replica already broadcast its commit intent, so
    // reaching the prepare threshold again stays idempotent.
    commit_sent: HashSet<BlockHash>,
    committed: HashSet<BlockHash>,
    // Proposal instant per hash, for commit latency. Authoritative when taken
    // from a pre-prepare's block timestamp; falls back to first sight of the
    // hash when votes outrun the proposal.
    proposed_at: HashMap<BlockHash, Instant>,
    metrics: Arc<ReplicaMetrics>,
}

impl PbftProtocol {
    pub fn new(id: ReplicaId, config: &SimConfig, metrics: Arc<ReplicaMetrics>) -> Self {
        Self {
            id,
            num_nodes: config.num_nodes,
            thresholds: QuorumThresholds::new(config.num_faulty),
            current_view: 0,
            prepares: VoteTracker::new(),
            commits: VoteTracker::new(),
            commit_sent: HashSet::new(),
            committed: HashSet::new(),
            proposed_at: HashMap::new(),
            metrics,
        }
    }

    fn broadcast(&self, payload: Payload) -> ProtocolRequest {
        self.metrics.add_bytes_sent(payload.wire_size());
        ProtocolRequest::Broadcast(payload)
    }

    fn handle_pre_prepare(&mut self, view: View, block: Block) -> VecDeque<ProtocolRequest> {
        if view < self.current_view {
            trace!(replica = self.id, view, "ignoring pre-prepare from a past view");
            return VecDeque::new();
        }
        let hash = BlockHash::digest_of(&block.data);
        // The block timestamp is the client's proposal instant; prefer it
        // over any first-sight fallback recorded from an early prepare.
        self.proposed_at.insert(hash, block.timestamp);

        debug!(replica = self.id, view, %hash, "accepting pre-prepare");
        let prepare = Payload::Prepare { view, block_id: block.id, hash };
        let mut requests = VecDeque::from([self.broadcast(prepare)]);
        requests.append(&mut self.record_prepare(view, block.id, hash, self.id));
        requests
    }

    fn handle_prepare(
        &mut self,
        view: View,
        block_id: BlockHash,
        hash: BlockHash,
        from: ReplicaId,
    ) -> VecDeque<ProtocolRequest> {
        if view < self.current_view || self.committed.contains(&hash) {
            return VecDeque::new();
        }
        self.proposed_at.entry(hash).or_insert_with(Instant::now);
        self.record_prepare(view, block_id, hash, from)
    }

    // Tallies one prepare (a peer's or our own). Crossing the `2f` threshold
    // broadcasts this replica's commit intent exactly once per hash.
    fn record_prepare(
        &mut self,
        view: View,
        block_id: BlockHash,
        hash: BlockHash,
        voter: ReplicaId,
    ) -> VecDeque<ProtocolRequest> {
        let prepared = self.prepares.record(hash, voter);
        if prepared < self.thresholds.prepare() || self.commit_sent.contains(&hash) {
            return VecDeque::new();
        }
        self.commit_sent.insert(hash);
        debug!(replica = self.id, view, %hash, prepared, "prepare quorum met, committing");
        let commit = Payload::Commit { view, block_id, hash };
        let mut requests = VecDeque::from([self.broadcast(commit)]);
        requests.append(&mut self.record_commit(view, hash, self.id));
        requests
    }

    fn handle_commit(
        &mut self,
        view: View,
        hash: BlockHash,
        from: ReplicaId,
    ) -> VecDeque<ProtocolRequest> {
        if view < self.current_view || self.committed.contains(&hash) {
            return VecDeque::new();
        }
        self.proposed_at.entry(hash).or_insert_with(Instant::now);
        self.record_commit(view, hash, from)
    }

    fn record_commit(
        &mut self,
        view: View,
        hash: BlockHash,
        voter: ReplicaId,
    ) -> VecDeque<ProtocolRequest> {
        let committed = self.commits.record(hash, voter);
        if committed < self.thresholds.commit() || self.committed.contains(&hash) {
            return VecDeque::new();
        }
        self.committed.insert(hash);
        let latency =
            self.proposed_at.remove(&hash).map(|proposed| proposed.elapsed()).unwrap_or_default();
        self.metrics.add_commit(latency);
        self.prepares.remove(&hash);
        self.commits.remove(&hash);
        info!(replica = self.id, view, %hash, ?latency, "commit quorum met");
        VecDeque::from([ProtocolRequest::DecisionReached(hash)])
    }
}

impl ConsensusProtocol for PbftProtocol {
    fn propose(&mut self, block: Block) -> VecDeque<ProtocolRequest> {
        let view = self.current_view;
        if self.id != leader_for_view(view, self.num_nodes) {
            debug!(replica = self.id, view, "not the leader, ignoring proposal");
            return VecDeque::new();
        }
        let hash = BlockHash::digest_of(&block.data);
        self.proposed_at.insert(hash, block.timestamp);
        info!(replica = self.id, view, %hash, bytes = block.data.len(), "proposing block");
        VecDeque::from([self.broadcast(Payload::PrePrepare { view, block })])
    }

    fn handle_message(&mut self, msg: Message) -> VecDeque<ProtocolRequest> {
        match msg.payload {
            Payload::PrePrepare { view, block } => self.handle_pre_prepare(view, block),
            Payload::Prepare { view, block_id, hash } => {
                self.handle_prepare(view, block_id, hash, msg.from)
            }
            Payload::Commit { view, hash, .. } => self.handle_commit(view, hash, msg.from),
            other => {
                trace!(replica = self.id, ?other, "ignoring payload foreign to PBFT");
                VecDeque::new()
            }
        }
    }

    fn handle_timeout(&mut self) -> VecDeque<ProtocolRequest> {
        self.current_view += 1;
        self.metrics.inc_view_changes();
        info!(replica = self.id, view = self.current_view, "view change");
        VecDeque::new()
    }

    fn current_view(&self) -> View {
        self.current_view
    }
}
