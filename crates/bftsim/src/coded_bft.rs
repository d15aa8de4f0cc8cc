//! Coded BFT: erasure-coded block dissemination with decode-triggered votes.
//!
//! Instead of shipping the whole block to every replica, the leader draws a
//! stream of coded packets from [`bftsim_coding::Encoder`] and broadcasts
//! each one. A replica accumulates packets per block in a
//! [`bftsim_coding::Decoder`]; once decoding succeeds it checks the
//! reconstructed bytes against the hash carried by the packets and, with
//! speculation enabled, immediately broadcasts a vote. A single all-to-all
//! vote round replaces PBFT's prepare phase: every voter independently
//! verified the block against its own decoded bytes, so `2f + 1` unique
//! votes commit directly.
//!
//! With speculation disabled the replica records the decode and refrains
//! from voting (it would await an external coordinator signal, which this
//! simulation intentionally does not provide); the resulting throughput gap
//! is the ablation the speculation flag exists to measure.

#[cfg(test)]
#[path = "coded_bft_test.rs"]
mod coded_bft_test;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use bftsim_coding::{Decoder, Encoder};
use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use crate::config::SimConfig;
use crate::metrics::ReplicaMetrics;
use crate::protocol::{leader_for_view, ConsensusProtocol, ProtocolRequest};
use crate::quorum::{QuorumThresholds, VoteTracker};
use crate::types::{Block, BlockHash, Message, Payload, ReplicaId, View};

// An in-progress reconstruction of one block. Dropped on successful decode,
// on commit, and when the view advances past the packets that fed it.
struct DecodeSlot {
    view: View,
    decoder: Decoder,
}

/// Per-replica coded BFT state machine.
pub struct CodedBftProtocol {
    id: ReplicaId,
    num_nodes: usize,
    thresholds: QuorumThresholds,
    speculation_enabled: bool,
    packet_size: usize,
    redundancy_packets: usize,
    current_view: View,
    decoders: HashMap<BlockHash, DecodeSlot>,
    votes: VoteTracker,
    // Hashes this replica already voted for; stray packets for an already
    // decoded block must not trigger a second decode and vote.
    vote_sent: HashSet<BlockHash>,
    // Hashes decoded while speculation is off: verified, but never voted on.
    decoded_unvoted: HashSet<BlockHash>,
    committed: HashSet<BlockHash>,
    proposed_at: HashMap<BlockHash, Instant>,
    metrics: Arc<ReplicaMetrics>,
}

impl CodedBftProtocol {
    /// `speculation_enabled` selects between voting upon decode and the
    /// conservative decode-only ablation variant.
    pub fn new(
        id: ReplicaId,
        config: &SimConfig,
        metrics: Arc<ReplicaMetrics>,
        speculation_enabled: bool,
    ) -> Self {
        Self {
            id,
            num_nodes: config.num_nodes,
            thresholds: QuorumThresholds::new(config.num_faulty),
            speculation_enabled,
            packet_size: config.packet_size,
            redundancy_packets: config.coded_redundancy_packets,
            current_view: 0,
            decoders: HashMap::new(),
            votes: VoteTracker::new(),
            vote_sent: HashSet::new(),
            decoded_unvoted: HashSet::new(),
            committed: HashSet::new(),
            proposed_at: HashMap::new(),
            metrics,
        }
    }

    fn broadcast(&self, payload: Payload) -> ProtocolRequest {
        self.metrics.add_bytes_sent(payload.wire_size());
        ProtocolRequest::Broadcast(payload)
    }

    fn handle_proposal_packet(
        &mut self,
        view: View,
        block_id: BlockHash,
        hash: BlockHash,
        proposed_at: Instant,
        packet: Bytes,
    ) -> VecDeque<ProtocolRequest> {
        if view < self.current_view || self.committed.contains(&hash) {
            return VecDeque::new();
        }
        if self.vote_sent.contains(&hash) || self.decoded_unvoted.contains(&hash) {
            // Already reconstructed this block; surplus packets carry nothing
            // new.
            return VecDeque::new();
        }
        self.proposed_at.entry(hash).or_insert(proposed_at);

        let slot = self
            .decoders
            .entry(block_id)
            .or_insert_with(|| DecodeSlot { view, decoder: Decoder::new() });
        match slot.decoder.add_packet(&packet) {
            Ok(false) => VecDeque::new(),
            Ok(true) => self.finish_decode(view, block_id, hash),
            Err(error) => {
                debug!(replica = self.id, %block_id, %error, "discarding bad packet");
                VecDeque::new()
            }
        }
    }

    fn finish_decode(
        &mut self,
        view: View,
        block_id: BlockHash,
        hash: BlockHash,
    ) -> VecDeque<ProtocolRequest> {
        let slot = self.decoders.remove(&block_id).expect("decoder exists while decoding");
        let data = match slot.decoder.result() {
            Ok(data) => data,
            Err(error) => {
                warn!(replica = self.id, %block_id, %error, "decoder completed but failed");
                return VecDeque::new();
            }
        };
        if BlockHash::digest_of(&data) != hash {
            // A corrupt reconstruction is modeled as adversarial noise.
            debug!(replica = self.id, %block_id, "decoded bytes do not match the announced hash");
            return VecDeque::new();
        }

        if !self.speculation_enabled {
            debug!(replica = self.id, %hash, "decoded block; speculation off, withholding vote");
            self.decoded_unvoted.insert(hash);
            return VecDeque::new();
        }

        debug!(replica = self.id, view, %hash, "decoded block, voting speculatively");
        self.vote_sent.insert(hash);
        let vote = Payload::Vote { view, block_id, hash };
        let mut requests = VecDeque::from([self.broadcast(vote)]);
        requests.append(&mut self.record_vote(view, block_id, hash, self.id));
        requests
    }

    fn handle_vote(
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
        self.record_vote(view, block_id, hash, from)
    }

    fn record_vote(
        &mut self,
        view: View,
        block_id: BlockHash,
        hash: BlockHash,
        voter: ReplicaId,
    ) -> VecDeque<ProtocolRequest> {
        let votes = self.votes.record(hash, voter);
        if votes < self.thresholds.commit() || self.committed.contains(&hash) {
            return VecDeque::new();
        }
        self.committed.insert(hash);
        let latency =
            self.proposed_at.remove(&hash).map(|proposed| proposed.elapsed()).unwrap_or_default();
        self.metrics.add_commit(latency);
        self.votes.remove(&hash);
        self.decoders.remove(&block_id);
        info!(replica = self.id, view, %hash, votes, ?latency, "vote quorum met");
        VecDeque::from([ProtocolRequest::DecisionReached(hash)])
    }
}

impl ConsensusProtocol for CodedBftProtocol {
    fn propose(&mut self, block: Block) -> VecDeque<ProtocolRequest> {
        let view = self.current_view;
        if self.id != leader_for_view(view, self.num_nodes) {
            debug!(replica = self.id, view, "not the leader, ignoring proposal");
            return VecDeque::new();
        }
        let hash = BlockHash::digest_of(&block.data);
        let mut encoder = match Encoder::new(&block.data, self.packet_size) {
            Ok(encoder) => encoder,
            Err(error) => {
                // A proposal that cannot be encoded is skipped, not fatal.
                warn!(replica = self.id, %error, "encoder construction failed, skipping proposal");
                return VecDeque::new();
            }
        };
        self.proposed_at.insert(hash, block.timestamp);

        let packet_count = block.data.len().div_ceil(self.packet_size) + self.redundancy_packets;
        info!(
            replica = self.id,
            view,
            %hash,
            packet_count,
            "proposing block as a coded packet stream"
        );
        (0..packet_count)
            .map(|_| {
                self.broadcast(Payload::ProposalPacket {
                    view,
                    block_id: block.id,
                    hash,
                    proposed_at: block.timestamp,
                    packet: encoder.next_packet(),
                })
            })
            .collect()
    }

    fn handle_message(&mut self, msg: Message) -> VecDeque<ProtocolRequest> {
        match msg.payload {
            Payload::ProposalPacket { view, block_id, hash, proposed_at, packet } => {
                self.handle_proposal_packet(view, block_id, hash, proposed_at, packet)
            }
            Payload::Vote { view, block_id, hash } => {
                self.handle_vote(view, block_id, hash, msg.from)
            }
            other => {
                trace!(replica = self.id, ?other, "ignoring payload foreign to coded BFT");
                VecDeque::new()
            }
        }
    }

    fn handle_timeout(&mut self) -> VecDeque<ProtocolRequest> {
        self.current_view += 1;
        self.metrics.inc_view_changes();
        // Reconstructions stranded in an abandoned view will never finish;
        // release their buffered packets.
        let current_view = self.current_view;
        self.decoders.retain(|_, slot| slot.view >= current_view);
        info!(replica = self.id, view = self.current_view, "view change");
        VecDeque::new()
    }

    fn current_view(&self) -> View {
        self.current_view
    }
}
