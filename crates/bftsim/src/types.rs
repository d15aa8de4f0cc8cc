//! Core identifiers, blocks, and the message model exchanged between
//! replicas.

use std::fmt;
use std::time::Instant;

use bytes::Bytes;
use sha2::{Digest, Sha256};

/// Index of a replica, in `[0, num_nodes)`. Replica 0 is the initial leader.
pub type ReplicaId = usize;

/// A monotonically non-decreasing epoch counter. The leader of view `v` is
/// `v mod num_nodes`.
pub type View = u64;

/// Nominal wire size of a vote-class message (view, block id, hash and
/// framing), used for bandwidth accounting. Messages are never actually
/// serialized.
pub const VOTE_WIRE_BYTES: usize = 68;

/// Nominal wire size of a view-change request.
pub const NEW_VIEW_WIRE_BYTES: usize = 12;

/// SHA-256 digest identifying a block's payload.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockHash([u8; 32]);

impl BlockHash {
    /// Hashes `data` with SHA-256.
    pub fn digest_of(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for BlockHash {
    // Logs only need a recognizable prefix.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..6]))
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({})", hex::encode(&self.0[..6]))
    }
}

/// A proposed block. Created by the client, consumed by one proposal, never
/// mutated. `id` is the SHA-256 of `data`; `timestamp` is the proposal
/// instant at the client, from which commit latency is measured.
#[derive(Clone, Debug)]
pub struct Block {
    pub id: BlockHash,
    pub proposer: ReplicaId,
    pub view: View,
    pub timestamp: Instant,
    pub data: Bytes,
}

impl Block {
    pub fn new(proposer: ReplicaId, view: View, data: Bytes) -> Self {
        Self { id: BlockHash::digest_of(&data), proposer, view, timestamp: Instant::now(), data }
    }
}

/// Envelope routed by the simulated network.
#[derive(Clone, Debug)]
pub struct Message {
    pub from: ReplicaId,
    pub to: ReplicaId,
    pub payload: Payload,
    // In a real system this would also carry a signature.
}

/// Protocol messages. The coded variants and the three PBFT phases share one
/// enum; each protocol ignores the other's messages.
#[derive(Clone, Debug)]
pub enum Payload {
    /// One erasure-coded fragment of a block (coded broadcast). `proposed_at`
    /// carries the client's proposal instant to the replicas, which never see
    /// the block itself before decoding.
    ProposalPacket {
        view: View,
        block_id: BlockHash,
        hash: BlockHash,
        proposed_at: Instant,
        packet: Bytes,
    },
    /// Endorsement of a decoded block (coded broadcast).
    Vote { view: View, block_id: BlockHash, hash: BlockHash },
    /// Leader's full-block proposal (PBFT phase one).
    PrePrepare { view: View, block: Block },
    /// Echo after accepting a pre-prepare (PBFT phase two).
    Prepare { view: View, block_id: BlockHash, hash: BlockHash },
    /// Commit intent (PBFT phase three).
    Commit { view: View, block_id: BlockHash, hash: BlockHash },
    /// Reserved for view-change negotiation; currently never exchanged, view
    /// changes are local to each replica.
    NewView { requested_view: View },
}

impl Payload {
    /// Nominal size on the wire, accrued to `bytes_sent` once per broadcast.
    pub fn wire_size(&self) -> usize {
        match self {
            Payload::ProposalPacket { packet, .. } => packet.len(),
            Payload::PrePrepare { block, .. } => block.data.len(),
            Payload::Vote { .. } | Payload::Prepare { .. } | Payload::Commit { .. } => {
                VOTE_WIRE_BYTES
            }
            Payload::NewView { .. } => NEW_VIEW_WIRE_BYTES,
        }
    }
}
