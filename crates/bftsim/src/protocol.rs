//! The capability set shared by both consensus protocols, and the requests
//! they hand back to their replica shell.
//!
//! Protocols are synchronous state machines: they consume one input at a
//! time (a proposal, a network message, or a timer expiry) and return the
//! requests the shell should execute. They perform no IO and run no tasks of
//! their own, which keeps them directly drivable from tests.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::coded_bft::CodedBftProtocol;
use crate::config::{Protocol, SimConfig};
use crate::metrics::ReplicaMetrics;
use crate::pbft::PbftProtocol;
use crate::types::{Block, BlockHash, Message, Payload, ReplicaId, View};

/// A request emitted by a protocol step for the replica shell to execute.
#[derive(Clone, Debug)]
pub enum ProtocolRequest {
    /// Broadcast the payload to every other replica.
    Broadcast(Payload),
    /// A block hash gathered a commit quorum at this replica. Informational;
    /// block execution is not modeled.
    DecisionReached(BlockHash),
}

/// Per-replica consensus protocol instance.
///
/// Dispatch is chosen once per replica at construction (see
/// [`build_protocol`]); the shell then drives the instance for the whole
/// run.
pub trait ConsensusProtocol: Send {
    /// Invites this replica to propose `block`. Non-leaders silently ignore
    /// the invitation; only the leader of the current view broadcasts.
    fn propose(&mut self, block: Block) -> VecDeque<ProtocolRequest>;

    /// Feeds one inbound message into the state machine.
    fn handle_message(&mut self, msg: Message) -> VecDeque<ProtocolRequest>;

    /// View-change timer expiry: advance to the next view.
    fn handle_timeout(&mut self) -> VecDeque<ProtocolRequest>;

    /// The replica's current view. Monotonically non-decreasing.
    fn current_view(&self) -> View;
}

/// Leader of `view` in a cluster of `num_nodes` replicas.
pub fn leader_for_view(view: View, num_nodes: usize) -> ReplicaId {
    let num_nodes = u64::try_from(num_nodes).expect("cluster sizes fit in u64");
    usize::try_from(view % num_nodes).expect("replica ids fit in usize")
}

/// Instantiates the protocol selected by `config.protocol` for replica `id`.
pub fn build_protocol(
    config: &SimConfig,
    id: ReplicaId,
    metrics: Arc<ReplicaMetrics>,
) -> Box<dyn ConsensusProtocol> {
    match config.protocol {
        Protocol::Pbft => Box::new(PbftProtocol::new(id, config, metrics)),
        Protocol::CodedBft => Box::new(CodedBftProtocol::new(id, config, metrics, true)),
        Protocol::CodedBftNoSpec => Box::new(CodedBftProtocol::new(id, config, metrics, false)),
    }
}
