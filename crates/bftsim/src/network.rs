//! Simulated network fabric.
//!
//! Routes [`Message`]s between replicas through bounded per-replica inbound
//! queues. Every send spawns a delivery task that sleeps for the configured
//! latency and then either drops the message (independent, seeded decision)
//! or pushes it into the destination queue.
//!
//! No ordering is guaranteed across messages, even for the same sender and
//! destination: all delivery tasks sleep the same nominal latency and race on
//! enqueue. Protocols must not assume FIFO delivery.
//!
//! Back-pressure policy: when a destination queue is full the delivery task
//! *blocks* until space frees up (it does not drop), so a slow replica slows
//! its senders down instead of silently losing traffic. Delivery tasks abort
//! on the shutdown signal; [`SimulatedNetwork::shutdown`] waits for every
//! in-flight delivery to settle.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::trace;

use crate::config::SimConfig;
use crate::types::{Message, Payload, ReplicaId};

#[cfg(test)]
#[path = "network_test.rs"]
mod network_test;

/// Capacity of each replica's inbound queue.
pub const INBOX_CAPACITY: usize = 1024;

/// In-process message fabric with per-message latency and loss.
pub struct SimulatedNetwork {
    latency: Duration,
    loss_probability: f64,
    seed: u64,
    // Sends are numbered so each message gets its own drop decision.
    next_seq: AtomicU64,
    senders: Vec<mpsc::Sender<Message>>,
    inboxes: Mutex<Vec<Option<mpsc::Receiver<Message>>>>,
    cancel: CancellationToken,
    deliveries: TaskTracker,
}

impl SimulatedNetwork {
    /// Builds queues for `config.num_nodes` replicas. Delivery tasks observe
    /// `cancel` and abort once it fires.
    pub fn new(config: &SimConfig, cancel: CancellationToken) -> Self {
        let mut senders = Vec::with_capacity(config.num_nodes);
        let mut inboxes = Vec::with_capacity(config.num_nodes);
        for _ in 0..config.num_nodes {
            let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
            senders.push(tx);
            inboxes.push(Some(rx));
        }
        Self {
            latency: config.network_latency,
            loss_probability: config.packet_loss_prob,
            seed: config.network_seed(),
            next_seq: AtomicU64::new(0),
            senders,
            inboxes: Mutex::new(inboxes),
            cancel,
            deliveries: TaskTracker::new(),
        }
    }

    /// Hands out the inbound queue of replica `dst`. Each queue can be taken
    /// exactly once; taking it twice is a wiring bug.
    pub fn take_inbox(&self, dst: ReplicaId) -> mpsc::Receiver<Message> {
        self.inboxes.lock().expect("inbox registry mutex poisoned")[dst]
            .take()
            .expect("inbox already taken")
    }

    /// Schedules an asynchronous delivery of `msg`. Returns immediately; the
    /// latency wait and the enqueue happen in a spawned task.
    pub fn send(&self, msg: Message) {
        let dropped = self.should_drop(self.next_seq.fetch_add(1, Ordering::Relaxed));
        let tx = self.senders[msg.to].clone();
        let latency = self.latency;
        let cancel = self.cancel.clone();
        self.deliveries.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(latency) => {}
            }
            if dropped {
                trace!(from = msg.from, to = msg.to, "dropping message");
                return;
            }
            tokio::select! {
                _ = cancel.cancelled() => {}
                // Blocks while the destination queue is full.
                _ = tx.send(msg) => {}
            }
        });
    }

    /// Schedules a send of `payload` to every replica except `from`.
    pub fn broadcast(&self, from: ReplicaId, payload: Payload) {
        for to in 0..self.senders.len() {
            if to == from {
                continue;
            }
            self.send(Message { from, to, payload: payload.clone() });
        }
    }

    /// Aborts pending deliveries and waits for every delivery task to settle.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.deliveries.close();
        self.deliveries.wait().await;
    }

    // The decision depends only on the seed and the message's sequence
    // number, so a given configuration reproduces the same loss pattern no
    // matter how delivery tasks interleave.
    fn should_drop(&self, seq: u64) -> bool {
        if self.loss_probability <= 0.0 {
            return false;
        }
        let mut hasher = DefaultHasher::new();
        self.seed.hash(&mut hasher);
        seq.hash(&mut hasher);
        #[allow(clippy::as_conversions)]
        let prob = (hasher.finish() as f64) / (u64::MAX as f64);
        prob <= self.loss_probability
    }
}
