#![warn(missing_docs)]
//! A discrete-event simulator for comparing Byzantine-fault-tolerant consensus
//! protocols under controlled network conditions.
//!
//! Two protocols are implemented:
//! 1. [`pbft`] - classical three-phase PBFT, where the leader ships the whole
//!    block to every replica in one message.
//! 2. [`coded_bft`] - the leader fragments each block into erasure-coded
//!    packets; a replica that collects enough packets decodes the block and
//!    (when speculation is enabled) votes on it immediately.
//!
//! Replicas never share memory: every replica owns its protocol state and
//! talks to its peers exclusively through the [`network`] module's simulated
//! fabric, which models per-message latency and stochastic loss. The
//! [`driver`] wires replicas and a proposing client together, runs them for a
//! fixed duration, and aggregates per-replica [`metrics`] into one CSV-ready
//! result per run.
//!
//! Faults are limited to packet loss and timeouts; replicas are honest, no
//! cryptographic signing is modeled, and "executing" a block merely records a
//! metric event.

pub mod coded_bft;
pub mod config;
pub mod driver;
#[allow(missing_docs)]
pub mod metrics;
pub mod network;
#[allow(missing_docs)]
pub mod pbft;
pub mod protocol;
#[allow(missing_docs)]
pub mod quorum;
pub mod replica;
#[allow(missing_docs)]
pub mod types;
