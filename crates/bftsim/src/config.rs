//! Configuration for a single simulation run.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use strum::{Display, EnumString};

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;

/// Bytes per kilobyte, for readable block sizes.
pub const KB: usize = 1024;
/// Bytes per megabyte.
pub const MB: usize = 1024 * KB;

/// The consensus protocol driven by every replica of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum Protocol {
    /// Classical three-phase PBFT; the leader broadcasts the full block.
    #[strum(serialize = "PBFT")]
    #[serde(rename = "PBFT")]
    Pbft,
    /// Coded broadcast with speculative voting upon decode.
    #[strum(serialize = "CodedBFT")]
    #[serde(rename = "CodedBFT")]
    CodedBft,
    /// Coded broadcast without speculation: replicas decode but do not vote,
    /// isolating the contribution of speculative execution.
    #[strum(serialize = "CodedBFT-NoSpec")]
    #[serde(rename = "CodedBFT-NoSpec")]
    CodedBftNoSpec,
}

/// A fatal problem with the experiment parameters. Configuration errors
/// abort the run before anything is spawned.
#[allow(missing_docs)]
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("at least 4 replicas are required, got {0}")]
    TooFewReplicas(usize),
    #[error("a cluster of {num_nodes} replicas cannot tolerate {num_faulty} faults")]
    TooManyFaulty { num_nodes: usize, num_faulty: usize },
    #[error("block size must be positive")]
    ZeroBlockSize,
    #[error("packet size must be positive")]
    ZeroPacketSize,
    #[error("packet loss probability {0} is outside [0, 1]")]
    InvalidLossProbability(f64),
    #[error("{0} must be a positive duration")]
    ZeroDuration(&'static str),
}

/// All parameters of one simulation run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    /// Experiment label, copied verbatim into the CSV record.
    pub name: String,
    /// Repetition index; also perturbs the random seeds.
    pub run_id: u64,
    /// Protocol run by every replica.
    pub protocol: Protocol,
    /// Cluster size `N`.
    pub num_nodes: usize,
    /// Maximum tolerated faults, conventionally `(N - 1) / 3`.
    pub num_faulty: usize,
    /// Size (bytes) of each proposed block.
    pub block_size: usize,
    /// Coded packet payload size (bytes); ignored by PBFT.
    pub packet_size: usize,
    /// Nominal per-message delivery delay.
    #[serde(deserialize_with = "deserialize_float_seconds_to_duration")]
    pub network_latency: Duration,
    /// Independent per-message drop probability, in [0, 1].
    pub packet_loss_prob: f64,
    /// Wall-clock length of the run.
    #[serde(deserialize_with = "deserialize_float_seconds_to_duration")]
    pub sim_duration: Duration,
    /// Per-replica view-change timer, reset on every inbound message.
    #[serde(deserialize_with = "deserialize_float_seconds_to_duration")]
    pub consensus_timeout: Duration,
    /// Interval between client proposals.
    #[serde(deserialize_with = "deserialize_float_seconds_to_duration")]
    pub proposal_interval: Duration,
    /// Extra coded packets emitted beyond the minimum needed to decode, to
    /// survive packet loss.
    pub coded_redundancy_packets: usize,
    /// Base seed for the run's random decisions (packet drops, block data).
    pub seed: u64,
}

impl SimConfig {
    /// A default configuration in the style of the experiment studies:
    /// 1400-byte packets, 20 ms latency, lossless, 10 s runs.
    pub fn base(name: &str, protocol: Protocol, num_nodes: usize, block_size: usize) -> Self {
        Self {
            name: name.to_string(),
            run_id: 0,
            protocol,
            num_nodes,
            num_faulty: num_nodes.saturating_sub(1) / 3,
            block_size,
            packet_size: 1400,
            network_latency: Duration::from_millis(20),
            packet_loss_prob: 0.0,
            sim_duration: Duration::from_secs(10),
            consensus_timeout: Duration::from_secs(2),
            proposal_interval: Duration::from_millis(20),
            coded_redundancy_packets: 20,
            seed: 0,
        }
    }

    /// Rejects parameter combinations the simulator cannot run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_nodes < 4 {
            return Err(ConfigError::TooFewReplicas(self.num_nodes));
        }
        if 3 * self.num_faulty >= self.num_nodes {
            return Err(ConfigError::TooManyFaulty {
                num_nodes: self.num_nodes,
                num_faulty: self.num_faulty,
            });
        }
        if self.block_size == 0 {
            return Err(ConfigError::ZeroBlockSize);
        }
        if self.packet_size == 0 {
            return Err(ConfigError::ZeroPacketSize);
        }
        if !(0.0..=1.0).contains(&self.packet_loss_prob) {
            return Err(ConfigError::InvalidLossProbability(self.packet_loss_prob));
        }
        for (label, duration) in [
            ("network_latency", self.network_latency),
            ("sim_duration", self.sim_duration),
            ("consensus_timeout", self.consensus_timeout),
            ("proposal_interval", self.proposal_interval),
        ] {
            if duration.is_zero() {
                return Err(ConfigError::ZeroDuration(label));
            }
        }
        Ok(())
    }

    /// Seed for the network's drop decisions. Distinct per `run_id` so
    /// repetitions explore different loss patterns.
    pub fn network_seed(&self) -> u64 {
        self.seed.wrapping_mul(0x9E37_79B9_7F4A_7C15).wrapping_add(self.run_id)
    }

    /// Seed for the client's block payloads.
    pub fn client_seed(&self) -> u64 {
        self.network_seed().rotate_left(17) ^ 0xC0DE_D8F7
    }
}

fn deserialize_float_seconds_to_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    Ok(Duration::from_secs_f64(secs))
}
