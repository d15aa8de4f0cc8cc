use std::str::FromStr;
use std::time::Duration;

use assert_matches::assert_matches;
use test_case::test_case;

use crate::config::{ConfigError, Protocol, SimConfig, MB};

fn valid_config() -> SimConfig {
    SimConfig::base("test", Protocol::Pbft, 4, MB)
}

#[test]
fn base_config_is_valid() {
    valid_config().validate().unwrap();
}

#[test]
fn too_few_replicas_is_rejected() {
    let config = SimConfig::base("test", Protocol::Pbft, 3, MB);
    assert_eq!(config.validate(), Err(ConfigError::TooFewReplicas(3)));
}

#[test]
fn too_many_faulty_is_rejected() {
    let mut config = valid_config();
    config.num_faulty = 2;
    assert_matches!(config.validate(), Err(ConfigError::TooManyFaulty { .. }));
}

#[test_case(-0.1; "negative")]
#[test_case(1.5; "above one")]
fn loss_probability_outside_unit_interval_is_rejected(prob: f64) {
    let mut config = valid_config();
    config.packet_loss_prob = prob;
    assert_eq!(config.validate(), Err(ConfigError::InvalidLossProbability(prob)));
}

#[test]
fn zero_sizes_are_rejected() {
    let mut config = valid_config();
    config.block_size = 0;
    assert_eq!(config.validate(), Err(ConfigError::ZeroBlockSize));

    let mut config = valid_config();
    config.packet_size = 0;
    assert_eq!(config.validate(), Err(ConfigError::ZeroPacketSize));
}

#[test]
fn zero_durations_are_rejected() {
    let mut config = valid_config();
    config.consensus_timeout = Duration::ZERO;
    assert_eq!(config.validate(), Err(ConfigError::ZeroDuration("consensus_timeout")));
}

#[test_case(Protocol::Pbft, "PBFT")]
#[test_case(Protocol::CodedBft, "CodedBFT")]
#[test_case(Protocol::CodedBftNoSpec, "CodedBFT-NoSpec")]
fn protocol_names_round_trip(protocol: Protocol, name: &str) {
    assert_eq!(protocol.to_string(), name);
    assert_eq!(Protocol::from_str(name).unwrap(), protocol);
}

#[test]
fn repetitions_draw_distinct_seeds() {
    let mut first = valid_config();
    let mut second = valid_config();
    first.run_id = 0;
    second.run_id = 1;
    assert_ne!(first.network_seed(), second.network_seed());
    assert_ne!(first.client_seed(), second.client_seed());
}
