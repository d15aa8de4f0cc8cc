use std::time::Duration;

use pretty_assertions::assert_eq;

use crate::config::{Protocol, SimConfig, MB};
use crate::driver::RunResult;

fn result_with(total_commits: usize, latencies_ms: Vec<f64>) -> RunResult {
    let mut config = SimConfig::base("driver_test", Protocol::Pbft, 4, MB);
    config.sim_duration = Duration::from_secs(5);
    RunResult { config, total_commits, total_bytes_sent: 0, view_changes: 0, latencies_ms }
}

#[test]
fn throughput_counts_committed_bits_per_second() {
    let result = result_with(10, Vec::new());
    // 10 blocks of 1 MB in 5 seconds.
    assert_eq!(result.throughput_bps(), 10.0 * 1_048_576.0 * 8.0 / 5.0);
}

#[test]
fn throughput_without_commits_is_zero() {
    assert_eq!(result_with(0, Vec::new()).throughput_bps(), 0.0);
}

#[test]
fn degenerate_duration_coerces_throughput_to_zero() {
    let mut result = result_with(3, Vec::new());
    result.config.sim_duration = Duration::ZERO;
    assert_eq!(result.throughput_bps(), 0.0);
}

#[test]
fn average_latency_is_the_sample_mean() {
    let result = result_with(3, vec![10.0, 20.0, 60.0]);
    assert_eq!(result.avg_latency_ms(), 30.0);
}

#[test]
fn average_latency_without_samples_is_zero() {
    assert_eq!(result_with(0, Vec::new()).avg_latency_ms(), 0.0);
}

#[test]
fn csv_fields_are_emitted_in_the_published_order() {
    let result = result_with(1, vec![5.0]);
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.serialize(result.to_csv_record()).unwrap();
    let output = String::from_utf8(writer.into_inner().unwrap()).unwrap();

    let header = output.lines().next().unwrap();
    assert_eq!(
        header,
        "experiment_name,run_id,protocol,num_nodes,block_size,packet_loss,throughput_bps,\
         avg_latency_ms,view_changes"
    );
    let row = output.lines().nth(1).unwrap();
    assert!(row.starts_with("driver_test,0,PBFT,4,1048576,"));
}
