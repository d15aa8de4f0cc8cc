//! Experiment harness for the consensus simulator.
//!
//! Runs one or more simulation configurations in sequence and prints one CSV
//! record per completed run to stdout (logs go to stderr, controlled by
//! `RUST_LOG`). Three canned studies compare the protocols across cluster
//! sizes, packet loss rates, and the speculation ablation; `single` exposes
//! every parameter for one-off runs.

use std::io;
use std::time::Duration;

use bftsim::config::{Protocol, SimConfig, MB};
use bftsim::driver::run;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "run_experiments", about = "Discrete-event BFT consensus experiments")]
struct Cli {
    /// Repetitions of each configuration; every repetition gets a distinct
    /// run id and therefore distinct random seeds.
    #[arg(long, default_value_t = 1)]
    runs: u64,
    /// Wall-clock length of each run, in seconds.
    #[arg(long, default_value_t = 10.0)]
    duration: f64,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// One fully parameterized run.
    Single(SingleArgs),
    /// Both protocols across cluster sizes of 4 to 32 replicas.
    Scalability,
    /// Both protocols under increasing packet loss at 16 replicas.
    PacketLoss,
    /// CodedBFT with and without speculative execution.
    Ablation,
    /// Every study in sequence.
    All,
}

#[derive(Args)]
struct SingleArgs {
    #[arg(long, default_value = "single")]
    name: String,
    #[arg(long, default_value = "CodedBFT")]
    protocol: Protocol,
    #[arg(long, default_value_t = 4)]
    num_nodes: usize,
    /// Proposed block size in bytes.
    #[arg(long, default_value_t = MB)]
    block_size: usize,
    /// Coded packet payload size in bytes (ignored by PBFT).
    #[arg(long, default_value_t = 1400)]
    packet_size: usize,
    /// Nominal one-way message latency in milliseconds.
    #[arg(long, default_value_t = 20.0)]
    latency_ms: f64,
    /// Independent per-message drop probability in [0, 1].
    #[arg(long, default_value_t = 0.0)]
    packet_loss: f64,
    /// View-change timer in milliseconds.
    #[arg(long, default_value_t = 1000.0)]
    consensus_timeout_ms: f64,
    /// Base random seed.
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let duration = Duration::from_secs_f64(cli.duration);

    let base_configs = match &cli.command {
        Command::Single(args) => vec![single_config(args, duration)],
        Command::Scalability => scalability_study(duration),
        Command::PacketLoss => packet_loss_study(duration),
        Command::Ablation => ablation_study(duration),
        Command::All => {
            let mut configs = scalability_study(duration);
            configs.extend(packet_loss_study(duration));
            configs.extend(ablation_study(duration));
            configs
        }
    };

    let mut writer = csv::Writer::from_writer(io::stdout());
    for base in base_configs {
        for run_id in 0..cli.runs {
            let mut config = base.clone();
            config.run_id = run_id;
            let result = run(config).await.expect("experiment configuration is invalid");
            writer.serialize(result.to_csv_record()).expect("failed to write CSV record");
            writer.flush().expect("failed to flush CSV output");
        }
    }
}

fn single_config(args: &SingleArgs, duration: Duration) -> SimConfig {
    let mut config = SimConfig::base(&args.name, args.protocol, args.num_nodes, args.block_size);
    config.packet_size = args.packet_size;
    config.network_latency = Duration::from_secs_f64(args.latency_ms / 1000.0);
    config.packet_loss_prob = args.packet_loss;
    config.consensus_timeout = Duration::from_secs_f64(args.consensus_timeout_ms / 1000.0);
    config.sim_duration = duration;
    config.seed = args.seed;
    config
}

// How the protocols scale with cluster size: PBFT rebroadcasts the whole
// block to every replica, the coded broadcast amortizes.
fn scalability_study(duration: Duration) -> Vec<SimConfig> {
    let mut configs = Vec::new();
    for num_nodes in [4, 8, 16, 32] {
        for protocol in [Protocol::CodedBft, Protocol::Pbft] {
            let mut config = SimConfig::base("scalability", protocol, num_nodes, MB);
            config.sim_duration = duration;
            configs.push(config);
        }
    }
    configs
}

// Resilience to unreliable networks.
fn packet_loss_study(duration: Duration) -> Vec<SimConfig> {
    let mut configs = Vec::new();
    for loss in [0.0, 0.01, 0.02, 0.05, 0.10] {
        for protocol in [Protocol::CodedBft, Protocol::Pbft] {
            let mut config = SimConfig::base("packet_loss", protocol, 16, MB);
            config.packet_loss_prob = loss;
            config.sim_duration = duration;
            configs.push(config);
        }
    }
    configs
}

// The contribution of speculative execution, under moderate loss.
fn ablation_study(duration: Duration) -> Vec<SimConfig> {
    [Protocol::CodedBftNoSpec, Protocol::CodedBft]
        .into_iter()
        .map(|protocol| {
            let mut config = SimConfig::base("ablation", protocol, 16, MB);
            config.packet_loss_prob = 0.02;
            config.sim_duration = duration;
            config
        })
        .collect()
}
