use clap::{Parser, Subcommand};

mod commands;

use commands::params::ParamFlags;
use commands::{OutputFormat, PolicyArg};

#[derive(Parser)]
#[command(
    name = "topo",
    about = "Topology synthesizer: a deployable service topology from a few parameters",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a topology.toml scaffold
    Init {
        /// Directory to write into
        #[arg(short, long, default_value = ".")]
        path: String,
        #[arg(long, default_value = "sample-service")]
        service_name: String,
        #[arg(long, default_value = "your-org")]
        ci_org: String,
        #[arg(long, default_value = "your-repo")]
        ci_repo: String,
        /// Overwrite an existing topology.toml
        #[arg(long)]
        force: bool,
    },
    /// Check parameters without building anything
    Validate {
        #[command(flatten)]
        params: ParamFlags,
    },
    /// Compose the topology and emit it.
    ///
    /// `json` prints the full template; `summary` lists resource counts
    /// and outputs.
    Synth {
        #[command(flatten)]
        params: ParamFlags,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        out: Option<String>,
        #[arg(short, long, value_enum, default_value = "json")]
        format: OutputFormat,
        /// Traffic-shift policy for progressive delivery
        #[arg(long, value_enum, default_value = "linear")]
        policy: PolicyArg,
    },
    /// Walk a staged rollout through the deployment state machine.
    ///
    /// Progressive delivery is forced on; everything else comes from the
    /// config file and flags.
    Simulate {
        #[command(flatten)]
        params: ParamFlags,
        #[arg(long, value_enum, default_value = "linear")]
        policy: PolicyArg,
        /// Fire the canary alarm once green reaches this share
        #[arg(long)]
        alarm_at_percent: Option<u8>,
        /// Minutes blue is kept after a full shift
        #[arg(long, default_value_t = 5)]
        termination_wait: u32,
    },
    /// Evaluate one scaling decision for observed load
    Scale {
        #[command(flatten)]
        params: ParamFlags,
        /// Instances currently running
        #[arg(long)]
        current: u32,
        /// Average CPU utilization, percent
        #[arg(long)]
        cpu: f64,
        /// Requests per instance over the last minute
        #[arg(long, default_value_t = 0.0)]
        requests: f64,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("topo_cli=info".parse()?)
                .add_directive("topogrid_synth=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init {
            path,
            service_name,
            ci_org,
            ci_repo,
            force,
        } => commands::init::init(&path, &service_name, &ci_org, &ci_repo, force),
        Commands::Validate { params } => commands::synth::validate(&params),
        Commands::Synth {
            params,
            out,
            format,
            policy,
        } => commands::synth::synth(&params, out.as_deref(), format, policy),
        Commands::Simulate {
            params,
            policy,
            alarm_at_percent,
            termination_wait,
        } => commands::simulate::simulate(&params, policy, alarm_at_percent, termination_wait),
        Commands::Scale {
            params,
            current,
            cpu,
            requests,
        } => commands::scale::scale(&params, current, cpu, requests),
    }
}
