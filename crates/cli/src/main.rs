//! PTP grand master telemetry collector CLI
//!
//! Collects NIC, DPLL, GNSS and PTP management data from a cluster node,
//! verifies the node environment and detects its PTP interfaces.

mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use collector_lib::error::{exit_code_for, ExitCode};
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::{collect, debug_pod, detect, logs, verify};
use config::CollectorSettings;

/// PTP grand master telemetry collector
#[derive(Parser)]
#[command(name = "ptp-collector")]
#[command(author, version, about = "Collects PTP grand master telemetry from a cluster node", long_about = None)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, short = 'v', global = true, default_value = "warn")]
    pub verbosity: String,

    /// Emit diagnostics as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Settings file (TOML, YAML or JSON) read below flags and above COLLECTOR_* variables
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags shared by every command that talks to the cluster
#[derive(Args, Debug, Clone, Default)]
pub struct ClusterArgs {
    /// Path to the kubeconfig file
    #[arg(long, short = 'k')]
    pub kubeconfig: Option<String>,

    /// Only consider pods scheduled on this node
    #[arg(long)]
    pub nodename: Option<String>,
}

/// Flags shared by collect and env verify
#[derive(Args, Debug, Clone, Default)]
pub struct OutputArgs {
    /// Output file; stdout when empty
    #[arg(long, short = 'o')]
    pub output: Option<String>,

    /// Emit analyser JSON records instead of raw lines
    #[arg(long, short = 'j')]
    pub use_analyser_format: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the collectors for a fixed duration
    Collect(CollectArgs),

    /// Environment checks
    #[command(subcommand)]
    Env(EnvCommands),

    /// Save the PTP daemon container's log to a file
    Logs(LogsArgs),

    /// Detect the PTP interfaces configured on the node
    Detect(DetectArgs),

    /// Create the netlink debug pod and wait for it to run
    StartDebug(ClusterArgs),

    /// Delete the netlink debug pod and wait for it to go
    StopDebug(ClusterArgs),
}

#[derive(Args)]
pub struct CollectArgs {
    #[command(flatten)]
    pub cluster: ClusterArgs,

    #[command(flatten)]
    pub output: OutputArgs,

    /// Name of the PTP interface
    #[arg(long, short = 'i')]
    pub interface: Option<String>,

    /// How long to collect for, e.g. 1000s or 1h30m
    #[arg(long, short = 'd')]
    pub duration: Option<String>,

    /// Poll interval in seconds
    #[arg(long, short = 'r')]
    pub rate: Option<u64>,

    /// Device info emission interval in seconds
    #[arg(long, short = 'a')]
    pub announce: Option<u64>,

    /// Collectors to run: all, defaults or a collector name (repeatable)
    #[arg(long = "collector", short = 's')]
    pub collectors: Vec<String>,

    /// File the Logs collector writes to
    #[arg(long, short = 'l')]
    pub logs_output: Option<String>,

    /// Keep the original timestamp on each written log line
    #[arg(long)]
    pub log_timestamps: bool,

    /// Directory for generation dump files
    #[arg(long, short = 't')]
    pub tempdir: Option<String>,

    /// Keep generation dump files after shutdown
    #[arg(long)]
    pub keep: bool,
}

#[derive(Subcommand)]
pub enum EnvCommands {
    /// Check the node against the supported baseline
    Verify(VerifyArgs),
}

#[derive(Args)]
pub struct VerifyArgs {
    #[command(flatten)]
    pub cluster: ClusterArgs,

    #[command(flatten)]
    pub output: OutputArgs,

    /// Name of the PTP interface
    #[arg(long, short = 'i')]
    pub interface: Option<String>,
}

#[derive(Args)]
pub struct LogsArgs {
    #[command(flatten)]
    pub cluster: ClusterArgs,

    /// Directory to save into; must exist
    #[arg(long, short = 'o', default_value = ".")]
    pub output_dir: PathBuf,

    /// Only save lines newer than this, e.g. 5s, 2m or 3h
    #[arg(long)]
    pub since: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum ClockTypeArg {
    #[default]
    #[value(name = "GM")]
    Gm,
    #[value(name = "BC")]
    Bc,
}

#[derive(Args)]
pub struct DetectArgs {
    #[command(flatten)]
    pub cluster: ClusterArgs,

    /// Print JSON instead of a table
    #[arg(long, short = 'j')]
    pub json: bool,

    /// Which PTP config family is read first
    #[arg(long, value_enum, ignore_case = true, default_value = "GM")]
    pub clock_type: ClockTypeArg,
}

fn init_tracing(verbosity: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(verbosity));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let file = cli.config.clone().or_else(CollectorSettings::default_path);
    let file = file.as_deref();
    match cli.command {
        Commands::Collect(args) => {
            let settings = CollectorSettings::load(file, config::collect_overrides(&args))?;
            collect::run(&settings).await
        }
        Commands::Env(EnvCommands::Verify(args)) => {
            let settings = CollectorSettings::load(file, config::verify_overrides(&args))?;
            verify::run(&settings).await
        }
        Commands::Logs(args) => {
            let settings = CollectorSettings::load(file, config::cluster_overrides(&args.cluster))?;
            logs::run(&settings, &args.output_dir, args.since.as_deref()).await
        }
        Commands::Detect(args) => {
            let settings = CollectorSettings::load(file, config::cluster_overrides(&args.cluster))?;
            detect::run(&settings, args.clock_type, args.json).await
        }
        Commands::StartDebug(args) => {
            let settings = CollectorSettings::load(file, config::cluster_overrides(&args))?;
            debug_pod::start(&settings).await
        }
        Commands::StopDebug(args) => {
            let settings = CollectorSettings::load(file, config::cluster_overrides(&args))?;
            debug_pod::stop(&settings).await
        }
    }
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.verbosity, cli.log_json);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            let code = exit_code_for(&e);
            match code {
                ExitCode::MissingInput => {
                    output::print_error(&format!("{:#}", e));
                    eprintln!("{}", Cli::command().render_usage());
                }
                ExitCode::InvalidEnv => output::print_error(&format!("{:#}", e)),
                _ => error!(error = ?e, "Command failed"),
            }
            code
        }
    };
    std::process::ExitCode::from(code.code() as u8)
}
