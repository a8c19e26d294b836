//! hhbench command line
//!
//! Benchmarking harness for externally built streaming heavy-hitter
//! executables. Wires configuration, experiment strategies, streams, the
//! driver, and record sinks into the `hhbench` binary.

pub mod config;
pub mod driver;
pub mod experiments;
pub mod sink;
pub mod stream;

use clap::{Parser, Subcommand};
use config::{FileConfig, HarnessConfig, Overrides};
use driver::ExperimentDriver;
use sink::{JsonLinesSink, TableSink};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "hhbench", about = "Benchmark streaming heavy-hitter executables")]
struct Cli {
    /// Enable debug-level logging.
    #[arg(long, global = true)]
    verbose: bool,

    /// Config file to use instead of discovering hhbench.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one experiment.
    Run {
        /// Experiment name (see `hhbench list`).
        experiment: String,

        /// Path to the instance executable under test.
        #[arg(long)]
        executable: Option<PathBuf>,

        /// Algorithm to run, repeatable. Replaces configured instances.
        #[arg(short = 'a', long = "algorithm")]
        algorithms: Vec<String>,

        /// Base sample budget m.
        #[arg(long)]
        initial_m: Option<u64>,

        /// Elements per iteration.
        #[arg(long)]
        elements: Option<u64>,

        /// Explicit iteration count. Required for profiled experiments.
        #[arg(long)]
        iterations: Option<u64>,

        /// Stream seed. Generated and logged when absent.
        #[arg(long)]
        seed: Option<u64>,

        /// Skew parameter for Zipf streams.
        #[arg(long)]
        zipf_alpha: Option<f64>,

        /// Directory for profiler artifacts.
        #[arg(long)]
        profiler_dir: Option<PathBuf>,

        /// Bounded wait for each instance response, in seconds.
        #[arg(long)]
        read_timeout_secs: Option<u64>,

        /// Emit JSON lines instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// List available experiments.
    List,
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "hhbench=debug" } else { "hhbench=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Entry point behind `main`. Errors render at the boundary.
pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::List => {
            for name in experiments::names() {
                println!("{name}");
            }
            Ok(())
        }
        Commands::Run {
            experiment,
            executable,
            algorithms,
            initial_m,
            elements,
            iterations,
            seed,
            zipf_alpha,
            profiler_dir,
            read_timeout_secs,
            json,
        } => {
            let strategy = experiments::by_name(&experiment).ok_or_else(|| {
                anyhow::anyhow!(
                    "unknown experiment `{experiment}` (available: {})",
                    experiments::names().join(", ")
                )
            })?;

            let file = match &cli.config {
                Some(path) => FileConfig::load(path)?,
                None => FileConfig::discover(&std::env::current_dir()?)?,
            };
            let cfg = HarnessConfig::resolve(
                file,
                Overrides {
                    executable,
                    algorithms,
                    initial_m,
                    total_elements: elements,
                    iterations,
                    seed,
                    zipf_alpha,
                    profiler_dir,
                    read_timeout_secs,
                },
            )?;

            let driver = ExperimentDriver::new(cfg);
            let stdout = std::io::stdout().lock();
            if json {
                driver.run(strategy.as_ref(), &mut JsonLinesSink::new(stdout))?;
            } else {
                driver.run(strategy.as_ref(), &mut TableSink::new(stdout))?;
            }
            Ok(())
        }
    }
}
