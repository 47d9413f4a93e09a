#![forbid(unsafe_code)]

mod cmd;
mod output;

use clap::{Parser, Subcommand};
use output::OutputMode;
use std::env;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "tally: multi-participant response aggregation",
    long_about = None
)]
struct Cli {
    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    const fn output_mode(&self) -> OutputMode {
        if self.json {
            OutputMode::Json
        } else {
            OutputMode::Pretty
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Decode a snapshot payload",
        long_about = "Parse a response summary snapshot and print every participant's readings,\n\
                      typed by the states registered in .tally/config.toml.",
        after_help = "EXAMPLES:\n    # Inspect a payload\n    tally inspect payload.json\n\n\
                      # Use registrations from another project\n    tally inspect payload.json --config ../app\n\n\
                      # Machine-readable output\n    tally inspect payload.json --json"
    )]
    Inspect(cmd::inspect::InspectArgs),

    #[command(
        about = "Run a response script",
        long_about = "Drive one response aggregate from a line-oriented script on a manual clock\n\
                      and print every outbound update it sends.",
        after_help = "EXAMPLES:\n    # Run a script as participant frodo\n    tally script votes.tally --as frodo\n\n\
                      # Shorter coalescing window\n    tally script votes.tally --window-ms 20"
    )]
    Script(cmd::script::ScriptArgs),

    #[command(
        about = "Run a simulation campaign",
        long_about = "Run deterministic multi-participant simulations with fault injection and\n\
                      check convergence, delivery, idempotence and commutativity.",
        after_help = "EXAMPLES:\n    # 100 seeds with defaults\n    tally sim\n\n\
                      # Heavier faults\n    tally sim --seeds 200 --faults 0.3\n\n\
                      # Replay one seed\n    tally sim --replay 42 --json"
    )]
    Sim(cmd::sim::SimArgs),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("TALLY_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "tally=debug,info"
        } else {
            "tally=info,warn"
        })
    });

    let format = env::var("TALLY_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let project_root = env::current_dir()?;
    let output = cli.output_mode();
    debug!(command = ?cli.command, "dispatch");

    match cli.command {
        Commands::Inspect(ref args) => cmd::inspect::run_inspect(args, output, &project_root),
        Commands::Script(ref args) => cmd::script::run_script(args, output, &project_root),
        Commands::Sim(ref args) => cmd::sim::run_sim(args, output, &project_root),
    }
}
