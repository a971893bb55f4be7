use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(
    name = "bisect",
    version,
    about = "Bisection dispute game over covenant-chained taproot outputs"
)]
struct Cli {
    /// Path to dispute.toml (default: search upwards from the current directory)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Log protocol transitions (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate the trace of the doubling program
    Trace {
        /// Public input (default: from dispute.toml)
        #[arg(long)]
        input: Option<u16>,
        /// Number of doublings before halting
        #[arg(long, default_value_t = 8)]
        bound: u16,
        /// Write the trace to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Replace state INDEX with X,I,PC (e.g. 9=33,4,1)
        #[arg(long, value_name = "INDEX=X,I,PC")]
        corrupt: Option<String>,
    },
    /// Print the root commitment of a trace file
    Commit {
        /// Trace file
        input: PathBuf,
        /// Print every node of the commitment tree
        #[arg(long)]
        tree: bool,
    },
    /// Print the script tree of a protocol phase
    Scripts {
        /// question, answer, challenge, reveal, choose or leaf
        phase: String,
        /// Level for reveal and choose (default: the top level)
        #[arg(long)]
        level: Option<u32>,
        /// Print hex-encoded script bytes after each leaf
        #[arg(long)]
        hex: bool,
    },
    /// Run a dispute between a prover trace file and an honest verifier
    Simulate {
        /// The prover's trace file
        prover: PathBuf,
        /// Number of doublings the honest verifier runs
        #[arg(long, default_value_t = 8)]
        bound: u16,
        /// Publish every phase spend on an in-memory ledger
        #[arg(long)]
        onchain: bool,
        /// Print the transcript as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    cli::init_logging(cli.verbose);
    let config = cli::load_config(cli.config.as_deref());

    match cli.command {
        Command::Trace {
            input,
            bound,
            output,
            corrupt,
        } => cli::trace::cmd_trace(&config, input, bound, output, corrupt),
        Command::Commit { input, tree } => cli::commit::cmd_commit(input, tree),
        Command::Scripts { phase, level, hex } => cli::scripts::cmd_scripts(&config, &phase, level, hex),
        Command::Simulate {
            prover,
            bound,
            onchain,
            json,
        } => cli::simulate::cmd_simulate(&config, prover, bound, onchain, json),
    }
}
