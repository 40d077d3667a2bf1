use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use pqc_core::db::{RunFilter, RunStatus};
use pqc_inspect::commands::{
    history_command, list_signatures_command, scan_command, OutputFormat, ScanRequest,
};
use pqc_inspect::{init_tracing, ExitStatus};

/// Flags classical (quantum-vulnerable) cryptography in ELF, PE and Mach-O binaries.
///
/// This CLI is a thin wrapper around `pqc-core`; all detection and
/// classification logic lives in the library.
#[derive(Parser, Debug)]
#[command(
    name = "pqc-inspect",
    version,
    about = "Detect classical and post-quantum cryptography in native binaries",
    long_about = None
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan binaries and report per-algorithm verdicts.
    ///
    /// Exit status: 0 clean, 1 classical-vulnerable crypto found, 2 a target
    /// failed or the run could not start.
    Scan(ScanArgs),

    /// List the loaded signature database.
    Signatures {
        /// Extra signature file (YAML or JSON). Repeatable.
        #[arg(long = "signatures", value_name = "FILE")]
        signatures: Vec<PathBuf>,

        /// Skip the built-in signature table.
        #[arg(long, default_value_t = false)]
        no_builtin: bool,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Show recorded scan runs from a history database.
    History {
        /// History database file.
        #[arg(long)]
        db: PathBuf,

        /// Only runs whose target path contains this substring.
        #[arg(long)]
        target: Option<String>,

        /// Only runs with this outcome (clean, vulnerable, failed).
        #[arg(long)]
        status: Option<RunStatus>,

        /// Only the newest N runs.
        #[arg(long)]
        limit: Option<usize>,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[derive(Args, Debug)]
struct ScanArgs {
    /// Binaries to scan.
    #[arg(required = true, value_name = "PATH")]
    paths: Vec<PathBuf>,

    /// Maximum Hamming distance for byte-pattern matches (0 = exact).
    #[arg(long)]
    threshold: Option<u32>,

    /// Per-target time budget in seconds (0 = unlimited).
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,

    /// Worker threads (defaults to one per CPU).
    #[arg(long)]
    threads: Option<usize>,

    /// Extra signature file (YAML or JSON). Repeatable.
    #[arg(long = "signatures", value_name = "FILE")]
    signatures: Vec<PathBuf>,

    /// Skip the built-in signature table.
    #[arg(long, default_value_t = false)]
    no_builtin: bool,

    /// Config file (defaults to ./pqc-inspect.{yaml,yml,json} when present).
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Record each target's result in this SQLite history database.
    #[arg(long, value_name = "DB")]
    history: Option<PathBuf>,

    /// Write the report here instead of stdout.
    #[arg(long, short, value_name = "FILE")]
    output: Option<PathBuf>,
}

impl From<ScanArgs> for ScanRequest {
    fn from(args: ScanArgs) -> Self {
        ScanRequest {
            paths: args.paths,
            threshold: args.threshold,
            timeout_secs: args.timeout,
            format: args.format,
            threads: args.threads,
            signatures: args.signatures,
            no_builtin: args.no_builtin,
            config: args.config,
            history: args.history,
            output: args.output,
        }
    }
}

fn run(command: Command) -> Result<ExitStatus> {
    match command {
        Command::Scan(args) => scan_command(&args.into()),
        Command::Signatures { signatures, no_builtin, json } => {
            list_signatures_command(&signatures, no_builtin, json)?;
            Ok(ExitStatus::Clean)
        }
        Command::History { db, target, status, limit, json } => {
            let filter = RunFilter { target, status, limit };
            history_command(&db, &filter, json)?;
            Ok(ExitStatus::Clean)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli.command) {
        Ok(status) => ExitCode::from(status.code()),
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(ExitStatus::Error.code())
        }
    }
}
