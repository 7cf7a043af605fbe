//! CLI command definitions and handlers

mod check;
mod init;
mod race;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Parse a strictly positive number of seconds
fn parse_secs(s: &str) -> Result<f64, String> {
    let secs: f64 = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid number of seconds", s))?;
    if secs.is_finite() && secs > 0.0 {
        Ok(secs)
    } else {
        Err("must be a positive number of seconds".to_string())
    }
}

/// Repotoire concurrency - find races and deadlocks before production does
#[derive(Parser, Debug)]
#[command(name = "repotoire-concurrency")]
#[command(
    version,
    about = "Concurrency-safety analysis: shared-state races, lock-order deadlocks, and stress testing",
    after_help = "\
Examples:
  repotoire-concurrency concurrency check src/                Report unsynchronized shared state
  repotoire-concurrency concurrency check . --severity high   Fail only on high/critical races
  repotoire-concurrency concurrency deadlock . --format json  Lock-order cycles as JSON
  repotoire-concurrency test race --target counter:unsafe_increment --threads 50

Exit codes: 0 clean, 1 findings or race detected, 2 tool failure"
)]
pub struct Cli {
    /// Log level (error, warn, info, debug, trace); RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "warn", value_parser = ["error", "warn", "info", "debug", "trace"])]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write an example repotoire.toml
    Init {
        /// Directory to initialize
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Static concurrency analysis
    #[command(subcommand)]
    Concurrency(ConcurrencyCommand),

    /// Run targets concurrently and check the outcome
    #[command(subcommand)]
    Test(TestCommand),
}

#[derive(Subcommand, Debug)]
pub enum ConcurrencyCommand {
    /// Find shared attributes written without consistent synchronization
    Check {
        /// File or directory to analyze
        path: PathBuf,

        /// Minimum severity that is reported and fails the run
        #[arg(long, value_parser = ["critical", "high", "medium", "low"])]
        severity: Option<String>,

        /// Output format: text, json
        #[arg(long, short = 'f', value_parser = ["text", "json"])]
        format: Option<String>,

        /// Write the report to a file instead of stdout
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Find cycles in the lock acquisition order
    Deadlock {
        /// File or directory to analyze
        path: PathBuf,

        /// Output format: text, json
        #[arg(long, short = 'f', value_parser = ["text", "json"])]
        format: Option<String>,

        /// Write the report to a file instead of stdout
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
pub enum TestCommand {
    /// Run a target a fixed number of times per thread
    #[command(after_help = "\
Targets:
  counter:unsafe_increment      counter:locked_increment
  counter:atomic_increment      counter:flaky_increment
  counter:slow_increment        counter:CounterService.<method>")]
    Race {
        /// Target as module:function
        #[arg(long)]
        target: String,

        /// Worker threads (default from repotoire.toml, else 10)
        #[arg(long)]
        threads: Option<usize>,

        /// Iterations per thread (default from repotoire.toml, else 1000)
        #[arg(long)]
        iterations: Option<u64>,

        /// Seconds to wait for workers (default from repotoire.toml, else 30)
        #[arg(long, value_parser = parse_secs)]
        timeout: Option<f64>,

        /// Output format: text, json
        #[arg(long, short = 'f', value_parser = ["text", "json"])]
        format: Option<String>,
    },

    /// Run a target for a fixed duration and report throughput and memory
    Stress {
        /// Target as module:function
        #[arg(long)]
        target: String,

        /// Worker threads (default from repotoire.toml, else 10)
        #[arg(long)]
        threads: Option<usize>,

        /// Seconds to run
        #[arg(long, default_value = "5", value_parser = parse_secs)]
        duration: f64,

        /// Output format: text, json
        #[arg(long, short = 'f', value_parser = ["text", "json"])]
        format: Option<String>,
    },
}

/// Print or write a rendered report
fn emit(output: &str, output_path: Option<&Path>) -> Result<()> {
    use anyhow::Context;
    use console::style;

    match output_path {
        Some(path) => {
            std::fs::write(path, output)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            // stderr keeps stdout clean for machine-readable formats
            eprintln!("Report written to: {}", style(path.display()).cyan());
        }
        None => println!("{}", output),
    }
    Ok(())
}

/// Run the CLI with parsed arguments
pub fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Init { path } => {
            init::run(&path)?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Concurrency(ConcurrencyCommand::Check {
            path,
            severity,
            format,
            output,
        }) => check::run_check(&path, severity.as_deref(), format.as_deref(), output.as_deref()),

        Commands::Concurrency(ConcurrencyCommand::Deadlock {
            path,
            format,
            output,
        }) => check::run_deadlock(&path, format.as_deref(), output.as_deref()),

        Commands::Test(TestCommand::Race {
            target,
            threads,
            iterations,
            timeout,
            format,
        }) => race::run_race(&target, threads, iterations, timeout, format.as_deref()),

        Commands::Test(TestCommand::Stress {
            target,
            threads,
            duration,
            format,
        }) => race::run_stress(&target, threads, duration, format.as_deref()),
    }
}
