// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `parmake`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "parmake",
    version,
    about = "Run build recipes in dependency order with a bounded number of parallel jobs.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the build description (TOML).
    #[arg(short = 'f', long = "file", value_name = "PATH", default_value = "Parmake.toml")]
    pub file: String,

    /// Number of jobs to run at once. `-j` without a number removes the limit.
    ///
    /// Overrides `[config].jobs`. When given inside a recursive invocation,
    /// the inherited jobserver is ignored.
    #[arg(short = 'j', long = "jobs", value_name = "N", num_args = 0..=1, default_missing_value = "0")]
    pub jobs: Option<usize>,

    /// Do not start new jobs while other jobs run and the load average is at
    /// least this value.
    #[arg(short = 'l', long = "load-average", value_name = "LOAD")]
    pub load_average: Option<f64>,

    /// Keep going after a target fails; build everything that does not
    /// depend on it.
    #[arg(short = 'k', long)]
    pub keep_going: bool,

    /// Ignore non-zero exit statuses of all recipe lines.
    #[arg(short = 'i', long)]
    pub ignore_errors: bool,

    /// Do not echo recipe lines.
    #[arg(short = 's', long)]
    pub silent: bool,

    /// Print the recipe lines that would run, without running them
    /// (lines marked `+` or referencing `$(MAKE)` still run).
    #[arg(short = 'n', long)]
    pub just_print: bool,

    /// Run nothing; exit with status 1 if any goal needs remaking.
    #[arg(short = 'q', long)]
    pub question: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `PARMAKE_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Goals to build. Defaults to `[config].default_goal`.
    #[arg(value_name = "TARGET")]
    pub goals: Vec<String>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
