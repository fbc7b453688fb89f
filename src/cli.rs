// src/cli.rs

//! CLI argument parsing using `clap`.

use chrono::{NaiveDate, NaiveDateTime};
use clap::{Parser, ValueEnum};

/// Command-line arguments for `velodag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "velodag",
    version,
    about = "Incrementally run the bike-sharing data pipeline DAG.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Velodag.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Velodag.toml")]
    pub config: String,

    /// City to run for; repeatable. Default: every configured city.
    #[arg(long, value_name = "NAME")]
    pub city: Vec<String>,

    /// Root task kind to request (e.g. `transactions-to-db`,
    /// `normalize-stations`, `availability-to-db`). Dependencies are
    /// pulled in automatically.
    #[arg(long, value_name = "KIND", default_value = "transactions-to-db")]
    pub task: String,

    /// Date for daily tasks (`YYYY-MM-DD`). Default: yesterday.
    #[arg(long, value_name = "DATE")]
    pub date: Option<NaiveDate>,

    /// Timestamp for availability tasks (`YYYY-MM-DDTHH:MM:SS`),
    /// quantized down to the configured bucket. Default: now.
    #[arg(long, value_name = "TS")]
    pub timestamp: Option<NaiveDateTime>,

    /// Maximum concurrent task instances; overrides `[pipeline].workers`.
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `VELODAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Resolve and print the task graph without executing anything.
    #[arg(long)]
    pub dry_run: bool,
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
