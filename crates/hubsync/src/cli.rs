//! Clap derive structures for the `hubsync` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use hubsync_core::schedule::{DEFAULT_MAX_TEMP, DEFAULT_MIN_TEMP, DEFAULT_SLOT_CAPACITY};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// hubsync -- inspect heating schedules and sync configuration offline
#[derive(Debug, Parser)]
#[command(
    name = "hubsync",
    version,
    about = "Work with hub schedules and hubsync configuration",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (default: platform config directory)
    #[arg(long, env = "HUBSYNC_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Convert and validate weekday schedules
    #[command(alias = "sched")]
    Schedule(ScheduleArgs),

    /// Inspect configuration
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct ScheduleArgs {
    #[command(subcommand)]
    pub command: ScheduleCommand,
}

#[derive(Debug, Subcommand)]
pub enum ScheduleCommand {
    /// Validate slot data and pad it to the device's slot count
    Normalize(ScheduleInput),

    /// Expand base temperature + periods into canonical slots
    FromSimple(ScheduleInput),

    /// Collapse slot data into base temperature + periods
    ToSimple(ScheduleInput),
}

/// JSON input file plus the device limits to validate against.
#[derive(Debug, Args)]
pub struct ScheduleInput {
    /// JSON file to read ("-" for stdin)
    pub file: PathBuf,

    /// Slots the device holds per weekday (1-255)
    #[arg(
        long,
        default_value_t = DEFAULT_SLOT_CAPACITY,
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..=255)
    )]
    pub capacity: usize,

    /// Lowest temperature the device accepts
    #[arg(long, default_value_t = DEFAULT_MIN_TEMP, allow_negative_numbers = true)]
    pub min_temp: f64,

    /// Highest temperature the device accepts
    #[arg(long, default_value_t = DEFAULT_MAX_TEMP)]
    pub max_temp: f64,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display the resolved configuration
    Show {
        /// Validate the configuration for use by the sync engine
        #[arg(long)]
        check: bool,
    },

    /// Print the config file path
    Path,
}
