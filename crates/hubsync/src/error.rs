//! CLI error types with miette diagnostics.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use hubsync_config::ConfigError;
use hubsync_core::ScheduleError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Schedule input ───────────────────────────────────────────────
    #[error("Invalid schedule: {0}")]
    #[diagnostic(
        code(hubsync::schedule),
        help(
            "Slots are listed in order, end times ascend and the last slot ends at 24:00.\n\
             Adjust --capacity, --min-temp or --max-temp to match the device."
        )
    )]
    Schedule(#[from] ScheduleError),

    #[error("Could not parse {path}: {source}")]
    #[diagnostic(
        code(hubsync::json),
        help("Check the JSON file contents and try again.")
    )]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Could not read {path}")]
    #[diagnostic(code(hubsync::io))]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Configuration ────────────────────────────────────────────────
    #[error("{source}")]
    #[diagnostic(
        code(hubsync::config),
        help("Expected at: {path}\nOverride with --config or HUBSYNC_CONFIG.")
    )]
    Config {
        path: String,
        #[source]
        source: ConfigError,
    },

    // ── Output ───────────────────────────────────────────────────────
    #[error("Failed to render output: {0}")]
    #[diagnostic(code(hubsync::output))]
    Render(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Schedule(_) | Self::Parse { .. } => exit_code::USAGE,
            Self::Config { .. } => exit_code::CONFIG,
            Self::Read { .. } | Self::Render(_) | Self::Io(_) => exit_code::GENERAL,
        }
    }
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        Self::Render(err.to_string())
    }
}

impl From<toml::ser::Error> for CliError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Render(err.to_string())
    }
}
