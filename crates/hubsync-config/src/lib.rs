//! Configuration loading for hubsync.
//!
//! A TOML file in the platform config directory, overlaid with
//! `HUBSYNC_*` environment variables, validated and translated to
//! `hubsync_core::SyncConfig`. Nested keys use a double underscore in the
//! environment: `HUBSYNC_HEALTH__PROBE_INTERVAL_SECS=30`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use hubsync_core::{HealthConfig, InterfaceConfig, ReconnectConfig, SyncConfig};

/// Environment variable naming an alternative config file.
pub const CONFIG_PATH_ENV: &str = "HUBSYNC_CONFIG";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration. Durations are whole seconds.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Hub base URL (e.g., "http://ccu3.local:2010").
    pub hub_url: Option<String>,

    #[serde(default)]
    pub interfaces: Vec<InterfaceEntry>,

    #[serde(default)]
    pub health: HealthSection,

    #[serde(default)]
    pub reconnect: ReconnectSection,

    #[serde(default)]
    pub sync: SyncSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct InterfaceEntry {
    /// Interface id as the hub names it ("HmIP-RF", "BidCos-RF", ...).
    pub id: String,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct HealthSection {
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,

    #[serde(default = "default_degrade_after")]
    pub degrade_after_secs: u64,

    /// Consecutive mismatching probe cycles before a conflict is raised.
    #[serde(default = "default_conflict_threshold")]
    pub conflict_threshold: u32,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            probe_interval_secs: default_probe_interval(),
            degrade_after_secs: default_degrade_after(),
            conflict_threshold: default_conflict_threshold(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ReconnectSection {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,

    /// Unset retries forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay_secs: default_initial_delay(),
            max_delay_secs: default_max_delay(),
            max_retries: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SyncSection {
    /// Periodic bulk re-read of every interface. Unset disables it.
    pub refresh_interval_secs: Option<u64>,

    #[serde(default = "default_force_refresh_interval")]
    pub force_refresh_interval_secs: u64,

    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,

    #[serde(default = "default_write_queue_depth")]
    pub write_queue_depth: usize,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            refresh_interval_secs: None,
            force_refresh_interval_secs: default_force_refresh_interval(),
            write_timeout_secs: default_write_timeout(),
            write_queue_depth: default_write_queue_depth(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_probe_interval() -> u64 {
    15
}
fn default_degrade_after() -> u64 {
    600
}
fn default_conflict_threshold() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    1
}
fn default_max_delay() -> u64 {
    60
}
fn default_force_refresh_interval() -> u64 {
    60
}
fn default_write_timeout() -> u64 {
    5
}
fn default_write_queue_depth() -> usize {
    32
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path: `HUBSYNC_CONFIG` if set, otherwise the
/// platform config directory.
pub fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }
    ProjectDirs::from("com", "hubsync", "hubsync").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("hubsync");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Defaults, then the file at `path`, then `HUBSYNC_*` variables.
pub fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(
            Env::prefixed("HUBSYNC_")
                .ignore(&["CONFIG"])
                .split("__"),
        )
}

/// Load the full Config from the canonical path + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the full Config from an explicit file + environment. A missing
/// file yields the defaults.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let config: Config = figment(path).extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

impl Config {
    /// Validate and build the engine configuration.
    pub fn to_sync_config(&self) -> Result<SyncConfig, ConfigError> {
        let raw_url = self
            .hub_url
            .as_deref()
            .ok_or_else(|| invalid("hub_url", "not set"))?;
        let hub_url: Url = raw_url
            .parse()
            .map_err(|_| invalid("hub_url", format!("invalid URL: {raw_url}")))?;

        if self.interfaces.is_empty() {
            return Err(invalid("interfaces", "at least one interface is required"));
        }
        let mut seen = HashSet::new();
        for entry in &self.interfaces {
            if entry.id.trim().is_empty() {
                return Err(invalid("interfaces", "interface id is empty"));
            }
            if !seen.insert(entry.id.as_str()) {
                return Err(invalid(
                    "interfaces",
                    format!("duplicate interface '{}'", entry.id),
                ));
            }
        }

        if self.health.probe_interval_secs == 0 {
            return Err(invalid("health.probe_interval_secs", "must be positive"));
        }
        if self.health.conflict_threshold == 0 {
            return Err(invalid("health.conflict_threshold", "must be at least 1"));
        }
        if self.reconnect.initial_delay_secs > self.reconnect.max_delay_secs {
            return Err(invalid(
                "reconnect.initial_delay_secs",
                "must not exceed reconnect.max_delay_secs",
            ));
        }
        if self.sync.write_queue_depth == 0 {
            return Err(invalid("sync.write_queue_depth", "must be at least 1"));
        }
        if self.sync.refresh_interval_secs == Some(0) {
            return Err(invalid(
                "sync.refresh_interval_secs",
                "must be positive (omit it to disable)",
            ));
        }

        let interfaces = self
            .interfaces
            .iter()
            .map(|entry| InterfaceConfig {
                enabled: entry.enabled,
                ..InterfaceConfig::new(entry.id.as_str())
            })
            .collect();

        let mut config = SyncConfig::new(hub_url, interfaces);
        config.health = HealthConfig {
            probe_interval: Duration::from_secs(self.health.probe_interval_secs),
            degrade_after: Duration::from_secs(self.health.degrade_after_secs),
            conflict_threshold: self.health.conflict_threshold,
        };
        config.reconnect = ReconnectConfig {
            initial_delay: Duration::from_secs(self.reconnect.initial_delay_secs),
            max_delay: Duration::from_secs(self.reconnect.max_delay_secs),
            max_retries: self.reconnect.max_retries,
            enabled: self.reconnect.enabled,
        };
        config.refresh_interval = self.sync.refresh_interval_secs.map(Duration::from_secs);
        config.force_refresh_interval = Duration::from_secs(self.sync.force_refresh_interval_secs);
        config.write_timeout = Duration::from_secs(self.sync.write_timeout_secs);
        config.write_queue_depth = self.sync.write_queue_depth;
        Ok(config)
    }
}
