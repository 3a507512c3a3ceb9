//! Configuration for the macsentry watch daemon.

use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use ipnet::IpNet;
use serde::Deserialize;

use crate::error::{Result, WatchError};

/// Environment variables override file values, e.g. `MACSENTRY__NETWORK_RANGE`.
pub const ENV_PREFIX: &str = "MACSENTRY";

/// Placeholder substituted with the flagged MAC in the `action` template.
pub const MAC_PLACEHOLDER: &str = "{mac}";

/// Top-level watch configuration.
///
/// Loaded from a JSON file (default `macsentry.json`) and
/// `MACSENTRY__` environment variables. Immutable for the lifetime of a run.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    /// Learning phase duration in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Shell command template run for every unknown device. `{mac}` is
    /// replaced with the canonical address.
    #[serde(default = "default_action")]
    pub action: String,

    /// Address range handed to the prober (CIDR or single address).
    #[serde(default = "default_network_range")]
    pub network_range: String,

    /// Seconds between sweeps while learning.
    #[serde(default = "default_learning_interval")]
    pub scan_interval_learning: u64,

    /// Seconds between sweeps while enforcing.
    #[serde(default = "default_alarm_interval")]
    pub scan_interval_alarm: u64,

    /// Where the learned whitelist is persisted.
    #[serde(default = "default_whitelist_path")]
    pub whitelist_path: String,

    /// Path to the nmap binary.
    #[serde(default = "default_nmap_path")]
    pub nmap_path: String,

    /// Upper bound on a single sweep, in seconds.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    /// Upper bound on a single alarm command, in seconds.
    #[serde(default = "default_action_timeout")]
    pub action_timeout_secs: u64,

    /// Consecutive failed sweeps before monitoring is reported as degraded.
    #[serde(default = "default_failure_threshold")]
    pub probe_failure_threshold: u32,

    /// Which alarm sink handles unknown devices.
    #[serde(default)]
    pub sink: SinkKind,
}

/// Alarm sink selection.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Run the `action` template through the shell.
    #[default]
    Command,
    /// Only emit a log event.
    Log,
}

fn default_timeout() -> u64 {
    3600
}

fn default_action() -> String {
    "echo 'Unauthorized device detected! MAC: {mac}'".to_string()
}

fn default_network_range() -> String {
    "192.168.1.0/24".to_string()
}

fn default_learning_interval() -> u64 {
    15
}

fn default_alarm_interval() -> u64 {
    30
}

fn default_whitelist_path() -> String {
    "whitelist.json".to_string()
}

fn default_nmap_path() -> String {
    "nmap".to_string()
}

fn default_probe_timeout() -> u64 {
    10
}

fn default_action_timeout() -> u64 {
    60
}

fn default_failure_threshold() -> u32 {
    3
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            action: default_action(),
            network_range: default_network_range(),
            scan_interval_learning: default_learning_interval(),
            scan_interval_alarm: default_alarm_interval(),
            whitelist_path: default_whitelist_path(),
            nmap_path: default_nmap_path(),
            probe_timeout_secs: default_probe_timeout(),
            action_timeout_secs: default_action_timeout(),
            probe_failure_threshold: default_failure_threshold(),
            sink: SinkKind::default(),
        }
    }
}

impl WatchConfig {
    pub fn learning_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn learning_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_learning)
    }

    pub fn alarm_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_alarm)
    }

    /// Sweep deadline, never longer than the shorter of the two scan intervals.
    pub fn probe_timeout(&self) -> Duration {
        let cap = self
            .probe_timeout_secs
            .min(self.scan_interval_learning)
            .min(self.scan_interval_alarm);
        Duration::from_secs(cap.max(1))
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs.max(1))
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let range = self.network_range.trim();
        if range.parse::<IpNet>().is_err() && range.parse::<IpAddr>().is_err() {
            return Err(WatchError::Config(format!(
                "network_range {:?} is not a CIDR block or IP address",
                self.network_range
            )));
        }
        if self.scan_interval_learning == 0 || self.scan_interval_alarm == 0 {
            return Err(WatchError::Config(
                "scan intervals must be at least 1 second".to_string(),
            ));
        }
        if self.probe_failure_threshold == 0 {
            return Err(WatchError::Config(
                "probe_failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.sink == SinkKind::Command && self.action.trim().is_empty() {
            return Err(WatchError::Config(
                "action must not be empty when sink is \"command\"".to_string(),
            ));
        }
        if self.sink == SinkKind::Command && !self.action.contains(MAC_PLACEHOLDER) {
            tracing::warn!(
                action = %self.action,
                "Action template has no {{mac}} placeholder; alarms will not name the device"
            );
        }
        Ok(())
    }
}

/// The file written when no configuration exists yet.
///
/// Only the five operator-facing keys are written; everything else keeps
/// its serde default.
pub fn default_config_document() -> serde_json::Value {
    serde_json::json!({
        "timeout": default_timeout(),
        "action": default_action(),
        "network_range": default_network_range(),
        "scan_interval_learning": default_learning_interval(),
        "scan_interval_alarm": default_alarm_interval(),
    })
}

/// Load and validate the configuration at `path`.
///
/// A missing file is replaced with a generated default file. A file that
/// exists but cannot be parsed, or that fails validation, is an error.
pub fn load_config(path: &Path) -> Result<WatchConfig> {
    if !path.exists() {
        write_default_config(path)?;
    }

    let cfg = ::config::Config::builder()
        .add_source(::config::File::from(path).format(::config::FileFormat::Json))
        .add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| WatchError::Config(e.to_string()))?;

    let watch_config: WatchConfig = cfg
        .try_deserialize()
        .map_err(|e| WatchError::Config(e.to_string()))?;
    watch_config.validate()?;

    Ok(watch_config)
}

fn write_default_config(path: &Path) -> Result<()> {
    tracing::warn!(path = %path.display(), "Configuration file not found");

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(&default_config_document())
        .map_err(|e| WatchError::Config(e.to_string()))?;
    fs::write(path, json)?;

    tracing::info!(
        path = %path.display(),
        "A default configuration has been created. Please review it and adjust 'network_range' to match your network"
    );
    Ok(())
}
