use std::{str::FromStr, time::Duration};

use anyhow::{bail, Context, Result};

use crate::{
    alerts::EnginePolicy,
    discovery::broadcast::DISCOVERY_PORT,
    models::AlertThresholds,
};

/// Which data sources the monitor talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityMode {
    /// Device HTTP only.
    Local,
    /// Hosted REST data store only.
    Cloud,
    Both,
}

impl ConnectivityMode {
    pub fn uses_device(self) -> bool {
        matches!(self, ConnectivityMode::Local | ConnectivityMode::Both)
    }

    pub fn uses_cloud(self) -> bool {
        matches!(self, ConnectivityMode::Cloud | ConnectivityMode::Both)
    }
}

impl FromStr for ConnectivityMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(ConnectivityMode::Local),
            "cloud" => Ok(ConnectivityMode::Cloud),
            "both" => Ok(ConnectivityMode::Both),
            other => bail!("MONITOR_MODE must be local, cloud or both (got {other:?})"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CloudConfig {
    pub base_url: String,
    pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mode: ConnectivityMode,
    /// Skip discovery and use this address.
    pub device_address: Option<String>,
    pub known_addresses: Vec<String>,
    pub hostname_candidates: Vec<String>,
    /// Ids whose registry rows are checked for a last-known address
    pub known_device_ids: Vec<String>,
    /// First three octets of the range scan; `None` disables it.
    pub scan_prefix: Option<String>,
    pub scan_start: u8,
    pub scan_end: u8,
    pub scan_parallelism: usize,
    pub discovery_port: u16,
    pub discovery_timeout_secs: u64,
    pub cloud: Option<CloudConfig>,
    pub local_poll_interval_secs: u64,
    pub cloud_poll_interval_secs: u64,
    pub temp_critical: f64,
    pub alert_delay_secs: u64,
    pub remote_ack_silences: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_source(&|key| std::env::var(key).ok())
    }

    pub fn from_source(env: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let mode: ConnectivityMode = optional(env, "MONITOR_MODE", "local").parse()?;

        let cloud = if mode.uses_cloud() {
            Some(CloudConfig {
                base_url: required(env, "CLOUD_BASE_URL")?,
                api_key: required(env, "CLOUD_API_KEY")?,
            })
        } else {
            None
        };

        let scan_prefix = optional(env, "SCAN_PREFIX", "192.168.0");
        let scan_prefix = scan_prefix.trim().trim_end_matches('.');

        Ok(Self {
            mode,
            device_address: env("DEVICE_ADDRESS")
                .map(|s| s.trim().to_owned())
                .filter(|s| !s.is_empty()),
            known_addresses: list(&optional(
                env,
                "KNOWN_ADDRESSES",
                "192.168.4.1,192.168.1.100,192.168.0.100",
            )),
            hostname_candidates: list(&optional(env, "HOSTNAME_CANDIDATES", "reefer.local,rift.local")),
            known_device_ids: list(&optional(
                env,
                "KNOWN_DEVICE_IDS",
                "REEFER_01_SCZ,REEFER_02_SCZ,REEFER_DEV_BHI",
            )),
            scan_prefix: (!scan_prefix.is_empty()).then(|| scan_prefix.to_owned()),
            scan_start: optional(env, "SCAN_START", "1")
                .parse()
                .context("SCAN_START must be a host number (0-255)")?,
            scan_end: optional(env, "SCAN_END", "254")
                .parse()
                .context("SCAN_END must be a host number (0-255)")?,
            scan_parallelism: optional(env, "SCAN_PARALLELISM", "64")
                .parse()
                .context("SCAN_PARALLELISM must be a positive integer")?,
            discovery_port: optional(env, "DISCOVERY_PORT", &DISCOVERY_PORT.to_string())
                .parse()
                .context("DISCOVERY_PORT must be a valid port number")?,
            discovery_timeout_secs: optional(env, "DISCOVERY_TIMEOUT_SECS", "15")
                .parse()
                .context("DISCOVERY_TIMEOUT_SECS must be a positive integer")?,
            cloud,
            local_poll_interval_secs: positive(env, "LOCAL_POLL_INTERVAL_SECS", "3")?,
            cloud_poll_interval_secs: positive(env, "CLOUD_POLL_INTERVAL_SECS", "5")?,
            temp_critical: optional(env, "TEMP_CRITICAL", "-10.0")
                .parse()
                .context("TEMP_CRITICAL must be a number")?,
            alert_delay_secs: optional(env, "ALERT_DELAY_SECS", "300")
                .parse()
                .context("ALERT_DELAY_SECS must be a non-negative integer")?,
            remote_ack_silences: flag(&optional(env, "REMOTE_ACK_SILENCES", "true"))
                .context("REMOTE_ACK_SILENCES must be true or false")?,
        })
    }

    pub fn thresholds(&self) -> AlertThresholds {
        AlertThresholds {
            critical: self.temp_critical,
            alert_delay_secs: self.alert_delay_secs,
        }
    }

    pub fn policy(&self) -> EnginePolicy {
        EnginePolicy {
            remote_ack_silences: self.remote_ack_silences,
        }
    }

    pub fn local_poll_interval(&self) -> Duration {
        Duration::from_secs(self.local_poll_interval_secs)
    }

    pub fn cloud_poll_interval(&self) -> Duration {
        Duration::from_secs(self.cloud_poll_interval_secs)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }
}

/// Settings for the `device_simulator` binary.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub host: String,
    pub port: u16,
    pub device_id: String,
    pub device_name: String,
    pub discovery_port: u16,
    /// Address put in discovery replies; defaults to `127.0.0.1:{port}`.
    pub advertise_address: String,
}

impl SimulatorConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_source(&|key| std::env::var(key).ok())
    }

    pub fn from_source(env: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let port: u16 = optional(env, "SIMULATOR_PORT", "8080")
            .parse()
            .context("SIMULATOR_PORT must be a valid port number")?;
        Ok(Self {
            host: optional(env, "SIMULATOR_HOST", "0.0.0.0"),
            port,
            device_id: optional(env, "SIMULATOR_DEVICE_ID", "REEFER-01"),
            device_name: optional(env, "SIMULATOR_DEVICE_NAME", "Reefer Principal"),
            discovery_port: optional(env, "DISCOVERY_PORT", &DISCOVERY_PORT.to_string())
                .parse()
                .context("DISCOVERY_PORT must be a valid port number")?,
            advertise_address: optional(env, "SIMULATOR_ADVERTISE_ADDRESS", &format!("127.0.0.1:{port}")),
        })
    }
}

fn required(env: &dyn Fn(&str) -> Option<String>, key: &str) -> Result<String> {
    env(key)
        .filter(|v| !v.trim().is_empty())
        .with_context(|| format!("missing required env var: {key}"))
}

fn optional(env: &dyn Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    env(key).unwrap_or_else(|| default.to_owned())
}

fn positive(env: &dyn Fn(&str) -> Option<String>, key: &str, default: &str) -> Result<u64> {
    let value: u64 = optional(env, key, default)
        .parse()
        .with_context(|| format!("{key} must be a positive integer"))?;
    if value == 0 {
        bail!("{key} must be a positive integer");
    }
    Ok(value)
}

/// Comma-separated list; blanks are dropped.
fn list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

fn flag(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => bail!("not a boolean: {other:?}"),
    }
}
