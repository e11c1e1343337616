pub mod models;

use std::{
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use tracing::{debug, info};

use crate::{
    control::CommandSink,
    error::{CommandError, FetchError},
    models::{Command, CommandKind, DeviceIdentity, DeviceSnapshot},
    monitor::ReadingSource,
};

use self::models::{DeviceConfig, RelayRequest, StatusResponse};

pub const STATUS_PATH: &str = "/api/status";
pub const CONFIG_PATH: &str = "/api/config";
pub const ALERT_ACK_PATH: &str = "/api/alert/ack";
pub const RELAY_PATH: &str = "/api/relay";

const STATUS_TIMEOUT: Duration = Duration::from_secs(3);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Build `http://address` unless the caller already supplied a scheme.
pub fn base_url(address: &str) -> String {
    let address = address.trim().trim_end_matches('/');
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_owned()
    } else {
        format!("http://{address}")
    }
}

/// HTTP client for one monitored unit reached directly on the LAN.
#[derive(Debug, Clone)]
pub struct DeviceClient {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    http: Client,
    address: String,
    base_url: String,
    /// Used when the device does not advertise its own id.
    fallback_identity: DeviceIdentity,
    /// Id the unit advertised on its last successful status read.
    advertised_id: RwLock<Option<String>>,
}

impl DeviceClient {
    pub fn new(http: Client, address: &str) -> Self {
        let fallback_identity = DeviceIdentity::new(address, address);
        Self {
            inner: Arc::new(Inner {
                http,
                address: address.to_owned(),
                base_url: base_url(address),
                fallback_identity,
                advertised_id: RwLock::new(None),
            }),
        }
    }

    pub fn address(&self) -> &str {
        &self.inner.address
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.inner.base_url, path)
    }

    /// Fetch and parse `GET /api/status`.
    pub async fn get_status(&self) -> Result<DeviceSnapshot, FetchError> {
        let url = self.url(STATUS_PATH);
        debug!(url = %url, "Fetching device status");

        let resp = self
            .inner
            .http
            .get(&url)
            .timeout(STATUS_TIMEOUT)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(FetchError::Status(resp.status().as_u16()));
        }
        let bytes = resp.bytes().await?;

        let status = StatusResponse::from_slice(&bytes)?;
        if let Some(identity) = status.identity() {
            *self
                .inner
                .advertised_id
                .write()
                .unwrap_or_else(PoisonError::into_inner) = Some(identity.id);
        }
        status.into_snapshot(&self.inner.fallback_identity, Utc::now())
    }

    fn serves(&self, device_id: &str) -> bool {
        self.inner
            .advertised_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_deref()
            .map_or(true, |id| id == device_id)
    }

    pub async fn get_config(&self) -> Result<DeviceConfig> {
        let url = self.url(CONFIG_PATH);
        debug!(url = %url, "Fetching device config");

        self.inner
            .http
            .get(&url)
            .timeout(COMMAND_TIMEOUT)
            .send()
            .await
            .context("device config request failed")?
            .error_for_status()
            .context("device config endpoint returned error status")?
            .json::<DeviceConfig>()
            .await
            .context("failed to deserialize device config")
    }

    pub async fn save_config(&self, config: &DeviceConfig) -> Result<()> {
        let url = self.url(CONFIG_PATH);
        info!(url = %url, temp_critical = config.temp_critical, "Saving device config");

        self.inner
            .http
            .post(&url)
            .timeout(COMMAND_TIMEOUT)
            .json(config)
            .send()
            .await
            .context("device config update failed")?
            .error_for_status()
            .context("device config endpoint rejected update")?;
        Ok(())
    }

    /// `POST /api/alert/ack`: silences the siren and marks the alert acknowledged.
    pub async fn acknowledge_alert(&self) -> Result<(), CommandError> {
        let resp = self
            .inner
            .http
            .post(self.url(ALERT_ACK_PATH))
            .timeout(COMMAND_TIMEOUT)
            .send()
            .await?;
        check_status(resp.status())
    }

    pub async fn set_relay(&self, on: bool) -> Result<(), CommandError> {
        let resp = self
            .inner
            .http
            .post(self.url(RELAY_PATH))
            .timeout(COMMAND_TIMEOUT)
            .json(&RelayRequest { state: on })
            .send()
            .await?;
        check_status(resp.status())
    }
}

fn check_status(status: reqwest::StatusCode) -> Result<(), CommandError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(CommandError::Status(status.as_u16()))
    }
}

#[async_trait]
impl ReadingSource for DeviceClient {
    fn name(&self) -> &str {
        "device"
    }

    async fn fetch(&self) -> Result<Vec<DeviceSnapshot>, FetchError> {
        Ok(vec![self.get_status().await?])
    }
}

#[async_trait]
impl CommandSink for DeviceClient {
    fn name(&self) -> &str {
        "device"
    }

    async fn deliver(&self, command: &Command) -> Result<(), CommandError> {
        if !self.serves(&command.target_device_id) {
            return Err(CommandError::Rejected(format!(
                "{} is not the device at {}",
                command.target_device_id,
                self.address()
            )));
        }
        match command.kind {
            CommandKind::Silence | CommandKind::AcknowledgeAlert => self.acknowledge_alert().await,
            CommandKind::RelayOff => self.set_relay(false).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::testing::spawn_simulator;

    #[test]
    fn base_url_adds_scheme_once() {
        assert_eq!(base_url("192.168.0.10"), "http://192.168.0.10");
        assert_eq!(base_url("reefer.local:8080/"), "http://reefer.local:8080");
        assert_eq!(base_url("https://host"), "https://host");
    }

    #[tokio::test]
    async fn status_round_trip_against_simulator() {
        let (addr, _state) = spawn_simulator().await;
        let client = DeviceClient::new(Client::new(), &addr);

        let snap = client.get_status().await.unwrap();
        assert_eq!(snap.identity.id, "REEFER-01");
        assert!(snap.reading.temperature().is_some());
    }

    #[tokio::test]
    async fn ack_and_relay_reach_simulator() {
        let (addr, state) = spawn_simulator().await;
        state.lock().await.force_alert("test");
        let client = DeviceClient::new(Client::new(), &addr);

        client
            .deliver(&Command::new(CommandKind::AcknowledgeAlert, "REEFER-01"))
            .await
            .unwrap();
        assert!(state.lock().await.alert_acknowledged);

        state.lock().await.relay_on = true;
        client
            .deliver(&Command::new(CommandKind::RelayOff, "REEFER-01"))
            .await
            .unwrap();
        assert!(!state.lock().await.relay_on);
    }

    #[tokio::test]
    async fn commands_for_other_devices_are_rejected() {
        let (addr, _state) = spawn_simulator().await;
        let client = DeviceClient::new(Client::new(), &addr);
        client.get_status().await.unwrap();

        let err = client
            .deliver(&Command::new(CommandKind::Silence, "REEFER-99"))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Rejected(_)));
    }

    #[tokio::test]
    async fn config_read_modify_write() {
        let (addr, _state) = spawn_simulator().await;
        let client = DeviceClient::new(Client::new(), &addr);

        let mut cfg = client.get_config().await.unwrap();
        cfg.temp_critical = -14.0;
        client.save_config(&cfg).await.unwrap();

        let again = client.get_config().await.unwrap();
        assert_eq!(again.temp_critical, -14.0);
    }

    #[tokio::test]
    async fn unreachable_device_is_transport_error() {
        // Port 9 (discard) on localhost is closed in test environments.
        let client = DeviceClient::new(Client::new(), "127.0.0.1:9");
        let err = client.get_status().await.unwrap_err();
        assert!(err.is_connectivity());
    }
}
