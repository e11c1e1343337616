pub mod models;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::{
    control::CommandSink,
    discovery::RegistryLookup,
    error::{CommandError, FetchError},
    models::{Command, CommandKind, DeviceSnapshot},
    monitor::ReadingSource,
};

use self::models::{to_snapshot, AlertRow, CommandRow, DeviceRow, ReadingRow};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const COMMAND_SOURCE: &str = "reefer_monitor";

/// Client for the hosted REST data store (devices, readings, alerts, commands).
#[derive(Debug, Clone)]
pub struct CloudClient {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    http: Client,
    base_url: String,
    api_key: String,
}

impl CloudClient {
    pub fn new(http: Client, base_url: &str, api_key: &str) -> Self {
        Self {
            inner: Arc::new(Inner {
                http,
                base_url: base_url.trim_end_matches('/').to_owned(),
                api_key: api_key.to_owned(),
            }),
        }
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.inner.api_key)
            .header("Authorization", format!("Bearer {}", self.inner.api_key))
            .timeout(REQUEST_TIMEOUT)
    }

    async fn get_rows<T: DeserializeOwned>(&self, path_and_query: &str) -> Result<Vec<T>, FetchError> {
        let url = format!("{}{}", self.inner.base_url, path_and_query);
        debug!(url = %url, "Querying data store");

        let resp = self.authorized(self.inner.http.get(&url)).send().await?;
        if !resp.status().is_success() {
            return Err(FetchError::Status(resp.status().as_u16()));
        }
        let bytes = resp.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| FetchError::Malformed(e.to_string()))
    }

    async fn patch<B: Serialize + ?Sized>(&self, path_and_query: &str, body: &B) -> Result<(), CommandError> {
        let url = format!("{}{}", self.inner.base_url, path_and_query);
        let resp = self
            .authorized(self.inner.http.patch(&url))
            .json(body)
            .send()
            .await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(CommandError::Status(resp.status().as_u16()))
        }
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<(), CommandError> {
        let url = format!("{}{}", self.inner.base_url, path);
        let resp = self
            .authorized(self.inner.http.post(&url))
            .json(body)
            .send()
            .await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(CommandError::Status(resp.status().as_u16()))
        }
    }

    pub async fn devices(&self) -> Result<Vec<DeviceRow>, FetchError> {
        self.get_rows("/rest/v1/devices?select=*&order=device_id").await
    }

    pub async fn latest_reading(&self, device_id: &str) -> Result<Option<ReadingRow>, FetchError> {
        let rows = self
            .get_rows(&format!(
                "/rest/v1/readings?device_id=eq.{device_id}&order=created_at.desc&limit=1"
            ))
            .await?;
        Ok(rows.into_iter().next())
    }

    pub async fn active_alerts(&self) -> Result<Vec<AlertRow>, FetchError> {
        self.get_rows("/rest/v1/alerts?resolved=eq.false&order=created_at.desc&limit=50")
            .await
    }

    /// Ids of devices with an unresolved alert row, newest alert first, each
    /// id once.
    pub async fn alerting_devices(&self) -> Result<Vec<String>, FetchError> {
        let mut ids: Vec<String> = Vec::new();
        for alert in self.active_alerts().await? {
            if !ids.contains(&alert.device_id) {
                ids.push(alert.device_id);
            }
        }
        Ok(ids)
    }

    /// Mark the device's open alert rows and flagged readings acknowledged.
    pub async fn acknowledge_device_alert(&self, device_id: &str) -> Result<(), CommandError> {
        info!(device_id = %device_id, "Acknowledging alert in data store");
        self.patch(
            &format!("/rest/v1/readings?device_id=eq.{device_id}&alert_active=eq.true"),
            &json!({ "alert_acknowledged": true }),
        )
        .await?;
        self.patch(
            &format!("/rest/v1/alerts?device_id=eq.{device_id}&resolved=eq.false"),
            &json!({ "acknowledged": true, "acknowledged_by": COMMAND_SOURCE }),
        )
        .await
    }

    /// Queue a command row; the device picks it up on its own poll.
    pub async fn send_device_command(&self, device_id: &str, command: &str) -> Result<(), CommandError> {
        info!(device_id = %device_id, command = %command, "Queueing device command");
        self.post(
            "/rest/v1/commands",
            &CommandRow {
                device_id,
                command,
                status: "pending",
                source: COMMAND_SOURCE,
            },
        )
        .await
    }
}

#[async_trait]
impl ReadingSource for CloudClient {
    fn name(&self) -> &str {
        "cloud"
    }

    async fn fetch(&self) -> Result<Vec<DeviceSnapshot>, FetchError> {
        let devices = self.devices().await?;
        let fetched_at = Utc::now();
        let mut snapshots = Vec::with_capacity(devices.len());

        for device in &devices {
            match self.latest_reading(&device.device_id).await {
                Ok(reading) => snapshots.push(to_snapshot(device, reading, fetched_at)),
                // One bad row must not hide the other devices.
                Err(FetchError::Malformed(e)) => {
                    warn!(device_id = %device.device_id, error = %e, "Skipping malformed reading row");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(snapshots)
    }
}

#[async_trait]
impl CommandSink for CloudClient {
    fn name(&self) -> &str {
        "cloud"
    }

    async fn deliver(&self, command: &Command) -> Result<(), CommandError> {
        let id = command.target_device_id.as_str();
        match command.kind {
            CommandKind::Silence => {
                self.send_device_command(id, "SILENCE").await?;
                self.patch(
                    &format!("/rest/v1/devices?device_id=eq.{id}"),
                    &json!({ "alert_acknowledged_remote": true }),
                )
                .await?;
                self.acknowledge_device_alert(id).await
            }
            // The unit only stops its siren once it picks up a SILENCE row.
            CommandKind::AcknowledgeAlert => {
                self.send_device_command(id, "SILENCE").await?;
                self.acknowledge_device_alert(id).await
            }
            CommandKind::RelayOff => self.send_device_command(id, "RELAY_OFF").await,
        }
    }
}

/// Registry channel backed by the data store: the last address each known
/// device reported.
#[derive(Debug, Clone)]
pub struct CloudRegistry {
    client: CloudClient,
    device_ids: Vec<String>,
}

impl CloudRegistry {
    pub fn new(client: CloudClient, device_ids: Vec<String>) -> Self {
        Self { client, device_ids }
    }
}

#[async_trait]
impl RegistryLookup for CloudRegistry {
    async fn last_known_address(&self) -> anyhow::Result<Option<String>> {
        for id in &self.device_ids {
            let rows: Vec<DeviceRow> = self
                .client
                .get_rows(&format!(
                    "/rest/v1/devices?device_id=eq.{id}&select=device_id,ip_address,is_online"
                ))
                .await?;
            if let Some(addr) = rows.iter().find_map(DeviceRow::online_address) {
                debug!(device_id = %id, address = %addr, "Registry reports device online");
                return Ok(Some(addr.to_owned()));
            }
        }
        Ok(None)
    }
}
