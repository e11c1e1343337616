use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    error::FetchError,
    models::{AlertThresholds, DeviceIdentity, DeviceReading, DeviceSnapshot},
};

// ---------------------------------------------------------------------------
// GET /api/status
//
// {
//   "sensor": { "temp1": -22.3, "temp2": -22.7, "temp_avg": -22.5, "door_open": false, ... },
//   "system": { "alert_active": false, "relay_on": false, "uptime_sec": 120, ... },
//   "device": { "id": "REEFER-01", "name": "Reefer Principal" },
//   "timestamp": "2025-01-01T00:00:00Z"
// }
//
// Every field is optional on the wire; `sensor` and `system` are the identity
// markers that distinguish the unit from any other HTTP server on the port.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor: Option<SensorBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorBlock {
    pub temp1: Option<f64>,
    pub temp2: Option<f64>,
    pub temp_avg: Option<f64>,
    pub humidity: Option<f64>,
    pub door_open: bool,
    pub door_open_sec: u64,
    /// `false` when the firmware could not read any probe.
    pub valid: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemBlock {
    pub alert_active: bool,
    pub alert_acknowledged: bool,
    pub critical: bool,
    pub alert_message: Option<String>,
    pub relay_on: bool,
    pub uptime_sec: Option<u64>,
    pub wifi_rssi: Option<i32>,
    pub simulation_mode: bool,
    pub defrost_mode: bool,
    pub cooldown_mode: bool,
    pub cooldown_remaining_sec: u64,
    pub high_temp_elapsed_sec: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceBlock {
    pub id: Option<String>,
    pub name: Option<String>,
    pub ip: Option<String>,
}

/// Cheap identity heuristic on a raw body: both marker objects must be present.
pub fn has_identity_markers(body: &[u8]) -> bool {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => {
            map.get("sensor").is_some_and(Value::is_object)
                && map.get("system").is_some_and(Value::is_object)
        }
        _ => false,
    }
}

impl StatusResponse {
    pub fn from_slice(body: &[u8]) -> Result<Self, FetchError> {
        serde_json::from_slice(body).map_err(|e| FetchError::Malformed(e.to_string()))
    }

    /// Identity advertised by the device, if any.
    pub fn identity(&self) -> Option<DeviceIdentity> {
        let device = self.device.as_ref()?;
        let id = device.id.clone().filter(|s| !s.is_empty())?;
        let name = device.name.clone().unwrap_or_else(|| id.clone());
        Some(DeviceIdentity::new(id, name))
    }

    /// Map the wire payload to a typed snapshot.
    ///
    /// `fallback` names the device when it does not advertise its own id;
    /// `received_at` stamps the reading when the device sends no timestamp.
    pub fn into_snapshot(
        self,
        fallback: &DeviceIdentity,
        received_at: DateTime<Utc>,
    ) -> Result<DeviceSnapshot, FetchError> {
        let identity = self.identity().unwrap_or_else(|| fallback.clone());
        let (Some(sensor), Some(system)) = (self.sensor, self.system) else {
            return Err(FetchError::Malformed(
                "status payload lacks sensor/system blocks".into(),
            ));
        };

        let timestamp = self
            .timestamp
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or(received_at);

        let probes_valid = sensor.valid.unwrap_or(true);
        let reading = DeviceReading {
            temp_avg: sensor.temp_avg.filter(|_| probes_valid),
            temp1: sensor.temp1.filter(|_| probes_valid),
            temp2: sensor.temp2.filter(|_| probes_valid),
            humidity: sensor.humidity,
            door_open: sensor.door_open,
            relay_on: system.relay_on,
            online: true,
            alert_active: system.alert_active,
            alert_acknowledged: system.alert_acknowledged,
            high_temp_elapsed_secs: system.high_temp_elapsed_sec,
            wifi_rssi: system.wifi_rssi,
            uptime_secs: system.uptime_sec,
            simulation_mode: system.simulation_mode,
            defrost_mode: system.defrost_mode,
            cooldown_mode: system.cooldown_mode,
            cooldown_remaining_secs: system.cooldown_remaining_sec,
            message: system.alert_message.filter(|m| !m.is_empty()),
            timestamp,
        };

        Ok(DeviceSnapshot {
            identity,
            reading,
            thresholds: None,
        })
    }
}

// ---------------------------------------------------------------------------
// GET/POST /api/config
// ---------------------------------------------------------------------------

/// Device settings. Fields the monitor does not model are kept in `extra` so a
/// read-modify-write cycle does not drop them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_temp_max")]
    pub temp_max: f64,
    #[serde(default = "default_temp_critical")]
    pub temp_critical: f64,
    #[serde(default = "default_alert_delay")]
    pub alert_delay_sec: u64,
    #[serde(default = "default_door_open_max")]
    pub door_open_max_sec: u64,
    #[serde(default = "default_true")]
    pub relay_enabled: bool,
    #[serde(default = "default_true")]
    pub buzzer_enabled: bool,
    #[serde(default)]
    pub simulation_mode: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_temp_max() -> f64 {
    -18.0
}

fn default_temp_critical() -> f64 {
    AlertThresholds::default().critical
}

fn default_alert_delay() -> u64 {
    AlertThresholds::default().alert_delay_secs
}

fn default_door_open_max() -> u64 {
    180
}

fn default_true() -> bool {
    true
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            temp_max: default_temp_max(),
            temp_critical: default_temp_critical(),
            alert_delay_sec: default_alert_delay(),
            door_open_max_sec: default_door_open_max(),
            relay_enabled: true,
            buzzer_enabled: true,
            simulation_mode: false,
            extra: Map::new(),
        }
    }
}

impl DeviceConfig {
    pub fn thresholds(&self) -> AlertThresholds {
        AlertThresholds {
            critical: self.temp_critical,
            alert_delay_secs: self.alert_delay_sec,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RelayRequest {
    pub state: bool,
}
