use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{AlertThresholds, DeviceIdentity, DeviceReading, DeviceSnapshot};

// ---------------------------------------------------------------------------
// Rows of the hosted data store (REST, one JSON array per query).
//
// Columns are optional on the wire; anything missing falls back to the
// documented default so downstream code never sees raw JSON.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceRow {
    pub device_id: String,
    pub name: Option<String>,
    pub location: Option<String>,
    pub is_online: bool,
    pub ip_address: Option<String>,
    pub wifi_rssi: Option<i32>,
    pub last_seen_at: Option<String>,
    pub temp_critical: Option<f64>,
    pub alert_delay_sec: Option<u64>,
}

impl DeviceRow {
    pub fn identity(&self) -> DeviceIdentity {
        let name = self
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| self.device_id.clone());
        DeviceIdentity::new(self.device_id.clone(), name)
    }

    pub fn thresholds(&self) -> Option<AlertThresholds> {
        let critical = self.temp_critical?;
        Some(AlertThresholds {
            critical,
            alert_delay_secs: self
                .alert_delay_sec
                .unwrap_or(AlertThresholds::default().alert_delay_secs),
        })
    }

    /// Non-empty LAN address of an online device.
    pub fn online_address(&self) -> Option<&str> {
        if !self.is_online {
            return None;
        }
        self.ip_address
            .as_deref()
            .map(str::trim)
            .filter(|ip| !ip.is_empty() && *ip != "null")
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ReadingRow {
    pub device_id: String,
    pub temp_avg: Option<f64>,
    pub temp1: Option<f64>,
    pub temp2: Option<f64>,
    pub humidity: Option<f64>,
    pub door_open: Option<bool>,
    pub door1_open: Option<bool>,
    pub relay_on: bool,
    pub siren_on: bool,
    pub alert_active: bool,
    pub alert_acknowledged: bool,
    pub high_temp_elapsed_sec: Option<u64>,
    pub defrost_mode: bool,
    pub cooldown_mode: bool,
    pub cooldown_remaining_sec: u64,
    pub uptime_sec: Option<u64>,
    pub simulation_mode: bool,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AlertRow {
    pub id: i64,
    pub device_id: String,
    #[serde(default)]
    pub alert_type: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub acknowledged: bool,
    #[serde(default)]
    pub resolved: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct CommandRow<'a> {
    pub device_id: &'a str,
    pub command: &'a str,
    pub status: &'a str,
    pub source: &'a str,
}

/// Combine a device row with its latest reading, if any.
///
/// A device without readings still yields a snapshot: online flag and
/// identity only, no temperature (which the alert engine treats as "no
/// information").
pub fn to_snapshot(
    device: &DeviceRow,
    reading: Option<ReadingRow>,
    fetched_at: DateTime<Utc>,
) -> DeviceSnapshot {
    let mut r = DeviceReading::empty(fetched_at);
    r.online = device.is_online;
    r.wifi_rssi = device.wifi_rssi;

    if let Some(row) = reading {
        r.temp_avg = row.temp_avg;
        r.temp1 = row.temp1;
        r.temp2 = row.temp2;
        r.humidity = row.humidity;
        r.door_open = row.door_open.or(row.door1_open).unwrap_or(false);
        r.relay_on = row.relay_on || row.siren_on;
        r.alert_active = row.alert_active;
        r.alert_acknowledged = row.alert_acknowledged;
        r.high_temp_elapsed_secs = row.high_temp_elapsed_sec;
        r.defrost_mode = row.defrost_mode;
        r.cooldown_mode = row.cooldown_mode;
        r.cooldown_remaining_secs = row.cooldown_remaining_sec;
        r.uptime_secs = row.uptime_sec;
        r.simulation_mode = row.simulation_mode;
        if let Some(ts) = row.created_at {
            r.timestamp = ts;
        }
    }

    DeviceSnapshot {
        identity: device.identity(),
        reading: r,
        thresholds: device.thresholds(),
    }
}
