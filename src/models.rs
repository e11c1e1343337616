use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lower bound (exclusive) of a trustworthy probe temperature in °C.
///
/// The firmware reports `-127` / `-999` for a disconnected probe.
pub const MIN_VALID_TEMP: f64 = -55.0;
/// Upper bound (exclusive) of a trustworthy probe temperature in °C.
pub const MAX_VALID_TEMP: f64 = 125.0;

/// `true` when `t` lies strictly inside the sensor's physical range.
pub fn is_valid_temperature(t: f64) -> bool {
    t.is_finite() && t > MIN_VALID_TEMP && t < MAX_VALID_TEMP
}

/// Returns `Some(t)` only when the value passes the sentinel range check.
pub fn valid_temperature(t: Option<f64>) -> Option<f64> {
    t.filter(|v| is_valid_temperature(*v))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub id: String,
    pub display_name: String,
}

impl DeviceIdentity {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

/// A snapshot of a monitored unit at one point in time.
///
/// Temperatures are kept exactly as reported; use [`DeviceReading::temperature`]
/// to obtain a value that is safe to evaluate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceReading {
    pub temp_avg: Option<f64>,
    pub temp1: Option<f64>,
    pub temp2: Option<f64>,
    pub humidity: Option<f64>,
    pub door_open: bool,
    pub relay_on: bool,
    pub online: bool,
    /// Alert flag raised by the source of truth (device firmware or backend).
    pub alert_active: bool,
    /// Acknowledgement recorded upstream, possibly by another client.
    pub alert_acknowledged: bool,
    /// Seconds over the critical threshold as counted by the source of truth.
    pub high_temp_elapsed_secs: Option<u64>,
    pub wifi_rssi: Option<i32>,
    pub uptime_secs: Option<u64>,
    pub simulation_mode: bool,
    pub defrost_mode: bool,
    pub cooldown_mode: bool,
    pub cooldown_remaining_secs: u64,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl DeviceReading {
    /// An online reading with every optional field absent.
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            temp_avg: None,
            temp1: None,
            temp2: None,
            humidity: None,
            door_open: false,
            relay_on: false,
            online: true,
            alert_active: false,
            alert_acknowledged: false,
            high_temp_elapsed_secs: None,
            wifi_rssi: None,
            uptime_secs: None,
            simulation_mode: false,
            defrost_mode: false,
            cooldown_mode: false,
            cooldown_remaining_secs: 0,
            message: None,
            timestamp,
        }
    }

    /// Effective temperature: `temp_avg` when valid, else the mean of the
    /// valid probes, else `None`.
    pub fn temperature(&self) -> Option<f64> {
        if let Some(t) = valid_temperature(self.temp_avg) {
            return Some(t);
        }
        let probes: Vec<f64> = [self.temp1, self.temp2]
            .into_iter()
            .filter_map(valid_temperature)
            .collect();
        if probes.is_empty() {
            None
        } else {
            Some(probes.iter().sum::<f64>() / probes.len() as f64)
        }
    }

    /// Alarm evaluation is paused while defrosting and during the cooldown after.
    pub fn evaluation_suppressed(&self) -> bool {
        self.defrost_mode || self.cooldown_mode
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertThresholds {
    /// °C above which the unit is considered in breach.
    pub critical: f64,
    /// Seconds a breach must persist before the alarm fires.
    pub alert_delay_secs: u64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            critical: -10.0,
            alert_delay_secs: 300,
        }
    }
}

/// Typed result of one poll for one device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSnapshot {
    pub identity: DeviceIdentity,
    pub reading: DeviceReading,
    pub thresholds: Option<AlertThresholds>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoverySource {
    Known,
    Hostname,
    Registry,
    Broadcast,
    RangeScan,
}

impl fmt::Display for DiscoverySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiscoverySource::Known => "known",
            DiscoverySource::Hostname => "hostname",
            DiscoverySource::Registry => "registry",
            DiscoverySource::Broadcast => "broadcast",
            DiscoverySource::RangeScan => "range_scan",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryResult {
    /// Host or IP, optionally with `:port`.
    pub address: String,
    pub verified: bool,
    pub source: DiscoverySource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Silence,
    AcknowledgeAlert,
    RelayOff,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CommandKind::Silence => "silence",
            CommandKind::AcknowledgeAlert => "acknowledge_alert",
            CommandKind::RelayOff => "relay_off",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub id: Uuid,
    pub kind: CommandKind,
    pub target_device_id: String,
    pub issued_at: DateTime<Utc>,
}

impl Command {
    pub fn new(kind: CommandKind, target_device_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            target_device_id: target_device_id.into(),
            issued_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_values_are_invalid() {
        assert!(!is_valid_temperature(-127.0));
        assert!(!is_valid_temperature(-999.0));
        assert!(!is_valid_temperature(-55.0));
        assert!(!is_valid_temperature(125.0));
        assert!(!is_valid_temperature(f64::NAN));
        assert!(is_valid_temperature(-54.9));
        assert!(is_valid_temperature(-22.5));
        assert!(is_valid_temperature(124.9));
    }

    #[test]
    fn temperature_prefers_average() {
        let mut r = DeviceReading::empty(Utc::now());
        r.temp_avg = Some(-20.0);
        r.temp1 = Some(-30.0);
        assert_eq!(r.temperature(), Some(-20.0));
    }

    #[test]
    fn temperature_falls_back_to_valid_probes() {
        let mut r = DeviceReading::empty(Utc::now());
        r.temp_avg = Some(-999.0);
        r.temp1 = Some(-20.0);
        r.temp2 = Some(-127.0);
        assert_eq!(r.temperature(), Some(-20.0));

        r.temp2 = Some(-22.0);
        assert_eq!(r.temperature(), Some(-21.0));
    }

    #[test]
    fn temperature_absent_when_all_probes_invalid() {
        let mut r = DeviceReading::empty(Utc::now());
        r.temp_avg = Some(130.0);
        r.temp1 = Some(-127.0);
        assert_eq!(r.temperature(), None);
    }

    #[test]
    fn suppression_covers_defrost_and_cooldown() {
        let mut r = DeviceReading::empty(Utc::now());
        assert!(!r.evaluation_suppressed());
        r.cooldown_mode = true;
        assert!(r.evaluation_suppressed());
        r.cooldown_mode = false;
        r.defrost_mode = true;
        assert!(r.evaluation_suppressed());
    }

    #[test]
    fn command_kind_display() {
        assert_eq!(CommandKind::Silence.to_string(), "silence");
        assert_eq!(CommandKind::AcknowledgeAlert.to_string(), "acknowledge_alert");
        assert_eq!(CommandKind::RelayOff.to_string(), "relay_off");
    }
}
