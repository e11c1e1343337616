//! Stand-in for the embedded unit: the same HTTP surface the monitor polls,
//! plus `/sim/*` knobs to drive temperature, door and alarm by hand.

pub mod dto;
pub mod errors;
pub mod handlers;
pub mod udp;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use chrono::Utc;
use tokio::{sync::Mutex, time::Instant};
use tracing::info;

use crate::{
    device::{
        models::{DeviceBlock, DeviceConfig, SensorBlock, StatusResponse, SystemBlock},
        ALERT_ACK_PATH, CONFIG_PATH, RELAY_PATH, STATUS_PATH,
    },
    models::DeviceIdentity,
};

const INITIAL_TEMPERATURE: f64 = -22.5;
const PROBE_SPREAD: f64 = 0.2;

pub type SharedState = Arc<Mutex<SimState>>;

#[derive(Debug)]
pub struct SimState {
    pub identity: DeviceIdentity,
    pub config: DeviceConfig,
    pub temperature: f64,
    pub humidity: Option<f64>,
    pub door_open: bool,
    door_open_since: Option<Instant>,
    pub alert_active: bool,
    pub alert_acknowledged: bool,
    pub critical: bool,
    pub alert_message: String,
    pub relay_on: bool,
    pub defrost_mode: bool,
    cooldown_until: Option<Instant>,
    high_temp_since: Option<Instant>,
    /// Set by `/sim/alert` and `/api/alert/test`; survives re-evaluation.
    forced: bool,
    started: Instant,
}

impl SimState {
    pub fn new(identity: DeviceIdentity) -> Self {
        Self {
            identity,
            config: DeviceConfig {
                simulation_mode: true,
                ..DeviceConfig::default()
            },
            temperature: INITIAL_TEMPERATURE,
            humidity: None,
            door_open: false,
            door_open_since: None,
            alert_active: false,
            alert_acknowledged: false,
            critical: false,
            alert_message: String::new(),
            relay_on: false,
            defrost_mode: false,
            cooldown_until: None,
            high_temp_since: None,
            forced: false,
            started: Instant::now(),
        }
    }

    pub fn shared(identity: DeviceIdentity) -> SharedState {
        Arc::new(Mutex::new(Self::new(identity)))
    }

    pub fn set_temperature(&mut self, temperature: f64) {
        self.temperature = temperature;
        self.reevaluate();
    }

    pub fn toggle_door(&mut self) -> bool {
        self.door_open = !self.door_open;
        self.door_open_since = self.door_open.then(Instant::now);
        self.reevaluate();
        self.door_open
    }

    pub fn force_alert(&mut self, message: &str) {
        self.forced = true;
        self.raise(message, true);
    }

    pub fn toggle_alert(&mut self) -> bool {
        if self.alert_active {
            self.forced = false;
            self.clear();
        } else {
            self.force_alert("Simulated alert");
        }
        self.alert_active
    }

    pub fn toggle_defrost(&mut self) -> bool {
        self.defrost_mode = !self.defrost_mode;
        self.reevaluate();
        self.defrost_mode
    }

    pub fn start_cooldown(&mut self, secs: u64) {
        self.cooldown_until = (secs > 0).then(|| Instant::now() + std::time::Duration::from_secs(secs));
        self.reevaluate();
    }

    /// `POST /api/alert/ack`: siren off, alert stays flagged but acknowledged.
    pub fn acknowledge(&mut self) {
        self.relay_on = false;
        if self.alert_active {
            self.alert_acknowledged = true;
        }
        info!(device_id = %self.identity.id, "Alert acknowledged");
    }

    pub fn cooldown_remaining_secs(&self) -> u64 {
        self.cooldown_until
            .map(|until| until.saturating_duration_since(Instant::now()).as_secs())
            .unwrap_or(0)
    }

    fn door_open_secs(&self) -> u64 {
        self.door_open_since
            .map(|since| since.elapsed().as_secs())
            .unwrap_or(0)
    }

    fn high_temp_elapsed_secs(&self) -> u64 {
        self.high_temp_since
            .map(|since| since.elapsed().as_secs())
            .unwrap_or(0)
    }

    /// Firmware alert rules: critical temperature held for the configured
    /// delay, or the door left open too long. Defrost and cooldown mute both.
    pub fn reevaluate(&mut self) {
        if self.cooldown_until.is_some() && self.cooldown_remaining_secs() == 0 {
            self.cooldown_until = None;
        }
        if self.forced {
            return;
        }

        if self.temperature > self.config.temp_critical {
            self.high_temp_since.get_or_insert_with(Instant::now);
        } else {
            self.high_temp_since = None;
        }

        let suppressed = self.defrost_mode || self.cooldown_until.is_some();
        let temp_alarm =
            self.high_temp_since.is_some() && self.high_temp_elapsed_secs() >= self.config.alert_delay_sec;
        let door_alarm = self.door_open && self.door_open_secs() >= self.config.door_open_max_sec;

        if suppressed || !(temp_alarm || door_alarm) {
            if self.alert_active {
                info!(device_id = %self.identity.id, "Alert cleared");
            }
            self.clear();
        } else if !self.alert_active {
            let message = if temp_alarm {
                format!("CRITICAL: temperature {:.1}°C", self.temperature)
            } else {
                format!("Door open for {}s", self.door_open_secs())
            };
            self.raise(&message, temp_alarm);
        }
    }

    fn raise(&mut self, message: &str, critical: bool) {
        self.alert_active = true;
        self.alert_acknowledged = false;
        self.critical = critical;
        self.alert_message = message.to_owned();
        self.relay_on = self.config.relay_enabled;
        info!(device_id = %self.identity.id, message = %message, "Alert raised");
    }

    fn clear(&mut self) {
        self.alert_active = false;
        self.alert_acknowledged = false;
        self.critical = false;
        self.alert_message.clear();
        self.relay_on = false;
    }

    pub fn status(&self) -> StatusResponse {
        StatusResponse {
            sensor: Some(SensorBlock {
                temp1: Some(self.temperature + PROBE_SPREAD),
                temp2: Some(self.temperature - PROBE_SPREAD),
                temp_avg: Some(self.temperature),
                humidity: self.humidity,
                door_open: self.door_open,
                door_open_sec: self.door_open_secs(),
                valid: Some(true),
            }),
            system: Some(SystemBlock {
                alert_active: self.alert_active,
                alert_acknowledged: self.alert_acknowledged,
                critical: self.critical,
                alert_message: Some(self.alert_message.clone()),
                relay_on: self.relay_on,
                uptime_sec: Some(self.started.elapsed().as_secs()),
                wifi_rssi: Some(-45),
                simulation_mode: self.config.simulation_mode,
                defrost_mode: self.defrost_mode,
                cooldown_mode: self.cooldown_until.is_some(),
                cooldown_remaining_sec: self.cooldown_remaining_secs(),
                high_temp_elapsed_sec: self.high_temp_since.map(|_| self.high_temp_elapsed_secs()),
            }),
            device: Some(DeviceBlock {
                id: Some(self.identity.id.clone()),
                name: Some(self.identity.display_name.clone()),
                ip: None,
            }),
            timestamp: Some(Utc::now().to_rfc3339()),
        }
    }
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route(STATUS_PATH, get(handlers::get_status))
        .route(CONFIG_PATH, get(handlers::get_config).post(handlers::update_config))
        .route(ALERT_ACK_PATH, post(handlers::acknowledge_alert))
        .route("/api/alert/test", post(handlers::test_alert))
        .route(RELAY_PATH, post(handlers::set_relay))
        .route("/sim/temp", get(handlers::sim_temperature))
        .route("/sim/door", get(handlers::sim_door))
        .route("/sim/alert", get(handlers::sim_alert))
        .route("/sim/defrost", get(handlers::sim_defrost))
        .route("/sim/cooldown", get(handlers::sim_cooldown))
        .route("/health", get(handlers::health))
        .with_state(state)
}
