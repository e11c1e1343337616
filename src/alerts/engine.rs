use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::models::{AlertThresholds, Command, CommandKind, DeviceIdentity, DeviceReading};

/// Per-device alarm lifecycle.
///
/// `Normal → PreAlert → Active → (Silenced | Resolved) → Normal`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AlertState {
    #[default]
    Normal,
    PreAlert {
        elapsed_secs: u64,
    },
    Active {
        acknowledged: bool,
    },
    Silenced,
    Resolved,
}

impl AlertState {
    pub fn label(&self) -> &'static str {
        match self {
            AlertState::Normal => "normal",
            AlertState::PreAlert { .. } => "pre_alert",
            AlertState::Active { .. } => "active",
            AlertState::Silenced => "silenced",
            AlertState::Resolved => "resolved",
        }
    }
}

/// Side effect requested by a transition. The engine never performs I/O itself.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertAction {
    /// Start looping sound and vibration, post the full-screen notification.
    RaiseAlarm {
        identity: DeviceIdentity,
        message: String,
    },
    /// Stop sound and vibration, cancel the alert notification.
    StopAlarm { device_id: String },
    /// Best-effort outbound command.
    Dispatch(Command),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub device_id: String,
    pub from: AlertState,
    pub to: AlertState,
    pub actions: Vec<AlertAction>,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnginePolicy {
    /// An upstream `alert_acknowledged` flag silences the local alarm.
    pub remote_ack_silences: bool,
}

impl Default for EnginePolicy {
    fn default() -> Self {
        Self {
            remote_ack_silences: true,
        }
    }
}

#[derive(Debug, Default)]
struct DeviceAlert {
    state: AlertState,
    pre_alert_since: Option<DateTime<Utc>>,
    thresholds: Option<AlertThresholds>,
}

/// Owns the `AlertState` of every device; `evaluate` and `silence` are the only
/// mutation paths. Cloning shares the same state.
#[derive(Clone)]
pub struct AlertEngine {
    defaults: AlertThresholds,
    policy: EnginePolicy,
    devices: Arc<Mutex<HashMap<String, DeviceAlert>>>,
}

impl AlertEngine {
    pub fn new(defaults: AlertThresholds, policy: EnginePolicy) -> Self {
        Self {
            defaults,
            policy,
            devices: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, DeviceAlert>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install device-specific thresholds (from the device config endpoint or
    /// the backend row). Takes effect on the next reading.
    pub fn set_thresholds(&self, device_id: &str, thresholds: AlertThresholds) {
        self.lock().entry(device_id.to_owned()).or_default().thresholds = Some(thresholds);
    }

    pub fn thresholds(&self, device_id: &str) -> AlertThresholds {
        self.lock()
            .get(device_id)
            .and_then(|d| d.thresholds)
            .unwrap_or(self.defaults)
    }

    pub fn state(&self, device_id: &str) -> AlertState {
        self.lock().get(device_id).map(|d| d.state).unwrap_or_default()
    }

    pub fn states(&self) -> Vec<(String, AlertState)> {
        let mut states: Vec<_> = self
            .lock()
            .iter()
            .map(|(id, d)| (id.clone(), d.state))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    /// Feed one reading. Readings of a device must arrive in order.
    pub fn evaluate(&self, identity: &DeviceIdentity, reading: &DeviceReading) -> Transition {
        let mut devices = self.lock();
        let entry = devices.entry(identity.id.clone()).or_default();
        let from = entry.state;

        // Resolved is bookkeeping only.
        if entry.state == AlertState::Resolved {
            entry.state = AlertState::Normal;
            entry.pre_alert_since = None;
        }

        let thresholds = entry.thresholds.unwrap_or(self.defaults);
        let temperature = reading.temperature();
        // `None` means "no information": never treated as a clear.
        let over = temperature.map(|t| t > thresholds.critical);
        let cleared = over == Some(false) && !reading.alert_active;
        let mut actions = Vec::new();

        let next = match entry.state {
            AlertState::Normal | AlertState::PreAlert { .. } if reading.alert_active => {
                entry.pre_alert_since = None;
                if reading.alert_acknowledged && self.policy.remote_ack_silences {
                    AlertState::Silenced
                } else {
                    actions.push(AlertAction::RaiseAlarm {
                        identity: identity.clone(),
                        message: alarm_message(identity, reading, temperature, &thresholds),
                    });
                    AlertState::Active {
                        acknowledged: reading.alert_acknowledged,
                    }
                }
            }

            AlertState::Normal | AlertState::PreAlert { .. } if reading.evaluation_suppressed() => {
                if matches!(entry.state, AlertState::PreAlert { .. }) {
                    debug!(device_id = %identity.id, "Defrost/cooldown active; discarding pre-alert");
                }
                entry.pre_alert_since = None;
                AlertState::Normal
            }

            AlertState::Normal => match over {
                Some(true) => {
                    entry.pre_alert_since = Some(reading.timestamp);
                    let elapsed_secs = reading.high_temp_elapsed_secs.unwrap_or(0);
                    self.escalate(identity, reading, entry, elapsed_secs, &thresholds, &mut actions)
                }
                _ => AlertState::Normal,
            },

            AlertState::PreAlert { elapsed_secs: prev } => match over {
                Some(true) => {
                    let since = *entry.pre_alert_since.get_or_insert(reading.timestamp);
                    let local = (reading.timestamp - since).num_seconds().max(0) as u64;
                    let elapsed_secs = reading.high_temp_elapsed_secs.unwrap_or(local).max(prev);
                    self.escalate(identity, reading, entry, elapsed_secs, &thresholds, &mut actions)
                }
                Some(false) => {
                    entry.pre_alert_since = None;
                    AlertState::Normal
                }
                None => AlertState::PreAlert { elapsed_secs: prev },
            },

            AlertState::Active { acknowledged } => {
                if cleared {
                    actions.push(AlertAction::StopAlarm {
                        device_id: identity.id.clone(),
                    });
                    AlertState::Resolved
                } else if reading.alert_acknowledged && self.policy.remote_ack_silences {
                    actions.push(AlertAction::StopAlarm {
                        device_id: identity.id.clone(),
                    });
                    AlertState::Silenced
                } else {
                    AlertState::Active {
                        acknowledged: acknowledged || reading.alert_acknowledged,
                    }
                }
            }

            AlertState::Silenced => {
                if cleared {
                    AlertState::Resolved
                } else {
                    AlertState::Silenced
                }
            }

            AlertState::Resolved => unreachable!("resolved is normalised above"),
        };

        entry.state = next;
        if from != next {
            info!(
                device_id = %identity.id,
                from = from.label(),
                to = next.label(),
                temperature = ?temperature,
                "Alert state changed"
            );
        }

        Transition {
            device_id: identity.id.clone(),
            from,
            to: next,
            actions,
        }
    }

    fn escalate(
        &self,
        identity: &DeviceIdentity,
        reading: &DeviceReading,
        entry: &mut DeviceAlert,
        elapsed_secs: u64,
        thresholds: &AlertThresholds,
        actions: &mut Vec<AlertAction>,
    ) -> AlertState {
        if elapsed_secs < thresholds.alert_delay_secs {
            return AlertState::PreAlert { elapsed_secs };
        }
        entry.pre_alert_since = None;
        if reading.alert_acknowledged && self.policy.remote_ack_silences {
            return AlertState::Silenced;
        }
        actions.push(AlertAction::RaiseAlarm {
            identity: identity.clone(),
            message: alarm_message(identity, reading, reading.temperature(), thresholds),
        });
        AlertState::Active {
            acknowledged: reading.alert_acknowledged,
        }
    }

    /// User-initiated silence (button, notification action, control command).
    ///
    /// From `Active` the local alarm stops at once and an `AcknowledgeAlert`
    /// command is requested; from `PreAlert` the pending alarm is pre-empted for
    /// the rest of this breach. Any other state is a no-op and returns `None`.
    pub fn silence(&self, device_id: &str) -> Option<Transition> {
        let mut devices = self.lock();
        let entry = devices.get_mut(device_id)?;
        let from = entry.state;

        let actions = match from {
            AlertState::Active { .. } => vec![
                AlertAction::StopAlarm {
                    device_id: device_id.to_owned(),
                },
                AlertAction::Dispatch(Command::new(CommandKind::AcknowledgeAlert, device_id)),
            ],
            AlertState::PreAlert { .. } => Vec::new(),
            _ => {
                debug!(device_id = %device_id, state = from.label(), "Silence ignored; no alarm pending");
                return None;
            }
        };

        entry.state = AlertState::Silenced;
        entry.pre_alert_since = None;
        warn!(device_id = %device_id, from = from.label(), "Alarm silenced locally");

        Some(Transition {
            device_id: device_id.to_owned(),
            from,
            to: AlertState::Silenced,
            actions,
        })
    }
}

fn alarm_message(
    identity: &DeviceIdentity,
    reading: &DeviceReading,
    temperature: Option<f64>,
    thresholds: &AlertThresholds,
) -> String {
    if let Some(msg) = reading.message.as_deref().filter(|m| !m.is_empty()) {
        return format!("{msg} - {}", identity.display_name);
    }
    match temperature {
        Some(t) => format!(
            "Critical temperature {t:.1}°C (limit {:.1}°C) - {}",
            thresholds.critical, identity.display_name
        ),
        None => format!("Alert reported by {}", identity.display_name),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    const DELAY: u64 = 300;

    fn engine() -> AlertEngine {
        AlertEngine::new(
            AlertThresholds {
                critical: -10.0,
                alert_delay_secs: DELAY,
            },
            EnginePolicy::default(),
        )
    }

    fn ident() -> DeviceIdentity {
        DeviceIdentity::new("REEFER-01", "Reefer Principal")
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn reading_at(secs: i64, temp: f64) -> DeviceReading {
        let mut r = DeviceReading::empty(t0() + Duration::seconds(secs));
        r.temp_avg = Some(temp);
        r
    }

    fn raised(t: &Transition) -> bool {
        t.actions
            .iter()
            .any(|a| matches!(a, AlertAction::RaiseAlarm { .. }))
    }

    #[test]
    fn unknown_device_is_normal() {
        assert_eq!(engine().state("nope"), AlertState::Normal);
    }

    #[test]
    fn breach_enters_pre_alert_with_zero_elapsed() {
        let e = engine();
        let t = e.evaluate(&ident(), &reading_at(0, -5.0));
        assert_eq!(t.to, AlertState::PreAlert { elapsed_secs: 0 });
        assert!(t.actions.is_empty());
    }

    #[test]
    fn sentinel_temperatures_never_trigger() {
        let e = engine();
        for (i, temp) in [130.0, 125.0, -55.0, -127.0, -999.0].into_iter().enumerate() {
            let t = e.evaluate(&ident(), &reading_at(i as i64 * 400, temp));
            assert_eq!(t.to, AlertState::Normal, "temp {temp}");
        }
    }

    #[test]
    fn drop_before_delay_never_activates() {
        let e = engine();
        e.evaluate(&ident(), &reading_at(0, -5.0));
        let t = e.evaluate(&ident(), &reading_at(DELAY as i64 - 1, -5.0));
        assert_eq!(t.to, AlertState::PreAlert { elapsed_secs: DELAY - 1 });
        let t = e.evaluate(&ident(), &reading_at(DELAY as i64, -15.0));
        assert_eq!(t.to, AlertState::Normal);
        assert!(t.actions.is_empty());
    }

    #[test]
    fn sustained_breach_activates_exactly_once() {
        let e = engine();
        let mut raises = 0;
        for secs in (0..=DELAY as i64 * 3).step_by(5) {
            let t = e.evaluate(&ident(), &reading_at(secs, -5.0));
            if raised(&t) {
                raises += 1;
            }
        }
        assert_eq!(raises, 1);
        assert_eq!(e.state("REEFER-01"), AlertState::Active { acknowledged: false });
    }

    #[test]
    fn server_elapsed_is_authoritative() {
        let e = engine();
        e.evaluate(&ident(), &reading_at(0, -5.0));
        let mut r = reading_at(5, -5.0);
        r.high_temp_elapsed_secs = Some(DELAY);
        let t = e.evaluate(&ident(), &r);
        assert!(matches!(t.to, AlertState::Active { .. }));
        assert!(raised(&t));
    }

    #[test]
    fn elapsed_never_decreases() {
        let e = engine();
        e.evaluate(&ident(), &reading_at(0, -5.0));
        e.evaluate(&ident(), &reading_at(100, -5.0));
        // Clock skew: an older timestamp must not shrink the counter.
        let t = e.evaluate(&ident(), &reading_at(50, -5.0));
        assert_eq!(t.to, AlertState::PreAlert { elapsed_secs: 100 });
    }

    #[test]
    fn missing_temperature_retains_state() {
        let e = engine();
        e.evaluate(&ident(), &reading_at(0, -5.0));
        let mut r = DeviceReading::empty(t0() + Duration::seconds(10));
        r.temp_avg = Some(-127.0);
        let t = e.evaluate(&ident(), &r);
        assert_eq!(t.to, AlertState::PreAlert { elapsed_secs: 0 });

        // Same while active: absence of data is not a clear.
        for s in (20..=DELAY as i64 + 20).step_by(20) {
            e.evaluate(&ident(), &reading_at(s, -5.0));
        }
        assert!(matches!(e.state("REEFER-01"), AlertState::Active { .. }));
        let t = e.evaluate(&ident(), &DeviceReading::empty(t0() + Duration::seconds(1000)));
        assert!(matches!(t.to, AlertState::Active { .. }));
        assert!(t.actions.is_empty());
    }

    #[test]
    fn local_silence_stops_alarm_and_requests_ack() {
        let e = engine();
        e.evaluate(&ident(), &reading_at(0, -5.0));
        e.evaluate(&ident(), &reading_at(DELAY as i64, -5.0));

        let t = e.silence("REEFER-01").unwrap();
        assert_eq!(t.to, AlertState::Silenced);
        assert!(t
            .actions
            .iter()
            .any(|a| matches!(a, AlertAction::StopAlarm { .. })));
        assert!(t.actions.iter().any(|a| matches!(
            a,
            AlertAction::Dispatch(Command { kind: CommandKind::AcknowledgeAlert, .. })
        )));

        // Ongoing breach does not re-raise.
        let t = e.evaluate(&ident(), &reading_at(DELAY as i64 + 5, -5.0));
        assert_eq!(t.to, AlertState::Silenced);
        assert!(t.actions.is_empty());
    }

    #[test]
    fn silence_in_normal_is_noop() {
        let e = engine();
        e.evaluate(&ident(), &reading_at(0, -20.0));
        assert!(e.silence("REEFER-01").is_none());
        assert!(e.silence("unknown").is_none());
    }

    #[test]
    fn silence_during_pre_alert_preempts_alarm() {
        let e = engine();
        e.evaluate(&ident(), &reading_at(0, -5.0));
        let t = e.silence("REEFER-01").unwrap();
        assert!(t.actions.is_empty());
        let t = e.evaluate(&ident(), &reading_at(DELAY as i64 * 2, -5.0));
        assert_eq!(t.to, AlertState::Silenced);
        assert!(!raised(&t));
    }

    #[test]
    fn full_cycle_repeats_without_stale_counters() {
        let e = engine();
        for cycle in 0..3_i64 {
            let base = cycle * 10_000;
            let t = e.evaluate(&ident(), &reading_at(base, -5.0));
            assert_eq!(t.to, AlertState::PreAlert { elapsed_secs: 0 }, "cycle {cycle}");
            let t = e.evaluate(&ident(), &reading_at(base + DELAY as i64, -5.0));
            assert!(raised(&t));
            e.silence("REEFER-01").unwrap();
            let t = e.evaluate(&ident(), &reading_at(base + 400, -20.0));
            assert_eq!(t.to, AlertState::Resolved);
            let t = e.evaluate(&ident(), &reading_at(base + 405, -20.0));
            assert_eq!(t.to, AlertState::Normal);
        }
    }

    #[test]
    fn resolved_followed_by_breach_goes_straight_to_pre_alert() {
        let e = engine();
        e.evaluate(&ident(), &reading_at(0, -5.0));
        e.evaluate(&ident(), &reading_at(DELAY as i64, -5.0));
        let t = e.evaluate(&ident(), &reading_at(DELAY as i64 + 5, -20.0));
        assert_eq!(t.to, AlertState::Resolved);
        assert!(t
            .actions
            .iter()
            .any(|a| matches!(a, AlertAction::StopAlarm { .. })));
        let t = e.evaluate(&ident(), &reading_at(DELAY as i64 + 10, -5.0));
        assert_eq!(t.from, AlertState::Resolved);
        assert_eq!(t.to, AlertState::PreAlert { elapsed_secs: 0 });
    }

    #[test]
    fn remote_ack_converges_to_silenced() {
        let e = engine();
        e.evaluate(&ident(), &reading_at(0, -5.0));
        e.evaluate(&ident(), &reading_at(DELAY as i64, -5.0));

        let mut r = reading_at(DELAY as i64 + 5, -5.0);
        r.alert_active = true;
        r.alert_acknowledged = true;
        let t = e.evaluate(&ident(), &r);
        assert_eq!(t.to, AlertState::Silenced);
        assert_eq!(
            t.actions,
            vec![AlertAction::StopAlarm {
                device_id: "REEFER-01".into()
            }]
        );
    }

    #[test]
    fn remote_ack_kept_as_flag_when_policy_disabled() {
        let e = AlertEngine::new(
            AlertThresholds::default(),
            EnginePolicy {
                remote_ack_silences: false,
            },
        );
        let mut r = reading_at(0, -5.0);
        r.alert_active = true;
        let t = e.evaluate(&ident(), &r);
        assert!(raised(&t));

        r.alert_acknowledged = true;
        let t = e.evaluate(&ident(), &r);
        assert_eq!(t.to, AlertState::Active { acknowledged: true });
        assert!(t.actions.is_empty());
    }

    #[test]
    fn upstream_alert_flag_activates_immediately() {
        let e = engine();
        let mut r = reading_at(0, -20.0);
        r.door_open = true;
        r.alert_active = true;
        r.message = Some("Door open too long".into());
        let t = e.evaluate(&ident(), &r);
        assert_eq!(t.to, AlertState::Active { acknowledged: false });
        match &t.actions[0] {
            AlertAction::RaiseAlarm { message, .. } => assert!(message.contains("Door open")),
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn upstream_alert_already_acknowledged_is_silent() {
        let e = engine();
        let mut r = reading_at(0, -5.0);
        r.alert_active = true;
        r.alert_acknowledged = true;
        let t = e.evaluate(&ident(), &r);
        assert_eq!(t.to, AlertState::Silenced);
        assert!(t.actions.is_empty());
    }

    #[test]
    fn silenced_waits_for_upstream_flag_to_clear() {
        let e = engine();
        let mut r = reading_at(0, -5.0);
        r.alert_active = true;
        e.evaluate(&ident(), &r);
        e.silence("REEFER-01");

        // Temperature back under threshold but the source still flags an alert.
        let mut r = reading_at(10, -20.0);
        r.alert_active = true;
        assert_eq!(e.evaluate(&ident(), &r).to, AlertState::Silenced);

        r.alert_active = false;
        assert_eq!(e.evaluate(&ident(), &r).to, AlertState::Resolved);
    }

    #[test]
    fn cooldown_discards_pre_alert() {
        let e = engine();
        e.evaluate(&ident(), &reading_at(0, -5.0));
        let mut r = reading_at(100, -5.0);
        r.cooldown_mode = true;
        r.cooldown_remaining_secs = 600;
        assert_eq!(e.evaluate(&ident(), &r).to, AlertState::Normal);

        // After cooldown the counter starts fresh.
        let t = e.evaluate(&ident(), &reading_at(DELAY as i64, -5.0));
        assert_eq!(t.to, AlertState::PreAlert { elapsed_secs: 0 });
    }

    #[test]
    fn defrost_does_not_clear_active_alarm() {
        let e = engine();
        e.evaluate(&ident(), &reading_at(0, -5.0));
        e.evaluate(&ident(), &reading_at(DELAY as i64, -5.0));
        let mut r = reading_at(DELAY as i64 + 5, -5.0);
        r.defrost_mode = true;
        assert!(matches!(e.evaluate(&ident(), &r).to, AlertState::Active { .. }));
    }

    #[test]
    fn per_device_thresholds_override_defaults() {
        let e = engine();
        e.set_thresholds(
            "REEFER-01",
            AlertThresholds {
                critical: -18.0,
                alert_delay_secs: 10,
            },
        );
        e.evaluate(&ident(), &reading_at(0, -15.0));
        let t = e.evaluate(&ident(), &reading_at(10, -15.0));
        assert!(raised(&t));
        assert_eq!(e.thresholds("other").alert_delay_secs, DELAY);
    }

    #[test]
    fn zero_delay_activates_on_first_breach() {
        let e = AlertEngine::new(
            AlertThresholds {
                critical: -10.0,
                alert_delay_secs: 0,
            },
            EnginePolicy::default(),
        );
        let t = e.evaluate(&ident(), &reading_at(0, -5.0));
        assert_eq!(t.from, AlertState::Normal);
        assert!(raised(&t));
    }

    #[test]
    fn devices_are_independent() {
        let e = engine();
        let other = DeviceIdentity::new("REEFER-02", "Backup");
        e.evaluate(&ident(), &reading_at(0, -5.0));
        e.evaluate(&other, &reading_at(0, -20.0));
        assert_eq!(
            e.states(),
            vec![
                ("REEFER-01".to_owned(), AlertState::PreAlert { elapsed_secs: 0 }),
                ("REEFER-02".to_owned(), AlertState::Normal),
            ]
        );
    }
}
