use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    alerts::{AlarmController, AlertAction, AlertEngine, AlertState, Transition},
    control::CommandDispatcher,
    error::FetchError,
    events::{ChannelKind, EventDispatcher, MonitorEvent},
    models::{Command, CommandKind, DeviceSnapshot},
    reading_cache::ReadingCache,
};

pub const STATUS_CONNECTED: &str = "connected";
pub const STATUS_NO_RESPONSE: &str = "no response";
pub const STATUS_RECONNECTING: &str = "reconnecting";

/// Everything one running monitor owns: cache, engine, alarm, outbound
/// commands and the observer channel. Cloning shares the same session.
#[derive(Clone)]
pub struct MonitorSession {
    cache: ReadingCache,
    engine: AlertEngine,
    alarm: AlarmController,
    commands: CommandDispatcher,
    events: EventDispatcher,
    status: Arc<Mutex<String>>,
}

impl MonitorSession {
    pub fn new(
        cache: ReadingCache,
        engine: AlertEngine,
        alarm: AlarmController,
        commands: CommandDispatcher,
        events: EventDispatcher,
    ) -> Self {
        Self {
            cache,
            engine,
            alarm,
            commands,
            events,
            status: Arc::new(Mutex::new(String::new())),
        }
    }

    pub fn cache(&self) -> &ReadingCache {
        &self.cache
    }

    pub fn engine(&self) -> &AlertEngine {
        &self.engine
    }

    pub fn commands(&self) -> &CommandDispatcher {
        &self.commands
    }

    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    /// Apply one typed snapshot: cache it, evaluate it, run the resulting
    /// side effects and publish the update.
    pub async fn ingest(&self, snapshot: DeviceSnapshot) -> Transition {
        let DeviceSnapshot {
            identity,
            reading,
            thresholds,
        } = snapshot;

        if let Some(thresholds) = thresholds {
            self.engine.set_thresholds(&identity.id, thresholds);
        }
        self.cache.update(identity.clone(), reading.clone()).await;

        let transition = self.engine.evaluate(&identity, &reading);
        self.apply(&transition);

        self.events.send(MonitorEvent::Updated {
            identity,
            reading,
            alert: transition.to,
        });
        transition
    }

    /// Local silence. The alarm stops before this returns; the acknowledgement
    /// goes out in the background and its failure does not undo the silence.
    pub fn silence(&self, device_id: &str) -> Option<Transition> {
        let transition = self.engine.silence(device_id)?;
        self.apply(&transition);
        Some(transition)
    }

    /// Silence every device with a pending or sounding alarm.
    pub fn silence_all(&self) -> Vec<Transition> {
        self.engine
            .states()
            .into_iter()
            .filter(|(_, state)| {
                matches!(state, AlertState::Active { .. } | AlertState::PreAlert { .. })
            })
            .filter_map(|(id, _)| self.silence(&id))
            .collect()
    }

    /// Silence a unit whose alarm is only known upstream, e.g. an unresolved
    /// backend alert this session never evaluated. No local state changes.
    pub fn silence_upstream(&self, device_id: &str) -> JoinHandle<()> {
        info!(device_id = %device_id, "Upstream silence requested");
        self.commands
            .send_detached(Command::new(CommandKind::Silence, device_id))
    }

    pub fn relay_off(&self, device_id: &str) -> JoinHandle<()> {
        info!(device_id = %device_id, "Relay off requested");
        self.commands
            .send_detached(Command::new(CommandKind::RelayOff, device_id))
    }

    /// A poll failed. Cache and alert state are left as they were.
    pub fn report_failure(&self, channel: ChannelKind, error: &FetchError) {
        if !error.is_connectivity() {
            warn!(channel = ?channel, error = %error, "Ignoring malformed payload");
            return;
        }
        warn!(channel = ?channel, error = %error, "Source unreachable");
        self.set_status(STATUS_NO_RESPONSE);
        self.events.send(MonitorEvent::Unreachable {
            channel,
            reason: error.to_string(),
        });
    }

    /// Update the transient status line; repeated values are not re-sent.
    pub fn set_status(&self, status: &str) {
        let mut current = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != status {
            *current = status.to_owned();
            self.alarm.set_status(status);
        }
    }

    pub fn status(&self) -> String {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn apply(&self, transition: &Transition) {
        for action in &transition.actions {
            match action {
                AlertAction::RaiseAlarm { identity, message } => self.alarm.raise(identity, message),
                AlertAction::StopAlarm { device_id } => self.alarm.stop(device_id),
                AlertAction::Dispatch(command) => {
                    debug!(device_id = %command.target_device_id, command = %command.kind, "Dispatching");
                    self.commands.send_detached(command.clone());
                }
            }
        }

        if transition.changed() {
            self.events.send(MonitorEvent::AlertChanged {
                device_id: transition.device_id.clone(),
                from: transition.from,
                to: transition.to,
            });
        }
    }
}
