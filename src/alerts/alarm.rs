use std::{
    collections::HashSet,
    sync::{Arc, Mutex, PoisonError},
};

use tracing::{info, warn};

use crate::models::DeviceIdentity;

/// Repeating vibration waveform in milliseconds (off, on, off, on, ...).
pub const VIBRATION_PATTERN: [u64; 7] = [0, 500, 200, 500, 200, 500, 1000];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationAction {
    Silence,
    Open,
}

/// High-priority, full-screen, lock-screen-visible alert notification.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertNotification {
    pub device_id: String,
    pub title: String,
    pub message: String,
    pub actions: [NotificationAction; 2],
    pub full_screen: bool,
}

impl AlertNotification {
    pub fn critical(identity: &DeviceIdentity, message: impl Into<String>) -> Self {
        Self {
            device_id: identity.id.clone(),
            title: format!("CRITICAL ALERT - {}", identity.display_name),
            message: message.into(),
            actions: [NotificationAction::Silence, NotificationAction::Open],
            full_screen: true,
        }
    }
}

/// Host notification/sound surface. Implementations must be cheap and
/// non-blocking; they are called from the alert path.
pub trait AlarmSurface: Send + Sync {
    /// Loop the alarm tone at maximum alarm-stream volume.
    fn start_sound(&self);
    fn stop_sound(&self);
    fn start_vibration(&self, pattern: &[u64]);
    fn stop_vibration(&self);
    fn post_alert(&self, notification: &AlertNotification);
    fn cancel_alert(&self, device_id: &str);
    /// Transient status line ("reconnecting...", "no response").
    fn set_status(&self, status: &str);
}

/// Headless surface that reports through `tracing`.
#[derive(Debug, Default)]
pub struct LogAlarmSurface;

impl AlarmSurface for LogAlarmSurface {
    fn start_sound(&self) {
        warn!("Alarm sound started");
    }

    fn stop_sound(&self) {
        info!("Alarm sound stopped");
    }

    fn start_vibration(&self, pattern: &[u64]) {
        info!(pattern = ?pattern, "Vibration started");
    }

    fn stop_vibration(&self) {
        info!("Vibration stopped");
    }

    fn post_alert(&self, notification: &AlertNotification) {
        warn!(
            device_id = %notification.device_id,
            title = %notification.title,
            message = %notification.message,
            "ALERT"
        );
    }

    fn cancel_alert(&self, device_id: &str) {
        info!(device_id = %device_id, "Alert notification cancelled");
    }

    fn set_status(&self, status: &str) {
        info!(status = %status, "Status");
    }
}

/// Drives an [`AlarmSurface`] from alert transitions.
///
/// Sound and vibration are shared by all devices: they start with the first
/// sounding device and stop when the last one is silenced or resolved.
/// Raising an already-sounding device does nothing.
#[derive(Clone)]
pub struct AlarmController {
    surface: Arc<dyn AlarmSurface>,
    sounding: Arc<Mutex<HashSet<String>>>,
}

impl AlarmController {
    pub fn new(surface: Arc<dyn AlarmSurface>) -> Self {
        Self {
            surface,
            sounding: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn surface(&self) -> &Arc<dyn AlarmSurface> {
        &self.surface
    }

    pub fn raise(&self, identity: &DeviceIdentity, message: &str) {
        let mut sounding = self.sounding.lock().unwrap_or_else(PoisonError::into_inner);
        if !sounding.insert(identity.id.clone()) {
            return;
        }
        if sounding.len() == 1 {
            self.surface.start_sound();
            self.surface.start_vibration(&VIBRATION_PATTERN);
        }
        self.surface
            .post_alert(&AlertNotification::critical(identity, message));
    }

    pub fn stop(&self, device_id: &str) {
        let mut sounding = self.sounding.lock().unwrap_or_else(PoisonError::into_inner);
        if !sounding.remove(device_id) {
            return;
        }
        self.surface.cancel_alert(device_id);
        if sounding.is_empty() {
            self.surface.stop_sound();
            self.surface.stop_vibration();
        }
    }

    pub fn is_sounding(&self, device_id: &str) -> bool {
        self.sounding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(device_id)
    }

    pub fn set_status(&self, status: &str) {
        self.surface.set_status(status);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub enum SurfaceCall {
        StartSound,
        StopSound,
        StartVibration,
        StopVibration,
        Post(String),
        Cancel(String),
        Status(String),
    }

    /// Records every call for assertions.
    #[derive(Default)]
    pub struct RecordingSurface {
        pub calls: Mutex<Vec<SurfaceCall>>,
    }

    impl RecordingSurface {
        pub fn calls(&self) -> Vec<SurfaceCall> {
            self.calls.lock().unwrap().clone()
        }

        pub fn count(&self, call: &SurfaceCall) -> usize {
            self.calls().iter().filter(|c| *c == call).count()
        }

        fn push(&self, call: SurfaceCall) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl AlarmSurface for RecordingSurface {
        fn start_sound(&self) {
            self.push(SurfaceCall::StartSound);
        }
        fn stop_sound(&self) {
            self.push(SurfaceCall::StopSound);
        }
        fn start_vibration(&self, _pattern: &[u64]) {
            self.push(SurfaceCall::StartVibration);
        }
        fn stop_vibration(&self) {
            self.push(SurfaceCall::StopVibration);
        }
        fn post_alert(&self, notification: &AlertNotification) {
            self.push(SurfaceCall::Post(notification.device_id.clone()));
        }
        fn cancel_alert(&self, device_id: &str) {
            self.push(SurfaceCall::Cancel(device_id.to_owned()));
        }
        fn set_status(&self, status: &str) {
            self.push(SurfaceCall::Status(status.to_owned()));
        }
    }
}
