//! Observer channel for UI layers and loggers.
//!
//! Every cache/engine update is republished here; subscribers never touch the
//! cache or the engine directly.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::{
    alerts::AlertState,
    models::{CommandKind, DeviceIdentity, DeviceReading, DiscoveryResult},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Device,
    Cloud,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    /// Fresh reading applied to the cache and evaluated.
    Updated {
        identity: DeviceIdentity,
        reading: DeviceReading,
        alert: AlertState,
    },
    AlertChanged {
        device_id: String,
        from: AlertState,
        to: AlertState,
    },
    /// A poll failed; the cache was left untouched.
    Unreachable { channel: ChannelKind, reason: String },
    CommandDelivered {
        device_id: String,
        kind: CommandKind,
    },
    CommandFailed {
        device_id: String,
        kind: CommandKind,
        reason: String,
    },
    DiscoveryFinished { result: Option<DiscoveryResult> },
}

pub type EventReceiver = broadcast::Receiver<MonitorEvent>;

#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: broadcast::Sender<MonitorEvent>,
}

impl EventDispatcher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    pub fn send(&self, event: MonitorEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(128)
    }
}
