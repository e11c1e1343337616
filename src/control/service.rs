use std::sync::{Arc, PoisonError, RwLock};

use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::CommandSink;
use crate::{
    error::CommandError,
    events::{EventDispatcher, MonitorEvent},
    models::Command,
};

/// Per-channel outcome of one `send`.
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub delivered: Vec<String>,
    pub failures: Vec<(String, String)>,
}

impl DispatchReport {
    pub fn is_delivered(&self) -> bool {
        !self.delivered.is_empty()
    }
}

/// Sends each command to every configured channel independently.
///
/// A command counts as delivered when at least one channel accepts it; the
/// other channel, or the next poll, reconciles the rest.
#[derive(Clone)]
pub struct CommandDispatcher {
    device: Arc<RwLock<Option<Arc<dyn CommandSink>>>>,
    cloud: Option<Arc<dyn CommandSink>>,
    events: EventDispatcher,
}

impl CommandDispatcher {
    pub fn new(
        device: Option<Arc<dyn CommandSink>>,
        cloud: Option<Arc<dyn CommandSink>>,
        events: EventDispatcher,
    ) -> Self {
        Self {
            device: Arc::new(RwLock::new(device)),
            cloud,
            events,
        }
    }

    /// Swap the device-direct sink, e.g. after rediscovery found a new address.
    pub fn set_device_sink(&self, sink: Option<Arc<dyn CommandSink>>) {
        *self.device.write().unwrap_or_else(PoisonError::into_inner) = sink;
    }

    fn device_sink(&self) -> Option<Arc<dyn CommandSink>> {
        self.device
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub async fn send(&self, command: &Command) -> Result<DispatchReport, CommandError> {
        let device = self.device_sink();
        if device.is_none() && self.cloud.is_none() {
            return Err(CommandError::NoChannel);
        }

        let (device_result, cloud_result) = tokio::join!(
            deliver_via(device.as_deref(), command),
            deliver_via(self.cloud.as_deref(), command),
        );

        let mut report = DispatchReport::default();
        for (name, result) in [device_result, cloud_result].into_iter().flatten() {
            match result {
                Ok(()) => report.delivered.push(name),
                Err(e) => {
                    warn!(
                        channel = %name,
                        device_id = %command.target_device_id,
                        command = %command.kind,
                        error = %e,
                        "Command delivery failed on one channel"
                    );
                    report.failures.push((name, e.to_string()));
                }
            }
        }

        if report.is_delivered() {
            info!(
                device_id = %command.target_device_id,
                command = %command.kind,
                channels = ?report.delivered,
                "Command delivered"
            );
            Ok(report)
        } else {
            let reasons: Vec<String> = report
                .failures
                .iter()
                .map(|(name, reason)| format!("{name}: {reason}"))
                .collect();
            Err(CommandError::Rejected(reasons.join("; ")))
        }
    }

    /// Send in the background and publish the outcome. The caller never waits
    /// on network I/O.
    pub fn send_detached(&self, command: Command) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            let event = match dispatcher.send(&command).await {
                Ok(_) => MonitorEvent::CommandDelivered {
                    device_id: command.target_device_id.clone(),
                    kind: command.kind,
                },
                Err(e) => {
                    warn!(device_id = %command.target_device_id, command = %command.kind, error = %e, "Command not delivered");
                    MonitorEvent::CommandFailed {
                        device_id: command.target_device_id.clone(),
                        kind: command.kind,
                        reason: e.to_string(),
                    }
                }
            };
            dispatcher.events.send(event);
        })
    }
}

async fn deliver_via(
    sink: Option<&dyn CommandSink>,
    command: &Command,
) -> Option<(String, Result<(), CommandError>)> {
    let sink = sink?;
    Some((sink.name().to_owned(), sink.deliver(command).await))
}
