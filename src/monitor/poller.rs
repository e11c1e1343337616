use std::{sync::Arc, time::Duration};

use tokio::{
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{session::STATUS_CONNECTED, MonitorSession, ReadingSource};
use crate::events::ChannelKind;

/// Periodic fetch loop for one source.
pub struct Poller;

impl Poller {
    /// Spawn the loop. Fetches never overlap: a tick that arrives while a
    /// fetch is in flight is skipped.
    pub fn start(
        session: MonitorSession,
        source: Arc<dyn ReadingSource>,
        interval: Duration,
        channel: ChannelKind,
    ) -> PollerHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            info!(source = source.name(), interval_secs = interval.as_secs(), "Polling loop started");
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let result = tokio::select! {
                    _ = token.cancelled() => break,
                    result = source.fetch() => result,
                };

                match result {
                    Ok(snapshots) => {
                        debug!(source = source.name(), devices = snapshots.len(), "Poll succeeded");
                        session.set_status(STATUS_CONNECTED);
                        for snapshot in snapshots {
                            if token.is_cancelled() {
                                break;
                            }
                            session.ingest(snapshot).await;
                        }
                    }
                    Err(e) => session.report_failure(channel, &e),
                }
            }
            info!(source = source.name(), "Polling loop stopped");
        });

        PollerHandle { cancel, task }
    }
}

pub struct PollerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Stop the loop and wait for it. Once this returns the loop makes no
    /// further cache or engine updates.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}
