use std::{
    future::Future,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::PollerHandle;

/// The local device connection: at most one poller, and at most one connect
/// attempt in flight. Connecting runs on its own task so the control surface
/// stays responsive through a full discovery episode.
#[derive(Clone, Default)]
pub struct LocalLink {
    poller: Arc<Mutex<Option<PollerHandle>>>,
    connecting: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl LocalLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop the current poller and run `connect` in the background; its
    /// poller, if any, replaces the old one. Returns `false` without doing
    /// anything while an earlier attempt is still running.
    pub fn reconnect<F, Fut>(&self, connect: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Option<PollerHandle>> + Send + 'static,
    {
        let mut connecting = self.connecting.lock().unwrap_or_else(PoisonError::into_inner);
        if connecting.as_ref().is_some_and(|task| !task.is_finished()) {
            debug!("Connect attempt already in flight");
            return false;
        }

        let slot = self.poller.clone();
        *connecting = Some(tokio::spawn(async move {
            let previous = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let Some(previous) = previous {
                previous.stop().await;
            }
            let next = connect().await;
            // No await between the connect result and storing it, so an abort
            // can never strand a running poller.
            *slot.lock().unwrap_or_else(PoisonError::into_inner) = next;
        }));
        true
    }

    pub fn is_connecting(&self) -> bool {
        self.connecting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub fn is_connected(&self) -> bool {
        self.poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Abandon any connect attempt and stop the poller.
    pub async fn shutdown(&self) {
        let task = self
            .connecting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }

        let poller = self.poller.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(poller) = poller {
            poller.stop().await;
            info!("Local poller stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;
    use tokio::time;

    use super::*;
    use crate::{
        alerts::EnginePolicy,
        error::FetchError,
        events::ChannelKind,
        models::{AlertThresholds, DeviceSnapshot},
        monitor::{testing::session_with, MonitorSession, Poller, ReadingSource},
    };

    #[derive(Default)]
    struct CountingSource {
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl ReadingSource for CountingSource {
        fn name(&self) -> &str {
            "counting"
        }

        async fn fetch(&self) -> Result<Vec<DeviceSnapshot>, FetchError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    fn session() -> MonitorSession {
        session_with(AlertThresholds::default(), EnginePolicy::default(), None).0
    }

    /// A connect attempt that spends `discovery` looking for the unit before
    /// polling `source`.
    fn slow_connect(
        session: MonitorSession,
        source: Arc<CountingSource>,
        discovery: Duration,
    ) -> impl FnOnce() -> std::pin::Pin<Box<dyn Future<Output = Option<PollerHandle>> + Send>> {
        move || {
            Box::pin(async move {
                time::sleep(discovery).await;
                Some(Poller::start(
                    session,
                    source,
                    Duration::from_secs(3),
                    ChannelKind::Device,
                ))
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_returns_at_once_and_installs_the_poller_later() {
        let link = LocalLink::new();
        let source = Arc::new(CountingSource::default());

        assert!(link.reconnect(slow_connect(session(), source.clone(), Duration::from_secs(15))));
        assert!(link.is_connecting());
        assert!(!link.is_connected());

        time::sleep(Duration::from_secs(16)).await;
        assert!(!link.is_connecting());
        assert!(link.is_connected());
        assert!(source.fetches.load(Ordering::SeqCst) >= 1);

        link.shutdown().await;
        assert!(!link.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn second_reconnect_is_ignored_while_one_runs() {
        let link = LocalLink::new();
        let first = Arc::new(CountingSource::default());
        let second = Arc::new(CountingSource::default());

        assert!(link.reconnect(slow_connect(session(), first.clone(), Duration::from_secs(15))));
        time::sleep(Duration::from_secs(1)).await;
        assert!(!link.reconnect(slow_connect(session(), second.clone(), Duration::ZERO)));

        time::sleep(Duration::from_secs(20)).await;
        assert!(first.fetches.load(Ordering::SeqCst) >= 1);
        assert_eq!(second.fetches.load(Ordering::SeqCst), 0);

        // Once the first attempt is done a new one is accepted and replaces
        // the old poller.
        assert!(link.reconnect(slow_connect(session(), second.clone(), Duration::ZERO)));
        time::sleep(Duration::from_secs(1)).await;
        let first_count = first.fetches.load(Ordering::SeqCst);
        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(first.fetches.load(Ordering::SeqCst), first_count);
        assert!(second.fetches.load(Ordering::SeqCst) >= 1);

        link.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_abandons_a_running_discovery() {
        let link = LocalLink::new();
        let source = Arc::new(CountingSource::default());
        assert!(link.reconnect(slow_connect(session(), source.clone(), Duration::from_secs(15))));

        time::sleep(Duration::from_secs(1)).await;
        link.shutdown().await;
        assert!(!link.is_connecting());

        time::sleep(Duration::from_secs(30)).await;
        assert!(!link.is_connected());
        assert_eq!(source.fetches.load(Ordering::SeqCst), 0);
    }
}
