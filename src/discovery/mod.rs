//! Locating the monitored unit on the LAN.
//!
//! Every channel runs concurrently. The first one to produce a verified
//! address claims the shared flag; everything else is cancelled and any late
//! result is dropped.

pub mod broadcast;
pub mod channels;
pub mod probe;
pub mod scan;

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    error::DiscoveryError,
    models::{DiscoveryResult, DiscoverySource},
};

use self::{
    broadcast::{BroadcastChannel, BroadcastConfig},
    channels::{CandidateChannel, RegistryChannel},
    probe::Prober,
    scan::{ScanChannel, ScanRange},
};

pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

#[async_trait]
pub trait DiscoveryChannel: Send + Sync {
    fn source(&self) -> DiscoverySource;

    /// Return a verified address, or `None` when this channel gives up.
    /// Implementations should check `cancel` between probes.
    async fn locate(&self, cancel: CancellationToken) -> Option<String>;
}

/// External directory that remembers the last address a device reported.
#[async_trait]
pub trait RegistryLookup: Send + Sync {
    async fn last_known_address(&self) -> anyhow::Result<Option<String>>;
}

/// Set-once winner flag shared by the racing channels.
#[derive(Debug, Clone, Default)]
struct RaceFlag(Arc<AtomicBool>);

impl RaceFlag {
    fn claim(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Inputs for one discovery episode.
#[derive(Clone)]
pub struct DiscoveryPlan {
    pub known: Vec<String>,
    pub hostnames: Vec<String>,
    pub registry: Option<Arc<dyn RegistryLookup>>,
    pub broadcast: Option<BroadcastConfig>,
    pub scan: Option<ScanRange>,
    pub scan_parallelism: usize,
    pub probe_timeout: Duration,
    pub timeout: Duration,
}

impl Default for DiscoveryPlan {
    fn default() -> Self {
        Self {
            known: Vec::new(),
            hostnames: Vec::new(),
            registry: None,
            broadcast: None,
            scan: None,
            scan_parallelism: 64,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            timeout: DEFAULT_DISCOVERY_TIMEOUT,
        }
    }
}

pub struct Discovery {
    channels: Vec<Arc<dyn DiscoveryChannel>>,
    timeout: Duration,
}

impl Discovery {
    pub fn new(timeout: Duration) -> Self {
        Self {
            channels: Vec::new(),
            timeout,
        }
    }

    pub fn with_channel(mut self, channel: Arc<dyn DiscoveryChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    /// Build the standard channel set. Empty inputs produce no channel.
    pub fn from_plan(plan: DiscoveryPlan, prober: Arc<dyn Prober>) -> Self {
        let mut discovery = Self::new(plan.timeout);

        if !plan.known.is_empty() {
            discovery = discovery.with_channel(Arc::new(CandidateChannel::known(
                plan.known,
                prober.clone(),
                plan.probe_timeout,
            )));
        }
        if !plan.hostnames.is_empty() {
            discovery = discovery.with_channel(Arc::new(CandidateChannel::hostnames(
                plan.hostnames,
                prober.clone(),
                plan.probe_timeout,
            )));
        }
        if let Some(registry) = plan.registry {
            discovery = discovery.with_channel(Arc::new(RegistryChannel::new(
                registry,
                prober.clone(),
                plan.probe_timeout,
            )));
        }
        if let Some(config) = plan.broadcast {
            discovery = discovery.with_channel(Arc::new(BroadcastChannel::new(
                config,
                prober.clone(),
                plan.probe_timeout,
            )));
        }
        if let Some(range) = plan.scan.filter(|r| !r.is_empty()) {
            discovery = discovery.with_channel(Arc::new(ScanChannel::new(
                range,
                prober,
                plan.scan_parallelism,
            )));
        }
        discovery
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Run one episode. Each call starts from scratch, so it doubles as
    /// "reconnect".
    pub async fn discover(&self) -> Result<DiscoveryResult, DiscoveryError> {
        let flag = RaceFlag::default();
        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();

        info!(channels = self.channels.len(), timeout_secs = self.timeout.as_secs(), "Starting discovery");

        for channel in &self.channels {
            let channel = channel.clone();
            let flag = flag.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let source = channel.source();
                let address = tokio::select! {
                    _ = cancel.cancelled() => return None,
                    found = channel.locate(cancel.clone()) => found?,
                };
                if !flag.claim() {
                    debug!(source = %source, address = %address, "Discarding late discovery result");
                    return None;
                }
                cancel.cancel();
                Some(DiscoveryResult {
                    address,
                    verified: true,
                    source,
                })
            });
        }

        let race = async {
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(Some(result)) => return Some(result),
                    Ok(None) => {}
                    Err(e) if e.is_panic() => warn!(error = %e, "Discovery channel panicked"),
                    Err(_) => {}
                }
            }
            None
        };
        let outcome = tokio::time::timeout(self.timeout, race).await;

        cancel.cancel();
        tasks.abort_all();

        match outcome {
            Ok(Some(result)) => {
                info!(address = %result.address, source = %result.source, "Device discovered");
                Ok(result)
            }
            _ => {
                warn!(timeout_secs = self.timeout.as_secs(), "Discovery exhausted");
                Err(DiscoveryError::Exhausted {
                    timeout: self.timeout,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::discovery::probe::ProbeResult;

    /// Resolves after `delay` with `address`, or never when `address` is `None`.
    struct Scripted {
        source: DiscoverySource,
        delay: Duration,
        address: Option<&'static str>,
        finished: Arc<AtomicUsize>,
    }

    impl Scripted {
        fn new(source: DiscoverySource, delay_ms: u64, address: Option<&'static str>) -> Self {
            Self {
                source,
                delay: Duration::from_millis(delay_ms),
                address,
                finished: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl DiscoveryChannel for Scripted {
        fn source(&self) -> DiscoverySource {
            self.source
        }

        async fn locate(&self, _cancel: CancellationToken) -> Option<String> {
            match self.address {
                Some(addr) => {
                    tokio::time::sleep(self.delay).await;
                    self.finished.fetch_add(1, Ordering::SeqCst);
                    Some(addr.to_owned())
                }
                None => std::future::pending().await,
            }
        }
    }

    struct NeverProber;

    #[async_trait]
    impl Prober for NeverProber {
        async fn probe(&self, _address: &str, _timeout: Duration) -> ProbeResult {
            ProbeResult::unreachable()
        }
    }

    #[test]
    fn race_flag_claims_once() {
        let flag = RaceFlag::default();
        let other = flag.clone();
        assert!(flag.claim());
        assert!(!other.claim());
        assert!(!flag.claim());
    }

    #[tokio::test(start_paused = true)]
    async fn first_verified_channel_wins() {
        let late = Arc::new(Scripted::new(DiscoverySource::Known, 800, Some("10.0.0.1")));
        let discovery = Discovery::new(DEFAULT_DISCOVERY_TIMEOUT)
            .with_channel(late.clone())
            .with_channel(Arc::new(Scripted::new(DiscoverySource::Hostname, 600, Some("reefer.local"))))
            .with_channel(Arc::new(Scripted::new(DiscoverySource::Registry, 50, Some("10.0.0.3"))))
            .with_channel(Arc::new(Scripted::new(DiscoverySource::Broadcast, 0, None)))
            .with_channel(Arc::new(Scripted::new(DiscoverySource::RangeScan, 900, Some("10.0.0.5"))));

        let result = discovery.discover().await.unwrap();
        assert_eq!(
            result,
            DiscoveryResult {
                address: "10.0.0.3".into(),
                verified: true,
                source: DiscoverySource::Registry,
            }
        );

        // Losers were cancelled and never complete.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(late.finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn simultaneous_results_pick_exactly_one() {
        let discovery = Discovery::new(DEFAULT_DISCOVERY_TIMEOUT)
            .with_channel(Arc::new(Scripted::new(DiscoverySource::Known, 100, Some("a"))))
            .with_channel(Arc::new(Scripted::new(DiscoverySource::Hostname, 100, Some("b"))));

        let result = discovery.discover().await.unwrap();
        assert!(result.address == "a" || result.address == "b");
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_is_a_terminal_failure() {
        let discovery = Discovery::new(DEFAULT_DISCOVERY_TIMEOUT)
            .with_channel(Arc::new(Scripted::new(DiscoverySource::Known, 0, None)))
            .with_channel(Arc::new(Scripted::new(DiscoverySource::Broadcast, 0, None)));

        let started = tokio::time::Instant::now();
        let err = discovery.discover().await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Exhausted { timeout } if timeout == DEFAULT_DISCOVERY_TIMEOUT));
        assert!(started.elapsed() >= DEFAULT_DISCOVERY_TIMEOUT);
    }

    #[tokio::test]
    async fn all_channels_giving_up_fails_early() {
        let discovery = Discovery::from_plan(
            DiscoveryPlan {
                known: vec!["10.0.0.1".into()],
                hostnames: vec!["reefer.local".into()],
                ..DiscoveryPlan::default()
            },
            Arc::new(NeverProber),
        );
        assert_eq!(discovery.channel_count(), 2);

        let started = std::time::Instant::now();
        assert!(discovery.discover().await.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_episodes_are_independent() {
        let discovery = Discovery::new(Duration::from_secs(1))
            .with_channel(Arc::new(Scripted::new(DiscoverySource::Known, 10, Some("10.0.0.1"))));

        for _ in 0..3 {
            assert_eq!(discovery.discover().await.unwrap().address, "10.0.0.1");
        }
    }

    #[test]
    fn plan_skips_empty_inputs() {
        let discovery = Discovery::from_plan(
            DiscoveryPlan {
                scan: Some(ScanRange::new("10.0.0", 5, 1)),
                ..DiscoveryPlan::default()
            },
            Arc::new(NeverProber),
        );
        assert_eq!(discovery.channel_count(), 0);
    }
}
