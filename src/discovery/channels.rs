use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{probe::Prober, DiscoveryChannel, RegistryLookup};
use crate::models::DiscoverySource;

/// Probes a fixed list of addresses or hostnames in order.
pub struct CandidateChannel {
    source: DiscoverySource,
    candidates: Vec<String>,
    prober: Arc<dyn Prober>,
    timeout: Duration,
}

impl CandidateChannel {
    pub fn known(candidates: Vec<String>, prober: Arc<dyn Prober>, timeout: Duration) -> Self {
        Self {
            source: DiscoverySource::Known,
            candidates,
            prober,
            timeout,
        }
    }

    pub fn hostnames(candidates: Vec<String>, prober: Arc<dyn Prober>, timeout: Duration) -> Self {
        Self {
            source: DiscoverySource::Hostname,
            candidates,
            prober,
            timeout,
        }
    }
}

#[async_trait]
impl DiscoveryChannel for CandidateChannel {
    fn source(&self) -> DiscoverySource {
        self.source
    }

    async fn locate(&self, cancel: CancellationToken) -> Option<String> {
        for candidate in &self.candidates {
            if cancel.is_cancelled() {
                return None;
            }
            if self.prober.probe(candidate, self.timeout).await.verified() {
                return Some(candidate.clone());
            }
            debug!(source = %self.source, candidate = %candidate, "Candidate did not verify");
        }
        None
    }
}

/// Asks an external directory for the last address the device reported,
/// then verifies it.
pub struct RegistryChannel {
    lookup: Arc<dyn RegistryLookup>,
    prober: Arc<dyn Prober>,
    timeout: Duration,
}

impl RegistryChannel {
    pub fn new(lookup: Arc<dyn RegistryLookup>, prober: Arc<dyn Prober>, timeout: Duration) -> Self {
        Self {
            lookup,
            prober,
            timeout,
        }
    }
}

#[async_trait]
impl DiscoveryChannel for RegistryChannel {
    fn source(&self) -> DiscoverySource {
        DiscoverySource::Registry
    }

    async fn locate(&self, cancel: CancellationToken) -> Option<String> {
        let address = match self.lookup.last_known_address().await {
            Ok(Some(addr)) => addr,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Registry lookup failed; skipping channel");
                return None;
            }
        };
        if cancel.is_cancelled() {
            return None;
        }
        self.prober
            .probe(&address, self.timeout)
            .await
            .verified()
            .then_some(address)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::discovery::probe::ProbeResult;

    /// Verifies only the listed addresses and records probe order.
    #[derive(Default)]
    struct ListProber {
        good: Vec<&'static str>,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Prober for ListProber {
        async fn probe(&self, address: &str, _timeout: Duration) -> ProbeResult {
            self.seen.lock().unwrap().push(address.to_owned());
            let ok = self.good.contains(&address);
            ProbeResult {
                reachable: ok,
                identity_valid: ok,
                identity: None,
            }
        }
    }

    struct FixedRegistry(anyhow::Result<Option<String>>);

    #[async_trait]
    impl RegistryLookup for FixedRegistry {
        async fn last_known_address(&self) -> anyhow::Result<Option<String>> {
            match &self.0 {
                Ok(v) => Ok(v.clone()),
                Err(e) => Err(anyhow::anyhow!("{e}")),
            }
        }
    }

    #[tokio::test]
    async fn candidates_stop_at_first_verified() {
        let prober = Arc::new(ListProber {
            good: vec!["b", "c"],
            ..Default::default()
        });
        let channel = CandidateChannel::known(
            vec!["a".into(), "b".into(), "c".into()],
            prober.clone(),
            Duration::from_millis(100),
        );

        assert_eq!(channel.locate(CancellationToken::new()).await.as_deref(), Some("b"));
        assert_eq!(*prober.seen.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn cancelled_channel_probes_nothing() {
        let prober = Arc::new(ListProber::default());
        let channel = CandidateChannel::hostnames(
            vec!["reefer.local".into()],
            prober.clone(),
            Duration::from_millis(100),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(channel.locate(cancel).await.is_none());
        assert!(prober.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn registry_address_must_verify() {
        let prober = Arc::new(ListProber {
            good: vec!["10.0.0.7"],
            ..Default::default()
        });
        let hit = RegistryChannel::new(
            Arc::new(FixedRegistry(Ok(Some("10.0.0.7".into())))),
            prober.clone(),
            Duration::from_millis(100),
        );
        assert_eq!(hit.locate(CancellationToken::new()).await.as_deref(), Some("10.0.0.7"));

        let stale = RegistryChannel::new(
            Arc::new(FixedRegistry(Ok(Some("10.0.0.8".into())))),
            prober,
            Duration::from_millis(100),
        );
        assert!(stale.locate(CancellationToken::new()).await.is_none());
    }

    #[tokio::test]
    async fn registry_failure_is_skipped() {
        let prober = Arc::new(ListProber::default());
        let channel = RegistryChannel::new(
            Arc::new(FixedRegistry(Err(anyhow::anyhow!("backend down")))),
            prober.clone(),
            Duration::from_millis(100),
        );
        assert!(channel.locate(CancellationToken::new()).await.is_none());
        assert!(prober.seen.lock().unwrap().is_empty());
    }
}
