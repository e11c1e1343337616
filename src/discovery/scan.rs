use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{sync::Semaphore, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{probe::Prober, DiscoveryChannel};
use crate::models::DiscoverySource;

pub const SCAN_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Inclusive host range inside one /24, e.g. `192.168.0.1..=254`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRange {
    pub prefix: String,
    pub start: u8,
    pub end: u8,
    pub port: Option<u16>,
}

impl ScanRange {
    pub fn new(prefix: impl Into<String>, start: u8, end: u8) -> Self {
        Self {
            prefix: prefix.into().trim_end_matches('.').to_owned(),
            start,
            end,
            port: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn addresses(&self) -> impl Iterator<Item = String> + '_ {
        (self.start..=self.end).map(move |host| match self.port {
            Some(port) => format!("{}.{host}:{port}", self.prefix),
            None => format!("{}.{host}", self.prefix),
        })
    }

    pub fn len(&self) -> usize {
        if self.end < self.start {
            0
        } else {
            usize::from(self.end - self.start) + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Brute-force probe of every address in the range with bounded parallelism.
pub struct ScanChannel {
    range: ScanRange,
    prober: Arc<dyn Prober>,
    parallelism: usize,
    timeout: Duration,
}

impl ScanChannel {
    pub fn new(range: ScanRange, prober: Arc<dyn Prober>, parallelism: usize) -> Self {
        Self {
            range,
            prober,
            parallelism: parallelism.max(1),
            timeout: SCAN_PROBE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl DiscoveryChannel for ScanChannel {
    fn source(&self) -> DiscoverySource {
        DiscoverySource::RangeScan
    }

    async fn locate(&self, cancel: CancellationToken) -> Option<String> {
        let permits = Arc::new(Semaphore::new(self.parallelism));
        let mut probes = JoinSet::new();

        for address in self.range.addresses() {
            let permits = permits.clone();
            let prober = self.prober.clone();
            let cancel = cancel.clone();
            let timeout = self.timeout;
            probes.spawn(async move {
                let _permit = permits.acquire_owned().await.ok()?;
                if cancel.is_cancelled() {
                    return None;
                }
                prober
                    .probe(&address, timeout)
                    .await
                    .verified()
                    .then_some(address)
            });
        }

        let mut found = None;
        while let Some(joined) = probes.join_next().await {
            if let Ok(Some(address)) = joined {
                found = Some(address);
                break;
            }
        }
        probes.abort_all();

        if found.is_none() {
            debug!(prefix = %self.range.prefix, hosts = self.range.len(), "Range scan found nothing");
        }
        found
    }
}
