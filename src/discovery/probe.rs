use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::trace;

use crate::{
    device::{base_url, models::{has_identity_markers, StatusResponse}, STATUS_PATH},
    models::DeviceIdentity,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeResult {
    pub reachable: bool,
    pub identity_valid: bool,
    /// Identity advertised in the status body, when present.
    pub identity: Option<DeviceIdentity>,
}

impl ProbeResult {
    pub fn unreachable() -> Self {
        Self::default()
    }

    pub fn verified(&self) -> bool {
        self.reachable && self.identity_valid
    }
}

/// Checks whether a monitored unit answers at an address.
///
/// Implementations never fail: every error collapses into an unreachable
/// result.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, address: &str, timeout: Duration) -> ProbeResult;
}

#[derive(Debug, Clone)]
pub struct HttpProber {
    http: Client,
}

impl HttpProber {
    pub fn new(http: Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, address: &str, timeout: Duration) -> ProbeResult {
        let url = format!("{}{}", base_url(address), STATUS_PATH);

        let resp = match self.http.get(&url).timeout(timeout).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                trace!(url = %url, status = %r.status(), "Probe got non-success status");
                return ProbeResult::unreachable();
            }
            Err(e) => {
                trace!(url = %url, error = %e, "Probe failed");
                return ProbeResult::unreachable();
            }
        };

        let Ok(body) = resp.bytes().await else {
            return ProbeResult::unreachable();
        };

        let identity_valid = has_identity_markers(&body);
        let identity = identity_valid
            .then(|| StatusResponse::from_slice(&body).ok())
            .flatten()
            .and_then(|s| s.identity());

        ProbeResult {
            reachable: true,
            identity_valid,
            identity,
        }
    }
}
