use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use tokio::{net::UdpSocket, time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{probe::Prober, DiscoveryChannel};
use crate::models::DiscoverySource;

pub const DISCOVERY_PORT: u16 = 5555;
pub const DISCOVER_MAGIC: &str = "REEFER_DISCOVER";
pub const REPLY_MARKER: &str = "REEFER_HERE";

#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    pub target: SocketAddr,
    pub magic: String,
    pub marker: String,
    /// How many times the request datagram is sent.
    pub sends: u32,
    pub send_gap: Duration,
    /// Replies read before giving up.
    pub max_replies: u32,
    pub receive_timeout: Duration,
}

impl BroadcastConfig {
    pub fn on_port(port: u16) -> Self {
        Self {
            target: SocketAddr::from((Ipv4Addr::BROADCAST, port)),
            ..Self::default()
        }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            target: SocketAddr::from((Ipv4Addr::BROADCAST, DISCOVERY_PORT)),
            magic: DISCOVER_MAGIC.to_owned(),
            marker: REPLY_MARKER.to_owned(),
            sends: 3,
            send_gap: Duration::from_millis(100),
            max_replies: 3,
            receive_timeout: Duration::from_secs(5),
        }
    }
}

/// A parsed `MARKER|address|id|name` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastReply {
    pub address: String,
    pub device_id: Option<String>,
    pub name: Option<String>,
}

pub fn parse_reply(datagram: &str, marker: &str) -> Option<BroadcastReply> {
    let mut parts = datagram.trim().split('|');
    if parts.next()? != marker {
        return None;
    }
    let address = parts.next().map(str::trim).filter(|a| !a.is_empty())?;
    let non_empty = |s: &str| Some(s.trim().to_owned()).filter(|s| !s.is_empty());
    Some(BroadcastReply {
        address: address.to_owned(),
        device_id: parts.next().and_then(non_empty),
        name: parts.next().and_then(non_empty),
    })
}

pub struct BroadcastChannel {
    config: BroadcastConfig,
    prober: Arc<dyn Prober>,
    timeout: Duration,
}

impl BroadcastChannel {
    pub fn new(config: BroadcastConfig, prober: Arc<dyn Prober>, timeout: Duration) -> Self {
        Self {
            config,
            prober,
            timeout,
        }
    }

    async fn exchange(&self, cancel: &CancellationToken) -> std::io::Result<Option<String>> {
        let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))).await?;
        socket.set_broadcast(true)?;

        for i in 0..self.config.sends {
            if i > 0 {
                time::sleep(self.config.send_gap).await;
            }
            socket
                .send_to(self.config.magic.as_bytes(), self.config.target)
                .await?;
        }
        debug!(target = %self.config.target, sends = self.config.sends, "Discovery datagrams sent");

        let mut buf = [0u8; 512];
        for _ in 0..self.config.max_replies {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            let (len, from) =
                match time::timeout(self.config.receive_timeout, socket.recv_from(&mut buf)).await {
                    Ok(received) => received?,
                    Err(_) => return Ok(None),
                };

            let text = String::from_utf8_lossy(&buf[..len]);
            let Some(reply) = parse_reply(&text, &self.config.marker) else {
                debug!(from = %from, "Ignoring unrelated datagram");
                continue;
            };
            debug!(from = %from, address = %reply.address, device_id = ?reply.device_id, "Discovery reply");

            if self.prober.probe(&reply.address, self.timeout).await.verified() {
                return Ok(Some(reply.address));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl DiscoveryChannel for BroadcastChannel {
    fn source(&self) -> DiscoverySource {
        DiscoverySource::Broadcast
    }

    async fn locate(&self, cancel: CancellationToken) -> Option<String> {
        match self.exchange(&cancel).await {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "Broadcast discovery failed");
                None
            }
        }
    }
}
