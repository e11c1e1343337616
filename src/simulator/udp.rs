use tokio::net::UdpSocket;
use tracing::{debug, error, info, warn};

use crate::discovery::broadcast::{DISCOVER_MAGIC, REPLY_MARKER};

/// What the responder tells discovering clients.
#[derive(Debug, Clone)]
pub struct Advertisement {
    pub address: String,
    pub device_id: String,
    pub name: String,
}

impl Advertisement {
    pub fn new(address: &str, device_id: &str, name: &str) -> Self {
        Self {
            address: address.to_owned(),
            device_id: device_id.to_owned(),
            name: name.to_owned(),
        }
    }

    pub fn reply(&self) -> String {
        format!("{REPLY_MARKER}|{}|{}|{}", self.address, self.device_id, self.name)
    }
}

/// Answer every discovery datagram on `socket` until the task is dropped.
pub async fn serve(socket: UdpSocket, advertisement: Advertisement) {
    if let Ok(local) = socket.local_addr() {
        info!(addr = %local, advertised = %advertisement.address, "UDP discovery responder listening");
    }
    let reply = advertisement.reply();
    let mut buf = [0u8; 256];

    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                error!(error = %e, "UDP recv_from failed");
                continue;
            }
        };

        if String::from_utf8_lossy(&buf[..len]).trim() != DISCOVER_MAGIC {
            debug!(from = %from, "Ignoring unrelated datagram");
            continue;
        }
        if let Err(e) = socket.send_to(reply.as_bytes(), from).await {
            warn!(to = %from, error = %e, "Failed to answer discovery request");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn reply_format() {
        let ad = Advertisement::new("192.168.0.11", "REEFER-01", "Reefer Principal");
        assert_eq!(ad.reply(), "REEFER_HERE|192.168.0.11|REEFER-01|Reefer Principal");
    }

    #[tokio::test]
    async fn answers_magic_and_ignores_noise() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = socket.local_addr().unwrap();
        tokio::spawn(serve(socket, Advertisement::new("10.0.0.9", "R1", "One")));

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"hello", target).await.unwrap();
        client.send_to(DISCOVER_MAGIC.as_bytes(), target).await.unwrap();

        let mut buf = [0u8; 128];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], b"REEFER_HERE|10.0.0.9|R1|One");
    }
}
