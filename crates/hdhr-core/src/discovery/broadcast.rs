use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use super::packet::{self, DiscoverReply, DEVICE_TYPE_STORAGE, DISCOVER_PORT};
use super::{dedup_devices, DeviceId, DeviceInfo, DeviceKind, Discoverer};
use crate::error::Error;

const RECV_BUFFER_SIZE: usize = 3074;

/// Discovers devices with a UDP broadcast on the discover port.
#[derive(Debug, Clone)]
pub struct BroadcastDiscoverer {
    targets: Vec<SocketAddr>,
    window: Duration,
}

impl BroadcastDiscoverer {
    pub fn new(window: Duration) -> Self {
        Self {
            targets: vec![SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), DISCOVER_PORT)],
            window,
        }
    }

    /// Sends the request to `targets` instead of the limited broadcast
    /// address, e.g. directed broadcasts or known device addresses.
    pub fn with_targets(mut self, targets: Vec<SocketAddr>) -> Self {
        self.targets = targets;
        self
    }

    fn device_from_reply(reply: DiscoverReply, from: SocketAddr) -> Option<DeviceInfo> {
        let kind = match reply.device_type {
            Some(DEVICE_TYPE_STORAGE) => DeviceKind::Storage,
            _ if reply.storage_id.is_some() && reply.device_id.is_none() => DeviceKind::Storage,
            _ => DeviceKind::Tuner,
        };

        let id = match kind {
            DeviceKind::Tuner => DeviceId::from_tuner_id(reply.device_id?),
            DeviceKind::Storage => DeviceId::new(reply.storage_id?),
        };

        let address = from.ip();
        let base_url = reply
            .base_url
            .unwrap_or_else(|| format!("http://{address}"));

        Some(DeviceInfo {
            id,
            kind,
            address,
            base_url,
            tuner_count: reply.tuner_count,
        })
    }
}

#[async_trait]
impl Discoverer for BroadcastDiscoverer {
    async fn discover(&self) -> Result<Vec<DeviceInfo>, Error> {
        let unavailable = |err: std::io::Error| Error::DiscoveryUnavailable(err.to_string());

        let socket = UdpSocket::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0))
            .await
            .map_err(unavailable)?;
        socket.set_broadcast(true).map_err(unavailable)?;

        let request = packet::encode_discover_request();
        for target in &self.targets {
            socket.send_to(&request, target).await.map_err(unavailable)?;
        }

        let deadline = Instant::now() + self.window;
        let mut buf = vec![0_u8; RECV_BUFFER_SIZE];
        let mut found = Vec::new();

        loop {
            let (len, from) = match timeout_at(deadline, socket.recv_from(&mut buf)).await {
                Err(_) => break,
                Ok(Ok(received)) => received,
                Ok(Err(err)) => {
                    warn!(error = %err, "discovery receive failed; ending window early");
                    break;
                }
            };

            match packet::decode_discover_reply(&buf[..len]) {
                Ok(reply) => match Self::device_from_reply(reply, from) {
                    Some(device) => {
                        debug!(device_id = %device.id, %from, "discover reply");
                        found.push(device);
                    }
                    None => debug!(%from, "discover reply without a device id"),
                },
                Err(err) => debug!(%from, error = %err, "ignoring undecodable discover packet"),
            }
        }

        Ok(dedup_devices(found))
    }
}
