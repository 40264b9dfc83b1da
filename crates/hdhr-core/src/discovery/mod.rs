//! Locating HDHomeRun devices on the local network.

mod broadcast;
mod http;
pub mod packet;


use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Error;

pub use broadcast::BroadcastDiscoverer;
pub use http::{HttpDiscoverer, DEFAULT_DISCOVER_URL};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Tuner ids are rendered the way the device label prints them.
    pub fn from_tuner_id(id: u32) -> Self {
        Self(format!("{id:08X}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Tuner,
    Storage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub kind: DeviceKind,
    pub address: IpAddr,
    pub base_url: String,
    pub tuner_count: Option<u8>,
}

impl DeviceInfo {
    pub fn status_url(&self) -> String {
        format!("{}/status.json", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
pub trait Discoverer: Send + Sync {
    /// Devices that answered during this cycle. An empty result is not an
    /// error; only being unable to look at all is.
    async fn discover(&self) -> Result<Vec<DeviceInfo>, Error>;
}

/// Drops repeated replies from the same device, keeping the first.
pub(crate) fn dedup_devices(devices: impl IntoIterator<Item = DeviceInfo>) -> Vec<DeviceInfo> {
    let mut unique = BTreeMap::new();
    for device in devices {
        unique.entry(device.id.clone()).or_insert(device);
    }
    unique.into_values().collect()
}
