use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use super::{dedup_devices, DeviceId, DeviceInfo, DeviceKind, Discoverer};
use crate::error::Error;
use crate::status::StatusObject;

pub const DEFAULT_DISCOVER_URL: &str = "https://api.hdhomerun.com/discover";

/// Discovers devices through the vendor's discover service, which lists the
/// devices seen from the caller's public address.
#[derive(Debug, Clone)]
pub struct HttpDiscoverer {
    client: reqwest::Client,
    url: String,
}

impl HttpDiscoverer {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| Error::DiscoveryUnavailable(err.to_string()))?;
        Ok(Self::from_reqwest(url, client))
    }

    pub fn from_reqwest(url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    fn device_from_entry(entry: &Value) -> Result<Option<DeviceInfo>, Error> {
        let object = StatusObject::new(entry, "discover entry")?;

        let device_id = object.string("DeviceID")?;
        let storage_id = object.string("StorageID")?;
        let (id, kind) = if !device_id.is_empty() {
            (DeviceId::new(device_id.to_ascii_uppercase()), DeviceKind::Tuner)
        } else if !storage_id.is_empty() {
            (DeviceId::new(storage_id), DeviceKind::Storage)
        } else {
            return Ok(None);
        };

        let local_ip = object.string("LocalIP")?;
        let Ok(address) = local_ip.parse::<IpAddr>() else {
            return Ok(None);
        };

        let base_url = object.string("BaseURL")?;
        let base_url = if base_url.is_empty() {
            format!("http://{address}")
        } else {
            base_url
        };

        let tuner_count = u8::try_from(object.unsigned(&["TunerCount"])?).ok().filter(|n| *n > 0);

        Ok(Some(DeviceInfo {
            id,
            kind,
            address,
            base_url,
            tuner_count,
        }))
    }
}

#[async_trait]
impl Discoverer for HttpDiscoverer {
    async fn discover(&self) -> Result<Vec<DeviceInfo>, Error> {
        let unavailable = |err: reqwest::Error| Error::DiscoveryUnavailable(err.to_string());

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(unavailable)?;
        let body: Value = response.json().await.map_err(unavailable)?;

        let Some(entries) = body.as_array() else {
            return Err(Error::DiscoveryUnavailable(
                "discover response is not a list".to_string(),
            ));
        };

        let mut found = Vec::with_capacity(entries.len());
        for entry in entries {
            match Self::device_from_entry(entry) {
                Ok(Some(device)) => {
                    debug!(device_id = %device.id, "discover entry");
                    found.push(device);
                }
                Ok(None) => debug!("skipping discover entry without id or address"),
                Err(err) => warn!(error = %err, "skipping malformed discover entry"),
            }
        }

        Ok(dedup_devices(found))
    }
}
