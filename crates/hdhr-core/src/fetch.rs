use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::discovery::DeviceInfo;
use crate::error::Error;

#[async_trait]
pub trait StatusFetcher: Send + Sync {
    /// Raw status document of `device`.
    async fn fetch(&self, device: &DeviceInfo) -> Result<Value, Error>;
}

/// Reads `status.json` from the device's web server.
#[derive(Debug, Clone)]
pub struct HttpStatusFetcher {
    client: reqwest::Client,
}

impl HttpStatusFetcher {
    pub fn new(timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| Error::FetchFailed(err.to_string()))?;
        Ok(Self::from_reqwest(client))
    }

    pub fn from_reqwest(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StatusFetcher for HttpStatusFetcher {
    async fn fetch(&self, device: &DeviceInfo) -> Result<Value, Error> {
        let url = device.status_url();

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| Error::FetchFailed(format!("{url}: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::FetchFailed(format!("{url}: HTTP {status}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| Error::FetchFailed(format!("{url}: {err}")))?;

        serde_json::from_slice(&body)
            .map_err(|err| Error::FetchFailed(format!("{url}: body is not JSON: {err}")))
    }
}
