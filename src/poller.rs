use crate::models::MeasurementMap;
use crate::parser::{extract, ValueError};
use futures::future::BoxFuture;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum PollError {
    #[error("Request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Bad status from OWFS: {0}")]
    BadStatus(StatusCode),
    #[error("Fetch cancelled")]
    Cancelled,
}

/// Where raw device pages come from.
pub trait SensorSource: Send + Sync {
    fn fetch_page<'a>(&'a self, device_id: &'a str) -> BoxFuture<'a, Result<String, PollError>>;
}

/// Fetches `{base_url}/{device_id}` from owhttpd.
#[derive(Debug, Clone)]
pub struct HttpSensorSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSensorSource {
    pub fn new(base_url: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn device_url(&self, device_id: &str) -> String {
        format!("{}/{}", self.base_url, device_id)
    }

    async fn get(&self, device_id: &str) -> Result<String, PollError> {
        let url = self.device_url(device_id);
        debug!("Fetching {}", url);

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|source| PollError::Transport {
                url: url.clone(),
                source,
            })?;

        if response.status() != StatusCode::OK {
            return Err(PollError::BadStatus(response.status()));
        }

        response
            .text()
            .await
            .map_err(|source| PollError::Transport { url, source })
    }
}

impl SensorSource for HttpSensorSource {
    fn fetch_page<'a>(&'a self, device_id: &'a str) -> BoxFuture<'a, Result<String, PollError>> {
        Box::pin(self.get(device_id))
    }
}

/// Reads every requested measurement of one device from a single page.
pub struct DevicePoller<S> {
    source: S,
    cancel: CancellationToken,
}

impl<S: SensorSource> DevicePoller<S> {
    pub fn new(source: S, cancel: CancellationToken) -> Self {
        Self { source, cancel }
    }

    /// Missing or malformed measurements are logged and left out of the map.
    pub async fn fetch(
        &self,
        device_id: &str,
        measurements: &[&str],
    ) -> Result<MeasurementMap, PollError> {
        let body = tokio::select! {
            _ = self.cancel.cancelled() => return Err(PollError::Cancelled),
            body = self.source.fetch_page(device_id) => body?,
        };

        let mut values = MeasurementMap::with_capacity(measurements.len());
        for &measurement in measurements {
            match extract(&body, measurement) {
                Ok(value) => {
                    values.insert(measurement.to_string(), value);
                }
                Err(ValueError::NotFound) => {
                    warn!(
                        "Found no measurement '{}' on device response from device '{}'",
                        measurement, device_id
                    );
                }
                Err(ValueError::Malformed(literal)) => {
                    warn!("Malformed data '{}' for '{}/{}'", literal, device_id, measurement);
                }
                Err(e) => {
                    warn!("Cannot read '{}/{}': {}", device_id, measurement, e);
                }
            }
        }

        Ok(values)
    }
}
