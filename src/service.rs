use crate::config::Config;
use crate::cycle::UpdateCycle;
use crate::mqtt_service::{ConnectionError, MqttService, MqttTransport, RumqttcTransport};
use crate::poller::{DevicePoller, HttpSensorSource, SensorSource};
use crate::publisher::Publisher;
use crate::scheduler::Scheduler;
use crate::service_utils::client_id;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("Failed to create HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Wires the broker connection, poller and scheduler for one run.
pub struct Service {
    config: Arc<Config>,
    cancel: CancellationToken,
}

impl Service {
    pub fn new(config: Arc<Config>, cancel: CancellationToken) -> Self {
        Self { config, cancel }
    }

    pub async fn run(&self) -> Result<(), ServiceError> {
        let source = HttpSensorSource::new(&self.config.ow_http_host)?;
        let transport = RumqttcTransport::new(&self.config, &client_id());
        self.run_with(transport, source).await
    }

    /// Returns once cancelled, or early with an error if the broker cannot be reached at startup.
    pub async fn run_with<T, S>(&self, transport: T, source: S) -> Result<(), ServiceError>
    where
        T: MqttTransport,
        S: SensorSource,
    {
        let mqtt = match MqttService::connect(transport, self.cancel.clone()).await {
            Ok(mqtt) => mqtt,
            Err(ConnectionError::Cancelled) => {
                info!("Shutdown requested before the broker connection was established");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let publisher = Publisher::new(mqtt.handle(), self.config.qos());
        let poller = DevicePoller::new(source, self.cancel.clone());
        let cycle = UpdateCycle::new(
            self.config.clone(),
            poller,
            publisher,
            self.cancel.clone(),
        );

        Scheduler::new(cycle, self.config.interval(), self.cancel.clone())
            .run()
            .await;

        mqtt.shutdown().await;
        info!("Done.");
        Ok(())
    }
}
