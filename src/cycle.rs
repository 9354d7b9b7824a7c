use crate::config::Config;
use crate::models::group_devices;
use crate::poller::{DevicePoller, PollError, SensorSource};
use crate::publisher::Publisher;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

/// One pass over all configured devices: fetch each device once, publish what was found.
pub struct UpdateCycle<S> {
    config: Arc<Config>,
    poller: DevicePoller<S>,
    publisher: Publisher,
    cancel: CancellationToken,
}

impl<S: SensorSource> UpdateCycle<S> {
    pub fn new(
        config: Arc<Config>,
        poller: DevicePoller<S>,
        publisher: Publisher,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            poller,
            publisher,
            cancel,
        }
    }

    /// Returns how many measurements were read, whether or not publishing them succeeded.
    #[instrument(name = "updating", skip_all)]
    pub async fn run_once(&self) -> usize {
        let mut updated = 0;

        for group in group_devices(&self.config.devices) {
            if self.cancel.is_cancelled() {
                debug!("Cancelled before device '{}'", group.device_id);
                break;
            }

            let values = match self.poller.fetch(group.device_id, &group.measurements()).await {
                Ok(values) => values,
                Err(PollError::Cancelled) => break,
                Err(e) => {
                    error!("Error updating device '{}': {}", group.device_id, e);
                    continue;
                }
            };

            if self.cancel.is_cancelled() {
                return updated;
            }

            info!(
                "Publishing {} measurements for device '{}'",
                values.len(),
                group.device_id
            );

            for entry in &group.entries {
                let Some(&value) = values.get(&entry.measurement) else {
                    continue;
                };

                if let Err(e) = self.publisher.publish(&entry.topic, value).await {
                    error!(
                        "Failed to publish measurement '{}' of device '{}' to '{}': {}",
                        entry.measurement, group.device_id, entry.topic, e
                    );
                }
            }

            updated += values.len();
        }

        updated
    }
}
