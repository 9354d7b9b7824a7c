use crate::mqtt_service::{MqttHandle, PublishError};
use rumqttc::QoS;
use tracing::debug;

/// Publishes readings with the configured QoS, never retained.
#[derive(Clone)]
pub struct Publisher {
    handle: MqttHandle,
    qos: QoS,
}

impl Publisher {
    pub fn new(handle: MqttHandle, qos: QoS) -> Self {
        Self { handle, qos }
    }

    pub async fn publish(&self, topic: &str, value: f64) -> Result<(), PublishError> {
        let payload = format_value(value);
        debug!("Publishing value {} to mqtt topic '{}'", payload, topic);
        self.handle.publish(topic, payload, self.qos).await
    }
}

/// Plain decimal text with '.' as separator. `Display` for f64 never switches to exponent form.
pub fn format_value(value: f64) -> String {
    value.to_string()
}
