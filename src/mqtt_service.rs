use crate::config::Config;
use futures::future::BoxFuture;
use rumqttc::{
    AsyncClient, ClientError, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};
use tokio_retry::strategy::FixedInterval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Pause between a lost connection and the next connect attempt, and between failed attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const SHUTDOWN_FLUSH: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Connection to MQTT broker {broker} failed: {reason}")]
    Failed { broker: String, reason: String },
    #[error("Connection attempt cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("MQTT client is not connected")]
    NotConnected,
    #[error("MQTT client rejected the message: {0}")]
    Client(String),
    #[error("Publish cancelled")]
    Cancelled,
}

/// Outgoing side of a broker connection. Safe to share between tasks.
pub trait MessageSink: Send + Sync {
    fn send<'a>(
        &'a self,
        topic: &'a str,
        payload: String,
        qos: QoS,
    ) -> BoxFuture<'a, Result<(), PublishError>>;
}

/// A broker connection the supervisor can (re)establish and watch.
pub trait MqttTransport: Send + 'static {
    /// `host:port`, for logging.
    fn broker(&self) -> String;

    fn sink(&self) -> Arc<dyn MessageSink>;

    /// One connect attempt, reusing the options of the first one.
    fn connect(&mut self) -> BoxFuture<'_, Result<(), ConnectionError>>;

    /// Drives the established connection and resolves with a reason once it is lost.
    fn run_until_disconnected(&mut self) -> BoxFuture<'_, String>;

    /// Sends DISCONNECT and flushes it out.
    fn shutdown(&mut self) -> BoxFuture<'_, ()>;
}

/// rumqttc-backed transport. The event loop is owned by whoever drives the transport.
pub struct RumqttcTransport {
    client: AsyncClient,
    eventloop: EventLoop,
    broker: String,
}

impl RumqttcTransport {
    pub fn new(config: &Config, client_id: &str) -> Self {
        debug!(
            "Configuring MQTT broker at {}:{}...",
            config.mqtt_host, config.mqtt_port
        );

        let mut mqtt_options = MqttOptions::new(client_id, &config.mqtt_host, config.mqtt_port);
        mqtt_options.set_keep_alive(Duration::from_secs(10));
        mqtt_options.set_clean_session(true);

        if let Some((username, password)) = config.credentials() {
            mqtt_options.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(mqtt_options, 10);

        Self {
            client,
            eventloop,
            broker: format!("{}:{}", config.mqtt_host, config.mqtt_port),
        }
    }

    async fn await_connack(&mut self) -> Result<(), ConnectionError> {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    return if ack.code == ConnectReturnCode::Success {
                        Ok(())
                    } else {
                        Err(ConnectionError::Failed {
                            broker: self.broker.clone(),
                            reason: format!("{:?}", ack.code),
                        })
                    };
                }
                Ok(event) => trace!("Event while connecting: {:?}", event),
                Err(e) => {
                    return Err(ConnectionError::Failed {
                        broker: self.broker.clone(),
                        reason: e.to_string(),
                    })
                }
            }
        }
    }

    async fn poll_until_lost(&mut self) -> String {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    return "disconnected by broker".to_string();
                }
                Ok(event) => trace!("MQTT event: {:?}", event),
                Err(e) => return e.to_string(),
            }
        }
    }

    /// Bounded by `SHUTDOWN_FLUSH`, including the wait for room in the request channel.
    async fn disconnect(&mut self) {
        let client = &self.client;
        let eventloop = &mut self.eventloop;

        let clean = async {
            client.disconnect().await?;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            Ok::<(), ClientError>(())
        };

        match timeout(SHUTDOWN_FLUSH, clean).await {
            Ok(Ok(())) => debug!("Sent MQTT disconnect to {}", self.broker),
            Ok(Err(e)) => warn!("Clean disconnect failed: {}", e),
            Err(_) => warn!("Timed out sending MQTT disconnect"),
        }
    }
}

impl MqttTransport for RumqttcTransport {
    fn broker(&self) -> String {
        self.broker.clone()
    }

    fn sink(&self) -> Arc<dyn MessageSink> {
        Arc::new(RumqttcSink {
            client: self.client.clone(),
        })
    }

    fn connect(&mut self) -> BoxFuture<'_, Result<(), ConnectionError>> {
        Box::pin(self.await_connack())
    }

    fn run_until_disconnected(&mut self) -> BoxFuture<'_, String> {
        Box::pin(self.poll_until_lost())
    }

    fn shutdown(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(self.disconnect())
    }
}

struct RumqttcSink {
    client: AsyncClient,
}

impl MessageSink for RumqttcSink {
    fn send<'a>(
        &'a self,
        topic: &'a str,
        payload: String,
        qos: QoS,
    ) -> BoxFuture<'a, Result<(), PublishError>> {
        Box::pin(async move {
            self.client
                .publish(topic, qos, false, payload)
                .await
                .map_err(|e| PublishError::Client(e.to_string()))
        })
    }
}

/// Cloneable publishing handle onto the supervised connection.
#[derive(Clone)]
pub struct MqttHandle {
    sink: Arc<dyn MessageSink>,
    state: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
}

impl MqttHandle {
    pub(crate) fn from_parts(
        sink: Arc<dyn MessageSink>,
        state: watch::Receiver<ConnectionState>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            sink,
            state,
            cancel,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub async fn publish(&self, topic: &str, payload: String, qos: QoS) -> Result<(), PublishError> {
        if self.state() != ConnectionState::Connected {
            return Err(PublishError::NotConnected);
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(PublishError::Cancelled),
            result = self.sink.send(topic, payload, qos) => result,
        }
    }
}

/// Owns the broker connection: the initial connect plus a supervising task that
/// reconnects after every unsolicited disconnect until cancelled.
pub struct MqttService {
    handle: MqttHandle,
    supervisor: JoinHandle<()>,
}

impl MqttService {
    /// Fails if the first connect attempt does not succeed.
    pub async fn connect<T: MqttTransport>(
        mut transport: T,
        cancel: CancellationToken,
    ) -> Result<Self, ConnectionError> {
        let broker = transport.broker();
        info!("Connecting to Mqtt broker at {}", broker);

        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        tokio::select! {
            _ = cancel.cancelled() => return Err(ConnectionError::Cancelled),
            result = transport.connect() => result?,
        }
        state_tx.send_replace(ConnectionState::Connected);
        info!("Connected to MQTT broker at {}", broker);

        let handle = MqttHandle::from_parts(transport.sink(), state_rx, cancel.clone());
        let supervisor = tokio::spawn(supervise(transport, state_tx, cancel));

        Ok(Self { handle, supervisor })
    }

    pub fn handle(&self) -> MqttHandle {
        self.handle.clone()
    }

    /// Waits for the supervisor to finish. It stops only after cancellation.
    pub async fn shutdown(self) {
        if let Err(e) = self.supervisor.await {
            error!("MQTT supervisor task failed: {:?}", e);
        }
    }
}

async fn supervise<T: MqttTransport>(
    mut transport: T,
    state_tx: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
) {
    let broker = transport.broker();

    loop {
        let reason = tokio::select! {
            _ = cancel.cancelled() => break,
            reason = transport.run_until_disconnected() => reason,
        };

        if cancel.is_cancelled() {
            break;
        }

        state_tx.send_replace(ConnectionState::Connecting);
        warn!("MQTT Client disconnected ({})", reason);

        if !reconnect(&mut transport, &cancel).await {
            break;
        }

        state_tx.send_replace(ConnectionState::Connected);
        info!("Reconnected to MQTT broker at {}", broker);
    }

    let was_connected = state_tx.send_replace(ConnectionState::Disconnected) == ConnectionState::Connected;
    if was_connected {
        transport.shutdown().await;
    }
    info!("MQTT connection to {} closed", broker);
}

/// Retries with a constant delay until connected. Returns false once cancelled.
async fn reconnect<T: MqttTransport>(transport: &mut T, cancel: &CancellationToken) -> bool {
    for delay in FixedInterval::new(RECONNECT_DELAY) {
        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = sleep(delay) => {}
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => return false,
            result = transport.connect() => result,
        };

        match result {
            Ok(()) => return true,
            Err(e) => warn!(
                "MQTT Client failed to reconnect: {}. Retrying in {:?}...",
                e, RECONNECT_DELAY
            ),
        }
    }

    false
}
