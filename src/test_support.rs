//! Stub collaborators shared by the unit tests.

use crate::mqtt_service::{
    ConnectionError, ConnectionState, MessageSink, MqttHandle, MqttTransport, PublishError,
};
use crate::poller::{PollError, SensorSource};
use futures::future::BoxFuture;
use reqwest::StatusCode;
use rumqttc::QoS;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub fn owfs_row(name: &str, value: &str) -> String {
    format!("<TR><TD><B>{}</B></TD><TD>{}</TD></TR>", name, value)
}

#[derive(Debug, Clone)]
enum StubPage {
    Body(String),
    Status(StatusCode),
    Hang,
    PanicThen(String),
}

/// Serves canned device pages and counts fetches.
#[derive(Debug, Clone, Default)]
pub struct StubSource {
    pages: HashMap<String, StubPage>,
    fetches: Arc<Mutex<Vec<String>>>,
    panics_left: Arc<AtomicUsize>,
    cancels: HashMap<String, CancellationToken>,
}

impl StubSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, device_id: &str, body: &str) -> Self {
        self.pages
            .insert(device_id.to_string(), StubPage::Body(body.to_string()));
        self
    }

    pub fn status(mut self, device_id: &str, status: StatusCode) -> Self {
        self.pages
            .insert(device_id.to_string(), StubPage::Status(status));
        self
    }

    pub fn hang(mut self, device_id: &str) -> Self {
        self.pages.insert(device_id.to_string(), StubPage::Hang);
        self
    }

    /// The next `times` fetches of `device_id` panic, later ones return `body`.
    pub fn panic_then(mut self, device_id: &str, times: usize, body: &str) -> Self {
        self.panics_left.store(times, Ordering::SeqCst);
        self.pages
            .insert(device_id.to_string(), StubPage::PanicThen(body.to_string()));
        self
    }

    /// Fetching `device_id` cancels `token` before the page is returned.
    pub fn cancel_on_fetch(mut self, device_id: &str, token: CancellationToken) -> Self {
        self.cancels.insert(device_id.to_string(), token);
        self
    }

    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }
}

impl SensorSource for StubSource {
    fn fetch_page<'a>(&'a self, device_id: &'a str) -> BoxFuture<'a, Result<String, PollError>> {
        Box::pin(async move {
            self.fetches.lock().unwrap().push(device_id.to_string());
            if let Some(token) = self.cancels.get(device_id) {
                token.cancel();
            }
            match self.pages.get(device_id).cloned() {
                Some(StubPage::Body(body)) => Ok(body),
                Some(StubPage::Status(status)) => Err(PollError::BadStatus(status)),
                Some(StubPage::Hang) => futures::future::pending().await,
                Some(StubPage::PanicThen(body)) => {
                    if self.panics_left.load(Ordering::SeqCst) > 0 {
                        self.panics_left.fetch_sub(1, Ordering::SeqCst);
                        panic!("sensor source exploded");
                    }
                    Ok(body)
                }
                None => Err(PollError::BadStatus(StatusCode::NOT_FOUND)),
            }
        })
    }
}

/// Records published messages; topics in `failing` are refused.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub messages: Mutex<Vec<(String, String, QoS)>>,
    failing: HashSet<String>,
    cancel_on_send: Option<CancellationToken>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(topics: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            failing: topics.iter().map(|t| t.to_string()).collect(),
            ..Self::default()
        })
    }

    /// Cancels `token` once the first message has been recorded.
    pub fn cancelling(token: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            cancel_on_send: Some(token),
            ..Self::default()
        })
    }

    pub fn messages(&self) -> Vec<(String, String, QoS)> {
        self.messages.lock().unwrap().clone()
    }
}

impl MessageSink for RecordingSink {
    fn send<'a>(
        &'a self,
        topic: &'a str,
        payload: String,
        qos: QoS,
    ) -> BoxFuture<'a, Result<(), PublishError>> {
        Box::pin(async move {
            if self.failing.contains(topic) {
                return Err(PublishError::Client(format!("refused '{}'", topic)));
            }
            self.messages
                .lock()
                .unwrap()
                .push((topic.to_string(), payload, qos));
            if let Some(token) = &self.cancel_on_send {
                token.cancel();
            }
            Ok(())
        })
    }
}

/// A handle that reports `Connected` and writes into `sink`.
pub fn connected_handle(sink: Arc<RecordingSink>, cancel: CancellationToken) -> MqttHandle {
    let (_state_tx, state_rx) = watch::channel(ConnectionState::Connected);
    MqttHandle::from_parts(sink, state_rx, cancel)
}

/// Broker transport driven by a script of connect outcomes and an injectable disconnect channel.
pub struct ScriptedTransport {
    outcomes: VecDeque<Result<(), String>>,
    pub attempts: Arc<Mutex<Vec<Instant>>>,
    disconnects: mpsc::UnboundedReceiver<String>,
    sink: Arc<RecordingSink>,
    pub shutdowns: Arc<AtomicUsize>,
    hang_when_exhausted: bool,
}

impl ScriptedTransport {
    /// Returns the transport and the sender used to simulate link loss.
    pub fn new(outcomes: Vec<Result<(), &str>>) -> (Self, mpsc::UnboundedSender<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Self {
            outcomes: outcomes
                .into_iter()
                .map(|o| o.map_err(|e| e.to_string()))
                .collect(),
            attempts: Arc::new(Mutex::new(Vec::new())),
            disconnects: rx,
            sink: RecordingSink::new(),
            shutdowns: Arc::new(AtomicUsize::new(0)),
            hang_when_exhausted: false,
        };
        (transport, tx)
    }

    /// Connect attempts past the end of the script never complete.
    pub fn hang_when_exhausted(mut self) -> Self {
        self.hang_when_exhausted = true;
        self
    }

    pub fn recording_sink(&self) -> Arc<RecordingSink> {
        self.sink.clone()
    }
}

impl MqttTransport for ScriptedTransport {
    fn broker(&self) -> String {
        "scripted:1883".to_string()
    }

    fn sink(&self) -> Arc<dyn MessageSink> {
        self.sink.clone()
    }

    fn connect(&mut self) -> BoxFuture<'_, Result<(), ConnectionError>> {
        Box::pin(async move {
            self.attempts.lock().unwrap().push(Instant::now());
            match self.outcomes.pop_front() {
                Some(Ok(())) => Ok(()),
                Some(Err(reason)) => Err(ConnectionError::Failed {
                    broker: "scripted:1883".to_string(),
                    reason,
                }),
                None if self.hang_when_exhausted => futures::future::pending().await,
                None => Err(ConnectionError::Failed {
                    broker: "scripted:1883".to_string(),
                    reason: "script exhausted".to_string(),
                }),
            }
        })
    }

    fn run_until_disconnected(&mut self) -> BoxFuture<'_, String> {
        Box::pin(async move {
            match self.disconnects.recv().await {
                Some(reason) => reason,
                None => futures::future::pending().await,
            }
        })
    }

    fn shutdown(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        })
    }
}
