use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;
use vizscope_core::connection::ConnectionAction;
use vizscope_core::frame::PendingImage;
use vizscope_core::image::{decode_data_uri, DecodedImage, ImageDecodeError, ImageKey};
use vizscope_core::wire::{discovery_outcome, Command};
use vizscope_core::TraceError;

pub const EVENT_QUEUE_CAPACITY: usize = 256;
const OUTGOING_QUEUE_CAPACITY: usize = 64;

/// Results of background work, delivered to the UI loop. Socket events
/// carry the generation of the socket that produced them so late events
/// from a replaced socket can be dropped.
#[derive(Debug)]
pub enum DriverEvent {
    Discovered(Result<String, TraceError>),
    Opened { generation: u64 },
    Text { generation: u64, text: String },
    TransportFailure { generation: u64, reason: String },
    Closed { generation: u64 },
    ImageDecoded {
        key: ImageKey,
        result: Result<DecodedImage, ImageDecodeError>,
    },
}

struct SocketHandle {
    generation: u64,
    outgoing: mpsc::Sender<String>,
    task: JoinHandle<()>,
}

/// Performs connection actions. Owns at most one socket task and one
/// retry deadline.
pub struct ConnectionIo {
    events: mpsc::Sender<DriverEvent>,
    http: reqwest::Client,
    discovery_url: String,
    socket: Option<SocketHandle>,
    closing: Option<JoinHandle<()>>,
    generation: u64,
    retry_at: Option<Instant>,
}

impl ConnectionIo {
    pub fn new(events: mpsc::Sender<DriverEvent>, discovery_url: String) -> Self {
        Self {
            events,
            http: reqwest::Client::new(),
            discovery_url,
            socket: None,
            closing: None,
            generation: 0,
            retry_at: None,
        }
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.socket
            .as_ref()
            .is_some_and(|socket| socket.generation == generation)
    }

    pub fn retry_deadline(&self) -> Option<Instant> {
        self.retry_at
    }

    /// The retry deadline fired; the caller feeds `RetryTimer` to the
    /// state machine.
    pub fn take_retry(&mut self) {
        self.retry_at = None;
    }

    /// `Alert` is handled by the caller; everything else is I/O.
    pub fn perform(&mut self, action: ConnectionAction) {
        match action {
            ConnectionAction::Discover => self.discover(),
            ConnectionAction::Connect { url } => self.connect(url),
            ConnectionAction::Send(command) => self.send(command),
            ConnectionAction::Close => {
                // Dropping the sender lets the socket task flush what is
                // queued, then close.
                if let Some(socket) = self.socket.take() {
                    debug!(generation = socket.generation, "stream_close_requested");
                    self.closing = Some(socket.task);
                }
            }
            ConnectionAction::ScheduleRetry(interval) => {
                info!(interval_ms = interval.as_millis() as u64, "reconnect_scheduled");
                self.retry_at = Some(Instant::now() + interval);
            }
            ConnectionAction::CancelRetry => {
                self.retry_at = None;
            }
            ConnectionAction::Alert(_) => {}
        }
    }

    fn discover(&self) {
        let http = self.http.clone();
        let url = self.discovery_url.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = discover(&http, &url).await;
            let _ = events.send(DriverEvent::Discovered(result)).await;
        });
    }

    fn connect(&mut self, url: String) {
        self.generation += 1;
        let generation = self.generation;
        let (outgoing_tx, outgoing_rx) = mpsc::channel(OUTGOING_QUEUE_CAPACITY);
        let events = self.events.clone();
        info!(generation, url = %url, "stream_connecting");
        let task = tokio::spawn(async move {
            socket_loop(url, generation, events, outgoing_rx).await;
        });
        self.socket = Some(SocketHandle {
            generation,
            outgoing: outgoing_tx,
            task,
        });
    }

    /// Waits up to `timeout` for a closing socket to flush its queue.
    pub async fn drain(&mut self, timeout: Duration) {
        if let Some(task) = self.closing.take() {
            if tokio::time::timeout(timeout, task).await.is_err() {
                debug!("stream_drain_timed_out");
            }
        }
    }

    fn send(&self, command: Command) {
        let Some(socket) = &self.socket else {
            debug!(id = command.id, method = command.call.name(), "command_dropped_no_socket");
            return;
        };
        let text = match command.encode() {
            Ok(text) => text,
            Err(err) => {
                warn!("command_encode_failed: {err}");
                return;
            }
        };
        match socket.outgoing.try_send(text) {
            Ok(()) => debug!(id = command.id, method = command.call.name(), "command_sent"),
            Err(err) => warn!(id = command.id, "command_send_failed: {err}"),
        }
    }

    /// Decodes a `buff_map` payload off the UI loop.
    pub fn spawn_decode(&self, pending: PendingImage) {
        let events = self.events.clone();
        tokio::spawn(async move {
            let PendingImage { key, data_uri } = pending;
            let result = tokio::task::spawn_blocking(move || decode_data_uri(&data_uri))
                .await
                .unwrap_or_else(|err| Err(ImageDecodeError::Image(err.to_string())));
            let _ = events
                .send(DriverEvent::ImageDecoded { key, result })
                .await;
        });
    }
}

async fn discover(http: &reqwest::Client, url: &str) -> Result<String, TraceError> {
    let body = match http.get(url).send().await {
        Ok(response) => response.text().await.map_err(|err| err.to_string()),
        Err(err) => Err(err.to_string()),
    };
    if let Err(err) = &body {
        debug!(url, "discovery_request_failed: {err}");
    }
    discovery_outcome(body.as_deref().map_err(|err| err.clone()))
}

async fn socket_loop(
    url: String,
    generation: u64,
    events: mpsc::Sender<DriverEvent>,
    mut outgoing: mpsc::Receiver<String>,
) {
    let target = match Url::parse(&url) {
        Ok(target) => target,
        Err(err) => {
            let reason = format!("invalid url {url}: {err}");
            let _ = events
                .send(DriverEvent::TransportFailure { generation, reason })
                .await;
            return;
        }
    };
    let ws = match connect_async(target).await {
        Ok((ws, _)) => ws,
        Err(err) => {
            let _ = events
                .send(DriverEvent::TransportFailure {
                    generation,
                    reason: err.to_string(),
                })
                .await;
            return;
        }
    };
    if events.send(DriverEvent::Opened { generation }).await.is_err() {
        return;
    }
    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            out = outgoing.recv() => match out {
                Some(text) => {
                    if let Err(err) = sink.send(Message::Text(text)).await {
                        let _ = events
                            .send(DriverEvent::TransportFailure { generation, reason: err.to_string() })
                            .await;
                        break;
                    }
                }
                None => {
                    let _ = sink.close().await;
                    let _ = events.send(DriverEvent::Closed { generation }).await;
                    break;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if events.send(DriverEvent::Text { generation, text }).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => {
                        if events.send(DriverEvent::Text { generation, text }).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => debug!(generation, "binary_message_ignored: {err}"),
                },
                Some(Ok(Message::Close(_))) | None => {
                    let _ = events.send(DriverEvent::Closed { generation }).await;
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    let _ = events
                        .send(DriverEvent::TransportFailure { generation, reason: err.to_string() })
                        .await;
                    break;
                }
            }
        }
    }
}

/// Resolves at the deadline, or never when no retry is armed.
pub async fn retry_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
