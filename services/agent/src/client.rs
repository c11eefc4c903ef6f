//! Link to the control plane's agent channel.
//!
//! The link owns the websocket and reconnects with exponential backoff when
//! it drops. Inbound frames are forwarded to the worker; outbound frames are
//! queued in a bounded buffer and delivered once a connection is up.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use testlib_proto::AgentFrame;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// Frames buffered for the control plane while the link is down.
pub const OUTBOUND_CAPACITY: usize = 256;

const INBOUND_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },

    #[error("connection closed: {0}")]
    Closed(String),
}

/// Exponential reconnect delay.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base: Duration,
    pub max: Duration,
    /// Jitter factor (0.0 to 1.0).
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(10),
            jitter: 0.1,
        }
    }
}

impl BackoffPolicy {
    /// Delay for the given attempt number, starting at zero.
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = self.base.as_millis() as f64 * 2.0_f64.powi(attempt.min(30) as i32);
        let delay = delay.min(self.max.as_millis() as f64);

        let jitter_range = delay * self.jitter.clamp(0.0, 1.0);
        let jitter = if jitter_range > 0.0 {
            rand::rng().random_range(0.0..jitter_range)
        } else {
            0.0
        };

        Duration::from_millis((delay + jitter) as u64)
    }
}

/// Cheap handle for queueing frames to the control plane.
#[derive(Clone)]
pub struct LinkSender {
    tx: mpsc::Sender<AgentFrame>,
}

impl LinkSender {
    /// A sender whose frames land on the returned receiver.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<AgentFrame>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Queues a frame. Returns false when it was dropped because the buffer
    /// is full or the link is gone.
    pub fn send(&self, frame: AgentFrame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(frame)) => {
                warn!(event = frame.event(), "Outbound buffer full, dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(frame)) => {
                warn!(event = frame.event(), "Link stopped, dropping frame");
                false
            }
        }
    }
}

/// How a session ended.
enum SessionEnd {
    Shutdown,
    Disconnected(LinkError),
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// The websocket link task.
pub struct ControlLink {
    url: String,
    backoff: BackoffPolicy,
    outbound: mpsc::Receiver<AgentFrame>,
    inbound: mpsc::Sender<AgentFrame>,
}

impl ControlLink {
    /// Creates the link plus the handles the worker uses: a sender for
    /// outbound frames and the receiver of inbound ones.
    pub fn new(url: impl Into<String>) -> (Self, LinkSender, mpsc::Receiver<AgentFrame>) {
        let (sender, out_rx) = LinkSender::channel(OUTBOUND_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel(INBOUND_CAPACITY);
        let link = Self {
            url: url.into(),
            backoff: BackoffPolicy::default(),
            outbound: out_rx,
            inbound: in_tx,
        };
        (link, sender, in_rx)
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Connects and serves the link until shutdown.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(url = %self.url, "Starting control plane link");
        let mut attempt: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            match connect_async(self.url.as_str()).await {
                Ok((socket, _)) => {
                    info!(url = %self.url, "Connected to control plane");
                    attempt = 0;
                    match self.session(socket, &mut shutdown).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Disconnected(e) => {
                            warn!(error = %e, "Control plane link dropped");
                        }
                    }
                }
                Err(source) => {
                    let e = LinkError::Connect {
                        url: self.url.clone(),
                        source,
                    };
                    warn!(error = %e, attempt, "Control plane unreachable");
                }
            }

            let delay = self.backoff.delay(attempt);
            attempt = attempt.saturating_add(1);
            debug!(delay_ms = delay.as_millis() as u64, "Reconnecting after delay");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Control plane link stopped");
    }

    async fn session(&mut self, socket: Socket, shutdown: &mut watch::Receiver<bool>) -> SessionEnd {
        let (mut sink, mut stream) = socket.split();

        loop {
            tokio::select! {
                frame = self.outbound.recv() => {
                    let Some(frame) = frame else {
                        let _ = sink.send(Message::Close(None)).await;
                        return SessionEnd::Shutdown;
                    };
                    let text = match frame.encode() {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(error = %e, "Failed to encode frame");
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::text(text)).await {
                        return SessionEnd::Disconnected(LinkError::Closed(e.to_string()));
                    }
                }
                message = stream.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            match AgentFrame::decode(text.as_str()) {
                                Ok(frame) => {
                                    if self.inbound.send(frame).await.is_err() {
                                        return SessionEnd::Shutdown;
                                    }
                                }
                                Err(e) => warn!(error = %e, "Ignoring undecodable frame"),
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return SessionEnd::Disconnected(LinkError::Closed(
                                "closed by control plane".to_string(),
                            ));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            return SessionEnd::Disconnected(LinkError::Closed(e.to_string()));
                        }
                    }
                }
                _ = shutdown.changed() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return SessionEnd::Shutdown;
                }
            }
        }
    }
}
