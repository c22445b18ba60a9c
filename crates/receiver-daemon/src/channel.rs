//! Connection channel and reconnect supervisor.
//!
//! The supervisor owns the WebSocket and speaks Engine.IO/Socket.IO framing.
//! Lifecycle changes and named events go to the core as
//! `ReceiverEvent::Channel`; the core answers `Connected` with HELLO.
//! Reconnects use a fixed delay, never a growing backoff.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use receiver_proto::config::TimingConfig;
use receiver_proto::protocol::Outbound;
use receiver_proto::wire::{self, Packet, CONNECT_FRAME, PONG_FRAME};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::ReceiverEvent;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Engine.IO v4 defaults (25 s interval + 20 s timeout) until the open
/// packet says otherwise.
const DEFAULT_LIVENESS: Duration = Duration::from_secs(45);
const MAX_LIVENESS: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    /// A connect attempt failed.
    Error,
    /// An established session was lost.
    Closed,
    /// The channel URL itself is unusable.
    Failed,
}

impl ConnectionStatus {
    pub fn text(&self) -> &'static str {
        match self {
            ConnectionStatus::Connecting => "WS: connecting...",
            ConnectionStatus::Connected => "WS: connected",
            ConnectionStatus::Error => "WS: error",
            ConnectionStatus::Closed => "WS: closed",
            ConnectionStatus::Failed => "WS: failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Status(ConnectionStatus),
    Message { name: String, data: Value },
}

#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub reconnect_delay: Duration,
    pub failed_url_retry: Duration,
    pub handshake_timeout: Duration,
}

impl From<&TimingConfig> for ReconnectPolicy {
    fn from(timing: &TimingConfig) -> Self {
        Self {
            reconnect_delay: timing.reconnect_delay(),
            failed_url_retry: timing.failed_url_retry(),
            handshake_timeout: timing.handshake_timeout(),
        }
    }
}

// ── handle ────────────────────────────────────────────────────────────────────

/// Outbound side of the channel.  Emitting never blocks.
#[derive(Clone)]
pub struct ChannelHandle {
    tx: mpsc::Sender<String>,
    connected: Arc<AtomicBool>,
}

impl ChannelHandle {
    pub(crate) fn new() -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(64);
        (
            Self {
                tx,
                connected: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    /// Fire-and-forget.  Returns false when the message was dropped because
    /// the channel is down, the queue is full, or it failed to encode.
    pub fn emit(&self, message: &Outbound) -> bool {
        if !self.is_connected() {
            debug!("channel: not connected, dropping {}", message.event_name());
            return false;
        }
        let frame = match message
            .payload()
            .map_err(wire::WireError::from)
            .and_then(|data| wire::encode_event(message.event_name(), &data))
        {
            Ok(frame) => frame,
            Err(e) => {
                warn!("channel: cannot encode {}: {}", message.event_name(), e);
                return false;
            }
        };
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(e) => {
                debug!("channel: dropping {}: {}", message.event_name(), e);
                false
            }
        }
    }
}

// ── supervisor ────────────────────────────────────────────────────────────────

enum SessionEnd {
    Lost,
    Rejected,
    /// No namespace ack within the handshake timeout.
    Unanswered,
    Shutdown,
}

pub fn spawn_supervisor(
    channel_url: String,
    policy: ReconnectPolicy,
    events: mpsc::Sender<ReceiverEvent>,
    shutdown: CancellationToken,
) -> (ChannelHandle, tokio::task::JoinHandle<()>) {
    let (handle, outbound) = ChannelHandle::new();
    let connected = handle.clone();
    let task = tokio::spawn(supervise(channel_url, policy, connected, outbound, events, shutdown));
    (handle, task)
}

async fn supervise(
    channel_url: String,
    policy: ReconnectPolicy,
    handle: ChannelHandle,
    mut outbound: mpsc::Receiver<String>,
    events: mpsc::Sender<ReceiverEvent>,
    shutdown: CancellationToken,
) {
    let status = |s: ConnectionStatus| {
        let events = events.clone();
        async move {
            events
                .send(ReceiverEvent::Channel(ChannelEvent::Status(s)))
                .await
                .is_ok()
        }
    };

    loop {
        if shutdown.is_cancelled() || !status(ConnectionStatus::Connecting).await {
            break;
        }

        let url = match wire::socket_url(&channel_url) {
            Ok(url) => url,
            Err(e) => {
                warn!("channel: {}", e);
                if !status(ConnectionStatus::Failed).await || !pause(policy.failed_url_retry, &shutdown).await {
                    break;
                }
                continue;
            }
        };

        // nothing queued for a previous connection survives into this one
        while outbound.try_recv().is_ok() {}

        debug!("channel: connecting to {}", url);
        let stream = match tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url.as_str())).await {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(e)) => {
                warn!("channel: connect failed: {}", e);
                if !status(ConnectionStatus::Error).await || !pause(policy.reconnect_delay, &shutdown).await {
                    break;
                }
                continue;
            }
            Err(_) => {
                warn!("channel: connect timed out after {:?}", CONNECT_TIMEOUT);
                if !status(ConnectionStatus::Error).await || !pause(policy.reconnect_delay, &shutdown).await {
                    break;
                }
                continue;
            }
        };

        let end = run_session(
            stream,
            policy.handshake_timeout,
            &handle,
            &mut outbound,
            &events,
            &shutdown,
        )
        .await;
        handle.set_connected(false);
        let next = match end {
            SessionEnd::Shutdown => break,
            SessionEnd::Lost => ConnectionStatus::Closed,
            SessionEnd::Rejected | SessionEnd::Unanswered => ConnectionStatus::Error,
        };
        info!("channel: session ended ({})", next.text());
        if !status(next).await || !pause(policy.reconnect_delay, &shutdown).await {
            break;
        }
    }
    handle.set_connected(false);
    debug!("channel: supervisor exiting");
}

/// Sleep unless shut down first.  Returns false on shutdown.
async fn pause(delay: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Runs one Socket.IO session.  Any inbound frame counts as proof of life;
/// silence longer than the server's `pingInterval + pingTimeout` ends the
/// session as lost.
async fn run_session<S>(
    stream: S,
    handshake_timeout: Duration,
    handle: &ChannelHandle,
    outbound: &mut mpsc::Receiver<String>,
    events: &mpsc::Sender<ReceiverEvent>,
    shutdown: &CancellationToken,
) -> SessionEnd
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    let (mut write, mut read) = stream.split();
    let handshake_deadline = Instant::now() + handshake_timeout.min(MAX_LIVENESS);
    let mut window = DEFAULT_LIVENESS;
    let mut last_heard = Instant::now();
    loop {
        let connected = handle.is_connected();
        let deadline = if connected {
            last_heard + window
        } else {
            (last_heard + window).min(handshake_deadline)
        };
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return SessionEnd::Shutdown;
            }
            frame = outbound.recv(), if handle.is_connected() => {
                let Some(frame) = frame else {
                    return SessionEnd::Shutdown;
                };
                if let Err(e) = write.send(Message::text(frame)).await {
                    debug!("channel: write failed: {}", e);
                    return SessionEnd::Lost;
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                if connected {
                    warn!("channel: nothing heard for {:?}, dropping session", window);
                    return SessionEnd::Lost;
                }
                warn!("channel: no connect ack within {:?}", handshake_timeout);
                return SessionEnd::Unanswered;
            }
            msg = read.next() => {
                last_heard = Instant::now();
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => return SessionEnd::Lost,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!("channel: read failed: {}", e);
                        return SessionEnd::Lost;
                    }
                };
                let reply = match wire::decode(text.as_str()) {
                    Ok(Packet::Open(open)) => {
                        if let Some(w) = wire::liveness_window(&open) {
                            window = w.min(MAX_LIVENESS);
                        }
                        Some(CONNECT_FRAME)
                    }
                    Ok(Packet::Ping) => Some(PONG_FRAME),
                    Ok(Packet::Connect) => {
                        info!("channel: connected");
                        handle.set_connected(true);
                        let evt = ChannelEvent::Status(ConnectionStatus::Connected);
                        if events.send(ReceiverEvent::Channel(evt)).await.is_err() {
                            return SessionEnd::Shutdown;
                        }
                        None
                    }
                    Ok(Packet::Event { name, data }) => {
                        let evt = ChannelEvent::Message { name, data };
                        if events.send(ReceiverEvent::Channel(evt)).await.is_err() {
                            return SessionEnd::Shutdown;
                        }
                        None
                    }
                    Ok(Packet::ConnectError(detail)) => {
                        warn!("channel: connect rejected: {}", detail);
                        return SessionEnd::Rejected;
                    }
                    Ok(Packet::Close) | Ok(Packet::Disconnect) => return SessionEnd::Lost,
                    Ok(_) => None,
                    Err(e) => {
                        debug!("channel: ignoring frame {:?}: {}", text.as_str(), e);
                        None
                    }
                };
                if let Some(reply) = reply {
                    if let Err(e) = write.send(Message::text(reply)).await {
                        debug!("channel: write failed: {}", e);
                        return SessionEnd::Lost;
                    }
                }
            }
        }
    }
}
