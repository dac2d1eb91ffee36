use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use scribe_core::config::ClientConfig;
use scribe_core::frames::ClientFrame;

use crate::heartbeat::HeartbeatMonitor;

/// Transport lifecycle. Mutated only by the connection task; read everywhere
/// else through `ConnectionManager::state()` / `is_connected()`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Reconnecting,
    GaveUp,
}

enum Command {
    Connect,
    Disconnect,
}

enum CloseReason {
    /// `disconnect()` or channel teardown; never reconnect.
    Explicit,
    /// Socket error, server close, or pong timeout; enter the backoff path.
    Unexpected,
    /// Shutdown token fired; the task is exiting.
    Shutdown,
}

struct Shared {
    state: RwLock<ConnectionState>,
    /// Installed while the socket is open; send() refuses otherwise.
    outbound: RwLock<Option<mpsc::UnboundedSender<String>>>,
    /// Unix millis of the last liveness proof (open, inbound frame, pong).
    last_activity: AtomicU64,
    /// Reconnect attempts scheduled since the last successful open.
    attempts: AtomicU32,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: RwLock::new(ConnectionState::Disconnected),
            outbound: RwLock::new(None),
            last_activity: AtomicU64::new(now_millis()),
            attempts: AtomicU32::new(0),
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.write();
        if *state != next {
            tracing::debug!(from = ?*state, to = ?next, "connection state change");
            *state = next;
        }
    }

    fn record_activity(&self) {
        self.last_activity.store(now_millis(), Ordering::Relaxed);
    }

    fn activity_stale(&self, timeout: Duration) -> bool {
        let last = self.last_activity.load(Ordering::Relaxed);
        now_millis().saturating_sub(last) >= timeout.as_millis() as u64
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Handle to the connection task. Cheap to clone; all socket I/O and state
/// transitions happen on the owning task.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl ConnectionManager {
    /// Spawn the connection task. Inbound text frames are forwarded to
    /// `inbound_tx` in delivery order; the task never parses them.
    pub fn spawn(
        config: ClientConfig,
        inbound_tx: mpsc::UnboundedSender<String>,
        shutdown: CancellationToken,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new());
        let task = tokio::spawn(run(
            Arc::clone(&shared),
            config,
            cmd_rx,
            inbound_tx,
            shutdown,
        ));
        (Self { shared, cmd_tx }, task)
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Reconnect attempts scheduled since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::Relaxed)
    }

    /// Ask the task to open the transport. No-op while a connection is
    /// already being established, open, or scheduled for retry.
    pub fn connect(&self) {
        match self.state() {
            ConnectionState::Connecting | ConnectionState::Open | ConnectionState::Reconnecting => {
                tracing::trace!(state = ?self.state(), "connect ignored");
            }
            ConnectionState::Disconnected | ConnectionState::GaveUp => {
                let _ = self.cmd_tx.send(Command::Connect);
            }
        }
    }

    /// Close the transport and cancel any pending reconnect. Terminal: the
    /// task will not reconnect until `connect()` is called again.
    pub fn disconnect(&self) {
        let _ = self.cmd_tx.send(Command::Disconnect);
    }

    /// Serialize and queue a frame for transmission. Returns false without
    /// side effects unless the connection is open.
    pub fn send(&self, frame: &ClientFrame) -> bool {
        if !self.is_connected() {
            return false;
        }
        let json = match serde_json::to_string(frame) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(frame = frame.frame_type(), error = %e, "frame serialization failed");
                return false;
            }
        };
        match &*self.shared.outbound.read() {
            Some(tx) => tx.send(json).is_ok(),
            None => false,
        }
    }

    /// Stamp the liveness clock. Called by the router on `pong` frames.
    pub fn record_activity(&self) {
        self.shared.record_activity();
    }
}

async fn run(
    shared: Arc<Shared>,
    config: ClientConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    inbound_tx: mpsc::UnboundedSender<String>,
    shutdown: CancellationToken,
) {
    'idle: loop {
        // Wait for an explicit connect while Disconnected/GaveUp.
        let cmd = tokio::select! {
            _ = shutdown.cancelled() => break,
            cmd = cmd_rx.recv() => match cmd {
                Some(cmd) => cmd,
                None => break,
            },
        };
        if !matches!(cmd, Command::Connect) {
            continue;
        }

        let mut attempts: u32 = 0;
        'dial: loop {
            shared.set_state(ConnectionState::Connecting);
            tracing::debug!(url = %config.ws_url, "opening transport");

            let dial = connect_async(config.ws_url.clone());
            tokio::pin!(dial);
            let dialed = loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        shared.set_state(ConnectionState::Disconnected);
                        break 'idle;
                    }
                    cmd = cmd_rx.recv() => match cmd {
                        Some(Command::Disconnect) => {
                            shared.set_state(ConnectionState::Disconnected);
                            continue 'idle;
                        }
                        Some(Command::Connect) => {} // already connecting
                        None => break 'idle,
                    },
                    result = &mut dial => break result,
                }
            };

            match dialed {
                Ok((socket, _response)) => {
                    attempts = 0;
                    shared.attempts.store(0, Ordering::Relaxed);
                    shared.record_activity();
                    let (out_tx, out_rx) = mpsc::unbounded_channel();
                    *shared.outbound.write() = Some(out_tx);
                    shared.set_state(ConnectionState::Open);
                    tracing::info!(url = %config.ws_url, "transport open");

                    let reason = drive(
                        socket,
                        out_rx,
                        &mut cmd_rx,
                        &inbound_tx,
                        &shared,
                        &config,
                        &shutdown,
                    )
                    .await;
                    *shared.outbound.write() = None;

                    match reason {
                        CloseReason::Explicit => {
                            shared.set_state(ConnectionState::Disconnected);
                            tracing::info!("transport closed");
                            continue 'idle;
                        }
                        CloseReason::Shutdown => {
                            shared.set_state(ConnectionState::Disconnected);
                            break 'idle;
                        }
                        CloseReason::Unexpected => {
                            tracing::warn!("transport closed unexpectedly");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(url = %config.ws_url, error = %e, "transport dial failed");
                }
            }

            // Unexpected close or failed dial: bounded backoff.
            if attempts >= config.reconnect.max_attempts {
                shared.set_state(ConnectionState::GaveUp);
                tracing::warn!(attempts, "reconnect attempts exhausted, giving up");
                continue 'idle;
            }
            let delay = config.reconnect.delay_for(attempts);
            attempts += 1;
            shared.attempts.store(attempts, Ordering::Relaxed);
            shared.set_state(ConnectionState::Reconnecting);
            tracing::info!(
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                "reconnect scheduled"
            );

            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        shared.set_state(ConnectionState::Disconnected);
                        break 'idle;
                    }
                    _ = &mut sleep => break,
                    cmd = cmd_rx.recv() => match cmd {
                        Some(Command::Disconnect) => {
                            shared.set_state(ConnectionState::Disconnected);
                            continue 'idle;
                        }
                        Some(Command::Connect) => break, // retry immediately
                        None => break 'idle,
                    },
                }
            }
            continue 'dial;
        }
    }

    *shared.outbound.write() = None;
    tracing::debug!("connection task stopped");
}

/// Service an open socket until it closes: forward queued outbound frames,
/// emit heartbeats, relay inbound text to the router.
async fn drive(
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut out_rx: mpsc::UnboundedReceiver<String>,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    inbound_tx: &mpsc::UnboundedSender<String>,
    shared: &Shared,
    config: &ClientConfig,
    shutdown: &CancellationToken,
) -> CloseReason {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut heartbeat = HeartbeatMonitor::new(config.heartbeat_interval);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = ws_tx.close().await;
                return CloseReason::Shutdown;
            }
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Disconnect) => {
                    let _ = ws_tx.close().await;
                    return CloseReason::Explicit;
                }
                Some(Command::Connect) => {} // already open
                None => {
                    let _ = ws_tx.close().await;
                    return CloseReason::Explicit;
                }
            },
            Some(json) = out_rx.recv() => {
                if ws_tx.send(WsMessage::Text(json)).await.is_err() {
                    return CloseReason::Unexpected;
                }
            }
            _ = heartbeat.tick() => {
                if shared.activity_stale(config.pong_timeout) {
                    tracing::warn!(
                        timeout_ms = config.pong_timeout.as_millis() as u64,
                        "no pong within timeout, forcing reconnect"
                    );
                    let _ = ws_tx.close().await;
                    return CloseReason::Unexpected;
                }
                let ping = match serde_json::to_string(&heartbeat.frame()) {
                    Ok(json) => json,
                    Err(_) => continue,
                };
                if ws_tx.send(WsMessage::Text(ping)).await.is_err() {
                    return CloseReason::Unexpected;
                }
                tracing::trace!("ping sent");
            }
            msg = ws_rx.next() => match msg {
                Some(Ok(WsMessage::Text(text))) => {
                    shared.record_activity();
                    let _ = inbound_tx.send(text);
                }
                Some(Ok(WsMessage::Close(_))) | None => return CloseReason::Unexpected,
                Some(Ok(_)) => {} // control frames handled by the library
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "transport read failed");
                    return CloseReason::Unexpected;
                }
            },
        }
    }
}
