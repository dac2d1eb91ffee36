use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use scribe_core::config::ClientConfig;
use scribe_core::errors::ClientError;
use scribe_core::progress::SessionEvent;

use crate::connection::{ConnectionManager, ConnectionState};
use crate::fallback::FallbackClient;
use crate::router::MessageRouter;
use crate::session::SynthesisSession;

/// Process-lifetime handle owning the protocol client: the connection task,
/// the router task, and the single synthesis session. Create once at
/// startup; `shutdown()` tears everything down for good.
///
/// Must be constructed inside a Tokio runtime.
pub struct SynthesisClient {
    connection: ConnectionManager,
    session: SynthesisSession,
    shutdown: CancellationToken,
    _connection_task: tokio::task::JoinHandle<()>,
    _router_task: tokio::task::JoinHandle<()>,
}

impl SynthesisClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let shutdown = CancellationToken::new();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let (connection, connection_task) =
            ConnectionManager::spawn(config.clone(), inbound_tx, shutdown.clone());

        let fallback = FallbackClient::new(config.fallback_url.clone(), config.request_timeout)?;
        let session = SynthesisSession::new(
            Arc::new(connection.clone()),
            Arc::new(fallback),
            config.watchdog_timeout,
        );

        let router = MessageRouter::new(session.clone(), connection.clone());
        let router_task = router.spawn(inbound_rx, shutdown.clone());

        Ok(Self {
            connection,
            session,
            shutdown,
            _connection_task: connection_task,
            _router_task: router_task,
        })
    }

    /// Open the live transport. Safe to call repeatedly.
    pub fn connect(&self) {
        self.connection.connect();
    }

    /// Close the transport and cancel any pending reconnect.
    pub fn disconnect(&self) {
        self.connection.disconnect();
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn session(&self) -> &SynthesisSession {
        &self.session
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.session.subscribe()
    }

    /// Start a synthesis job; see [`SynthesisSession::start`].
    pub async fn start(
        &self,
        topic: &str,
        specialty: &str,
        max_sources: u32,
    ) -> Result<(), ClientError> {
        self.session.start(topic, specialty, max_sources).await
    }

    /// Tear down the client: stops both tasks and closes the socket. The
    /// client never reconnects after shutdown.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for SynthesisClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
