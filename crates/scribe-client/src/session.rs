use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::Instant;

use scribe_core::errors::{ClientError, ErrorRecord};
use scribe_core::frames::ClientFrame;
use scribe_core::progress::{
    ProgressSnapshot, SessionEvent, SessionResult, SessionState, SynthesisStatus,
};

use crate::connection::ConnectionManager;
use crate::fallback::FallbackClient;

/// Write access to the live transport, as the session sees it.
pub trait FrameSink: Send + Sync {
    fn is_connected(&self) -> bool;
    /// False without side effects unless the connection is open.
    fn send(&self, frame: &ClientFrame) -> bool;
}

impl FrameSink for ConnectionManager {
    fn is_connected(&self) -> bool {
        ConnectionManager::is_connected(self)
    }

    fn send(&self, frame: &ClientFrame) -> bool {
        ConnectionManager::send(self, frame)
    }
}

/// The one-shot blocking exchange used when the transport is unavailable.
#[async_trait]
pub trait SynthesisFallback: Send + Sync {
    async fn request(
        &self,
        topic: &str,
        specialty: &str,
        max_sources: u32,
    ) -> Result<SessionResult, ClientError>;
}

#[async_trait]
impl SynthesisFallback for FallbackClient {
    async fn request(
        &self,
        topic: &str,
        specialty: &str,
        max_sources: u32,
    ) -> Result<SessionResult, ClientError> {
        FallbackClient::request(self, topic, specialty, max_sources).await
    }
}

struct Inner {
    state: SessionState,
    snapshot: Option<ProgressSnapshot>,
    result: Option<SessionResult>,
    error: Option<ErrorRecord>,
    /// Bumped on every start() and reset(); stale watchdogs and fallback
    /// completions check it before touching the session.
    generation: u64,
    last_activity: Instant,
}

/// State machine for one synthesis job:
/// Idle → Requesting → InProgress → Completed | Failed, reset() → Idle.
/// At most one job is in flight at a time.
#[derive(Clone)]
pub struct SynthesisSession {
    inner: Arc<Mutex<Inner>>,
    sink: Arc<dyn FrameSink>,
    fallback: Arc<dyn SynthesisFallback>,
    events: broadcast::Sender<SessionEvent>,
    watchdog: Option<Duration>,
}

impl SynthesisSession {
    pub fn new(
        sink: Arc<dyn FrameSink>,
        fallback: Arc<dyn SynthesisFallback>,
        watchdog: Option<Duration>,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: SessionState::Idle,
                snapshot: None,
                result: None,
                error: None,
                generation: 0,
                last_activity: Instant::now(),
            })),
            sink,
            fallback,
            events,
            watchdog,
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn snapshot(&self) -> Option<ProgressSnapshot> {
        self.inner.lock().snapshot.clone()
    }

    pub fn result(&self) -> Option<SessionResult> {
        self.inner.lock().result.clone()
    }

    pub fn error(&self) -> Option<ErrorRecord> {
        self.inner.lock().error.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Begin a synthesis job. Returns immediately when the live transport
    /// carries the request; otherwise blocks for the single fallback
    /// exchange. Rejected without mutating state while a job is in flight.
    pub async fn start(
        &self,
        topic: &str,
        specialty: &str,
        max_sources: u32,
    ) -> Result<(), ClientError> {
        if topic.trim().is_empty() {
            return Err(ClientError::InvalidRequest("topic must not be empty".into()));
        }

        let generation = {
            let mut inner = self.inner.lock();
            if !inner.state.can_start() {
                return Err(ClientError::SessionBusy);
            }
            inner.generation += 1;
            inner.state = SessionState::Requesting;
            inner.snapshot = Some(ProgressSnapshot::initial());
            inner.result = None;
            inner.error = None;
            inner.last_activity = Instant::now();
            inner.generation
        };
        self.emit(SessionEvent::Progress(ProgressSnapshot::initial()));

        let sent = self.sink.is_connected()
            && self.sink.send(&ClientFrame::SynthesisRequest {
                topic: topic.into(),
                specialty: specialty.into(),
                max_sources,
            });
        if sent {
            tracing::info!(topic, specialty, max_sources, "synthesis requested over live transport");
            self.spawn_watchdog(generation);
            return Ok(());
        }

        tracing::info!(topic, specialty, "transport unavailable, using fallback request");
        match self.fallback.request(topic, specialty, max_sources).await {
            Ok(result) => {
                self.complete_inner(Some(generation), result);
                Ok(())
            }
            Err(e) => {
                self.fail_inner(Some(generation), &e);
                Err(e)
            }
        }
    }

    /// Abandon the current session and return to Idle. Valid from any state;
    /// an in-flight server-side job is not cancelled, only forgotten.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Idle {
            return;
        }
        tracing::debug!(state = ?inner.state, "session reset");
        inner.generation += 1;
        inner.state = SessionState::Idle;
        inner.snapshot = None;
        inner.result = None;
        inner.error = None;
    }

    /// Apply a progress frame. Regressing percentages are suppressed so the
    /// exposed snapshot sequence is non-decreasing.
    pub fn apply_progress(&self, update: ProgressSnapshot) {
        let accepted = {
            let mut inner = self.inner.lock();
            if !inner.state.is_in_flight() {
                tracing::debug!("progress frame without an active session, dropped");
                return;
            }
            if let Some(current) = &inner.snapshot {
                if update.progress < current.progress {
                    tracing::debug!(
                        current = current.progress,
                        update = update.progress,
                        "suppressing regressing progress update"
                    );
                    return;
                }
            }
            inner.state = SessionState::InProgress;
            inner.snapshot = Some(update.clone());
            inner.last_activity = Instant::now();
            update
        };
        self.emit(SessionEvent::Progress(accepted));
    }

    /// Terminal success from the live transport.
    pub fn apply_complete(&self, result: SessionResult) {
        self.complete_inner(None, result);
    }

    /// Terminal failure from the live transport.
    pub fn apply_error(&self, error: &ClientError) {
        self.fail_inner(None, error);
    }

    fn complete_inner(&self, generation: Option<u64>, result: SessionResult) {
        {
            let mut inner = self.inner.lock();
            if generation.is_some_and(|g| inner.generation != g) {
                return;
            }
            if !inner.state.is_in_flight() {
                tracing::debug!("completion frame without an active session, dropped");
                return;
            }
            inner.state = SessionState::Completed;
            inner.snapshot = Some(ProgressSnapshot::completed());
            inner.result = Some(result.clone());
        }
        tracing::info!(chapter_id = %result.chapter_id, title = %result.title, "synthesis complete");
        self.emit(SessionEvent::Completed(result));
    }

    fn fail_inner(&self, generation: Option<u64>, error: &ClientError) {
        let record = ErrorRecord::from(error);
        {
            let mut inner = self.inner.lock();
            if generation.is_some_and(|g| inner.generation != g) {
                return;
            }
            if !inner.state.is_in_flight() {
                tracing::debug!("error frame without an active session, dropped");
                return;
            }
            inner.state = SessionState::Failed;
            match &mut inner.snapshot {
                Some(snapshot) => snapshot.status = SynthesisStatus::Failed,
                None => inner.snapshot = Some(ProgressSnapshot::failed(record.message.clone())),
            }
            inner.error = Some(record.clone());
        }
        tracing::warn!(kind = record.kind, message = %record.message, "synthesis failed");
        self.emit(SessionEvent::Failed(record));
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// Fail the session if no frame activity arrives within the configured
    /// window. The deadline rolls forward on every accepted frame.
    fn spawn_watchdog(&self, generation: u64) {
        let Some(timeout) = self.watchdog else {
            return;
        };
        let session = self.clone();
        tokio::spawn(async move {
            loop {
                let deadline = {
                    let inner = session.inner.lock();
                    if inner.generation != generation || !inner.state.is_in_flight() {
                        return;
                    }
                    inner.last_activity + timeout
                };
                tokio::time::sleep_until(deadline).await;

                let expired = {
                    let inner = session.inner.lock();
                    inner.generation == generation
                        && inner.state.is_in_flight()
                        && inner.last_activity.elapsed() >= timeout
                };
                if expired {
                    tracing::warn!(
                        timeout_ms = timeout.as_millis() as u64,
                        "session watchdog expired"
                    );
                    session.fail_inner(Some(generation), &ClientError::Timeout(timeout));
                    return;
                }
            }
        });
    }
}
