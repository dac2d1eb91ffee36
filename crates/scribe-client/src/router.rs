use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use scribe_core::errors::ClientError;
use scribe_core::frames::ServerFrame;
use scribe_core::progress::{ProgressSnapshot, SessionResult};

use crate::connection::ConnectionManager;
use crate::session::SynthesisSession;

/// Decodes inbound frames and applies them to the active session. Malformed
/// and unrecognized frames are logged and dropped; dispatch never fails.
pub struct MessageRouter {
    session: SynthesisSession,
    connection: ConnectionManager,
}

impl MessageRouter {
    pub fn new(session: SynthesisSession, connection: ConnectionManager) -> Self {
        Self {
            session,
            connection,
        }
    }

    pub fn dispatch(&self, raw: &str) {
        let frame = match serde_json::from_str::<ServerFrame>(raw) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, len = raw.len(), "dropping malformed frame");
                return;
            }
        };

        match frame {
            ServerFrame::SynthesisProgress {
                status,
                message,
                progress,
                step,
                details,
            } => {
                self.session.apply_progress(ProgressSnapshot {
                    status,
                    message,
                    progress,
                    step,
                    details,
                });
            }
            ServerFrame::SynthesisComplete {
                chapter_id,
                title,
                content,
            } => {
                self.session.apply_complete(SessionResult {
                    chapter_id,
                    title,
                    content,
                });
            }
            ServerFrame::SynthesisError { error } => {
                self.session.apply_error(&ClientError::Synthesis(error));
            }
            ServerFrame::Pong => {
                tracing::trace!("pong received");
                self.connection.record_activity();
            }
            ServerFrame::Unknown => {
                tracing::debug!("dropping frame with unrecognized type");
            }
        }
    }

    /// Drain the connection's inbound channel in delivery order.
    pub fn spawn(
        self,
        mut rx: mpsc::UnboundedReceiver<String>,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    msg = rx.recv() => match msg {
                        Some(raw) => self.dispatch(&raw),
                        None => break,
                    },
                }
            }
            tracing::debug!("router task stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use scribe_core::config::ClientConfig;
    use scribe_core::progress::{SessionState, SynthesisStatus};

    use crate::mock::{MockFallback, MockSink};

    fn router_fixture() -> (MessageRouter, SynthesisSession, ConnectionManager) {
        let session = SynthesisSession::new(
            Arc::new(MockSink::connected()),
            Arc::new(MockFallback::unreachable()),
            None,
        );
        let (inbound_tx, _inbound_rx) = tokio::sync::mpsc::unbounded_channel();
        let (connection, _task) = ConnectionManager::spawn(
            ClientConfig::default(),
            inbound_tx,
            CancellationToken::new(),
        );
        let router = MessageRouter::new(session.clone(), connection.clone());
        (router, session, connection)
    }

    #[tokio::test]
    async fn progress_frame_updates_session() {
        let (router, session, _conn) = router_fixture();
        session.start("Glioblastoma", "tumor", 15).await.unwrap();

        router.dispatch(
            r#"{"type":"synthesis_progress","status":"analyzing","message":"ranking sources","progress":35}"#,
        );

        assert_eq!(session.state(), SessionState::InProgress);
        let snap = session.snapshot().unwrap();
        assert_eq!(snap.status, SynthesisStatus::Analyzing);
        assert_eq!(snap.progress, 35);
    }

    #[tokio::test]
    async fn complete_frame_finishes_session() {
        let (router, session, _conn) = router_fixture();
        session.start("Glioblastoma", "tumor", 15).await.unwrap();

        router.dispatch(r#"{"type":"synthesis_complete","chapter_id":"c1","title":"Glioblastoma"}"#);

        assert_eq!(session.state(), SessionState::Completed);
        let result = session.result().unwrap();
        assert_eq!(result.chapter_id.as_str(), "c1");
        assert_eq!(result.title, "Glioblastoma");
    }

    #[tokio::test]
    async fn error_frame_fails_session() {
        let (router, session, _conn) = router_fixture();
        session.start("Glioblastoma", "tumor", 15).await.unwrap();

        router.dispatch(r#"{"type":"synthesis_error","error":"model unavailable"}"#);

        assert_eq!(session.state(), SessionState::Failed);
        let record = session.error().unwrap();
        assert_eq!(record.kind, "synthesis");
        assert_eq!(record.message, "model unavailable");
    }

    #[tokio::test]
    async fn malformed_and_unknown_frames_are_dropped() {
        let (router, session, _conn) = router_fixture();
        session.start("Glioblastoma", "tumor", 15).await.unwrap();

        router.dispatch("{definitely not json");
        router.dispatch(r#"{"missing":"type"}"#);
        router.dispatch(r#"{"type":"citation_update","count":3}"#);

        // Session untouched by any of them.
        assert_eq!(session.state(), SessionState::Requesting);
        assert_eq!(session.snapshot().unwrap().progress, 0);
    }

    #[tokio::test]
    async fn pong_frame_touches_connection_only() {
        let (router, session, _conn) = router_fixture();
        session.start("Glioblastoma", "tumor", 15).await.unwrap();

        router.dispatch(r#"{"type":"pong"}"#);

        assert_eq!(session.state(), SessionState::Requesting);
    }

    #[tokio::test]
    async fn router_task_drains_channel_in_order() {
        let (router, session, _conn) = router_fixture();
        session.start("Glioblastoma", "tumor", 15).await.unwrap();

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let _task = router.spawn(rx, shutdown.clone());

        tx.send(
            r#"{"type":"synthesis_progress","status":"searching","message":"q","progress":10}"#
                .to_string(),
        )
        .unwrap();
        tx.send(r#"{"type":"synthesis_complete","chapter_id":"c9","title":"T"}"#.to_string())
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(session.state(), SessionState::Completed);
        assert_eq!(session.result().unwrap().chapter_id.as_str(), "c9");
        shutdown.cancel();
    }
}
