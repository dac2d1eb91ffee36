use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use scribe_core::errors::ClientError;
use scribe_core::frames::ClientFrame;
use scribe_core::ids::ChapterId;
use scribe_core::progress::SessionResult;

use crate::session::{FrameSink, SynthesisFallback};

/// Records outbound frames for deterministic testing without a socket.
pub struct MockSink {
    connected: AtomicBool,
    accept_sends: AtomicBool,
    sent: Mutex<Vec<ClientFrame>>,
}

impl MockSink {
    pub fn connected() -> Self {
        Self {
            connected: AtomicBool::new(true),
            accept_sends: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn disconnected() -> Self {
        Self {
            connected: AtomicBool::new(false),
            accept_sends: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Reports connected but refuses every send, modeling a send that loses
    /// the race with a close.
    pub fn rejecting_sends() -> Self {
        Self {
            connected: AtomicBool::new(true),
            accept_sends: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
        self.accept_sends.store(connected, Ordering::Relaxed);
    }

    pub fn sent(&self) -> Vec<ClientFrame> {
        self.sent.lock().clone()
    }
}

impl FrameSink for MockSink {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn send(&self, frame: &ClientFrame) -> bool {
        if !self.accept_sends.load(Ordering::Relaxed) {
            return false;
        }
        self.sent.lock().push(frame.clone());
        true
    }
}

/// Pre-programmed fallback replies, returned in sequence.
pub struct MockFallback {
    replies: Mutex<VecDeque<Result<SessionResult, ClientError>>>,
    calls: AtomicUsize,
}

impl MockFallback {
    pub fn new(replies: Vec<Result<SessionResult, ClientError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: AtomicUsize::new(0),
        }
    }

    /// A single successful exchange.
    pub fn success(chapter_id: &str, title: &str) -> Self {
        Self::new(vec![Ok(SessionResult {
            chapter_id: ChapterId::from_raw(chapter_id),
            title: title.into(),
            content: None,
        })])
    }

    /// A single server-reported failure.
    pub fn failure(message: &str) -> Self {
        Self::new(vec![Err(ClientError::Fallback(message.into()))])
    }

    /// Panics if the fallback is ever consulted.
    pub fn unreachable() -> Self {
        Self::new(Vec::new())
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SynthesisFallback for MockFallback {
    async fn request(
        &self,
        _topic: &str,
        _specialty: &str,
        _max_sources: u32,
    ) -> Result<SessionResult, ClientError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.replies
            .lock()
            .pop_front()
            .expect("unexpected fallback request")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_records_frames_while_connected() {
        let sink = MockSink::connected();
        assert!(sink.is_connected());
        assert!(sink.send(&ClientFrame::Ping));
        assert_eq!(sink.sent().len(), 1);
    }

    #[test]
    fn disconnected_sink_refuses_sends() {
        let sink = MockSink::disconnected();
        assert!(!sink.is_connected());
        assert!(!sink.send(&ClientFrame::Ping));
        assert!(sink.sent().is_empty());
    }

    #[test]
    fn rejecting_sink_looks_connected_but_drops() {
        let sink = MockSink::rejecting_sends();
        assert!(sink.is_connected());
        assert!(!sink.send(&ClientFrame::Ping));
    }

    #[tokio::test]
    async fn fallback_replies_in_sequence() {
        let fallback = MockFallback::new(vec![
            Ok(SessionResult {
                chapter_id: ChapterId::from_raw("c1"),
                title: "one".into(),
                content: None,
            }),
            Err(ClientError::Fallback("down".into())),
        ]);

        assert!(fallback.request("t", "s", 1).await.is_ok());
        assert!(fallback.request("t", "s", 1).await.is_err());
        assert_eq!(fallback.call_count(), 2);
    }
}
