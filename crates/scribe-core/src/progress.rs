use serde::{Deserialize, Serialize};

use crate::errors::ErrorRecord;
use crate::ids::ChapterId;

/// Server-reported phase of a synthesis job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisStatus {
    Searching,
    Analyzing,
    Synthesizing,
    Generating,
    Completed,
    Failed,
}

impl SynthesisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Searching => "searching",
            Self::Analyzing => "analyzing",
            Self::Synthesizing => "synthesizing",
            Self::Generating => "generating",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Latest known state of an in-flight job. Replaced wholesale on each
/// accepted progress frame; no history is kept.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub status: SynthesisStatus,
    pub message: String,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ProgressSnapshot {
    /// Marker set synchronously when a session starts, before any server
    /// frame has arrived.
    pub fn initial() -> Self {
        Self {
            status: SynthesisStatus::Searching,
            message: "searching sources".into(),
            progress: 0,
            step: None,
            details: None,
        }
    }

    pub fn completed() -> Self {
        Self {
            status: SynthesisStatus::Completed,
            message: "synthesis complete".into(),
            progress: 100,
            step: None,
            details: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: SynthesisStatus::Failed,
            message: message.into(),
            progress: 0,
            step: None,
            details: None,
        }
    }
}

/// Terminal result of a successful job.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionResult {
    pub chapter_id: ChapterId,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<serde_json::Value>,
}

/// Session lifecycle. At most one session may be in flight at a time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Requesting,
    InProgress,
    Completed,
    Failed,
}

impl SessionState {
    /// States from which `start()` is accepted.
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Idle | Self::Completed | Self::Failed)
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Requesting | Self::InProgress)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Notifications emitted to session observers.
#[derive(Clone, Debug)]
pub enum SessionEvent {
    Progress(ProgressSnapshot),
    Completed(SessionResult),
    Failed(ErrorRecord),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_wire_names() {
        let json = serde_json::to_string(&SynthesisStatus::Synthesizing).unwrap();
        assert_eq!(json, "\"synthesizing\"");
        let parsed: SynthesisStatus = serde_json::from_str("\"generating\"").unwrap();
        assert_eq!(parsed, SynthesisStatus::Generating);
    }

    #[test]
    fn status_as_str_matches_serde() {
        for status in [
            SynthesisStatus::Searching,
            SynthesisStatus::Analyzing,
            SynthesisStatus::Synthesizing,
            SynthesisStatus::Generating,
            SynthesisStatus::Completed,
            SynthesisStatus::Failed,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
    }

    #[test]
    fn initial_snapshot_is_searching_zero() {
        let snap = ProgressSnapshot::initial();
        assert_eq!(snap.status, SynthesisStatus::Searching);
        assert_eq!(snap.progress, 0);
    }

    #[test]
    fn completed_snapshot_is_forced_to_100() {
        let snap = ProgressSnapshot::completed();
        assert_eq!(snap.status, SynthesisStatus::Completed);
        assert_eq!(snap.progress, 100);
    }

    #[test]
    fn state_start_gating() {
        assert!(SessionState::Idle.can_start());
        assert!(SessionState::Completed.can_start());
        assert!(SessionState::Failed.can_start());
        assert!(!SessionState::Requesting.can_start());
        assert!(!SessionState::InProgress.can_start());
    }

    #[test]
    fn state_classification() {
        assert!(SessionState::Requesting.is_in_flight());
        assert!(SessionState::InProgress.is_in_flight());
        assert!(!SessionState::Idle.is_in_flight());
        assert!(SessionState::Completed.is_terminal());
        assert!(SessionState::Failed.is_terminal());
        assert!(!SessionState::InProgress.is_terminal());
    }
}
