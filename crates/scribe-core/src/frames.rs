use serde::{Deserialize, Serialize};

use crate::ids::ChapterId;
use crate::progress::SynthesisStatus;

/// Frames sent from the client over the live transport.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename = "synthesis_request")]
    SynthesisRequest {
        topic: String,
        specialty: String,
        max_sources: u32,
    },

    #[serde(rename = "ping")]
    Ping,
}

/// Frames received from the server. Unrecognized `type` tags decode to
/// `Unknown` so the router can drop them without treating them as malformed.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "synthesis_progress")]
    SynthesisProgress {
        status: SynthesisStatus,
        message: String,
        progress: u8,
        #[serde(skip_serializing_if = "Option::is_none")]
        step: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },

    #[serde(rename = "synthesis_complete")]
    SynthesisComplete {
        chapter_id: ChapterId,
        title: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<serde_json::Value>,
    },

    #[serde(rename = "synthesis_error")]
    SynthesisError { error: String },

    #[serde(rename = "pong")]
    Pong,

    #[serde(other)]
    Unknown,
}

impl ClientFrame {
    pub fn frame_type(&self) -> &'static str {
        match self {
            Self::SynthesisRequest { .. } => "synthesis_request",
            Self::Ping => "ping",
        }
    }
}

impl ServerFrame {
    pub fn frame_type(&self) -> &'static str {
        match self {
            Self::SynthesisProgress { .. } => "synthesis_progress",
            Self::SynthesisComplete { .. } => "synthesis_complete",
            Self::SynthesisError { .. } => "synthesis_error",
            Self::Pong => "pong",
            Self::Unknown => "unknown",
        }
    }

    /// True for frames that end the active session.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::SynthesisComplete { .. } | Self::SynthesisError { .. }
        )
    }
}
