pub mod config;
pub mod errors;
pub mod frames;
pub mod ids;
pub mod progress;

pub use config::{ClientConfig, ReconnectPolicy};
pub use errors::{ClientError, ErrorRecord};
pub use frames::{ClientFrame, ServerFrame};
pub use ids::ChapterId;
pub use progress::{ProgressSnapshot, SessionEvent, SessionResult, SessionState, SynthesisStatus};
