pub mod client;
pub mod connection;
pub mod fallback;
pub mod heartbeat;
pub mod router;
pub mod session;

pub mod mock;

pub use client::SynthesisClient;
pub use connection::{ConnectionManager, ConnectionState};
pub use fallback::FallbackClient;
pub use heartbeat::HeartbeatMonitor;
pub use router::MessageRouter;
pub use session::{FrameSink, SynthesisFallback, SynthesisSession};
