pub mod config;
pub mod core;

// Re-export commonly used items for convenience
pub use config::AgentConfig;
pub use core::avatar::{AvatarBackend, AvatarError, AvatarStream, SpeechDispatcher};
pub use core::capture::{AudioFrame, CaptureConfig, CaptureError, CaptureSource};
pub use core::network::{AudioTuning, LinkMetrics, NetworkMonitor, NetworkTier};
pub use core::orchestrator::{ChatEvent, ConversationOrchestrator, EchoSuppressionConfig};
pub use core::session::{
    ConnectionState, RealtimeSession, SessionConfig, SessionError, SessionEvent,
};
