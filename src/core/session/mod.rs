//! Realtime session with the speech model.
//!
//! Owns the persistent duplex socket, drives the capture pipeline, tracks
//! connection health, and reconnects with bounded exponential backoff.

pub mod backoff;
pub mod credentials;
pub mod events;
pub mod manager;
pub mod state;
pub mod transport;

pub use credentials::{CredentialProvider, RelayCredentialProvider};
pub use events::{ClientEvent, ServerEvent, ServerErrorBody, SessionProfile};
pub use manager::RealtimeSession;
pub use state::ConnectionState;
pub use transport::{RealtimeConnector, SocketHandle, WsConnector};

use std::time::Duration;

use crate::core::capture::CaptureError;

/// Error taxonomy for session operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    /// The credential relay could not produce a token within the retry budget.
    #[error("Credential fetch failed: {0}")]
    CredentialFetchFailed(String),
    /// The socket did not open within the connection timeout.
    #[error("Connection timed out")]
    ConnectTimeout,
    /// The socket failed while opening or mid-session.
    #[error("Socket error: {0}")]
    SocketError(String),
    /// All reconnect attempts were exhausted; the session is terminal.
    #[error("Reconnect attempts exhausted")]
    ReconnectExhausted,
    /// An operation that requires an open socket was attempted without one.
    #[error("Not connected: {0}")]
    NotConnected(String),
    #[error(transparent)]
    Capture(#[from] CaptureError),
}

/// Discrete events surfaced to the orchestrator and UI.
///
/// Transient retries stay internal; only terminal failures and conversation
/// content cross this boundary, plus an advisory while reconnecting.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(ConnectionState),
    /// Decoded PCM16 bytes of synthesized agent speech, for lip-sync analysis.
    AgentAudioDelta(bytes::Bytes),
    AgentTranscriptDelta(String),
    /// The agent finished one utterance; the accumulated transcript.
    AgentTranscriptDone(String),
    UserTranscriptDelta(String),
    /// The user finished one turn; the recognized transcript.
    UserTranscriptDone(String),
    /// Server VAD heard the user start speaking during a response.
    UserInterrupted,
    /// Microphone acquisition failed; the session continues text-only.
    CaptureUnavailable(String),
    /// A user turn could not be transcribed; the conversation continues.
    TranscriptionFailed(String),
    /// A server error outside the expected-noise categories.
    ServerError(String),
    /// Advisory while retrying; not a terminal state.
    Reconnecting { attempt: u32 },
    /// Terminal failure after exhausting retries.
    Failed(SessionError),
}

/// Timing and identity configuration for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub voice: String,
    pub instructions: String,
    /// Socket open deadline covering credential use and handshake
    pub connect_timeout: Duration,
    /// Cadence of staleness checks
    pub heartbeat_interval: Duration,
    /// Inbound silence that marks the connection stale
    pub stale_after: Duration,
    /// Credential fetch attempts before giving up
    pub credential_attempts: u32,
    /// Total connection attempts (initial + reconnects) before the session
    /// surfaces `ReconnectExhausted`
    pub max_connect_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            voice: "shimmer".to_string(),
            instructions: String::new(),
            connect_timeout: Duration::from_secs(15),
            heartbeat_interval: Duration::from_secs(10),
            stale_after: Duration::from_secs(30),
            credential_attempts: 3,
            max_connect_attempts: 5,
        }
    }
}
