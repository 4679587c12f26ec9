//! Talking-avatar integration.
//!
//! The rendering provider can play exactly one utterance at a time, so all
//! speech goes through [`SpeechDispatcher`], a FIFO queue with one in-flight
//! utterance. The provider itself is reached through the relay via
//! [`AvatarBackend`].

pub mod backend;
pub mod dispatcher;

pub use backend::{AvatarBackend, AvatarStream, RelayAvatarBackend};
pub use dispatcher::{DispatcherConfig, SpeechDispatcher, SpeechNotice};

/// Errors from avatar backend operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AvatarError {
    /// The relay could not be reached or the response body was unreadable.
    #[error("Avatar relay request failed: {0}")]
    Transport(String),
    /// The relay answered with a non-success status.
    #[error("Avatar backend rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },
    /// An operation that needs an open stream was attempted without one.
    #[error("No avatar stream is open")]
    NoStream,
}

impl AvatarError {
    /// Whether this failure means the avatar account is out of credits.
    /// Recognized by the payment-required status or by message content, since
    /// the provider is not consistent about which it uses.
    pub fn is_quota_signal(&self) -> bool {
        match self {
            AvatarError::Rejected { status: 402, .. } => true,
            AvatarError::Rejected { body, .. } => {
                let body = body.to_lowercase();
                body.contains("credit") || body.contains("quota") || body.contains("insufficient")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_required_is_a_quota_signal() {
        let err = AvatarError::Rejected {
            status: 402,
            body: "Payment Required".to_string(),
        };
        assert!(err.is_quota_signal());
    }

    #[test]
    fn credits_message_is_a_quota_signal() {
        let err = AvatarError::Rejected {
            status: 400,
            body: r#"{"description": "not enough credits remaining"}"#.to_string(),
        };
        assert!(err.is_quota_signal());
    }

    #[test]
    fn plain_server_error_is_not_a_quota_signal() {
        let err = AvatarError::Rejected {
            status: 500,
            body: "internal error".to_string(),
        };
        assert!(!err.is_quota_signal());
        assert!(!AvatarError::Transport("connection refused".to_string()).is_quota_signal());
    }
}
