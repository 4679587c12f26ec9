//! Wires session transcript events to avatar speech and a chat log.
//!
//! The microphone can hear the avatar. Recognized input that arrives shortly
//! after the avatar stopped speaking and looks like the avatar's own words is
//! discarded as feedback rather than treated as the user.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::core::avatar::{SpeechDispatcher, SpeechNotice};
use crate::core::session::SessionEvent;

/// Thresholds for telling avatar feedback apart from genuine user speech.
#[derive(Debug, Clone)]
pub struct EchoSuppressionConfig {
    /// Window after avatar speech end in which very short inputs are echoes
    pub short_echo_window: Duration,
    /// Window in which inputs contained in the avatar's last utterance are
    /// echoes
    pub containment_window: Duration,
    /// Token count at or below which an input counts as "very short"
    pub short_token_limit: usize,
    /// Minimum gap between accepted user inputs; overlapping recognition
    /// events otherwise submit the same turn twice
    pub input_debounce: Duration,
}

impl Default for EchoSuppressionConfig {
    fn default() -> Self {
        Self {
            short_echo_window: Duration::from_secs(8),
            containment_window: Duration::from_secs(15),
            short_token_limit: 2,
            input_debounce: Duration::from_secs(2),
        }
    }
}

/// Whether a recognized input is probably the microphone hearing the avatar.
pub fn is_probable_echo(
    text: &str,
    last_utterance: &str,
    since_speech_end: Duration,
    config: &EchoSuppressionConfig,
) -> bool {
    let tokens = text.split_whitespace().count();
    if tokens <= config.short_token_limit && since_speech_end <= config.short_echo_window {
        return true;
    }
    if since_speech_end <= config.containment_window {
        let needle = text.trim().to_lowercase();
        if !needle.is_empty() && last_utterance.to_lowercase().contains(&needle) {
            return true;
        }
    }
    false
}

/// One entry in the conversation log.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// An accepted user turn.
    User(String),
    /// A completed agent utterance.
    Agent(String),
    /// Out-of-band status the UI should show.
    Notice(String),
}

/// Routes session events to the speech dispatcher and the chat log.
pub struct ConversationOrchestrator {
    dispatcher: Arc<SpeechDispatcher>,
    config: EchoSuppressionConfig,
    chat_tx: mpsc::UnboundedSender<ChatEvent>,
    last_accepted_input: Option<Instant>,
}

impl ConversationOrchestrator {
    pub fn new(
        dispatcher: Arc<SpeechDispatcher>,
        config: EchoSuppressionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ChatEvent>) {
        let (chat_tx, chat_rx) = mpsc::unbounded_channel();
        let orchestrator = Self {
            dispatcher,
            config,
            chat_tx,
            last_accepted_input: None,
        };
        (orchestrator, chat_rx)
    }

    /// Consume both event streams until the session's stream closes.
    pub async fn run(
        mut self,
        mut session_rx: mpsc::UnboundedReceiver<SessionEvent>,
        mut notices_rx: mpsc::UnboundedReceiver<SpeechNotice>,
    ) {
        loop {
            tokio::select! {
                event = session_rx.recv() => {
                    let Some(event) = event else { break };
                    self.handle_session_event(event);
                }
                notice = notices_rx.recv() => {
                    let Some(notice) = notice else { break };
                    self.handle_speech_notice(notice);
                }
            }
        }
    }

    fn emit(&self, event: ChatEvent) {
        let _ = self.chat_tx.send(event);
    }

    pub fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::AgentTranscriptDone(text) => {
                if text.trim().is_empty() {
                    return;
                }
                self.emit(ChatEvent::Agent(text.clone()));
                self.dispatcher.speak(&text);
            }
            SessionEvent::UserTranscriptDone(text) => self.accept_user_input(text),
            SessionEvent::AgentTranscriptDelta(_) | SessionEvent::UserTranscriptDelta(_) => {
                // Partials stay off the log; only completed turns are entries
            }
            SessionEvent::UserInterrupted => {
                debug!("User started speaking over the agent");
            }
            SessionEvent::AgentAudioDelta(_) => {
                // Synthesized audio goes to the video layer, not the log
            }
            SessionEvent::StateChanged(state) => {
                self.emit(ChatEvent::Notice(format!("Session {}", state.as_str())));
            }
            SessionEvent::Reconnecting { attempt } => {
                self.emit(ChatEvent::Notice(format!(
                    "Connection lost, retrying (attempt {attempt})"
                )));
            }
            SessionEvent::CaptureUnavailable(reason) => {
                self.emit(ChatEvent::Notice(format!(
                    "Microphone unavailable, continuing in text mode: {reason}"
                )));
            }
            SessionEvent::TranscriptionFailed(detail) => {
                // Non-fatal; the model can still answer the raw audio
                debug!("Transcription failed for one turn: {detail}");
            }
            SessionEvent::ServerError(detail) => {
                warn!("Server error surfaced to chat: {detail}");
                self.emit(ChatEvent::Notice(format!("Service error: {detail}")));
            }
            SessionEvent::Failed(error) => {
                self.emit(ChatEvent::Notice(format!("Session ended: {error}")));
            }
        }
    }

    pub fn handle_speech_notice(&mut self, notice: SpeechNotice) {
        match notice {
            SpeechNotice::Disabled { reason } => {
                info!("Avatar speech disabled: {reason}");
                self.emit(ChatEvent::Notice(
                    "Avatar speech is unavailable for this session; text replies continue"
                        .to_string(),
                ));
            }
            SpeechNotice::Started { .. } | SpeechNotice::Ended { .. } => {}
        }
    }

    fn accept_user_input(&mut self, text: String) {
        if text.trim().is_empty() {
            return;
        }

        if let Some((utterance, ended_at)) = self.dispatcher.last_speech() {
            let since_end = ended_at.elapsed();
            if is_probable_echo(&text, &utterance, since_end, &self.config) {
                debug!(?since_end, "Discarding probable avatar echo: {text:?}");
                return;
            }
        }

        if let Some(last) = self.last_accepted_input {
            if last.elapsed() < self.config.input_debounce {
                debug!("Discarding duplicate input inside the debounce window");
                return;
            }
        }

        self.last_accepted_input = Some(Instant::now());
        self.emit(ChatEvent::User(text));
    }
}
