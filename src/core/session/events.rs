//! Wire events exchanged with the realtime speech socket.
//!
//! Framing is one JSON object per socket message, discriminated by a `type`
//! field. Field names follow the server's protocol verbatim; unknown inbound
//! kinds fold into [`ServerEvent::Unknown`] so newer servers do not break the
//! client.

use serde::{Deserialize, Serialize};

use crate::core::network::AudioTuning;

/// Events sent to the speech model.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Session configuration; sent exactly once per connection immediately
    /// after `session.created`, and re-sent on live tuning changes.
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionProfile },
    /// One captured audio frame, base64 PCM16.
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },
    /// A typed user message injected into the conversation.
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },
    /// Ask the model to respond to the conversation so far.
    #[serde(rename = "response.create")]
    ResponseCreate,
}

/// Events received from the speech model.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated {},
    #[serde(rename = "session.updated")]
    SessionUpdated {},
    /// Partial synthesized audio, base64 PCM16.
    #[serde(rename = "response.audio.delta")]
    ResponseAudioDelta { delta: String },
    #[serde(rename = "response.audio.done")]
    ResponseAudioDone {},
    /// Partial transcript of the agent's speech.
    #[serde(rename = "response.audio_transcript.delta")]
    ResponseAudioTranscriptDelta { delta: String },
    /// Complete transcript of one agent utterance.
    #[serde(rename = "response.audio_transcript.done")]
    ResponseAudioTranscriptDone { transcript: String },
    #[serde(rename = "conversation.item.input_audio_transcription.delta")]
    InputTranscriptionDelta { delta: String },
    /// Complete transcript of one user turn.
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptionCompleted { transcript: String },
    /// Transcription failed for one turn; non-fatal.
    #[serde(rename = "conversation.item.input_audio_transcription.failed")]
    InputTranscriptionFailed { error: Option<ServerErrorBody> },
    /// Server VAD detected the user starting to speak mid-response.
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {},
    #[serde(rename = "error")]
    Error { error: ServerErrorBody },
    /// Any event kind this client does not know; ignored.
    #[serde(other)]
    Unknown,
}

/// Error payload attached to `error` and transcription-failure events.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerErrorBody {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub code: Option<String>,
    pub message: Option<String>,
}

impl ServerErrorBody {
    /// Whether this error belongs to the expected "invalid request" category
    /// that the server emits during normal operation. These are filtered
    /// from user-facing surfacing.
    pub fn is_expected_noise(&self) -> bool {
        let matches_category =
            |value: &Option<String>| value.as_deref().is_some_and(|v| v.contains("invalid_request"));
        matches_category(&self.kind) || matches_category(&self.code)
    }

    pub fn describe(&self) -> String {
        let kind = self.kind.as_deref().unwrap_or("unknown");
        let message = self.message.as_deref().unwrap_or("no message");
        format!("{kind}: {message}")
    }
}

/// Payload of `session.update`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionProfile {
    pub voice: String,
    pub instructions: String,
    pub input_audio_format: String,
    pub output_audio_format: String,
    pub input_audio_transcription: TranscriptionConfig,
    pub turn_detection: TurnDetectionConfig,
    pub max_response_output_tokens: u32,
}

impl SessionProfile {
    /// Build the profile from the active tuning plus the agent's voice and
    /// persona.
    pub fn from_tuning(voice: &str, instructions: &str, tuning: &AudioTuning) -> Self {
        Self {
            voice: voice.to_string(),
            instructions: instructions.to_string(),
            input_audio_format: "pcm16".to_string(),
            output_audio_format: "pcm16".to_string(),
            input_audio_transcription: TranscriptionConfig {
                model: "whisper-1".to_string(),
            },
            turn_detection: TurnDetectionConfig {
                kind: "server_vad".to_string(),
                threshold: tuning.vad_threshold,
                prefix_padding_ms: tuning.prefix_padding_ms,
                silence_duration_ms: tuning.silence_duration_ms,
            },
            max_response_output_tokens: tuning.max_response_tokens,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TranscriptionConfig {
    pub model: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TurnDetectionConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

/// A conversation item carried by `conversation.item.create`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConversationItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub role: String,
    pub content: Vec<ContentPart>,
}

impl ConversationItem {
    pub fn user_text(text: &str) -> Self {
        Self {
            kind: "message".to_string(),
            role: "user".to_string(),
            content: vec![ContentPart {
                kind: "input_text".to_string(),
                text: text.to_string(),
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_events_serialize_with_wire_names() {
        let append = ClientEvent::InputAudioBufferAppend {
            audio: "AAAA".to_string(),
        };
        let json = serde_json::to_value(&append).unwrap();
        assert_eq!(json["type"], "input_audio_buffer.append");
        assert_eq!(json["audio"], "AAAA");

        let json = serde_json::to_value(ClientEvent::ResponseCreate).unwrap();
        assert_eq!(json["type"], "response.create");
    }

    #[test]
    fn session_update_carries_tuning() {
        let tuning = crate::core::network::tuning_for(crate::core::network::NetworkTier::Fair);
        let profile = SessionProfile::from_tuning("shimmer", "Be helpful.", &tuning);
        let event = ClientEvent::SessionUpdate { session: profile };
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "session.update");
        assert_eq!(json["session"]["voice"], "shimmer");
        assert_eq!(json["session"]["turn_detection"]["type"], "server_vad");
        assert_eq!(json["session"]["turn_detection"]["silence_duration_ms"], 700);
        assert_eq!(json["session"]["input_audio_format"], "pcm16");
    }

    #[test]
    fn server_events_deserialize_by_kind() {
        let event: ServerEvent = serde_json::from_str(
            r#"{"type": "response.audio_transcript.done", "transcript": "Hello there"}"#,
        )
        .unwrap();
        assert!(matches!(
            event,
            ServerEvent::ResponseAudioTranscriptDone { ref transcript } if transcript == "Hello there"
        ));

        let event: ServerEvent = serde_json::from_str(
            r#"{"type": "session.created", "session": {"id": "sess_1", "model": "x"}}"#,
        )
        .unwrap();
        assert!(matches!(event, ServerEvent::SessionCreated { .. }));
    }

    #[test]
    fn unknown_event_kinds_are_tolerated() {
        let event: ServerEvent =
            serde_json::from_str(r#"{"type": "rate_limits.updated", "rate_limits": []}"#).unwrap();
        assert!(matches!(event, ServerEvent::Unknown));
    }

    #[test]
    fn invalid_request_errors_are_expected_noise() {
        let noisy = ServerErrorBody {
            kind: Some("invalid_request_error".to_string()),
            code: None,
            message: Some("Conversation already has an active response".to_string()),
        };
        assert!(noisy.is_expected_noise());

        let real = ServerErrorBody {
            kind: Some("server_error".to_string()),
            code: Some("internal_error".to_string()),
            message: Some("boom".to_string()),
        };
        assert!(!real.is_expected_noise());
    }

    #[test]
    fn user_text_item_shape() {
        let item = ConversationItem::user_text("reset my password");
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["type"], "message");
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"][0]["type"], "input_text");
    }
}
