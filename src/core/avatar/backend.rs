//! Relay-backed avatar provider client.
//!
//! The relay multiplexes every provider operation onto one endpoint,
//! discriminated by an `action` field. Handshake payloads (SDP answers, ICE
//! candidates) pass through opaquely; this client never interprets them.

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::AvatarError;

/// An open rendering stream at the provider. `offer` and `ice_servers` are
/// handed to the video layer for the WebRTC handshake.
#[derive(Debug, Clone, Deserialize)]
pub struct AvatarStream {
    #[serde(alias = "id")]
    pub stream_id: String,
    pub session_id: String,
    #[serde(default)]
    pub offer: Value,
    #[serde(default)]
    pub ice_servers: Value,
}

/// Operations on the avatar rendering provider.
#[async_trait]
pub trait AvatarBackend: Send + Sync {
    async fn create_stream(&self) -> Result<AvatarStream, AvatarError>;
    async fn submit_answer(&self, stream: &AvatarStream, answer: &Value)
        -> Result<(), AvatarError>;
    async fn submit_ice_candidate(
        &self,
        stream: &AvatarStream,
        candidate: &Value,
    ) -> Result<(), AvatarError>;
    async fn speak(&self, stream: &AvatarStream, text: &str) -> Result<(), AvatarError>;
    async fn close_stream(&self, stream: &AvatarStream) -> Result<(), AvatarError>;
}

#[derive(Serialize)]
struct RelayRequest<'a> {
    action: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    answer: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    candidate: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
}

impl<'a> RelayRequest<'a> {
    fn new(action: &'a str) -> Self {
        Self {
            action,
            stream_id: None,
            session_id: None,
            answer: None,
            candidate: None,
            text: None,
        }
    }

    fn for_stream(action: &'a str, stream: &'a AvatarStream) -> Self {
        Self {
            stream_id: Some(&stream.stream_id),
            session_id: Some(&stream.session_id),
            ..Self::new(action)
        }
    }
}

/// [`AvatarBackend`] over the relay's avatar endpoint.
pub struct RelayAvatarBackend {
    client: reqwest::Client,
    endpoint: Url,
}

impl RelayAvatarBackend {
    pub fn new(client: reqwest::Client, endpoint: Url) -> Self {
        Self { client, endpoint }
    }

    async fn post(&self, request: &RelayRequest<'_>) -> Result<Value, AvatarError> {
        debug!(action = request.action, "Avatar relay request");
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(request)
            .send()
            .await
            .map_err(|e| AvatarError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AvatarError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(AvatarError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(|e| AvatarError::Transport(e.to_string()))
    }
}

#[async_trait]
impl AvatarBackend for RelayAvatarBackend {
    async fn create_stream(&self) -> Result<AvatarStream, AvatarError> {
        let body = self.post(&RelayRequest::new("create-stream")).await?;
        let stream: AvatarStream =
            serde_json::from_value(body).map_err(|e| AvatarError::Transport(e.to_string()))?;
        info!(stream_id = %stream.stream_id, "Avatar stream created");
        Ok(stream)
    }

    async fn submit_answer(
        &self,
        stream: &AvatarStream,
        answer: &Value,
    ) -> Result<(), AvatarError> {
        let mut request = RelayRequest::for_stream("submit-sdp", stream);
        request.answer = Some(answer);
        self.post(&request).await.map(|_| ())
    }

    async fn submit_ice_candidate(
        &self,
        stream: &AvatarStream,
        candidate: &Value,
    ) -> Result<(), AvatarError> {
        let mut request = RelayRequest::for_stream("submit-ice", stream);
        request.candidate = Some(candidate);
        self.post(&request).await.map(|_| ())
    }

    async fn speak(&self, stream: &AvatarStream, text: &str) -> Result<(), AvatarError> {
        let mut request = RelayRequest::for_stream("speak", stream);
        request.text = Some(text);
        self.post(&request).await.map(|_| ())
    }

    async fn close_stream(&self, stream: &AvatarStream) -> Result<(), AvatarError> {
        let request = RelayRequest::for_stream("close-stream", stream);
        self.post(&request).await.map(|_| ())?;
        info!(stream_id = %stream.stream_id, "Avatar stream closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_requests_omit_unused_fields() {
        let json = serde_json::to_value(RelayRequest::new("create-stream")).unwrap();
        assert_eq!(json, serde_json::json!({"action": "create-stream"}));
    }

    #[test]
    fn speak_request_carries_stream_identity_and_text() {
        let stream = AvatarStream {
            stream_id: "strm_1".to_string(),
            session_id: "sess_9".to_string(),
            offer: Value::Null,
            ice_servers: Value::Null,
        };
        let mut request = RelayRequest::for_stream("speak", &stream);
        request.text = Some("Hello there");
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "action": "speak",
                "stream_id": "strm_1",
                "session_id": "sess_9",
                "text": "Hello there",
            })
        );
    }

    #[test]
    fn stream_parses_provider_shaped_payload() {
        let stream: AvatarStream = serde_json::from_str(
            r#"{"id": "strm_2", "session_id": "sess_3", "offer": {"type": "offer"}}"#,
        )
        .unwrap();
        assert_eq!(stream.stream_id, "strm_2");
        assert_eq!(stream.session_id, "sess_3");
        assert_eq!(stream.ice_servers, Value::Null);
    }
}
