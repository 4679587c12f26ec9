//! Socket transport for the realtime session.
//!
//! The session never touches the WebSocket directly: a connector opens the
//! socket and spawns a pump task that bridges it to typed event channels.
//! Tests substitute a fake connector that hands the session scripted
//! channels.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

use super::SessionError;
use super::events::{ClientEvent, ServerEvent};

/// Channel pair for one open socket.
///
/// Dropping the handle (or its receiver) tears the socket down: the pump
/// task notices the closed channels, sends a close frame, and exits. A
/// `None` from `inbound` means the socket is gone.
pub struct SocketHandle {
    pub outbound: mpsc::UnboundedSender<ClientEvent>,
    pub inbound: mpsc::UnboundedReceiver<ServerEvent>,
}

/// Opens a duplex connection to the speech model using a short-lived
/// credential.
#[async_trait]
pub trait RealtimeConnector: Send + Sync {
    async fn connect(&self, credential: &str) -> Result<SocketHandle, SessionError>;
}

/// tokio-tungstenite connector for the realtime protocol.
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl RealtimeConnector for WsConnector {
    async fn connect(&self, credential: &str) -> Result<SocketHandle, SessionError> {
        let request = tokio_tungstenite::tungstenite::http::Request::builder()
            .uri(&self.url)
            .header("Authorization", format!("Bearer {credential}"))
            .header("OpenAI-Beta", "realtime=v1")
            .header("Host", host_of(&self.url))
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header(
                "Sec-WebSocket-Key",
                tokio_tungstenite::tungstenite::handshake::client::generate_key(),
            )
            .body(())
            .map_err(|e| SessionError::SocketError(format!("request build: {e}")))?;

        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| SessionError::SocketError(e.to_string()))?;
        info!("Realtime socket connected");

        let (mut ws_sink, mut ws_source) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientEvent>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<ServerEvent>();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outbound = out_rx.recv() => {
                        let Some(event) = outbound else {
                            // Session dropped its sender; close cleanly
                            let _ = ws_sink.send(Message::Close(None)).await;
                            break;
                        };
                        let text = match serde_json::to_string(&event) {
                            Ok(text) => text,
                            Err(e) => {
                                warn!("Failed to serialize client event: {e}");
                                continue;
                            }
                        };
                        if let Err(e) = ws_sink.send(Message::Text(text.into())).await {
                            warn!("Failed to send on realtime socket: {e}");
                            break;
                        }
                    }
                    inbound = ws_source.next() => {
                        match inbound {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<ServerEvent>(&text) {
                                    Ok(event) => {
                                        if in_tx.send(event).is_err() {
                                            break;
                                        }
                                    }
                                    Err(e) => {
                                        // Forward compatibility: unparseable
                                        // payloads are dropped, not fatal
                                        debug!("Ignoring unparseable server event: {e}");
                                    }
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                info!("Realtime socket closed by server: {frame:?}");
                                break;
                            }
                            Some(Ok(_)) => {
                                // Ping/pong handled by the library; binary
                                // frames are not part of this protocol
                            }
                            Some(Err(e)) => {
                                warn!("Realtime socket error: {e}");
                                break;
                            }
                            None => {
                                info!("Realtime socket stream ended");
                                break;
                            }
                        }
                    }
                }
            }
        });

        Ok(SocketHandle {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

fn host_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_extraction_handles_query_strings() {
        assert_eq!(
            host_of("wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview-2024-12-17"),
            "api.openai.com"
        );
        assert_eq!(host_of("not a url"), "");
    }
}
