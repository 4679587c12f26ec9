//! Short-lived credential acquisition for the realtime socket.
//!
//! The relay holds the real API key and mints an ephemeral session; the
//! client only ever sees the short-lived secret. Relay latency is untrusted,
//! so fetches retry with capped exponential backoff but never indefinitely.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::SessionError;
use super::backoff::{credential_delay_ms, with_jitter};

/// Per-request timeout for relay calls; a hung relay must fail the attempt,
/// not stall it.
const RELAY_TIMEOUT: Duration = Duration::from_secs(10);

/// Source of short-lived realtime credentials.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Fetch one ephemeral credential. Called per connection attempt.
    async fn fetch(&self) -> Result<String, SessionError>;
}

/// Fetch a credential with the session's retry budget applied.
///
/// `attempts` tries, exponential backoff from 1 s capped at 5 s, ±10% jitter.
/// Exhaustion surfaces [`SessionError::CredentialFetchFailed`].
pub(super) async fn fetch_with_retry(
    provider: &dyn CredentialProvider,
    attempts: u32,
) -> Result<String, SessionError> {
    let mut last_error = String::new();
    for attempt in 1..=attempts.max(1) {
        match provider.fetch().await {
            Ok(secret) => {
                debug!(attempt, "Realtime credential acquired");
                return Ok(secret);
            }
            Err(e) => {
                warn!(attempt, "Credential fetch failed: {e}");
                last_error = e.to_string();
            }
        }
        if attempt < attempts {
            tokio::time::sleep(with_jitter(credential_delay_ms(attempt))).await;
        }
    }
    Err(SessionError::CredentialFetchFailed(last_error))
}

/// Ephemeral session response returned by the relay; only the client secret
/// matters to this core.
#[derive(Debug, Deserialize)]
struct EphemeralSession {
    client_secret: ClientSecret,
}

#[derive(Debug, Deserialize)]
struct ClientSecret {
    value: String,
}

/// Credential provider backed by the relay's `POST /api/realtime-session`.
pub struct RelayCredentialProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl RelayCredentialProvider {
    pub fn new(relay_base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(RELAY_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: format!("{}/api/realtime-session", relay_base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl CredentialProvider for RelayCredentialProvider {
    async fn fetch(&self) -> Result<String, SessionError> {
        let response = self
            .client
            .post(&self.endpoint)
            .send()
            .await
            .map_err(|e| SessionError::CredentialFetchFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SessionError::CredentialFetchFailed(format!(
                "relay returned {}",
                response.status()
            )));
        }

        let session: EphemeralSession = response
            .json()
            .await
            .map_err(|e| SessionError::CredentialFetchFailed(format!("malformed session: {e}")))?;
        Ok(session.client_secret.value)
    }
}
