//! Environment-driven configuration for the voice agent.

use std::env;

/// Top-level configuration for the agent binary.
///
/// The relay is the trusted backend that holds the provider API keys and
/// exposes the credential and avatar endpoints; everything here points at it
/// or at the realtime speech socket.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Base URL of the backend relay (credential fetch + avatar forwarding)
    pub relay_base_url: String,
    /// WebSocket URL of the realtime speech model
    pub realtime_url: String,
    /// Realtime model identifier
    pub model: String,
    /// Voice used for synthesized speech
    pub voice: String,
    /// System instructions sent with every session configuration
    pub instructions: String,
    /// Endpoint used for round-trip latency probes
    pub probe_url: String,
}

impl AgentConfig {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// Also loads from a .env file if present using dotenvy.
    pub fn from_env() -> Self {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let relay_base_url =
            env::var("RELAY_BASE_URL").unwrap_or_else(|_| "http://localhost:8000".to_string());
        let model = env::var("REALTIME_MODEL")
            .unwrap_or_else(|_| "gpt-4o-realtime-preview-2024-12-17".to_string());
        let realtime_url = env::var("REALTIME_URL")
            .unwrap_or_else(|_| format!("wss://api.openai.com/v1/realtime?model={model}"));
        let voice = env::var("AGENT_VOICE").unwrap_or_else(|_| "shimmer".to_string());
        let instructions = env::var("AGENT_INSTRUCTIONS").unwrap_or_else(|_| {
            "You are Aria, a friendly AI IT Support Agent. Be warm, helpful, and concise."
                .to_string()
        });
        let probe_url =
            env::var("PROBE_URL").unwrap_or_else(|_| format!("{relay_base_url}/api/health"));

        Self {
            relay_base_url,
            realtime_url,
            model,
            voice,
            instructions,
            probe_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_local_relay() {
        let config = AgentConfig::from_env();
        assert!(config.realtime_url.starts_with("wss://"));
        assert!(config.probe_url.contains("/api/health"));
        assert!(!config.voice.is_empty());
    }
}
