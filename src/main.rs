use std::sync::Arc;

use tracing::{error, info, warn};

use aria::config::AgentConfig;
use aria::core::avatar::{DispatcherConfig, RelayAvatarBackend, SpeechDispatcher};
use aria::core::network::NetworkMonitor;
use aria::core::orchestrator::{ChatEvent, ConversationOrchestrator, EchoSuppressionConfig};
use aria::core::session::{
    RealtimeSession, RelayCredentialProvider, SessionConfig, WsConnector,
};
use aria::core::capture::CaptureSource;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let config = AgentConfig::from_env();
    info!(relay = %config.relay_base_url, "Starting voice agent");

    let mut monitor = NetworkMonitor::new(&config.probe_url);
    monitor.start();
    let tuning_rx = monitor.subscribe();

    let credentials = Arc::new(RelayCredentialProvider::new(&config.relay_base_url));
    let connector = Arc::new(WsConnector::new(&config.realtime_url));
    let capture: Box<dyn CaptureSource> = default_capture();

    let session_config = SessionConfig {
        voice: config.voice.clone(),
        instructions: config.instructions.clone(),
        ..SessionConfig::default()
    };
    let (session, session_rx) =
        RealtimeSession::new(session_config, credentials, connector, capture, tuning_rx);

    let avatar_endpoint = format!("{}/api/did-stream", config.relay_base_url)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid avatar endpoint: {e}"))?;
    let backend = Arc::new(RelayAvatarBackend::new(
        reqwest::Client::new(),
        avatar_endpoint,
    ));
    let (dispatcher, notices_rx) = SpeechDispatcher::new(backend, DispatcherConfig::default());
    let dispatcher = Arc::new(dispatcher);
    if let Err(e) = dispatcher.connect().await {
        // The conversation still works as text plus model audio
        warn!("Avatar stream unavailable, continuing without it: {e}");
    }

    let (orchestrator, mut chat_rx) =
        ConversationOrchestrator::new(Arc::clone(&dispatcher), EchoSuppressionConfig::default());
    let orchestrator_task = tokio::spawn(orchestrator.run(session_rx, notices_rx));

    if let Err(e) = session.connect().await {
        // Recovery keeps retrying in the background on the backoff schedule
        error!("Initial connection failed: {e}");
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
            event = chat_rx.recv() => {
                let Some(event) = event else { break };
                match event {
                    ChatEvent::User(text) => println!("you: {text}"),
                    ChatEvent::Agent(text) => println!("aria: {text}"),
                    ChatEvent::Notice(text) => println!("* {text}"),
                }
            }
        }
    }

    session.disconnect().await;
    dispatcher.disconnect().await;
    monitor.stop();
    orchestrator_task.abort();
    Ok(())
}

#[cfg(feature = "device-capture")]
fn default_capture() -> Box<dyn CaptureSource> {
    Box::new(aria::core::capture::MicrophoneCapture::new())
}

#[cfg(not(feature = "device-capture"))]
fn default_capture() -> Box<dyn CaptureSource> {
    Box::new(aria::core::capture::NullCapture::new())
}
