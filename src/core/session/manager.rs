//! The realtime session state machine.
//!
//! `disconnected → connecting → connected ⇄ reconnecting → disconnected`.
//! One supervisor task owns the live socket end to end: it runs the
//! connection event loop while healthy and the bounded backoff schedule when
//! not. The public handle only flips shared flags, injects outbound events,
//! and cancels the supervisor.
//!
//! Ordering guarantees kept here: `session.update` is sent exactly once per
//! connection, immediately on `session.created` and before any audio frame;
//! captured frames are transmitted in capture order; an intentional
//! disconnect wins over any in-flight reconnect wait.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use bytes::Bytes;
use tokio::sync::{Mutex as AsyncMutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::capture::{AudioFrame, CaptureConfig, CaptureSource};
use crate::core::codec;
use crate::core::network::AudioTuning;

use super::backoff::{reconnect_delay_ms, with_jitter};
use super::credentials::{CredentialProvider, fetch_with_retry};
use super::events::{ClientEvent, ConversationItem, ServerEvent, SessionProfile};
use super::state::{ConnectionState, SessionShared};
use super::transport::{RealtimeConnector, SocketHandle};
use super::{SessionConfig, SessionError, SessionEvent};

/// Why a connection's event loop returned.
enum ConnectionEnd {
    /// Intentional shutdown; no reconnect.
    Shutdown,
    /// The socket closed or errored mid-session.
    Closed,
    /// No inbound activity beyond the staleness window.
    Stale,
}

/// Everything the supervisor task needs, cloneable so the handle and the
/// task share it.
#[derive(Clone)]
struct SessionCtx {
    config: SessionConfig,
    shared: Arc<SessionShared>,
    credentials: Arc<dyn CredentialProvider>,
    connector: Arc<dyn RealtimeConnector>,
    capture: Arc<AsyncMutex<Box<dyn CaptureSource>>>,
    tuning_rx: watch::Receiver<AudioTuning>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    shutdown: CancellationToken,
}

impl SessionCtx {
    fn emit(&self, event: SessionEvent) {
        let _ = self.events_tx.send(event);
    }

    fn transition(&self, state: ConnectionState) {
        let previous = self.shared.set_state(state);
        if previous != state {
            info!(from = previous.as_str(), to = state.as_str(), "Session state changed");
            self.emit(SessionEvent::StateChanged(state));
        }
    }
}

/// One end-to-end connection to the speech model.
pub struct RealtimeSession {
    config: SessionConfig,
    shared: Arc<SessionShared>,
    credentials: Arc<dyn CredentialProvider>,
    connector: Arc<dyn RealtimeConnector>,
    capture: Arc<AsyncMutex<Box<dyn CaptureSource>>>,
    tuning_rx: watch::Receiver<AudioTuning>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    shutdown: AsyncMutex<CancellationToken>,
    supervisor: AsyncMutex<Option<JoinHandle<()>>>,
}

impl RealtimeSession {
    /// Create a session with injected collaborators. Returns the session and
    /// the event stream consumed by the orchestrator/UI.
    pub fn new(
        config: SessionConfig,
        credentials: Arc<dyn CredentialProvider>,
        connector: Arc<dyn RealtimeConnector>,
        capture: Box<dyn CaptureSource>,
        tuning_rx: watch::Receiver<AudioTuning>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let session = Self {
            config,
            shared: Arc::new(SessionShared::new()),
            credentials,
            connector,
            capture: Arc::new(AsyncMutex::new(capture)),
            tuning_rx,
            events_tx,
            shutdown: AsyncMutex::new(CancellationToken::new()),
            supervisor: AsyncMutex::new(None),
        };
        (session, events_rx)
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_muted(&self) -> bool {
        self.shared.muted.load(Ordering::Acquire)
    }

    /// Toggle whether captured frames are transmitted. The capture device
    /// keeps running so unmuting has no reacquisition latency.
    pub fn set_muted(&self, muted: bool) {
        self.shared.muted.store(muted, Ordering::Release);
        debug!(muted, "Microphone transmit toggled");
    }

    /// Inject a typed user message and ask the model to respond.
    ///
    /// Fails immediately when no socket is open; no retry. The caller is
    /// expected to check connection state first.
    pub fn send_text(&self, text: &str) -> Result<(), SessionError> {
        let guard = self.shared.outbound.lock();
        let Some(outbound) = guard.as_ref() else {
            return Err(SessionError::NotConnected(
                "cannot send a message without an open socket".to_string(),
            ));
        };
        outbound
            .send(ClientEvent::ConversationItemCreate {
                item: ConversationItem::user_text(text),
            })
            .and_then(|_| outbound.send(ClientEvent::ResponseCreate))
            .map_err(|_| {
                SessionError::NotConnected("socket closed while sending".to_string())
            })
    }

    /// Start the session: fetch a credential, open the socket, and hand the
    /// connection to the supervisor task.
    ///
    /// Any prior socket is fully torn down first. On a first-attempt failure
    /// the error is returned AND recovery continues in the background on the
    /// reconnect schedule; `disconnect` cancels it.
    pub async fn connect(&self) -> Result<(), SessionError> {
        // At most one active socket per session
        self.disconnect().await;

        self.shared
            .intentional_disconnect
            .store(false, Ordering::Release);
        self.shared.failed_attempts.store(0, Ordering::Release);

        let shutdown = CancellationToken::new();
        *self.shutdown.lock().await = shutdown.clone();

        let ctx = SessionCtx {
            config: self.config.clone(),
            shared: Arc::clone(&self.shared),
            credentials: Arc::clone(&self.credentials),
            connector: Arc::clone(&self.connector),
            capture: Arc::clone(&self.capture),
            tuning_rx: self.tuning_rx.clone(),
            events_tx: self.events_tx.clone(),
            shutdown,
        };

        ctx.transition(ConnectionState::Connecting);

        let (first_handle, result) = match Self::establish(&ctx).await {
            Ok(handle) => (Some(handle), Ok(())),
            Err(e) => {
                warn!("Initial connection attempt failed: {e}");
                ctx.shared.failed_attempts.store(1, Ordering::Release);
                (None, Err(e))
            }
        };

        let task = tokio::spawn(Self::supervise(ctx, first_handle));
        *self.supervisor.lock().await = Some(task);
        result
    }

    /// Intentional disconnect: suppress auto-reconnect, cancel timers and
    /// backoff waits, stop capture, close the socket. Idempotent and safe in
    /// any state.
    pub async fn disconnect(&self) {
        self.shared
            .intentional_disconnect
            .store(true, Ordering::Release);
        self.shutdown.lock().await.cancel();

        if let Some(task) = self.supervisor.lock().await.take() {
            let _ = task.await;
        }

        self.shared.outbound.lock().take();
        self.capture.lock().await.stop();

        let previous = self.shared.set_state(ConnectionState::Disconnected);
        if previous != ConnectionState::Disconnected {
            let _ = self
                .events_tx
                .send(SessionEvent::StateChanged(ConnectionState::Disconnected));
        }
    }

    /// Credential fetch plus socket open, together bounded by the connection
    /// timeout. The relay has untrusted latency, so the clock starts before
    /// the credential request, not just the handshake.
    async fn establish(ctx: &SessionCtx) -> Result<SocketHandle, SessionError> {
        let open = async {
            let credential =
                fetch_with_retry(&*ctx.credentials, ctx.config.credential_attempts).await?;
            ctx.connector.connect(&credential).await
        };
        match timeout(ctx.config.connect_timeout, open).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::ConnectTimeout),
        }
    }

    /// Supervisor: run connections while healthy, walk the backoff schedule
    /// when not, give up after the attempt budget.
    async fn supervise(ctx: SessionCtx, mut handle: Option<SocketHandle>) {
        loop {
            if let Some(socket) = handle.take() {
                ctx.shared.failed_attempts.store(0, Ordering::Release);
                // The outbound slot must be live before Connected is
                // observable, so send_text works immediately
                *ctx.shared.outbound.lock() = Some(socket.outbound.clone());
                ctx.transition(ConnectionState::Connected);

                let frames = Self::start_capture(&ctx).await;
                let end = Self::run_connection(&ctx, socket, frames).await;

                ctx.shared.outbound.lock().take();
                ctx.capture.lock().await.stop();

                match end {
                    ConnectionEnd::Shutdown => break,
                    ConnectionEnd::Closed => info!("Realtime socket ended; will reconnect"),
                    ConnectionEnd::Stale => warn!("Connection stale; will reconnect"),
                }
            }

            if ctx.shutdown.is_cancelled()
                || ctx.shared.intentional_disconnect.load(Ordering::Acquire)
            {
                break;
            }

            match Self::recover(&ctx).await {
                Some(socket) => handle = Some(socket),
                None => break,
            }
        }

        ctx.shared.outbound.lock().take();
        ctx.transition(ConnectionState::Disconnected);
    }

    /// Reconnect loop. Returns a fresh socket, or `None` once the attempt
    /// budget is exhausted or the session was cancelled.
    async fn recover(ctx: &SessionCtx) -> Option<SocketHandle> {
        let mut retry = 0u32;
        loop {
            let failures = ctx.shared.failed_attempts.load(Ordering::Acquire);
            if failures >= ctx.config.max_connect_attempts {
                error!(
                    failures,
                    "Reconnect attempts exhausted; session is terminal"
                );
                ctx.emit(SessionEvent::Failed(SessionError::ReconnectExhausted));
                return None;
            }

            retry += 1;
            ctx.transition(ConnectionState::Reconnecting);
            ctx.emit(SessionEvent::Reconnecting { attempt: retry });

            let delay = with_jitter(reconnect_delay_ms(retry));
            debug!(attempt = retry, ?delay, "Backing off before reconnect");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = ctx.shutdown.cancelled() => return None,
            }
            // Re-check: disconnect() may have raced the backoff wait
            if ctx.shared.intentional_disconnect.load(Ordering::Acquire) {
                return None;
            }

            ctx.transition(ConnectionState::Connecting);
            let attempt = tokio::select! {
                result = Self::establish(ctx) => result,
                _ = ctx.shutdown.cancelled() => return None,
            };

            match attempt {
                Ok(socket) => return Some(socket),
                Err(e) => {
                    warn!(attempt = retry, "Reconnect attempt failed: {e}");
                    ctx.shared.failed_attempts.fetch_add(1, Ordering::AcqRel);
                }
            }
        }
    }

    /// Acquire the microphone for this connection. Capture failure degrades
    /// the session to text-only rather than killing it.
    async fn start_capture(ctx: &SessionCtx) -> Option<mpsc::UnboundedReceiver<AudioFrame>> {
        let tuning = *ctx.tuning_rx.borrow();
        let capture_config = CaptureConfig {
            block_size: tuning.buffer_size,
            ..Default::default()
        };

        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let mut capture = ctx.capture.lock().await;
        // Prior capture must be released before the device is acquired again
        capture.stop();
        match capture.start(&capture_config, frame_tx) {
            Ok(()) => Some(frame_rx),
            Err(e) => {
                error!("Microphone unavailable: {e}");
                ctx.emit(SessionEvent::CaptureUnavailable(e.to_string()));
                None
            }
        }
    }

    /// Event loop for one open socket.
    async fn run_connection(
        ctx: &SessionCtx,
        socket: SocketHandle,
        mut frames: Option<mpsc::UnboundedReceiver<AudioFrame>>,
    ) -> ConnectionEnd {
        let SocketHandle {
            outbound,
            mut inbound,
        } = socket;
        ctx.shared.touch_activity();

        let mut driver = ConnectionDriver {
            ctx,
            outbound,
            config_sent: false,
            agent_transcript: String::new(),
            user_transcript: String::new(),
        };

        let mut tuning_rx = ctx.tuning_rx.clone();
        tuning_rx.mark_unchanged();
        let mut tuning_live = true;
        let mut heartbeat = tokio::time::interval(ctx.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately; consume it so staleness is
        // only evaluated on the cadence.
        heartbeat.tick().await;

        loop {
            tokio::select! {
                _ = ctx.shutdown.cancelled() => return ConnectionEnd::Shutdown,

                event = inbound.recv() => {
                    let Some(event) = event else {
                        return ConnectionEnd::Closed;
                    };
                    ctx.shared.touch_activity();
                    driver.handle_server_event(event);
                }

                frame = async {
                    match frames.as_mut() {
                        Some(rx) => rx.recv().await,
                        None => std::future::pending().await,
                    }
                } => {
                    match frame {
                        Some(frame) => driver.forward_frame(&frame),
                        None => {
                            warn!("Capture stream ended mid-connection");
                            frames = None;
                        }
                    }
                }

                _ = heartbeat.tick() => {
                    let idle = ctx.shared.since_activity();
                    if idle > ctx.config.stale_after {
                        warn!(?idle, "Heartbeat found no inbound activity");
                        return ConnectionEnd::Stale;
                    }
                }

                changed = tuning_rx.changed(), if tuning_live => {
                    match changed {
                        Ok(()) => {
                            let tuning = *tuning_rx.borrow_and_update();
                            driver.apply_tuning(&tuning);
                            ctx.capture.lock().await.set_block_size(tuning.buffer_size);
                        }
                        // Monitor gone; keep the last tuning
                        Err(_) => tuning_live = false,
                    }
                }
            }
        }
    }
}

/// Per-connection dispatch state: transcript accumulators and the
/// config-before-audio gate.
struct ConnectionDriver<'a> {
    ctx: &'a SessionCtx,
    outbound: mpsc::UnboundedSender<ClientEvent>,
    config_sent: bool,
    agent_transcript: String,
    user_transcript: String,
}

impl ConnectionDriver<'_> {
    fn send(&self, event: ClientEvent) {
        if self.outbound.send(event).is_err() {
            debug!("Outbound send after socket closed; dropped");
        }
    }

    /// Encode and transmit one captured frame. Gated on the session config
    /// having been sent and the microphone being unmuted.
    fn forward_frame(&self, frame: &AudioFrame) {
        if !self.config_sent || self.ctx.shared.muted.load(Ordering::Acquire) {
            return;
        }
        let audio = codec::encode_outbound(&frame.samples);
        self.send(ClientEvent::InputAudioBufferAppend { audio });
    }

    /// Re-send the session configuration for a live tuning change.
    fn apply_tuning(&mut self, tuning: &AudioTuning) {
        if !self.config_sent {
            // session.created has not arrived yet; it will pick up the
            // latest tuning when it does
            return;
        }
        info!(buffer = tuning.buffer_size, "Applying tuning update to live session");
        self.send(ClientEvent::SessionUpdate {
            session: SessionProfile::from_tuning(
                &self.ctx.config.voice,
                &self.ctx.config.instructions,
                tuning,
            ),
        });
    }

    fn handle_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::SessionCreated { .. } => {
                let tuning = *self.ctx.tuning_rx.borrow();
                info!("Session ready; sending configuration");
                self.send(ClientEvent::SessionUpdate {
                    session: SessionProfile::from_tuning(
                        &self.ctx.config.voice,
                        &self.ctx.config.instructions,
                        &tuning,
                    ),
                });
                // Audio frames may flow only from here on
                self.config_sent = true;
            }
            ServerEvent::SessionUpdated { .. } => {
                debug!("Server acknowledged session configuration");
            }
            ServerEvent::ResponseAudioDelta { delta } => match codec::decode_inbound(&delta) {
                Ok(pcm) => self.ctx.emit(SessionEvent::AgentAudioDelta(Bytes::from(pcm))),
                Err(e) => warn!("Dropping undecodable audio delta: {e}"),
            },
            ServerEvent::ResponseAudioDone { .. } => {
                debug!("Agent audio stream complete");
            }
            ServerEvent::ResponseAudioTranscriptDelta { delta } => {
                self.agent_transcript.push_str(&delta);
                self.ctx.emit(SessionEvent::AgentTranscriptDelta(delta));
            }
            ServerEvent::ResponseAudioTranscriptDone { transcript } => {
                let text = if transcript.is_empty() {
                    std::mem::take(&mut self.agent_transcript)
                } else {
                    self.agent_transcript.clear();
                    transcript
                };
                self.ctx.emit(SessionEvent::AgentTranscriptDone(text));
            }
            ServerEvent::InputTranscriptionDelta { delta } => {
                self.user_transcript.push_str(&delta);
                self.ctx.emit(SessionEvent::UserTranscriptDelta(delta));
            }
            ServerEvent::InputTranscriptionCompleted { transcript } => {
                self.user_transcript.clear();
                self.ctx.emit(SessionEvent::UserTranscriptDone(transcript));
            }
            ServerEvent::InputTranscriptionFailed { error } => {
                // Non-fatal: the model may still respond to the raw audio
                let description = error.map(|e| e.describe()).unwrap_or_default();
                warn!("Input transcription failed: {description}");
                self.ctx.emit(SessionEvent::TranscriptionFailed(description));
            }
            ServerEvent::SpeechStarted { .. } => {
                self.ctx.emit(SessionEvent::UserInterrupted);
            }
            ServerEvent::Error { error } => {
                if error.is_expected_noise() {
                    debug!("Expected server noise: {}", error.describe());
                } else {
                    warn!("Server error: {}", error.describe());
                    self.ctx.emit(SessionEvent::ServerError(error.describe()));
                }
            }
            ServerEvent::Unknown => {
                debug!("Ignoring unknown server event kind");
            }
        }
    }
}
