//! FIFO speech queue for the one-utterance-at-a-time avatar.
//!
//! A single worker task owns the backend calls, so utterances can never
//! interleave. The public handle enqueues, answers speaking-state queries,
//! and flips the permanent disable flag when the worker hits a quota
//! failure.
//!
//! The provider has no "finished speaking" event, so the worker holds each
//! utterance for an estimated duration derived from word count. That wait
//! and the inter-utterance delay are both cancelled by `disconnect`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::backend::{AvatarBackend, AvatarStream};

/// Timing knobs for the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Assumed speaking rate for the duration estimate
    pub words_per_minute: f64,
    /// Fixed padding added to every estimate
    pub padding: Duration,
    /// Clamp bounds for the estimate; the upper bound caps worst-case stalls
    pub min_duration: Duration,
    pub max_duration: Duration,
    /// Pause between consecutive utterances, to stay under provider rate
    /// limits
    pub inter_utterance_delay: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            words_per_minute: 160.0,
            padding: Duration::from_millis(600),
            min_duration: Duration::from_millis(1500),
            max_duration: Duration::from_secs(20),
            inter_utterance_delay: Duration::from_millis(500),
        }
    }
}

/// How long to hold an utterance before treating it as finished.
pub fn estimated_speech_duration(text: &str, config: &DispatcherConfig) -> Duration {
    let words = text.split_whitespace().count().max(1) as f64;
    let speaking = Duration::from_secs_f64(words * 60.0 / config.words_per_minute);
    (speaking + config.padding).clamp(config.min_duration, config.max_duration)
}

/// Speaking-state changes surfaced to the orchestrator and UI.
#[derive(Debug, Clone, PartialEq)]
pub enum SpeechNotice {
    /// An utterance was handed to the backend.
    Started { text: String },
    /// The utterance's estimated duration elapsed, or it failed.
    Ended { text: String },
    /// Quota exhausted; speech is off for the rest of the session. Sent
    /// exactly once.
    Disabled { reason: String },
}

struct DispatcherShared {
    backend: Arc<dyn AvatarBackend>,
    config: DispatcherConfig,
    stream: Mutex<Option<AvatarStream>>,
    disabled: AtomicBool,
    speaking: AtomicBool,
    /// Text and end time of the most recent utterance, for echo suppression
    last_speech: Mutex<Option<(String, Instant)>>,
    notices_tx: mpsc::UnboundedSender<SpeechNotice>,
}

impl DispatcherShared {
    fn notify(&self, notice: SpeechNotice) {
        let _ = self.notices_tx.send(notice);
    }

    fn finish_utterance(&self, text: String) {
        self.speaking.store(false, Ordering::Release);
        *self.last_speech.lock() = Some((text.clone(), Instant::now()));
        self.notify(SpeechNotice::Ended { text });
    }
}

/// Serializes `speak` requests against the avatar backend.
pub struct SpeechDispatcher {
    shared: Arc<DispatcherShared>,
    queue_tx: mpsc::UnboundedSender<String>,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SpeechDispatcher {
    /// Build the dispatcher and start its worker. Returns the dispatcher and
    /// the speaking-state notice stream.
    pub fn new(
        backend: Arc<dyn AvatarBackend>,
        config: DispatcherConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SpeechNotice>) {
        let (notices_tx, notices_rx) = mpsc::unbounded_channel();
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(DispatcherShared {
            backend,
            config,
            stream: Mutex::new(None),
            disabled: AtomicBool::new(false),
            speaking: AtomicBool::new(false),
            last_speech: Mutex::new(None),
            notices_tx,
        });

        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(Self::run(Arc::clone(&shared), queue_rx, shutdown.clone()));

        let dispatcher = Self {
            shared,
            queue_tx,
            shutdown,
            worker: Mutex::new(Some(worker)),
        };
        (dispatcher, notices_rx)
    }

    /// Open a rendering stream at the provider. Must succeed before any
    /// utterance can play.
    pub async fn connect(&self) -> Result<AvatarStream, super::AvatarError> {
        let stream = self.shared.backend.create_stream().await?;
        *self.shared.stream.lock() = Some(stream.clone());
        Ok(stream)
    }

    /// Enqueue one utterance. Returns `false` when speech is permanently
    /// disabled for this session; the disable itself was already reported
    /// through the notice stream, so callers need not surface it again.
    pub fn speak(&self, text: &str) -> bool {
        if self.shared.disabled.load(Ordering::Acquire) {
            debug!("Dropping utterance; avatar speech is disabled");
            return false;
        }
        if text.trim().is_empty() {
            return true;
        }
        self.queue_tx.send(text.to_string()).is_ok()
    }

    pub fn is_speaking(&self) -> bool {
        self.shared.speaking.load(Ordering::Acquire)
    }

    pub fn is_disabled(&self) -> bool {
        self.shared.disabled.load(Ordering::Acquire)
    }

    /// Most recent utterance and when it ended, if any has finished.
    pub fn last_speech(&self) -> Option<(String, Instant)> {
        self.shared.last_speech.lock().clone()
    }

    /// Cancel any in-flight duration wait, drop the queue, and close the
    /// provider stream. Idempotent.
    pub async fn disconnect(&self) {
        self.shutdown.cancel();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
        self.shared.speaking.store(false, Ordering::Release);

        let stream = self.shared.stream.lock().take();
        if let Some(stream) = stream {
            if let Err(e) = self.shared.backend.close_stream(&stream).await {
                warn!("Avatar stream close failed: {e}");
            }
        }
    }

    async fn run(
        shared: Arc<DispatcherShared>,
        mut queue_rx: mpsc::UnboundedReceiver<String>,
        shutdown: CancellationToken,
    ) {
        loop {
            let text = tokio::select! {
                _ = shutdown.cancelled() => return,
                item = queue_rx.recv() => match item {
                    Some(text) => text,
                    None => return,
                },
            };
            // Drained after the disable flag flipped; drop silently, the
            // disable was already reported
            if shared.disabled.load(Ordering::Acquire) {
                continue;
            }

            Self::speak_one(&shared, text, &shutdown).await;

            // Rate-limit gap before the next queued utterance
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(shared.config.inter_utterance_delay) => {}
            }
        }
    }

    async fn speak_one(shared: &Arc<DispatcherShared>, text: String, shutdown: &CancellationToken) {
        let stream = shared.stream.lock().clone();
        let Some(stream) = stream else {
            warn!("Dropping utterance; no avatar stream is open");
            return;
        };

        shared.speaking.store(true, Ordering::Release);
        shared.notify(SpeechNotice::Started { text: text.clone() });

        match shared.backend.speak(&stream, &text).await {
            Ok(()) => {
                let hold = estimated_speech_duration(&text, &shared.config);
                debug!(?hold, "Holding for estimated utterance duration");
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        shared.speaking.store(false, Ordering::Release);
                        return;
                    }
                    _ = tokio::time::sleep(hold) => {}
                }
                shared.finish_utterance(text);
            }
            Err(e) if e.is_quota_signal() => {
                error!("Avatar quota exhausted; disabling speech for this session: {e}");
                let already = shared.disabled.swap(true, Ordering::AcqRel);
                shared.speaking.store(false, Ordering::Release);
                shared.notify(SpeechNotice::Ended { text });
                if !already {
                    shared.notify(SpeechNotice::Disabled {
                        reason: e.to_string(),
                    });
                }
            }
            Err(e) => {
                warn!("Avatar speak failed; skipping utterance: {e}");
                shared.finish_utterance(text);
            }
        }
    }
}

impl Drop for SpeechDispatcher {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
