//! Periodic link quality monitor.
//!
//! Measures round-trip latency with a lightweight HTTP probe, merges it with
//! reported link hints, and publishes the resulting [`AudioTuning`] on a
//! watch channel whenever the tier changes. The session consumes the channel
//! and re-sends its configuration live.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{AudioTuning, LinkMetrics, NetworkTier, PROBE_FAILURE_RTT_MS, classify, tuning_for};

/// How often the link is re-measured.
const PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// Per-probe request timeout.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Externally reported link hints (declared downlink, connection label,
/// up/down state). RTT is never a hint; the monitor measures it itself.
#[derive(Debug, Clone)]
pub struct LinkHints {
    pub downlink_mbps: f64,
    pub effective_type: Option<String>,
    pub is_online: bool,
}

impl Default for LinkHints {
    fn default() -> Self {
        let defaults = LinkMetrics::default();
        Self {
            downlink_mbps: defaults.downlink_mbps,
            effective_type: defaults.effective_type,
            is_online: defaults.is_online,
        }
    }
}

struct MonitorShared {
    client: reqwest::Client,
    probe_url: String,
    hints: RwLock<LinkHints>,
    tier: RwLock<NetworkTier>,
    refresh: tokio::sync::Notify,
}

/// Samples link quality on an interval and publishes tuning updates.
pub struct NetworkMonitor {
    shared: Arc<MonitorShared>,
    tuning_tx: watch::Sender<AudioTuning>,
    shutdown: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl NetworkMonitor {
    pub fn new(probe_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .unwrap_or_default();

        let initial_tier = classify(&LinkMetrics::default());
        let (tuning_tx, _) = watch::channel(tuning_for(initial_tier));

        Self {
            shared: Arc::new(MonitorShared {
                client,
                probe_url: probe_url.into(),
                hints: RwLock::new(LinkHints::default()),
                tier: RwLock::new(initial_tier),
                refresh: tokio::sync::Notify::new(),
            }),
            tuning_tx,
            shutdown: CancellationToken::new(),
            handle: None,
        }
    }

    /// Subscribe to tuning updates. The receiver always holds the tuning for
    /// the most recently classified tier.
    pub fn subscribe(&self) -> watch::Receiver<AudioTuning> {
        self.tuning_tx.subscribe()
    }

    /// Currently classified tier.
    pub fn tier(&self) -> NetworkTier {
        *self.shared.tier.read()
    }

    /// Report link hints from the hosting environment.
    ///
    /// Triggers an immediate re-measurement, the analogue of a
    /// connectivity-change event.
    pub fn set_hints(&self, hints: LinkHints) {
        *self.shared.hints.write() = hints;
        self.shared.refresh.notify_one();
    }

    /// Start the periodic probe loop.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }

        let shared = Arc::clone(&self.shared);
        let tuning_tx = self.tuning_tx.clone();
        let shutdown = self.shutdown.clone();

        self.handle = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(PROBE_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = shared.refresh.notified() => {}
                    _ = shutdown.cancelled() => break,
                }

                let rtt_ms = Self::measure_rtt(&shared).await;
                let hints = shared.hints.read().clone();
                let metrics = LinkMetrics {
                    rtt_ms,
                    downlink_mbps: hints.downlink_mbps,
                    effective_type: hints.effective_type,
                    is_online: hints.is_online,
                };

                let tier = classify(&metrics);
                let previous = {
                    let mut guard = shared.tier.write();
                    std::mem::replace(&mut *guard, tier)
                };

                if tier != previous {
                    info!(
                        from = previous.as_str(),
                        to = tier.as_str(),
                        rtt_ms,
                        "Network tier changed"
                    );
                    // send_replace stores the value even with no receiver
                    // attached, so later subscribers still see the latest
                    // tuning
                    tuning_tx.send_replace(tuning_for(tier));
                } else {
                    debug!(tier = tier.as_str(), rtt_ms, "Network tier unchanged");
                }
            }
        }));
    }

    /// Stop the probe loop. Idempotent.
    pub fn stop(&mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    async fn measure_rtt(shared: &MonitorShared) -> f64 {
        let started = Instant::now();
        match shared.client.head(&shared.probe_url).send().await {
            Ok(_) => started.elapsed().as_secs_f64() * 1000.0,
            Err(e) => {
                warn!("Latency probe failed, treating link as very poor: {e}");
                PROBE_FAILURE_RTT_MS
            }
        }
    }
}

impl Drop for NetworkMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
