//! Network quality classification and audio tuning.
//!
//! Link quality is reduced to a small ordinal scale, and every audio knob the
//! session exposes is a pure function of that scale: responsive tuning on
//! good links, conservative buffering and longer silence tolerance on jittery
//! ones.

pub mod monitor;

pub use monitor::NetworkMonitor;

/// RTT substituted when a latency probe fails; classifies as `Poor`.
pub const PROBE_FAILURE_RTT_MS: f64 = 10_000.0;

/// Ordinal link quality classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NetworkTier {
    Offline,
    Poor,
    Fair,
    Good,
    Excellent,
}

impl NetworkTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkTier::Offline => "offline",
            NetworkTier::Poor => "poor",
            NetworkTier::Fair => "fair",
            NetworkTier::Good => "good",
            NetworkTier::Excellent => "excellent",
        }
    }
}

/// Measured and reported link characteristics.
///
/// `rtt_ms` comes from the monitor's own probe; the rest are hints reported
/// by the hosting environment (declared downlink in Mbit/s, a coarse
/// connection-type label, and whether the network is up at all).
#[derive(Debug, Clone)]
pub struct LinkMetrics {
    pub rtt_ms: f64,
    pub downlink_mbps: f64,
    pub effective_type: Option<String>,
    pub is_online: bool,
}

impl Default for LinkMetrics {
    fn default() -> Self {
        Self {
            rtt_ms: 150.0,
            downlink_mbps: 4.0,
            effective_type: None,
            is_online: true,
        }
    }
}

/// Classify link quality from measured RTT, declared downlink, and
/// connection-type hints.
///
/// `Offline` wins over everything else. Otherwise ordered RTT/downlink
/// thresholds apply first, then the connection-type hints, then a `Poor`
/// default.
pub fn classify(metrics: &LinkMetrics) -> NetworkTier {
    if !metrics.is_online {
        return NetworkTier::Offline;
    }

    if metrics.rtt_ms < 100.0 && metrics.downlink_mbps > 5.0 {
        return NetworkTier::Excellent;
    }
    if metrics.rtt_ms < 300.0 && metrics.downlink_mbps > 2.0 {
        return NetworkTier::Good;
    }
    if metrics.rtt_ms < 600.0 && metrics.downlink_mbps > 0.5 {
        return NetworkTier::Fair;
    }

    match metrics.effective_type.as_deref() {
        Some("4g") if metrics.rtt_ms < 300.0 => NetworkTier::Good,
        Some("3g") => NetworkTier::Fair,
        Some("2g") | Some("slow-2g") => NetworkTier::Poor,
        _ => NetworkTier::Poor,
    }
}

/// Audio tuning parameters derived from the network tier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioTuning {
    /// Capture frame length in samples
    pub buffer_size: usize,
    /// Server VAD sensitivity; lower fires earlier
    pub vad_threshold: f32,
    /// Audio retained before detected speech (ms)
    pub prefix_padding_ms: u32,
    /// Silence that ends a user turn (ms)
    pub silence_duration_ms: u32,
    /// Response length cap in tokens
    pub max_response_tokens: u32,
}

/// Fixed tuning table.
///
/// Higher tiers get smaller capture buffers, shorter padding/silence windows,
/// and a lower VAD threshold; lower tiers trade responsiveness for fewer
/// spurious turn endings on jittery links.
pub fn tuning_for(tier: NetworkTier) -> AudioTuning {
    match tier {
        NetworkTier::Excellent => AudioTuning {
            buffer_size: 4096,
            vad_threshold: 0.40,
            prefix_padding_ms: 200,
            silence_duration_ms: 400,
            max_response_tokens: 4096,
        },
        NetworkTier::Good => AudioTuning {
            buffer_size: 4096,
            vad_threshold: 0.50,
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
            max_response_tokens: 4096,
        },
        NetworkTier::Fair => AudioTuning {
            buffer_size: 8192,
            vad_threshold: 0.55,
            prefix_padding_ms: 400,
            silence_duration_ms: 700,
            max_response_tokens: 2048,
        },
        // Offline shares the most conservative tuning; it only matters once
        // connectivity returns.
        NetworkTier::Poor | NetworkTier::Offline => AudioTuning {
            buffer_size: 8192,
            vad_threshold: 0.60,
            prefix_padding_ms: 500,
            silence_duration_ms: 900,
            max_response_tokens: 1024,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(rtt: f64, downlink: f64, kind: Option<&str>, online: bool) -> LinkMetrics {
        LinkMetrics {
            rtt_ms: rtt,
            downlink_mbps: downlink,
            effective_type: kind.map(str::to_string),
            is_online: online,
        }
    }

    #[test]
    fn fast_link_classifies_excellent() {
        let tier = classify(&metrics(50.0, 10.0, Some("4g"), true));
        assert_eq!(tier, NetworkTier::Excellent);
    }

    #[test]
    fn offline_overrides_all_other_metrics() {
        let tier = classify(&metrics(50.0, 10.0, Some("4g"), false));
        assert_eq!(tier, NetworkTier::Offline);
    }

    #[test]
    fn threshold_ladder_orders_tiers() {
        assert_eq!(classify(&metrics(200.0, 3.0, None, true)), NetworkTier::Good);
        assert_eq!(classify(&metrics(500.0, 1.0, None, true)), NetworkTier::Fair);
        assert_eq!(classify(&metrics(900.0, 0.1, None, true)), NetworkTier::Poor);
    }

    #[test]
    fn connection_type_hints_break_threshold_misses() {
        // Slow declared downlink but a 4g label with low RTT is still usable
        assert_eq!(
            classify(&metrics(250.0, 0.2, Some("4g"), true)),
            NetworkTier::Good
        );
        assert_eq!(
            classify(&metrics(800.0, 0.2, Some("3g"), true)),
            NetworkTier::Fair
        );
        assert_eq!(
            classify(&metrics(800.0, 0.2, Some("slow-2g"), true)),
            NetworkTier::Poor
        );
    }

    #[test]
    fn probe_failure_rtt_lands_in_poor() {
        let tier = classify(&metrics(PROBE_FAILURE_RTT_MS, 10.0, None, true));
        assert_eq!(tier, NetworkTier::Poor);
    }

    #[test]
    fn tuning_table_is_monotonic() {
        let excellent = tuning_for(NetworkTier::Excellent);
        let poor = tuning_for(NetworkTier::Poor);
        assert!(excellent.buffer_size <= poor.buffer_size);
        assert!(excellent.vad_threshold <= poor.vad_threshold);
        assert!(excellent.silence_duration_ms <= poor.silence_duration_ms);
        assert!(excellent.prefix_padding_ms <= poor.prefix_padding_ms);
    }

    #[test]
    fn buffer_sizes_stay_in_supported_set() {
        for tier in [
            NetworkTier::Offline,
            NetworkTier::Poor,
            NetworkTier::Fair,
            NetworkTier::Good,
            NetworkTier::Excellent,
        ] {
            let tuning = tuning_for(tier);
            assert!(tuning.buffer_size == 4096 || tuning.buffer_size == 8192);
        }
    }
}
