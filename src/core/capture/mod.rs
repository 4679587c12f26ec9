//! Microphone capture pipeline.
//!
//! Acquires a single-channel microphone stream, resamples it to the wire
//! rate (24 kHz), frames it into fixed-size blocks, and delivers the blocks
//! to a consumer channel. The device-backed source lives behind the
//! `device-capture` feature; a no-op stub keeps text-only sessions and test
//! environments compiling without an audio stack.

use std::time::Instant;

use thiserror::Error;
use tokio::sync::mpsc;

#[cfg(feature = "device-capture")]
pub mod device;
#[cfg(not(feature = "device-capture"))]
pub mod stub;

#[cfg(feature = "device-capture")]
pub use device::MicrophoneCapture;
#[cfg(not(feature = "device-capture"))]
pub use stub::NullCapture;

/// Sample rate the wire protocol expects, in Hz.
pub const WIRE_SAMPLE_RATE: u32 = 24_000;

#[derive(Debug, Clone, Error)]
pub enum CaptureError {
    #[error("Capture unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("Capture stream failed: {0}")]
    StreamFailed(String),
}

/// Capture pipeline configuration.
///
/// The processing flags mirror what the session asks of the audio stack:
/// backends that support echo cancellation, noise suppression, or automatic
/// gain apply them; backends that cannot ignore them.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Output sample rate delivered to the consumer (Hz)
    pub sample_rate: u32,
    /// Channel count (capture is mono)
    pub channels: u16,
    /// Frame length in samples; tier-selected, 4096 or 8192
    pub block_size: usize,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: WIRE_SAMPLE_RATE,
            channels: 1,
            block_size: 4096,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain: true,
        }
    }
}

/// One fixed-length block of captured mono samples.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Samples normalized to [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// When the final sample of the block was captured
    pub captured_at: Instant,
}

/// A source of captured audio frames.
///
/// One source is exclusively owned by one session; starting a new session
/// stops any prior capture before the device is acquired again. Captured
/// audio must never be routed to local playback.
pub trait CaptureSource: Send {
    /// Acquire the device and begin delivering frames to `frames`.
    ///
    /// Fails with [`CaptureError::DeviceUnavailable`] when permission is
    /// denied or no input device exists.
    fn start(
        &mut self,
        config: &CaptureConfig,
        frames: mpsc::UnboundedSender<AudioFrame>,
    ) -> Result<(), CaptureError>;

    /// Release the device and its processing graph. Idempotent.
    fn stop(&mut self);

    /// Retune the framing block length without reacquiring the device.
    ///
    /// Frames already in flight keep their old length; all subsequent frames
    /// use the new one.
    fn set_block_size(&mut self, block_size: usize);

    fn is_active(&self) -> bool;
}

/// Linear-interpolation resampler for the capture path.
///
/// Device rates rarely match the 24 kHz wire rate; linear interpolation is
/// adequate for speech input that the server-side model re-analyzes anyway.
pub fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || input.is_empty() {
        return input.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = ((input.len() as f64) / ratio).floor() as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let position = i as f64 * ratio;
        let index = position.floor() as usize;
        let fraction = (position - index as f64) as f32;
        let current = input[index];
        let next = if index + 1 < input.len() {
            input[index + 1]
        } else {
            current
        };
        output.push(current + (next - current) * fraction);
    }

    output
}

/// Accumulates incoming samples and emits fixed-length blocks.
///
/// The block length is read fresh for every emitted frame so a live tuning
/// update takes effect at the next block boundary.
pub(crate) struct FrameAccumulator {
    buffer: Vec<f32>,
}

impl FrameAccumulator {
    pub(crate) fn new(block_size: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(block_size),
        }
    }

    /// Push samples; returns completed frames, if any.
    pub(crate) fn push(&mut self, samples: &[f32], block_size: usize) -> Vec<AudioFrame> {
        let mut frames = Vec::new();
        for &sample in samples {
            self.buffer.push(sample);
            if self.buffer.len() >= block_size {
                frames.push(AudioFrame {
                    samples: std::mem::replace(&mut self.buffer, Vec::with_capacity(block_size)),
                    captured_at: Instant::now(),
                });
            }
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resample_identity_when_rates_match() {
        let input = vec![0.1, 0.2, 0.3];
        assert_eq!(resample_linear(&input, 24_000, 24_000), input);
    }

    #[test]
    fn resample_halves_sample_count_for_double_rate() {
        let input: Vec<f32> = (0..480).map(|i| i as f32 / 480.0).collect();
        let output = resample_linear(&input, 48_000, 24_000);
        assert_eq!(output.len(), 240);
        // Monotonic input stays monotonic through linear interpolation
        assert!(output.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn accumulator_emits_fixed_blocks() {
        let mut acc = FrameAccumulator::new(4);
        let frames = acc.push(&[0.0; 10], 4);
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.samples.len() == 4));

        // Two samples remain buffered
        let frames = acc.push(&[0.0; 2], 4);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn accumulator_honors_live_block_size_change() {
        let mut acc = FrameAccumulator::new(4096);
        assert!(acc.push(&[0.0; 4000], 4096).is_empty());
        // Tuning dropped the block size: the oversized buffer flushes as one
        // frame at the first sample pushed under the new length, then framing
        // continues at 2048.
        let frames = acc.push(&[0.0; 2247], 2048);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].samples.len(), 4001);
        assert_eq!(frames[1].samples.len(), 2048);
    }
}
