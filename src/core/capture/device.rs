//! cpal-backed microphone source.
//!
//! `cpal::Stream` is not `Send`, so the stream lives on a dedicated capture
//! thread for its whole lifetime; `start` only returns after the thread
//! reports that the device opened. The input graph has no output leg, so
//! captured audio can never reach local playback.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::{AudioFrame, CaptureConfig, CaptureError, CaptureSource, FrameAccumulator,
            resample_linear};

/// How long `start` waits for the capture thread to open the device.
const DEVICE_OPEN_TIMEOUT: Duration = Duration::from_secs(5);

struct CaptureThread {
    stop_tx: std_mpsc::Sender<()>,
    handle: std::thread::JoinHandle<()>,
}

/// Microphone capture source backed by the default cpal input device.
pub struct MicrophoneCapture {
    block_size: Arc<AtomicUsize>,
    thread: Option<CaptureThread>,
}

impl MicrophoneCapture {
    pub fn new() -> Self {
        Self {
            block_size: Arc::new(AtomicUsize::new(CaptureConfig::default().block_size)),
            thread: None,
        }
    }
}

impl Default for MicrophoneCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureSource for MicrophoneCapture {
    fn start(
        &mut self,
        config: &CaptureConfig,
        frames: mpsc::UnboundedSender<AudioFrame>,
    ) -> Result<(), CaptureError> {
        // At most one live device per source
        self.stop();

        self.block_size.store(config.block_size, Ordering::Release);
        let block_size = Arc::clone(&self.block_size);
        let target_rate = config.sample_rate;

        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), CaptureError>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let handle = std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || {
                let stream = match open_input_stream(block_size, target_rate, frames) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Keep the stream alive until stop() signals or the source is
                // dropped; the stream is torn down when this thread returns.
                let _ = stop_rx.recv();
                drop(stream);
                info!("Microphone capture stream released");
            })
            .map_err(|e| CaptureError::StreamFailed(format!("capture thread: {e}")))?;

        match ready_rx.recv_timeout(DEVICE_OPEN_TIMEOUT) {
            Ok(Ok(())) => {
                self.thread = Some(CaptureThread { stop_tx, handle });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => Err(CaptureError::DeviceUnavailable(
                "timed out waiting for the input device to open".to_string(),
            )),
        }
    }

    fn stop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.stop_tx.send(());
            let _ = thread.handle.join();
        }
    }

    fn set_block_size(&mut self, block_size: usize) {
        self.block_size.store(block_size, Ordering::Release);
    }

    fn is_active(&self) -> bool {
        self.thread.is_some()
    }
}

impl Drop for MicrophoneCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_input_stream(
    block_size: Arc<AtomicUsize>,
    target_rate: u32,
    frames: mpsc::UnboundedSender<AudioFrame>,
) -> Result<cpal::Stream, CaptureError> {
    let device = cpal::default_host().default_input_device().ok_or_else(|| {
        CaptureError::DeviceUnavailable("no input device available".to_string())
    })?;

    let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());
    let default_config = device
        .default_input_config()
        .map_err(|e| CaptureError::DeviceUnavailable(format!("input config: {e}")))?;

    let device_rate = default_config.sample_rate().0;
    let device_channels = default_config.channels() as usize;
    info!(
        device = %device_name,
        rate = device_rate,
        channels = device_channels,
        "Opening microphone input stream"
    );

    let stream_config: cpal::StreamConfig = default_config.into();
    let mut accumulator = FrameAccumulator::new(block_size.load(Ordering::Acquire));
    let mut mono = Vec::new();

    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                // Downmix interleaved channels to mono
                mono.clear();
                if device_channels <= 1 {
                    mono.extend_from_slice(data);
                } else {
                    for frame in data.chunks_exact(device_channels) {
                        let sum: f32 = frame.iter().sum();
                        mono.push(sum / device_channels as f32);
                    }
                }

                let resampled = resample_linear(&mono, device_rate, target_rate);
                let current_block = block_size.load(Ordering::Acquire);
                for frame in accumulator.push(&resampled, current_block) {
                    if frames.send(frame).is_err() {
                        // Consumer went away; frames are dropped until stop()
                        return;
                    }
                }
            },
            move |err| {
                warn!("Microphone stream error: {err}");
            },
            None,
        )
        .map_err(|e| CaptureError::StreamFailed(format!("build input stream: {e}")))?;

    stream
        .play()
        .map_err(|e| CaptureError::StreamFailed(format!("start input stream: {e}")))?;

    Ok(stream)
}
