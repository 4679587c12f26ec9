//! Stub capture source for builds without the `device-capture` feature.

use tokio::sync::mpsc;
use tracing::warn;

use super::{AudioFrame, CaptureConfig, CaptureError, CaptureSource};

/// No-op capture source.
///
/// Starts successfully and never emits a frame, so sessions built without an
/// audio stack still connect and can converse over the text path.
#[derive(Debug, Default)]
pub struct NullCapture {
    active: bool,
}

impl NullCapture {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CaptureSource for NullCapture {
    fn start(
        &mut self,
        _config: &CaptureConfig,
        _frames: mpsc::UnboundedSender<AudioFrame>,
    ) -> Result<(), CaptureError> {
        warn!("device-capture feature disabled; microphone input is inactive");
        self.active = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.active = false;
    }

    fn set_block_size(&mut self, _block_size: usize) {}

    fn is_active(&self) -> bool {
        self.active
    }
}
