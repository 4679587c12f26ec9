//! Wire audio codec: float samples to/from the socket's transport encoding.
//!
//! The realtime socket carries audio as base64-encoded little-endian signed
//! 16-bit PCM inside JSON events. These transforms are pure and stateless;
//! inbound audio is only base64-decoded here and handed to the avatar
//! dispatcher as raw PCM16 bytes.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum CodecError {
    #[error("Invalid transport encoding: {0}")]
    InvalidEncoding(String),
}

/// Encode captured float samples for transmission.
///
/// Samples are clamped to [-1.0, 1.0], scaled to the i16 range, serialized
/// little-endian, and base64-encoded. Deterministic; round-trips within
/// 16-bit quantization error.
pub fn encode_outbound(samples: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        let value = (clamped * i16::MAX as f32) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    BASE64.encode(&bytes)
}

/// Decode inbound synthesized audio to raw PCM16 bytes.
pub fn decode_inbound(transport: &str) -> Result<Vec<u8>, CodecError> {
    BASE64
        .decode(transport)
        .map_err(|e| CodecError::InvalidEncoding(e.to_string()))
}

/// Reinterpret little-endian PCM16 bytes as float samples in [-1.0, 1.0].
///
/// The i16 range is asymmetric, so the result is clamped: -32768 maps to
/// exactly -1.0. A trailing odd byte is ignored.
pub fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| {
            let value = i16::from_le_bytes([pair[0], pair[1]]);
            (value as f32 / i16::MAX as f32).clamp(-1.0, 1.0)
        })
        .collect()
}
