//! Linear PCM16 little-endian codec with base64 transport encoding.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};

/// Errors that can occur while decoding an inbound audio fragment.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The payload is not valid base64.
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    /// PCM16 needs two bytes per sample; the payload was cut mid-sample.
    #[error("truncated PCM16 payload of {0} bytes")]
    Truncated(usize),
    /// The payload decoded to zero samples.
    #[error("empty audio payload")]
    Empty,
}

/// Converts normalized `f32` samples into base64-encoded PCM16 LE.
///
/// Samples are clamped to `[-1.0, 1.0]` before scaling.
pub fn encode_pcm16_base64(samples: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    BASE64.encode(bytes)
}

/// Decodes a base64 PCM16 LE payload into normalized `f32` samples.
pub fn decode_pcm16_base64(data: &str) -> Result<Vec<f32>, DecodeError> {
    let bytes = BASE64.decode(data.trim())?;
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    if bytes.len() % 2 != 0 {
        return Err(DecodeError::Truncated(bytes.len()));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect())
}
