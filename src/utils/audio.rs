//! PCM16 audio helpers for the realtime protocol.
//!
//! Audio travels as base64-encoded, little-endian, 16-bit signed mono PCM at
//! [`OPENAI_REALTIME_SAMPLE_RATE`]. Every millisecond/sample conversion in the
//! crate goes through this module so the rounding stays consistent (floor).

use base64::prelude::*;
use thiserror::Error;

use crate::core::realtime::openai::OPENAI_REALTIME_SAMPLE_RATE;

/// Failures decoding audio received on the wire.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AudioError {
    #[error("Invalid base64 audio: {0}")]
    InvalidBase64(String),

    #[error("PCM16 payload has odd byte length {0}")]
    OddByteLength(usize),
}

/// Encode PCM16 samples as base64 little-endian bytes.
pub fn encode_pcm16(samples: &[i16]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    BASE64_STANDARD.encode(bytes)
}

/// Decode base64 little-endian bytes into PCM16 samples.
pub fn decode_pcm16(encoded: &str) -> Result<Vec<i16>, AudioError> {
    let bytes = BASE64_STANDARD
        .decode(encoded)
        .map_err(|e| AudioError::InvalidBase64(e.to_string()))?;
    if bytes.len() % 2 != 0 {
        return Err(AudioError::OddByteLength(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Convert normalised float samples (-1.0..=1.0) to PCM16, clamping overflow.
pub fn pcm16_from_f32(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|s| {
            let clamped = s.clamp(-1.0, 1.0);
            if clamped < 0.0 {
                (clamped * 32768.0) as i16
            } else {
                (clamped * 32767.0) as i16
            }
        })
        .collect()
}

/// Concatenate two sample buffers.
pub fn merge_samples(left: &[i16], right: &[i16]) -> Vec<i16> {
    let mut merged = Vec::with_capacity(left.len() + right.len());
    merged.extend_from_slice(left);
    merged.extend_from_slice(right);
    merged
}

/// Number of samples covering `ms` milliseconds, saturating on overflow.
#[inline]
pub fn samples_for_ms(ms: u64) -> usize {
    usize::try_from(ms.saturating_mul(OPENAI_REALTIME_SAMPLE_RATE as u64) / 1000)
        .unwrap_or(usize::MAX)
}

/// Duration in milliseconds covered by `samples` samples, saturating on overflow.
#[inline]
pub fn ms_for_samples(samples: usize) -> u64 {
    u64::try_from(samples)
        .unwrap_or(u64::MAX)
        .saturating_mul(1000)
        / OPENAI_REALTIME_SAMPLE_RATE as u64
}

/// The `[start_ms, end_ms)` window of `samples`, clamped to the buffer.
pub fn slice_ms(samples: &[i16], start_ms: u64, end_ms: u64) -> &[i16] {
    let end = samples_for_ms(end_ms).min(samples.len());
    let start = samples_for_ms(start_ms).min(end);
    &samples[start..end]
}
