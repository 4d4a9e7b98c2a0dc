//! Raw 16-bit PCM conversion
//!
//! The scalar mapping uses an asymmetric scale (32768 negative, 32767
//! positive) so that -1.0 lands exactly on i16::MIN and +1.0 on i16::MAX.

use bytes::Bytes;

use crate::audio::{resample, DecodedSegment};
use crate::error::CodecError;

/// A headerless buffer of signed 16-bit little-endian mono samples, ready
/// for transmission. Transmission consumes it; it is never retransmitted.
#[derive(Clone)]
pub struct PcmChunk {
    pub data: Bytes,
    pub sample_rate: u32,
}

impl PcmChunk {
    pub fn sample_count(&self) -> usize {
        self.data.len() / 2
    }

    /// Chunk duration in milliseconds
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            0
        } else {
            (self.sample_count() as u64 * 1_000) / self.sample_rate as u64
        }
    }
}

/// `round(clamp(x, -1, 1) * (x < 0 ? 32768 : 32767))`
#[inline]
pub fn sample_to_i16(x: f32) -> i16 {
    let clamped = x.clamp(-1.0, 1.0);
    let scale = if clamped < 0.0 { 32768.0 } else { 32767.0 };
    (clamped * scale).round() as i16
}

#[inline]
pub fn i16_to_sample(v: i16) -> f32 {
    v as f32 / 32768.0
}

/// Resample to the negotiated wire rate and serialize to headerless LE PCM
pub fn encode_chunk(samples: &[f32], input_rate: u32, output_rate: u32) -> PcmChunk {
    let resampled = resample(samples, input_rate, output_rate);
    let mut data = Vec::with_capacity(resampled.len() * 2);
    for &sample in resampled.iter() {
        data.extend_from_slice(&sample_to_i16(sample).to_le_bytes());
    }
    PcmChunk {
        data: Bytes::from(data),
        sample_rate: output_rate,
    }
}

/// Decode a headerless LE PCM payload at the given framing
pub fn decode_raw(payload: &[u8], sample_rate: u32, channels: u16) -> Result<DecodedSegment, CodecError> {
    if payload.len() % 2 != 0 {
        return Err(CodecError::Truncated {
            expected: payload.len() + 1,
            actual: payload.len(),
        });
    }

    let samples = payload
        .chunks_exact(2)
        .map(|pair| i16_to_sample(i16::from_le_bytes([pair[0], pair[1]])))
        .collect();

    Ok(DecodedSegment::new(samples, sample_rate, channels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn extremes_map_to_i16_limits() {
        assert_eq!(sample_to_i16(-1.0), i16::MIN);
        assert_eq!(sample_to_i16(1.0), i16::MAX);
        assert_eq!(sample_to_i16(0.0), 0);
    }

    #[test]
    fn out_of_range_input_is_clamped() {
        assert_eq!(sample_to_i16(-3.5), i16::MIN);
        assert_eq!(sample_to_i16(2.0), i16::MAX);
    }

    #[test]
    fn encode_is_little_endian() {
        // 0.5 * 32767 = 16383.5 -> 16384 = 0x4000
        let chunk = encode_chunk(&[0.5], 16_000, 16_000);
        assert_eq!(chunk.data.as_ref(), &[0x00, 0x40]);
        assert_eq!(chunk.sample_count(), 1);
    }

    #[test]
    fn encode_resamples_to_wire_rate() {
        let samples = vec![0.1_f32; 480]; // 10ms at 48k
        let chunk = encode_chunk(&samples, 48_000, 16_000);
        assert_eq!(chunk.sample_count(), 160);
        assert_eq!(chunk.sample_rate, 16_000);
        assert_eq!(chunk.duration_ms(), 10);
    }

    #[test]
    fn decode_rejects_odd_length() {
        let result = decode_raw(&[0x00, 0x40, 0x7f], 16_000, 1);
        assert!(matches!(result, Err(CodecError::Truncated { .. })));
    }

    proptest! {
        // The asymmetric scale costs up to half a step on top of rounding,
        // so the round-trip lands within 1.5 quantization steps.
        #[test]
        fn roundtrip_within_quantization_error(x in -1.0f32..=1.0) {
            let restored = i16_to_sample(sample_to_i16(x));
            prop_assert!((restored - x).abs() <= 1.5 / 32768.0);
        }

        #[test]
        fn raw_decode_inverts_encode(samples in prop::collection::vec(-1.0f32..=1.0, 0..512)) {
            let chunk = encode_chunk(&samples, 16_000, 16_000);
            let segment = decode_raw(&chunk.data, 16_000, 1).unwrap();
            prop_assert_eq!(segment.samples.len(), samples.len());
            for (a, b) in samples.iter().zip(segment.samples.iter()) {
                prop_assert!((a - b).abs() <= 1.5 / 32768.0);
            }
        }
    }
}
