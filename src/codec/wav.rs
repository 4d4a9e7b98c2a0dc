//! RIFF/WAVE container framing
//!
//! Some deployments wrap each inbound response message in a standard WAV
//! container instead of sending headerless PCM: a 44-byte header with a
//! `fmt ` sub-chunk (channels, sample rate, bit depth) followed by a `data`
//! sub-chunk holding the PCM payload. Only 16-bit integer PCM is accepted.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};

use crate::audio::DecodedSegment;
use crate::codec::pcm::{i16_to_sample, sample_to_i16};
use crate::error::CodecError;

/// Quick check for RIFF/WAVE magic without parsing
pub fn is_wav(payload: &[u8]) -> bool {
    payload.len() >= 12 && &payload[0..4] == b"RIFF" && &payload[8..12] == b"WAVE"
}

/// Parse a WAV message into a playable segment.
///
/// The `fmt ` and `data` sub-chunks may appear after other chunks (such as
/// `LIST`), so sub-chunks are walked rather than assuming fixed offsets.
pub fn parse_wav(payload: &[u8]) -> Result<DecodedSegment, CodecError> {
    if !is_wav(payload) {
        return Err(CodecError::InvalidHeader("missing RIFF/WAVE magic".into()));
    }

    let mut cursor = Cursor::new(&payload[12..]);
    let mut format: Option<(u16, u32, u16)> = None; // channels, rate, bits

    loop {
        let mut id = [0u8; 4];
        if cursor.read_exact(&mut id).is_err() {
            return Err(CodecError::InvalidHeader("no data sub-chunk".into()));
        }
        let size = cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| CodecError::InvalidHeader("truncated sub-chunk size".into()))? as usize;

        match &id {
            b"fmt " => {
                if size < 16 {
                    return Err(CodecError::InvalidHeader("fmt chunk too short".into()));
                }
                let audio_format = cursor
                    .read_u16::<LittleEndian>()
                    .map_err(|_| CodecError::InvalidHeader("truncated fmt chunk".into()))?;
                if audio_format != 1 {
                    return Err(CodecError::UnsupportedFormat(format!(
                        "non-PCM audio format {audio_format}"
                    )));
                }
                let channels = cursor.read_u16::<LittleEndian>().unwrap_or(0);
                let sample_rate = cursor.read_u32::<LittleEndian>().unwrap_or(0);
                let _byte_rate = cursor.read_u32::<LittleEndian>().unwrap_or(0);
                let _block_align = cursor.read_u16::<LittleEndian>().unwrap_or(0);
                let bits = cursor.read_u16::<LittleEndian>().unwrap_or(0);
                if channels == 0 || sample_rate == 0 {
                    return Err(CodecError::InvalidHeader("zero channels or rate".into()));
                }
                if bits != 16 {
                    return Err(CodecError::UnsupportedFormat(format!(
                        "{bits}-bit samples (only 16-bit PCM supported)"
                    )));
                }
                format = Some((channels, sample_rate, bits));
                // Skip any fmt extension bytes
                let consumed = 16;
                cursor.set_position(cursor.position() + (size - consumed) as u64);
            }
            b"data" => {
                let (channels, sample_rate, _) = format.ok_or_else(|| {
                    CodecError::InvalidHeader("data sub-chunk before fmt".into())
                })?;

                let start = 12 + cursor.position() as usize;
                let available = payload.len().saturating_sub(start);
                if available < size {
                    return Err(CodecError::Truncated {
                        expected: size,
                        actual: available,
                    });
                }
                // An odd byte count cannot hold whole 16-bit samples;
                // rejected like the raw-PCM path rather than dropping the
                // trailing byte
                if size % 2 != 0 {
                    return Err(CodecError::Truncated {
                        expected: size + 1,
                        actual: size,
                    });
                }

                let pcm = &payload[start..start + size];
                let samples = pcm
                    .chunks_exact(2)
                    .map(|pair| i16_to_sample(i16::from_le_bytes([pair[0], pair[1]])))
                    .collect();

                return Ok(DecodedSegment::new(samples, sample_rate, channels));
            }
            _ => {
                // Unknown chunk; sizes are word-aligned
                let padded = size + (size & 1);
                cursor.set_position(cursor.position() + padded as u64);
            }
        }
    }
}

/// Write samples into a minimal 44-byte-header WAV buffer
pub fn encode_wav(samples: &[f32], sample_rate: u32, channels: u16) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let byte_rate = sample_rate * channels as u32 * 2;
    let block_align = channels * 2;

    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.write_u32::<LittleEndian>(36 + data_len).unwrap();
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.write_u32::<LittleEndian>(16).unwrap();
    out.write_u16::<LittleEndian>(1).unwrap(); // PCM
    out.write_u16::<LittleEndian>(channels).unwrap();
    out.write_u32::<LittleEndian>(sample_rate).unwrap();
    out.write_u32::<LittleEndian>(byte_rate).unwrap();
    out.write_u16::<LittleEndian>(block_align).unwrap();
    out.write_u16::<LittleEndian>(16).unwrap(); // bits per sample
    out.extend_from_slice(b"data");
    out.write_u32::<LittleEndian>(data_len).unwrap();
    for &sample in samples {
        out.write_i16::<LittleEndian>(sample_to_i16(sample)).unwrap();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_preserves_format_exactly() {
        let samples: Vec<f32> = (0..480).map(|i| (i as f32 / 480.0) - 0.5).collect();
        let wav = encode_wav(&samples, 24_000, 1);
        assert_eq!(wav.len(), 44 + 480 * 2);

        let segment = parse_wav(&wav).unwrap();
        assert_eq!(segment.samples.len(), samples.len());
        assert_eq!(segment.sample_rate, 24_000);
        assert_eq!(segment.channels, 1);
        for (a, b) in samples.iter().zip(segment.samples.iter()) {
            assert!((a - b).abs() <= 1.5 / 32768.0);
        }
    }

    #[test]
    fn stereo_roundtrip() {
        let samples = vec![0.25_f32; 960];
        let wav = encode_wav(&samples, 44_100, 2);
        let segment = parse_wav(&wav).unwrap();
        assert_eq!(segment.channels, 2);
        assert_eq!(segment.sample_rate, 44_100);
        assert_eq!(segment.frame_count(), 480);
    }

    #[test]
    fn rejects_bad_magic() {
        let garbage = vec![0u8; 64];
        assert!(!is_wav(&garbage));
        assert!(matches!(
            parse_wav(&garbage),
            Err(CodecError::InvalidHeader(_))
        ));
    }

    #[test]
    fn rejects_non_pcm_format() {
        let mut wav = encode_wav(&[0.0; 16], 16_000, 1);
        // Patch audio format field (offset 20) to 3 = IEEE float
        wav[20] = 3;
        assert!(matches!(
            parse_wav(&wav),
            Err(CodecError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn rejects_truncated_data_chunk() {
        let mut wav = encode_wav(&[0.1; 100], 16_000, 1);
        wav.truncate(44 + 50);
        assert!(matches!(parse_wav(&wav), Err(CodecError::Truncated { .. })));
    }

    #[test]
    fn rejects_odd_data_chunk_size() {
        let mut wav = encode_wav(&[0.1; 8], 16_000, 1);
        // Declare 15 data bytes (offset 40 holds the data chunk size)
        wav[40..44].copy_from_slice(&15u32.to_le_bytes());
        assert!(matches!(parse_wav(&wav), Err(CodecError::Truncated { .. })));
    }

    #[test]
    fn skips_unknown_chunks_before_data() {
        let samples = vec![0.5_f32; 32];
        let plain = encode_wav(&samples, 16_000, 1);

        // Rebuild with a LIST chunk between fmt and data
        let mut wav = plain[..36].to_vec();
        wav.extend_from_slice(b"LIST");
        wav.extend_from_slice(&6u32.to_le_bytes());
        wav.extend_from_slice(b"INFOab");
        wav.extend_from_slice(&plain[36..]);
        // Fix RIFF size
        let riff_size = (wav.len() - 8) as u32;
        wav[4..8].copy_from_slice(&riff_size.to_le_bytes());

        let segment = parse_wav(&wav).unwrap();
        assert_eq!(segment.samples.len(), 32);
    }
}
