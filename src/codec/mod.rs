//! PCM wire codec
//!
//! Outbound: resample + f32 -> i16 LE, headerless. Inbound: either the same
//! raw framing or a RIFF/WAVE container, detected per message since the two
//! directions are configured independently per deployment.

pub mod pcm;
pub mod wav;

use bytes::Bytes;

use crate::audio::DecodedSegment;
use crate::config::InboundFormat;
use crate::error::CodecError;

pub use pcm::{encode_chunk, i16_to_sample, sample_to_i16, PcmChunk};
pub use wav::{encode_wav, parse_wav};

/// Decode one inbound wire message into a playable segment.
///
/// WAV-wrapped messages carry their own format fields; headerless payloads
/// fall back to the deployment-configured `InboundFormat`.
pub fn decode_message(payload: &Bytes, fallback: &InboundFormat) -> Result<DecodedSegment, CodecError> {
    if wav::is_wav(payload) {
        parse_wav(payload)
    } else {
        pcm::decode_raw(payload, fallback.sample_rate, fallback.channels)
    }
}
