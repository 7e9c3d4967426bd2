//! PCM16 wire codec.
//!
//! Capture frames travel as little-endian signed 16-bit samples wrapped in
//! standard base64; server audio comes back the same way at the output rate.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use voxlive_core::{AudioFormat, AudioFrame, CodecError, DecodedAudioBuffer, EncodedChunk};

const SAMPLE_BYTES: usize = 2;
const FULL_SCALE: f32 = 32768.0;

/// Convert one float sample to i16, saturating at the rails.
pub fn to_pcm16(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    (sample * FULL_SCALE).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

pub fn encode_frame(frame: &AudioFrame) -> EncodedChunk {
    let mut data = Vec::with_capacity(frame.samples.len() * SAMPLE_BYTES);
    for &sample in &frame.samples {
        data.extend_from_slice(&to_pcm16(sample).to_le_bytes());
    }
    EncodedChunk {
        data,
        format: AudioFormat::mono(frame.sample_rate),
    }
}

pub fn decode_chunk(chunk: &EncodedChunk) -> Result<DecodedAudioBuffer, CodecError> {
    if chunk.format.sample_rate == 0 {
        return Err(CodecError::InvalidFormat {
            sample_rate: chunk.format.sample_rate,
            channels: chunk.format.channels,
        });
    }
    let channels = chunk.format.channels as usize;
    let frame_bytes = SAMPLE_BYTES * channels;
    if channels == 0 || chunk.data.len() % frame_bytes != 0 {
        return Err(CodecError::MalformedAudio {
            bytes: chunk.data.len(),
            frame_bytes,
        });
    }

    let frames = chunk.data.len() / frame_bytes;
    let mut planes = vec![Vec::with_capacity(frames); channels];
    for frame in chunk.data.chunks_exact(frame_bytes) {
        for (plane, sample) in planes.iter_mut().zip(frame.chunks_exact(SAMPLE_BYTES)) {
            let value = i16::from_le_bytes([sample[0], sample[1]]);
            plane.push(value as f32 / FULL_SCALE);
        }
    }

    Ok(DecodedAudioBuffer {
        channels: planes,
        sample_rate: chunk.format.sample_rate,
    })
}

pub fn to_wire(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn from_wire(text: &str) -> Result<Vec<u8>, CodecError> {
    STANDARD
        .decode(text)
        .map_err(|e| CodecError::InvalidEncoding(e.to_string()))
}
