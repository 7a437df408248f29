// PCM conversion between normalized float samples, 16-bit little-endian
// bytes and the base64 text carried on the wire.
//
// Inbound audio from the live model is headerless PCM, so it is decoded
// by hand here rather than through any container-sniffing decoder.

use base64::Engine;

use crate::error::DecodeError;

/// Microphone audio sent upstream: 16 kHz mono.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Model audio received downstream: 24 kHz mono.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// MIME type attached to every outbound frame.
pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

const SCALE: f32 = 32768.0;

/// Decoded, playable audio (planar f32, one `Vec` per channel)
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Planar samples, normalized to [-1.0, 1.0)
    pub channels: Vec<Vec<f32>>,
}

impl AudioBuffer {
    pub fn number_of_channels(&self) -> usize {
        self.channels.len()
    }

    /// Samples per channel
    pub fn frames(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Average all channels down to one.
    pub fn to_mono(&self) -> Vec<f32> {
        match self.channels.len() {
            0 => Vec::new(),
            1 => self.channels[0].clone(),
            n => (0..self.frames())
                .map(|i| self.channels.iter().map(|ch| ch[i]).sum::<f32>() / n as f32)
                .collect(),
        }
    }
}

/// Convert one float sample to a signed 16-bit value.
///
/// Scales by 32768, truncates toward zero and clamps, so 1.0 maps to
/// 32767 instead of wrapping around to -32768.
pub fn sample_to_i16(sample: f32) -> i16 {
    let scaled = (sample * SCALE) as i32;
    scaled.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// Pack float samples as 16-bit little-endian PCM.
pub fn samples_to_pcm_bytes(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&s| sample_to_i16(s).to_le_bytes())
        .collect()
}

/// Float samples -> 16-bit LE PCM -> base64.
pub fn encode_samples(samples: &[f32]) -> String {
    base64::engine::general_purpose::STANDARD.encode(samples_to_pcm_bytes(samples))
}

/// Inverse of the wire encoding: base64 text -> raw bytes.
pub fn decode_base64(data: &str) -> Result<Vec<u8>, DecodeError> {
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| DecodeError::InvalidBase64(e.to_string()))
}

/// Interpret `bytes` as interleaved signed 16-bit LE PCM with no header.
///
/// Each channel receives `bytes.len() / 2 / channel_count` samples divided
/// by 32768.
pub fn raw_pcm_to_audio_buffer(
    bytes: &[u8],
    sample_rate: u32,
    channel_count: u16,
) -> Result<AudioBuffer, DecodeError> {
    if channel_count == 0 {
        return Err(DecodeError::InvalidFormat("channel count must be at least 1".into()));
    }
    if sample_rate == 0 {
        return Err(DecodeError::InvalidFormat("sample rate must be positive".into()));
    }

    let channels = channel_count as usize;
    let frame_bytes = 2 * channels;
    if bytes.len() % frame_bytes != 0 {
        return Err(DecodeError::MisalignedPcm {
            len: bytes.len(),
            channels: channel_count,
            frame_bytes,
        });
    }

    let frames = bytes.len() / frame_bytes;
    let mut planar: Vec<Vec<f32>> = (0..channels).map(|_| Vec::with_capacity(frames)).collect();

    for (i, pair) in bytes.chunks_exact(2).enumerate() {
        let value = i16::from_le_bytes([pair[0], pair[1]]);
        planar[i % channels].push(value as f32 / SCALE);
    }

    Ok(AudioBuffer {
        sample_rate,
        channels: planar,
    })
}

/// Linear-interpolation resampler for mono audio.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).floor() as usize;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos.floor() as usize;
            let frac = (pos - idx as f64) as f32;
            let a = samples[idx.min(last)];
            let b = samples[(idx + 1).min(last)];
            a + (b - a) * frac
        })
        .collect()
}
