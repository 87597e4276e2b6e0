//! # Inbound Audio Payloads
//!
//! The remote agent does not promise a single audio encoding. A segment can arrive as:
//! - a raw byte buffer: a RIFF/WAV container, or bare 16-bit little-endian PCM
//! - a typed sample buffer with an optional sample rate
//! - a generic JSON numeric array: floats in [-1, 1] or 16-bit integer PCM values
//!
//! Everything is normalized here into [`DecodedAudio`] (mono `f32` in [-1, 1]) before
//! it reaches the output device. Shapes we do not recognize are rejected, never guessed.
//!
//! ## Conversion rules:
//! - **8-bit PCM**: unsigned, `(s - 128) / 128`
//! - **16-bit PCM**: `s / 32768`
//! - **24-bit PCM**: `s / 8388608`
//! - **32-bit float**: used as-is
//! - Multi-channel WAV is downmixed to mono by averaging each frame
//!
//! ## Float samples:
//! Float input (sample buffers, float JSON arrays, float WAV) may overshoot full scale
//! slightly after encoding; anything within [`FLOAT_HEADROOM`] is clipped to [-1, 1].
//! Larger magnitudes mean the producer did not normalize, and the segment is rejected.

use crate::error::SessionError;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

const PCM16_SCALE: f32 = 32768.0;
const PCM24_SCALE: f32 = 8_388_608.0;

/// Largest float magnitude still treated as a clipped sample rather than garbage.
pub const FLOAT_HEADROOM: f32 = 2.0;

/// One inbound audio segment as it came off the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundAudioPayload {
    /// WAV container or bare PCM16 LE
    Bytes(Vec<u8>),
    /// Already-normalized samples, optionally with their rate
    Samples {
        samples: Vec<f32>,
        sample_rate: Option<u32>,
    },
    /// JSON array whose element type is only known after inspection
    Numeric(Vec<serde_json::Value>),
    /// Description of a shape that matched none of the above
    Unrecognized(String),
}

impl InboundAudioPayload {
    /// Short name of the shape, for logs.
    pub fn shape(&self) -> &'static str {
        match self {
            InboundAudioPayload::Bytes(_) => "bytes",
            InboundAudioPayload::Samples { .. } => "samples",
            InboundAudioPayload::Numeric(_) => "numeric",
            InboundAudioPayload::Unrecognized(_) => "unrecognized",
        }
    }
}

/// Mono samples ready for the output device.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

impl DecodedAudio {
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.samples.len() as u64 * 1000) / self.sample_rate as u64
    }
}

/// Normalize one payload.
///
/// ## Parameters:
/// - **payload**: the segment as received
/// - **fallback_rate**: rate assumed when the payload does not carry one
///
/// ## Returns:
/// - **Ok(DecodedAudio)**: non-empty mono samples
/// - **Err(SessionError)**: a recoverable decode error; the segment should be dropped
pub fn decode(payload: &InboundAudioPayload, fallback_rate: u32) -> Result<DecodedAudio, SessionError> {
    let decoded = match payload {
        InboundAudioPayload::Bytes(bytes) => {
            if bytes.starts_with(b"RIFF") {
                decode_wav(bytes)?
            } else {
                DecodedAudio {
                    sample_rate: fallback_rate,
                    samples: decode_pcm16(bytes)?,
                }
            }
        }
        InboundAudioPayload::Samples { samples, sample_rate } => DecodedAudio {
            sample_rate: sample_rate.unwrap_or(fallback_rate),
            samples: clip_floats(samples.iter().copied())?,
        },
        InboundAudioPayload::Numeric(values) => DecodedAudio {
            sample_rate: fallback_rate,
            samples: decode_numeric(values)?,
        },
        InboundAudioPayload::Unrecognized(description) => {
            return Err(SessionError::decode(format!("Unrecognized audio payload: {}", description)));
        }
    };

    if decoded.samples.is_empty() {
        return Err(SessionError::decode("Audio payload contains no samples"));
    }
    if decoded.sample_rate == 0 {
        return Err(SessionError::decode("Audio payload declares a zero sample rate"));
    }

    Ok(decoded)
}

/// Decode bare 16-bit little-endian PCM.
///
/// Odd byte counts are rejected: the last sample would be half a sample.
fn decode_pcm16(bytes: &[u8]) -> Result<Vec<f32>, SessionError> {
    if bytes.len() % 2 != 0 {
        return Err(SessionError::decode(format!(
            "PCM16 payload length must be even, got {} bytes",
            bytes.len()
        )));
    }

    let mut cursor = Cursor::new(bytes);
    let mut samples = Vec::with_capacity(bytes.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample as f32 / PCM16_SCALE);
    }
    Ok(samples)
}

/// Decode a RIFF/WAV container with the `wav` crate, then downmix.
fn decode_wav(bytes: &[u8]) -> Result<DecodedAudio, SessionError> {
    let mut cursor = Cursor::new(bytes);
    let (header, data) =
        wav::read(&mut cursor).map_err(|e| SessionError::decode(format!("Invalid WAV container: {}", e)))?;

    let interleaved: Vec<f32> = match data {
        wav::BitDepth::Eight(samples) => samples.iter().map(|&s| (s as f32 - 128.0) / 128.0).collect(),
        wav::BitDepth::Sixteen(samples) => samples.iter().map(|&s| s as f32 / PCM16_SCALE).collect(),
        wav::BitDepth::TwentyFour(samples) => samples.iter().map(|&s| s as f32 / PCM24_SCALE).collect(),
        wav::BitDepth::ThirtyTwoFloat(samples) => clip_floats(samples)?,
        wav::BitDepth::Empty => return Err(SessionError::decode("WAV container has no sample data")),
    };

    let channels = header.channel_count.max(1) as usize;
    Ok(DecodedAudio {
        sample_rate: header.sampling_rate,
        samples: downmix(&interleaved, channels),
    })
}

/// Clip float samples into [-1, 1]. Non-finite values, or values beyond the headroom,
/// reject the whole segment.
fn clip_floats(samples: impl IntoIterator<Item = f32>) -> Result<Vec<f32>, SessionError> {
    samples
        .into_iter()
        .map(|s| {
            if !s.is_finite() {
                Err(SessionError::decode(format!("Sample buffer contains non-finite value {}", s)))
            } else if s.abs() > FLOAT_HEADROOM {
                Err(SessionError::decode(format!("Float sample {} is not normalized audio", s)))
            } else {
                Ok(s.clamp(-1.0, 1.0))
            }
        })
        .collect()
}

/// Decode a JSON numeric array.
///
/// The JSON number type decides the format, never the magnitude: an array of integers
/// only is 16-bit PCM, anything containing a fractional number is float samples. A
/// single out-of-range element rejects the whole payload.
fn decode_numeric(values: &[serde_json::Value]) -> Result<Vec<f32>, SessionError> {
    if let Some(index) = values.iter().position(|v| !v.is_number()) {
        return Err(SessionError::decode(format!("Element {} of numeric payload is not a number", index)));
    }

    let integer_pcm = values.iter().all(|v| v.is_i64() || v.is_u64());
    if integer_pcm {
        return values
            .iter()
            .map(|v| match v.as_i64() {
                Some(s) if (i16::MIN as i64..=i16::MAX as i64).contains(&s) => Ok(s as f32 / PCM16_SCALE),
                _ => Err(SessionError::decode(format!("Value {} is outside the 16-bit PCM range", v))),
            })
            .collect();
    }

    clip_floats(values.iter().filter_map(|v| v.as_f64()).map(|v| v as f32))
}

/// Average interleaved channels into one. A trailing partial frame is dropped.
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Linear resampling between two rates. Good enough for speech playback.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).round().max(1.0) as usize;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let position = i as f64 * ratio;
            let index = (position.floor() as usize).min(last);
            let next = (index + 1).min(last);
            let fraction = (position - index as f64) as f32;
            samples[index] + (samples[next] - samples[index]) * fraction
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wav_bytes(channels: u16, rate: u32, track: wav::BitDepth) -> Vec<u8> {
        let bits = match &track {
            wav::BitDepth::Eight(_) => 8,
            wav::BitDepth::Sixteen(_) => 16,
            wav::BitDepth::TwentyFour(_) => 24,
            _ => 32,
        };
        let format = if bits == 32 { wav::WAV_FORMAT_IEEE_FLOAT } else { wav::WAV_FORMAT_PCM };
        let header = wav::Header::new(format, channels, rate, bits);
        let mut out = Cursor::new(Vec::new());
        wav::write(header, &track, &mut out).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_bare_pcm16_uses_fallback_rate() {
        let mut bytes = Vec::new();
        for sample in [0i16, 16384, -16384, -32768] {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        let decoded = decode(&InboundAudioPayload::Bytes(bytes), 24000).unwrap();
        assert_eq!(decoded.sample_rate, 24000);
        assert_eq!(decoded.samples, vec![0.0, 0.5, -0.5, -1.0]);
    }

    #[test]
    fn test_odd_length_pcm_is_rejected() {
        let err = decode(&InboundAudioPayload::Bytes(vec![0u8; 5]), 24000).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Decode);
        assert!(err.recoverable);
    }

    #[test]
    fn test_empty_bytes_are_rejected() {
        assert!(decode(&InboundAudioPayload::Bytes(Vec::new()), 24000).is_err());
    }

    #[test]
    fn test_stereo_wav_is_downmixed_and_keeps_its_rate() {
        let bytes = wav_bytes(2, 16000, wav::BitDepth::Sixteen(vec![16384, 0, -16384, -16384]));
        let decoded = decode(&InboundAudioPayload::Bytes(bytes), 24000).unwrap();
        assert_eq!(decoded.sample_rate, 16000);
        assert_eq!(decoded.samples, vec![0.25, -0.5]);
    }

    #[test]
    fn test_eight_bit_wav() {
        let bytes = wav_bytes(1, 8000, wav::BitDepth::Eight(vec![128, 192, 64]));
        let decoded = decode(&InboundAudioPayload::Bytes(bytes), 24000).unwrap();
        assert_eq!(decoded.samples, vec![0.0, 0.5, -0.5]);
    }

    #[test]
    fn test_truncated_wav_is_rejected() {
        let mut bytes = wav_bytes(1, 8000, wav::BitDepth::Sixteen(vec![1, 2, 3]));
        bytes.truncate(20);
        assert!(decode(&InboundAudioPayload::Bytes(bytes), 24000).is_err());
    }

    #[test]
    fn test_sample_buffer_with_and_without_rate() {
        let with_rate = InboundAudioPayload::Samples { samples: vec![0.1, -0.1], sample_rate: Some(48000) };
        assert_eq!(decode(&with_rate, 24000).unwrap().sample_rate, 48000);

        let without = InboundAudioPayload::Samples { samples: vec![0.1], sample_rate: None };
        assert_eq!(decode(&without, 24000).unwrap().sample_rate, 24000);

        let nan = InboundAudioPayload::Samples { samples: vec![f32::NAN], sample_rate: None };
        assert!(decode(&nan, 24000).is_err());
    }

    #[test]
    fn test_numeric_float_and_integer_arrays() {
        let floats = InboundAudioPayload::Numeric(vec![json!(0.5), json!(-1.0), json!(0)]);
        assert_eq!(decode(&floats, 24000).unwrap().samples, vec![0.5, -1.0, 0.0]);

        let ints = InboundAudioPayload::Numeric(vec![json!(16384), json!(-32768), json!(0)]);
        assert_eq!(decode(&ints, 24000).unwrap().samples, vec![0.5, -1.0, 0.0]);
    }

    #[test]
    fn test_clipped_float_array_stays_float() {
        // One slightly clipped sample must not turn the whole array into integer PCM
        let clipped = InboundAudioPayload::Numeric(vec![json!(0.5), json!(-0.5), json!(1.01)]);
        assert_eq!(decode(&clipped, 24000).unwrap().samples, vec![0.5, -0.5, 1.0]);

        let unnormalized = InboundAudioPayload::Numeric(vec![json!(0.5), json!(1200.5)]);
        assert!(decode(&unnormalized, 24000).is_err());
    }

    #[test]
    fn test_integer_array_is_pcm16_even_when_small() {
        let quiet = InboundAudioPayload::Numeric(vec![json!(1), json!(0), json!(-1)]);
        let decoded = decode(&quiet, 24000).unwrap();
        assert_eq!(decoded.samples, vec![1.0 / 32768.0, 0.0, -1.0 / 32768.0]);
    }

    #[test]
    fn test_sample_buffer_is_range_checked() {
        let loud = InboundAudioPayload::Samples { samples: vec![40000.0, -40000.0], sample_rate: Some(16000) };
        let err = decode(&loud, 24000).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Decode);

        let overshoot = InboundAudioPayload::Samples { samples: vec![1.2, -1.5, 0.25], sample_rate: Some(16000) };
        assert_eq!(decode(&overshoot, 24000).unwrap().samples, vec![1.0, -1.0, 0.25]);
    }

    #[test]
    fn test_numeric_array_rejects_garbage() {
        let out_of_range = InboundAudioPayload::Numeric(vec![json!(40000)]);
        assert!(decode(&out_of_range, 24000).is_err());

        let not_numbers = InboundAudioPayload::Numeric(vec![json!(0.1), json!("loud")]);
        assert!(decode(&not_numbers, 24000).is_err());
    }

    #[test]
    fn test_unrecognized_is_never_guessed() {
        let payload = InboundAudioPayload::Unrecognized("boolean".to_string());
        let err = decode(&payload, 24000).unwrap_err();
        assert!(err.message.contains("boolean"));
    }

    #[test]
    fn test_resample_linear() {
        let up = resample_linear(&[0.0, 1.0], 1, 2);
        assert_eq!(up.len(), 4);
        assert_eq!(up[0], 0.0);
        assert_eq!(up[1], 0.5);

        let same = resample_linear(&[0.3, 0.4], 24000, 24000);
        assert_eq!(same, vec![0.3, 0.4]);

        let down = resample_linear(&[0.0; 48], 48000, 16000);
        assert_eq!(down.len(), 16);
    }
}
