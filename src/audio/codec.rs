//! PCM <-> wire conversion.
//!
//! Outbound: f32 samples in [-1, 1] -> i16 little-endian -> base64.
//! Inbound: base64 -> i16 little-endian -> de-interleaved f32 channels.
//!
//! Out-of-range input samples are clamped to [-1, 1] before quantisation and
//! NaN is encoded as silence.

use base64::Engine;

use crate::error::DecodeError;

/// Microphone audio sent to the realtime endpoint (16kHz mono).
pub const OUTBOUND_SAMPLE_RATE: u32 = 16_000;

/// Model speech received from the realtime endpoint (24kHz mono).
pub const INBOUND_SAMPLE_RATE: u32 = 24_000;

const PCM16_SCALE: f32 = 32768.0;
const BYTES_PER_SAMPLE: usize = 2;

/// One encoded outbound payload plus its declared rate tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedAudio {
    /// Base64 of 16-bit signed little-endian samples
    pub data: String,
    /// e.g. `audio/pcm;rate=16000`
    pub mime_type: String,
}

impl EncodedAudio {
    pub fn byte_len(&self) -> usize {
        // Padding-aware length of the decoded payload
        let pad = self.data.bytes().rev().take_while(|b| *b == b'=').count();
        ((self.data.len() / 4) * 3).saturating_sub(pad)
    }
}

/// Decoded, playable audio at a fixed sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// One sample vector per channel, all the same length
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        Self {
            channels,
            sample_rate,
        }
    }

    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self::new(vec![samples], sample_rate)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// Samples per channel.
    pub fn frame_count(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / self.sample_rate as f64
    }
}

pub fn mime_type_for_rate(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// Quantise float samples to 16-bit PCM.
pub fn float_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            let scaled = (s.clamp(-1.0, 1.0) * PCM16_SCALE).round();
            // `as` saturates and maps NaN to 0
            scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16
        })
        .collect()
}

pub fn pcm16_to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / PCM16_SCALE).collect()
}

/// Encode a microphone frame for the wire at the outbound rate.
pub fn encode_outbound(samples: &[f32]) -> EncodedAudio {
    let pcm_bytes: Vec<u8> = float_to_pcm16(samples)
        .iter()
        .flat_map(|s| s.to_le_bytes())
        .collect();

    EncodedAudio {
        data: base64::engine::general_purpose::STANDARD.encode(&pcm_bytes),
        mime_type: mime_type_for_rate(OUTBOUND_SAMPLE_RATE),
    }
}

/// Decode a base64 inbound payload into a playable buffer.
pub fn decode_inbound(
    payload: &str,
    sample_rate: u32,
    channels: u16,
) -> Result<AudioBuffer, DecodeError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| DecodeError::InvalidBase64(e.to_string()))?;

    decode_pcm_bytes(&bytes, sample_rate, channels)
}

/// Reinterpret interleaved 16-bit little-endian PCM bytes as a buffer.
pub fn decode_pcm_bytes(
    bytes: &[u8],
    sample_rate: u32,
    channels: u16,
) -> Result<AudioBuffer, DecodeError> {
    if channels == 0 {
        return Err(DecodeError::ZeroChannels);
    }
    if sample_rate == 0 {
        return Err(DecodeError::ZeroSampleRate);
    }

    let channel_count = channels as usize;
    let frame_bytes = BYTES_PER_SAMPLE * channel_count;
    if bytes.len() % frame_bytes != 0 {
        return Err(DecodeError::MisalignedLength {
            len: bytes.len(),
            frame_bytes,
        });
    }

    let frames = bytes.len() / frame_bytes;
    let mut planes: Vec<Vec<f32>> = (0..channel_count)
        .map(|_| Vec::with_capacity(frames))
        .collect();

    for (i, chunk) in bytes.chunks_exact(BYTES_PER_SAMPLE).enumerate() {
        let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
        planes[i % channel_count].push(sample as f32 / PCM16_SCALE);
    }

    Ok(AudioBuffer::new(planes, sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_to_pcm16_clamps_out_of_range() {
        let pcm = float_to_pcm16(&[2.0, -2.0, 1.0, -1.0, 0.0]);
        assert_eq!(pcm, vec![i16::MAX, i16::MIN, i16::MAX, i16::MIN, 0]);
    }

    #[test]
    fn test_nan_encodes_as_silence() {
        assert_eq!(float_to_pcm16(&[f32::NAN]), vec![0]);
    }

    #[test]
    fn test_outbound_mime_type() {
        let encoded = encode_outbound(&[0.0; 4]);
        assert_eq!(encoded.mime_type, "audio/pcm;rate=16000");
        assert_eq!(encoded.byte_len(), 8);
    }

    #[test]
    fn test_decode_stereo_deinterleaves() {
        let pcm: Vec<i16> = vec![16384, -16384, 8192, -8192];
        let bytes: Vec<u8> = pcm.iter().flat_map(|s| s.to_le_bytes()).collect();

        let buffer = decode_pcm_bytes(&bytes, INBOUND_SAMPLE_RATE, 2).unwrap();

        assert_eq!(buffer.channel_count(), 2);
        assert_eq!(buffer.frame_count(), 2);
        assert_eq!(buffer.channel(0).unwrap(), &[0.5, 0.25]);
        assert_eq!(buffer.channel(1).unwrap(), &[-0.5, -0.25]);
    }

    #[test]
    fn test_decode_rejects_odd_length() {
        let err = decode_pcm_bytes(&[0, 1, 2], INBOUND_SAMPLE_RATE, 1).unwrap_err();
        assert_eq!(
            err,
            DecodeError::MisalignedLength {
                len: 3,
                frame_bytes: 2
            }
        );
    }

    #[test]
    fn test_decode_rejects_partial_stereo_frame() {
        let err = decode_pcm_bytes(&[0, 0, 0, 0, 0, 0], INBOUND_SAMPLE_RATE, 2).unwrap_err();
        assert!(matches!(err, DecodeError::MisalignedLength { frame_bytes: 4, .. }));
    }

    #[test]
    fn test_duration_at_inbound_rate() {
        let buffer = AudioBuffer::mono(vec![0.0; 12_000], INBOUND_SAMPLE_RATE);
        assert!((buffer.duration() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_byte_len_of_malformed_padding() {
        let audio = EncodedAudio {
            data: "=".to_string(),
            mime_type: mime_type_for_rate(OUTBOUND_SAMPLE_RATE),
        };
        assert_eq!(audio.byte_len(), 0);
    }
}
