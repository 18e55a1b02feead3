//! Immutable audio buffers handed over by the speech provider

use crate::error::AnimError;
use std::io::Cursor;
use std::sync::Arc;

/// Longest buffer accepted (10 minutes)
const MAX_BUFFER_SECONDS: f64 = 600.0;

/// Interleaved `f32` samples in `[-1, 1]`. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    samples: Arc<[f32]>,
    sample_rate: u32,
    channels: u16,
}

impl AudioBuffer {
    /// Build a buffer from interleaved samples
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Result<Self, AnimError> {
        if samples.is_empty() {
            return Err(AnimError::InvalidAudio("Empty audio buffer".to_string()));
        }
        if sample_rate == 0 {
            return Err(AnimError::InvalidAudio("Sample rate cannot be 0".to_string()));
        }
        if channels == 0 {
            return Err(AnimError::InvalidAudio("Channel count cannot be 0".to_string()));
        }
        if samples.len() % channels as usize != 0 {
            return Err(AnimError::InvalidAudio(format!(
                "Sample count {} is not a multiple of channel count {}",
                samples.len(),
                channels
            )));
        }

        let duration = (samples.len() / channels as usize) as f64 / sample_rate as f64;
        if duration > MAX_BUFFER_SECONDS {
            return Err(AnimError::InvalidAudio(format!(
                "Audio too long: {:.1}s (max {}s)",
                duration, MAX_BUFFER_SECONDS
            )));
        }

        Ok(Self {
            samples: samples.into(),
            sample_rate,
            channels,
        })
    }

    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Result<Self, AnimError> {
        Self::new(samples, sample_rate, 1)
    }

    /// Decode a RIFF/WAVE file (integer PCM up to 32 bits, or 32-bit float)
    pub fn from_wav_bytes(data: &[u8]) -> Result<Self, AnimError> {
        if data.is_empty() {
            return Err(AnimError::InvalidAudio("Empty WAV data".to_string()));
        }

        let reader = hound::WavReader::new(Cursor::new(data))
            .map_err(|e| AnimError::InvalidAudio(format!("Failed to read WAV header: {}", e)))?;
        let spec = reader.spec();

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<_, _>>()
                .map_err(|e| AnimError::InvalidAudio(format!("Corrupt WAV data: {}", e)))?,
            hound::SampleFormat::Int => {
                if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                    return Err(AnimError::InvalidAudio(format!(
                        "Unsupported bit depth: {}",
                        spec.bits_per_sample
                    )));
                }
                let scale = 1.0 / (1u64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 * scale))
                    .collect::<Result<_, _>>()
                    .map_err(|e| AnimError::InvalidAudio(format!("Corrupt WAV data: {}", e)))?
            }
        };

        Self::new(samples, spec.sample_rate, spec.channels)
    }

    /// Raw little-endian signed 16-bit PCM
    pub fn from_pcm16_le(data: &[u8], sample_rate: u32, channels: u16) -> Result<Self, AnimError> {
        if data.len() % 2 != 0 {
            return Err(AnimError::InvalidAudio(format!(
                "Invalid PCM16 data length: {} bytes (must be a multiple of 2)",
                data.len()
            )));
        }

        let samples = data
            .chunks_exact(2)
            .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]) as f32 / 32768.0)
            .collect();

        Self::new(samples, sample_rate, channels)
    }

    /// Raw little-endian 32-bit float PCM
    pub fn from_f32_le(data: &[u8], sample_rate: u32, channels: u16) -> Result<Self, AnimError> {
        if data.len() % 4 != 0 {
            return Err(AnimError::InvalidAudio(format!(
                "Invalid audio data length: {} bytes (must be a multiple of 4)",
                data.len()
            )));
        }

        let samples = data
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        Self::new(samples, sample_rate, channels)
    }

    /// Join buffers that share sample rate and channel layout
    pub fn concat(buffers: &[AudioBuffer]) -> Result<Self, AnimError> {
        let first = buffers
            .first()
            .ok_or_else(|| AnimError::InvalidAudio("No buffers to concatenate".to_string()))?;

        let mut samples = Vec::with_capacity(buffers.iter().map(|b| b.samples.len()).sum());
        for buffer in buffers {
            if buffer.sample_rate != first.sample_rate || buffer.channels != first.channels {
                return Err(AnimError::InvalidAudio(format!(
                    "Cannot concatenate {}Hz/{}ch with {}Hz/{}ch audio",
                    buffer.sample_rate, buffer.channels, first.sample_rate, first.channels
                )));
            }
            samples.extend_from_slice(&buffer.samples);
        }

        Self::new(samples, first.sample_rate, first.channels)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of frames (samples per channel)
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Channel-averaged value of one frame
    pub(crate) fn frame_mean(&self, frame: usize) -> f64 {
        let channels = self.channels as usize;
        let start = frame * channels;
        let sum: f64 = self.samples[start..start + channels]
            .iter()
            .map(|&s| s as f64)
            .sum();
        sum / channels as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(spec: hound::WavSpec, samples: &[i16]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &s in samples {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_empty_buffer_rejected() {
        let result = AudioBuffer::mono(Vec::new(), 44_100);
        assert!(matches!(result, Err(AnimError::InvalidAudio(_))));
    }

    #[test]
    fn test_zero_rate_and_channels_rejected() {
        assert!(AudioBuffer::new(vec![0.0; 10], 0, 1).is_err());
        assert!(AudioBuffer::new(vec![0.0; 10], 16_000, 0).is_err());
        assert!(AudioBuffer::new(vec![0.0; 9], 16_000, 2).is_err());
    }

    #[test]
    fn test_duration_is_derived_from_frames() {
        let buffer = AudioBuffer::new(vec![0.0; 88_200], 44_100, 2).unwrap();
        assert_eq!(buffer.frames(), 44_100);
        assert!((buffer.duration() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_decode_pcm16_wav() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let bytes = wav_bytes(spec, &[0, 16_384, -16_384, 32_767]);

        let buffer = AudioBuffer::from_wav_bytes(&bytes).unwrap();
        assert_eq!(buffer.sample_rate(), 16_000);
        assert_eq!(buffer.frames(), 4);
        assert!((buffer.samples()[1] - 0.5).abs() < 1e-6);
        assert!((buffer.samples()[2] + 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_corrupt_wav_is_invalid_audio() {
        let result = AudioBuffer::from_wav_bytes(b"RIFF\x00\x00not a wav");
        assert!(matches!(result, Err(AnimError::InvalidAudio(_))));
    }

    #[test]
    fn test_raw_pcm_decoders() {
        let pcm16 = [0x00u8, 0x40, 0x00, 0xC0];
        let buffer = AudioBuffer::from_pcm16_le(&pcm16, 8_000, 1).unwrap();
        assert_eq!(buffer.samples(), &[0.5, -0.5]);

        let float_bytes: Vec<u8> = [0.25f32, -0.75].iter().flat_map(|v| v.to_le_bytes()).collect();
        let buffer = AudioBuffer::from_f32_le(&float_bytes, 8_000, 1).unwrap();
        assert_eq!(buffer.samples(), &[0.25, -0.75]);

        assert!(AudioBuffer::from_pcm16_le(&[0x00], 8_000, 1).is_err());
        assert!(AudioBuffer::from_f32_le(&[0x00, 0x01, 0x02], 8_000, 1).is_err());
    }

    #[test]
    fn test_concat_checks_layout() {
        let a = AudioBuffer::mono(vec![0.1; 100], 16_000).unwrap();
        let b = AudioBuffer::mono(vec![0.2; 50], 16_000).unwrap();
        let joined = AudioBuffer::concat(&[a.clone(), b]).unwrap();
        assert_eq!(joined.frames(), 150);

        let stereo = AudioBuffer::new(vec![0.0; 100], 16_000, 2).unwrap();
        assert!(AudioBuffer::concat(&[a, stereo]).is_err());
        assert!(AudioBuffer::concat(&[]).is_err());
    }
}
