//! WAV file I/O for offline processing

use earshot_core::domain::audio::{f32_to_i16, AudioError, Result};
use std::path::Path;
use tracing::{debug, info};

/// Mono clip read from (or destined for) a WAV file
#[derive(Debug, Clone, PartialEq)]
pub struct WavClip {
    pub sample_rate: u32,
    /// Normalized samples of the first channel
    pub samples: Vec<f32>,
}

impl WavClip {
    pub fn duration_ms(&self) -> u64 {
        self.samples.len() as u64 * 1000 / self.sample_rate.max(1) as u64
    }

    /// 16-bit PCM view of the clip
    pub fn to_i16(&self) -> Vec<i16> {
        self.samples.iter().map(|&s| f32_to_i16(s)).collect()
    }
}

fn wav_error(path: &Path, e: hound::Error) -> AudioError {
    AudioError::Wav(format!("{}: {}", path.display(), e))
}

/// Read the first channel of a PCM or float WAV file
pub fn read_wav_mono(path: &Path) -> Result<WavClip> {
    let reader = hound::WavReader::open(path).map_err(|e| wav_error(path, e))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| wav_error(path, e))?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| wav_error(path, e))?
        }
    };

    let samples: Vec<f32> = interleaved.into_iter().step_by(channels).collect();
    debug!(
        "Read {} samples at {} Hz ({} channels) from {}",
        samples.len(),
        spec.sample_rate,
        channels,
        path.display()
    );

    Ok(WavClip {
        sample_rate: spec.sample_rate,
        samples,
    })
}

/// Write mono 16-bit PCM
pub fn write_wav_i16(path: &Path, sample_rate: u32, samples: &[i16]) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec).map_err(|e| wav_error(path, e))?;
    for &sample in samples {
        writer.write_sample(sample).map_err(|e| wav_error(path, e))?;
    }
    writer.finalize().map_err(|e| wav_error(path, e))?;

    info!("Wrote {} samples to {}", samples.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_then_read_i16() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clip.wav");

        write_wav_i16(&path, 16000, &[0, 16384, -32768, 32767]).unwrap();
        let clip = read_wav_mono(&path).unwrap();

        assert_eq!(clip.sample_rate, 16000);
        assert_eq!(clip.samples.len(), 4);
        assert_eq!(clip.samples[1], 0.5);
        assert_eq!(clip.samples[2], -1.0);
    }

    #[test]
    fn test_stereo_keeps_first_channel() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stereo.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for (left, right) in [(0.25f32, -0.9f32), (0.5, -0.9), (0.75, -0.9)] {
            writer.write_sample(left).unwrap();
            writer.write_sample(right).unwrap();
        }
        writer.finalize().unwrap();

        let clip = read_wav_mono(&path).unwrap();
        assert_eq!(clip.samples, vec![0.25, 0.5, 0.75]);
        assert_eq!(clip.duration_ms(), 0);
    }

    #[test]
    fn test_missing_file_is_wav_error() {
        let dir = TempDir::new().unwrap();
        let err = read_wav_mono(&dir.path().join("absent.wav")).unwrap_err();
        assert!(matches!(err, AudioError::Wav(_)));
    }

    #[test]
    fn test_to_i16() {
        let clip = WavClip {
            sample_rate: 16000,
            samples: vec![0.0, 1.0, -1.0],
        };
        assert_eq!(clip.to_i16(), vec![0, 32767, -32767]);
    }
}
