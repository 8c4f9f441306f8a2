//! Deterministic sample source over recorded audio.
//!
//! Used for offline runs (`hark listen --replay file.wav`) and throughout the
//! tests. Chunks are cut from the buffer in order; a trailing remainder
//! shorter than `chunk_size` is never returned.

use std::path::Path;

use tracing::info;

use super::SampleSource;
use crate::buffering::chunk::SampleChunk;
use crate::error::{HarkError, Result};

pub struct ReplaySource {
    samples: Vec<i16>,
    position: usize,
    sample_rate: u32,
    chunk_size: usize,
    closed: bool,
}

impl ReplaySource {
    pub fn from_samples(samples: Vec<i16>, sample_rate: u32, chunk_size: usize) -> Self {
        Self {
            samples,
            position: 0,
            sample_rate,
            chunk_size,
            closed: false,
        }
    }

    /// Open a mono 16-bit PCM WAV file recorded at `sample_rate`.
    ///
    /// # Errors
    /// `Wav` if the file cannot be read, `Config` if its format differs from
    /// what the pipeline is configured for.
    pub fn from_wav(path: &Path, sample_rate: u32, chunk_size: usize) -> Result<Self> {
        let (samples, file_rate) = read_wav_mono16(path)?;
        if file_rate != sample_rate {
            return Err(HarkError::config(format!(
                "{} is recorded at {file_rate} Hz, pipeline expects {sample_rate} Hz",
                path.display()
            )));
        }
        info!(
            path = %path.display(),
            samples = samples.len(),
            "replaying WAV file"
        );
        Ok(Self::from_samples(samples, sample_rate, chunk_size))
    }

    /// Samples not yet returned by `read`.
    pub fn remaining(&self) -> usize {
        self.samples.len() - self.position
    }
}

impl SampleSource for ReplaySource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn read(&mut self) -> Result<SampleChunk> {
        if self.closed {
            return Err(HarkError::AudioDevice("source is closed".into()));
        }
        let end = self.position + self.chunk_size;
        if self.chunk_size == 0 || end > self.samples.len() {
            return Err(HarkError::SourceExhausted);
        }
        let chunk = self.samples[self.position..end].to_vec();
        self.position = end;
        Ok(SampleChunk::new(chunk, self.sample_rate))
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Read a mono 16-bit integer PCM WAV file, returning samples and rate.
pub fn read_wav_mono16(path: &Path) -> Result<(Vec<i16>, u32)> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    if spec.channels != 1
        || spec.bits_per_sample != 16
        || spec.sample_format != hound::SampleFormat::Int
    {
        return Err(HarkError::config(format!(
            "{} must be mono 16-bit PCM (found {} channel(s), {}-bit {:?})",
            path.display(),
            spec.channels,
            spec.bits_per_sample,
            spec.sample_format
        )));
    }
    let samples = reader
        .samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok((samples, spec.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, spec: hound::WavSpec, samples: &[i16]) {
        let mut writer = hound::WavWriter::create(path, spec).expect("create wav");
        for &s in samples {
            writer.write_sample(s).expect("write sample");
        }
        writer.finalize().expect("finalize wav");
    }

    fn mono16(rate: u32) -> hound::WavSpec {
        hound::WavSpec {
            channels: 1,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        }
    }

    #[test]
    fn yields_full_chunks_then_exhausts() {
        let mut source = ReplaySource::from_samples((0..25).collect(), 8_000, 10);
        assert_eq!(source.read().unwrap().samples, (0..10).collect::<Vec<i16>>());
        assert_eq!(source.read().unwrap().samples, (10..20).collect::<Vec<i16>>());
        assert_eq!(source.remaining(), 5);
        assert!(matches!(source.read(), Err(HarkError::SourceExhausted)));
    }

    #[test]
    fn read_after_close_is_device_error() {
        let mut source = ReplaySource::from_samples(vec![0; 100], 8_000, 10);
        source.close();
        source.close();
        assert!(source.read().unwrap_err().is_device_error());
    }

    #[test]
    fn wav_replay_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("clip.wav");
        let samples: Vec<i16> = (0..100).map(|i| (i * 7) as i16).collect();
        write_wav(&path, mono16(16_000), &samples);

        let mut source = ReplaySource::from_wav(&path, 16_000, 50).expect("open wav");
        assert_eq!(source.read().unwrap().samples, samples[..50]);
        assert_eq!(source.read().unwrap().samples, samples[50..]);
    }

    #[test]
    fn wav_with_wrong_rate_is_config_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("clip.wav");
        write_wav(&path, mono16(16_000), &[0; 10]);

        let err = ReplaySource::from_wav(&path, 44_100, 10).err().expect("rate mismatch");
        assert!(err.is_config_error());
    }

    #[test]
    fn stereo_wav_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("stereo.wav");
        let spec = hound::WavSpec {
            channels: 2,
            ..mono16(44_100)
        };
        write_wav(&path, spec, &[0; 20]);

        assert!(read_wav_mono16(&path).unwrap_err().is_config_error());
    }
}
