//! Typed sample blocks passed between the source, trigger, recorder and extractor.

/// One device read: exactly `chunk_size` mono int16 samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleChunk {
    pub samples: Vec<i16>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl SampleChunk {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Largest absolute sample value. `i16::MIN` maps to 32768.
    pub fn peak(&self) -> u16 {
        self.samples
            .iter()
            .map(|s| s.unsigned_abs())
            .max()
            .unwrap_or(0)
    }
}

/// A fixed-length capture assembled from consecutive chunks.
///
/// Only [`capture`](super::capture) builds one, and only once every chunk
/// has arrived, so a window is never partial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioWindow {
    samples: Vec<i16>,
    sample_rate: u32,
}

impl AudioWindow {
    pub(crate) fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Build a window from raw samples, e.g. a WAV file read outside the pipeline.
    pub fn from_samples(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self::new(samples, sample_rate)
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn into_samples(self) -> Vec<i16> {
        self.samples
    }
}
