//! Sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! Most inputs open at the configured rate directly. Some (USB headsets,
//! Bluetooth profiles) only offer 16 or 48 kHz; for those `CpalSource`
//! captures at the device rate and converts here, on the pipeline thread
//! where allocation is allowed.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use crate::error::{HarkError, Result};

/// Converts mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when capture rate == target rate (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    /// Holds partial input blocks between calls.
    input_buf: Vec<f32>,
    /// Input frames rubato expects per process call.
    block_size: usize,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// # Errors
    /// Returns `HarkError::AudioDevice` if rubato fails to initialise.
    pub fn new(capture_rate: u32, target_rate: u32, block_size: usize) -> Result<Self> {
        if capture_rate == target_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                block_size,
                output_buf: Vec::new(),
            });
        }

        let ratio = target_rate as f64 / capture_rate as f64;
        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio
            PolynomialDegree::Cubic,
            block_size,
            1, // mono
        )
        .map_err(|e| HarkError::AudioDevice(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        tracing::info!(capture_rate, target_rate, block_size, max_out, "resampler ready");

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::new(),
            block_size,
            output_buf: vec![vec![0f32; max_out]; 1],
        })
    }

    /// Process f32 samples, returning resampled output (may be empty while
    /// a full input block accumulates).
    ///
    /// # Errors
    /// `AudioStream` if rubato rejects a block. Buffered input and filter
    /// state are dropped, so the caller must treat the stream as broken.
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        let Some(ref mut resampler) = self.resampler else {
            return Ok(samples.to_vec());
        };

        self.input_buf.extend_from_slice(samples);
        let mut result = Vec::new();

        while self.input_buf.len() >= self.block_size {
            let input_slice = &self.input_buf[..self.block_size];
            match resampler.process_into_buffer(&[input_slice], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                    self.input_buf.drain(..self.block_size);
                }
                Err(e) => {
                    self.input_buf.clear();
                    resampler.reset();
                    return Err(HarkError::AudioStream(format!("resampler: {e}")));
                }
            }
        }

        Ok(result)
    }

    /// Int16 convenience wrapper around [`process`](Self::process).
    pub fn process_i16(&mut self, samples: &[i16]) -> Result<Vec<i16>> {
        if self.is_passthrough() {
            return Ok(samples.to_vec());
        }
        let as_f32: Vec<f32> = samples.iter().map(|&s| s as f32 / 32_768.0).collect();
        Ok(self
            .process(&as_f32)?
            .into_iter()
            .map(|s| (s * 32_768.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16)
            .collect())
    }

    /// Forget buffered input and filter state.
    pub fn reset(&mut self) {
        self.input_buf.clear();
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_identity() {
        let mut rc = RateConverter::new(44_100, 44_100, 4096).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<i16> = (0..480).map(|i| i as i16 * 3).collect();
        assert_eq!(rc.process_i16(&samples).unwrap(), samples);
    }

    #[test]
    fn ratio_48k_to_44k1_length() {
        let mut rc = RateConverter::new(48_000, 44_100, 960).unwrap();
        let out = rc.process_i16(&vec![0i16; 960]).unwrap();
        let expected = 882usize;
        assert!(
            (out.len() as isize - expected as isize).unsigned_abs() <= 10,
            "output len={} expected≈{}",
            out.len(),
            expected
        );
    }

    #[test]
    fn partial_block_returns_empty_until_filled() {
        let mut rc = RateConverter::new(48_000, 44_100, 960).unwrap();
        assert!(rc.process_i16(&vec![0i16; 500]).unwrap().is_empty());
        assert!(!rc.process_i16(&vec![0i16; 500]).unwrap().is_empty());
    }

    #[test]
    fn reset_drops_partial_input() {
        let mut rc = RateConverter::new(48_000, 44_100, 960).unwrap();
        assert!(rc.process_i16(&vec![0i16; 900]).unwrap().is_empty());
        rc.reset();
        assert!(rc.process_i16(&vec![0i16; 100]).unwrap().is_empty());
    }

    #[test]
    fn rubato_failure_is_a_stream_error_and_drops_input() {
        let mut rc = RateConverter::new(48_000, 44_100, 960).unwrap();
        // Too small for one output block.
        rc.output_buf[0].truncate(16);
        let err = rc.process_i16(&vec![0i16; 960]).unwrap_err();
        assert!(matches!(err, HarkError::AudioStream(_)));
        assert!(err.is_device_error());
        assert!(rc.input_buf.is_empty());
    }
}
