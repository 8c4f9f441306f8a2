//! Log-mel cepstral features for the classifier.
//!
//! ```text
//! i16 window ──/32768──▶ STFT |·| ──▶ mel (40) ──▶ ln(x + 1e-6) ──▶ DCT-II[..10] ──▶ [1, T, 10, 1]
//! ```
//!
//! All constant matrices are built once in [`FeatureExtractor::new`];
//! [`FeatureExtractor::extract`] is a pure function of the window.

pub mod dct;
pub mod mel;
pub mod stft;

use ndarray::{Array2, Array4, ArrayView4};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::buffering::chunk::AudioWindow;
use crate::config::FeatureConfig;
use crate::error::{HarkError, Result};

use self::stft::Stft;

/// Added before the log so silent bins stay finite.
pub const LOG_OFFSET: f32 = 1e-6;

/// `(frames, coefficients)` of a feature tensor; the leading and trailing
/// dimensions are always 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureShape {
    pub frames: usize,
    pub coefficients: usize,
}

impl FeatureShape {
    /// `[1, frames, coefficients, 1]` as ONNX-style dims.
    pub fn dims(&self) -> [i64; 4] {
        [1, self.frames as i64, self.coefficients as i64, 1]
    }
}

/// Model input of shape `[1, T, C, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTensor {
    data: Array4<f32>,
}

impl FeatureTensor {
    /// Wrap a `[1, T, C, 1]` array.
    ///
    /// # Errors
    /// `Config` if the outer dimensions are not 1.
    pub fn from_array(data: Array4<f32>) -> Result<Self> {
        let (batch, _, _, channels) = data.dim();
        if batch != 1 || channels != 1 {
            return Err(HarkError::config(format!(
                "feature tensor must be [1, T, C, 1], got {:?}",
                data.shape()
            )));
        }
        Ok(Self { data })
    }

    pub fn shape(&self) -> FeatureShape {
        let (_, frames, coefficients, _) = self.data.dim();
        FeatureShape {
            frames,
            coefficients,
        }
    }

    pub fn view(&self) -> ArrayView4<'_, f32> {
        self.data.view()
    }

    /// Coefficient `c` of frame `t`.
    pub fn get(&self, t: usize, c: usize) -> f32 {
        self.data[[0, t, c, 0]]
    }

    pub fn into_array(self) -> Array4<f32> {
        self.data
    }
}

/// Turns a fixed-length capture window into a [`FeatureTensor`].
pub struct FeatureExtractor {
    window_samples: usize,
    stft: Stft,
    /// `[bins, num_mel_bins]`
    mel_weights: Array2<f32>,
    /// `[num_mel_bins, num_coefficients]`
    dct_basis: Array2<f32>,
    shape: FeatureShape,
}

impl FeatureExtractor {
    /// # Errors
    /// `Config` when the frame geometry does not tile the window exactly,
    /// when more coefficients than mel bins are requested, or when the
    /// frequency range is not inside `[0, nyquist]`.
    pub fn new(sample_rate: u32, window_samples: usize, config: &FeatureConfig) -> Result<Self> {
        let FeatureConfig {
            frame_length,
            frame_step,
            num_mel_bins,
            frequency_low,
            frequency_high,
            num_coefficients,
        } = *config;

        if frame_length == 0 || frame_step == 0 {
            return Err(HarkError::config(
                "frame_length and frame_step must be positive",
            ));
        }
        if window_samples < frame_length {
            return Err(HarkError::config(format!(
                "window of {window_samples} samples is shorter than frame_length {frame_length}"
            )));
        }
        if (window_samples - frame_length) % frame_step != 0 {
            return Err(HarkError::config(format!(
                "frame_step {frame_step} does not tile a {window_samples}-sample window \
                 with frame_length {frame_length}"
            )));
        }
        if num_mel_bins == 0 || num_coefficients == 0 {
            return Err(HarkError::config(
                "num_mel_bins and num_coefficients must be positive",
            ));
        }
        if num_coefficients > num_mel_bins {
            return Err(HarkError::config(format!(
                "num_coefficients {num_coefficients} exceeds num_mel_bins {num_mel_bins}"
            )));
        }
        let nyquist = sample_rate as f32 / 2.0;
        if !(frequency_low >= 0.0 && frequency_low < frequency_high && frequency_high <= nyquist)
        {
            return Err(HarkError::config(format!(
                "mel range [{frequency_low}, {frequency_high}] Hz must satisfy \
                 0 <= low < high <= {nyquist}"
            )));
        }

        let stft = Stft::new(frame_length, frame_step);
        let mel_weights = mel::mel_weight_matrix(
            num_mel_bins,
            stft.num_bins(),
            sample_rate,
            frequency_low as f64,
            frequency_high as f64,
        );
        let dct_basis = dct::dct_basis(num_mel_bins, num_coefficients);
        let shape = FeatureShape {
            frames: stft.num_frames(window_samples),
            coefficients: num_coefficients,
        };
        debug!(
            window_samples,
            frame_length,
            frame_step,
            frames = shape.frames,
            coefficients = shape.coefficients,
            "feature extractor ready"
        );

        Ok(Self {
            window_samples,
            stft,
            mel_weights,
            dct_basis,
            shape,
        })
    }

    /// Shape of every tensor this extractor produces.
    pub fn shape(&self) -> FeatureShape {
        self.shape
    }

    pub fn window_samples(&self) -> usize {
        self.window_samples
    }

    /// # Errors
    /// `Config` if the window length differs from the one this extractor was built for.
    pub fn extract(&self, window: &AudioWindow) -> Result<FeatureTensor> {
        if window.len() != self.window_samples {
            return Err(HarkError::config(format!(
                "expected a {}-sample window, got {}",
                self.window_samples,
                window.len()
            )));
        }

        let signal: Vec<f32> = window
            .samples()
            .iter()
            .map(|&s| s as f32 / 32_768.0)
            .collect();

        let magnitudes = self.stft.magnitude(&signal);
        let mut log_mel = magnitudes.dot(&self.mel_weights);
        log_mel.mapv_inplace(|v| (v + LOG_OFFSET).ln());
        let cepstra = log_mel.dot(&self.dct_basis);

        let FeatureShape {
            frames,
            coefficients,
        } = self.shape;
        let data = cepstra
            .into_shape_with_order((1, frames, coefficients, 1))
            .map_err(|e| HarkError::Other(e.into()))?;
        Ok(FeatureTensor { data })
    }
}
