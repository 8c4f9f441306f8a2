//! Short-time Fourier transform magnitudes.

use std::f32::consts::PI;
use std::sync::Arc;

use ndarray::Array2;
use rustfft::{num_complex::Complex, Fft, FftPlanner};

/// Framed magnitude spectrum with a periodic Hann window.
///
/// The FFT length equals the frame length and frames are never padded, so a
/// signal of `n` samples yields `(n - frame_length) / frame_step + 1` frames.
pub struct Stft {
    frame_length: usize,
    frame_step: usize,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
}

impl Stft {
    pub fn new(frame_length: usize, frame_step: usize) -> Self {
        Self {
            frame_length,
            frame_step,
            window: periodic_hann(frame_length),
            fft: FftPlanner::<f32>::new().plan_fft_forward(frame_length),
        }
    }

    /// `frame_length / 2 + 1`.
    pub fn num_bins(&self) -> usize {
        self.frame_length / 2 + 1
    }

    pub fn num_frames(&self, signal_len: usize) -> usize {
        if signal_len < self.frame_length || self.frame_step == 0 {
            return 0;
        }
        (signal_len - self.frame_length) / self.frame_step + 1
    }

    /// `[frames, bins]` magnitudes of `signal`. A trailing partial frame is ignored.
    pub fn magnitude(&self, signal: &[f32]) -> Array2<f32> {
        let frames = self.num_frames(signal.len());
        let bins = self.num_bins();
        let mut out = Array2::<f32>::zeros((frames, bins));
        let mut buf = vec![Complex::new(0.0f32, 0.0); self.frame_length];

        for (t, mut row) in out.rows_mut().into_iter().enumerate() {
            let start = t * self.frame_step;
            let frame = &signal[start..start + self.frame_length];
            for ((slot, &s), &w) in buf.iter_mut().zip(frame).zip(&self.window) {
                *slot = Complex::new(s * w, 0.0);
            }
            self.fft.process(&mut buf);
            for (dst, c) in row.iter_mut().zip(&buf[..bins]) {
                *dst = c.norm();
            }
        }
        out
    }
}

/// `0.5 - 0.5·cos(2πn / N)`, i.e. the symmetric window of length N+1 without its last point.
fn periodic_hann(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / n as f32).cos())
        .collect()
}
