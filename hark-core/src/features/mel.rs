//! Linear-to-mel filterbank.

use ndarray::Array2;

const MEL_BREAK_FREQUENCY_HZ: f64 = 700.0;
const MEL_HIGH_FREQUENCY_Q: f64 = 1127.0;

/// HTK mel scale.
pub fn hz_to_mel(hz: f64) -> f64 {
    MEL_HIGH_FREQUENCY_Q * (1.0 + hz / MEL_BREAK_FREQUENCY_HZ).ln()
}

/// `[num_spectrogram_bins, num_mel_bins]` weight matrix.
///
/// Bin `k` sits at `k · nyquist / (num_spectrogram_bins − 1)`. Band edges are
/// spaced evenly in mel between `lower_hz` and `upper_hz`, and each band is a
/// triangle in the mel domain peaking at 1.0. Row 0 (the DC bin) is always
/// zero. This reproduces the filterbank the deployed models were trained on.
pub fn mel_weight_matrix(
    num_mel_bins: usize,
    num_spectrogram_bins: usize,
    sample_rate: u32,
    lower_hz: f64,
    upper_hz: f64,
) -> Array2<f32> {
    let mut weights = Array2::<f32>::zeros((num_spectrogram_bins, num_mel_bins));
    if num_spectrogram_bins < 2 || num_mel_bins == 0 {
        return weights;
    }

    let nyquist = sample_rate as f64 / 2.0;
    let bin_hz = nyquist / (num_spectrogram_bins - 1) as f64;

    let lower_mel = hz_to_mel(lower_hz);
    let upper_mel = hz_to_mel(upper_hz);
    let step = (upper_mel - lower_mel) / (num_mel_bins + 1) as f64;
    let edges: Vec<f64> = (0..num_mel_bins + 2)
        .map(|i| lower_mel + step * i as f64)
        .collect();

    for k in 1..num_spectrogram_bins {
        let mel = hz_to_mel(k as f64 * bin_hz);
        for m in 0..num_mel_bins {
            let (left, center, right) = (edges[m], edges[m + 1], edges[m + 2]);
            let rising = (mel - left) / (center - left);
            let falling = (right - mel) / (right - center);
            weights[[k, m]] = rising.min(falling).max(0.0) as f32;
        }
    }
    weights
}
