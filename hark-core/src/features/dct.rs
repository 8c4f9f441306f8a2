//! Truncated DCT-II basis for cepstral coefficients.

use std::f64::consts::PI;

use ndarray::Array2;

/// `[input_len, num_coefficients]` basis so that `x.dot(&basis)` yields the
/// first `num_coefficients` DCT-II coefficients of each row of `x`:
///
/// ```text
/// c_k = 2 · Σ_n x_n · cos(π·k·(2n + 1) / (2N)) / sqrt(2N)
/// ```
pub fn dct_basis(input_len: usize, num_coefficients: usize) -> Array2<f32> {
    let n_total = input_len as f64;
    let scale = 2.0 / (2.0 * n_total).sqrt();
    Array2::from_shape_fn((input_len, num_coefficients), |(n, k)| {
        let angle = PI * k as f64 * (2.0 * n as f64 + 1.0) / (2.0 * n_total);
        (scale * angle.cos()) as f32
    })
}
