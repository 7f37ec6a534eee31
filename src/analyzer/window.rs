//! Window functions applied to each FFT frame before transforming.

use std::f32::consts::PI;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    Hanning,
    Hamming,
    Blackman,
    Rectangular,
}

/// Compute the `n`-length coefficient vector for `kind`.
pub fn coefficients(kind: WindowKind, n: usize) -> Vec<f32> {
    if n <= 1 {
        return vec![1.0; n];
    }
    let denom = (n - 1) as f32;
    (0..n)
        .map(|i| {
            let x = i as f32;
            match kind {
                WindowKind::Hanning => 0.5 * (1.0 - (2.0 * PI * x / denom).cos()),
                WindowKind::Hamming => 0.54 - 0.46 * (2.0 * PI * x / denom).cos(),
                WindowKind::Blackman => {
                    0.42 - 0.5 * (2.0 * PI * x / denom).cos() + 0.08 * (4.0 * PI * x / denom).cos()
                }
                WindowKind::Rectangular => 1.0,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rectangular_is_all_ones() {
        let w = coefficients(WindowKind::Rectangular, 128);
        assert!(w.iter().all(|&c| c == 1.0));
    }

    #[test]
    fn hanning_endpoints_are_zero() {
        let w = coefficients(WindowKind::Hanning, 128);
        assert!(w[0].abs() < 1e-6);
        assert!(w[127].abs() < 1e-6);
    }

    #[test]
    fn hamming_endpoints_match_formula() {
        let w = coefficients(WindowKind::Hamming, 128);
        assert!((w[0] - 0.08).abs() < 1e-4);
    }

    #[test]
    fn blackman_endpoints_near_zero() {
        let w = coefficients(WindowKind::Blackman, 128);
        assert!(w[0] < 1e-3);
    }
}
