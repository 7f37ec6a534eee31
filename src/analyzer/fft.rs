//! Hand-rolled iterative Cooley-Tukey radix-2 complex FFT. All `fft_size`
//! values this crate accepts are powers of two, so no mixed-radix or
//! Bluestein fallback is needed.

use std::f32::consts::PI;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Complex {
    pub re: f32,
    pub im: f32,
}

impl Complex {
    pub const fn new(re: f32, im: f32) -> Self {
        Complex { re, im }
    }

    fn add(self, other: Complex) -> Complex {
        Complex::new(self.re + other.re, self.im + other.im)
    }

    fn sub(self, other: Complex) -> Complex {
        Complex::new(self.re - other.re, self.im - other.im)
    }

    fn mul(self, other: Complex) -> Complex {
        Complex::new(
            self.re * other.re - self.im * other.im,
            self.re * other.im + self.im * other.re,
        )
    }

    pub fn magnitude(self) -> f32 {
        (self.re * self.re + self.im * self.im).sqrt()
    }

    pub fn phase(self) -> f32 {
        self.im.atan2(self.re)
    }
}

fn bit_reverse_permute(data: &mut [Complex]) {
    let n = data.len();
    let bits = n.trailing_zeros();
    for i in 0..n {
        let j = (i as u32).reverse_bits() >> (32 - bits);
        let j = j as usize;
        if j > i {
            data.swap(i, j);
        }
    }
}

/// In-place radix-2 FFT. `data.len()` must be a power of two.
pub fn fft_in_place(data: &mut [Complex]) {
    let n = data.len();
    assert!(n.is_power_of_two(), "fft size must be a power of two, got {n}");
    if n <= 1 {
        return;
    }

    bit_reverse_permute(data);

    let mut size = 2;
    while size <= n {
        let half = size / 2;
        let angle_step = -2.0 * PI / size as f32;
        for start in (0..n).step_by(size) {
            for k in 0..half {
                let angle = angle_step * k as f32;
                let twiddle = Complex::new(angle.cos(), angle.sin());
                let even = data[start + k];
                let odd = data[start + k + half].mul(twiddle);
                data[start + k] = even.add(odd);
                data[start + k + half] = even.sub(odd);
            }
        }
        size *= 2;
    }
}

/// Real-input FFT: windowed real samples in, magnitude/phase for bins
/// `[0, N/2]` out.
pub fn real_fft(samples: &[f32]) -> (Vec<f32>, Vec<f32>) {
    let n = samples.len();
    let mut buf: Vec<Complex> = samples.iter().map(|&s| Complex::new(s, 0.0)).collect();
    fft_in_place(&mut buf);

    let half = n / 2 + 1;
    let mut magnitudes = Vec::with_capacity(half);
    let mut phases = Vec::with_capacity(half);
    for bin in buf.iter().take(half) {
        magnitudes.push(bin.magnitude());
        phases.push(bin.phase());
    }
    (magnitudes, phases)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s4_fft_of_dc_concentrates_at_bin_zero() {
        let samples = vec![1.0f32; 128];
        let (magnitudes, _phases) = real_fft(&samples);
        assert!((magnitudes[0] - 128.0).abs() < 1e-6);
        for &m in &magnitudes[1..64] {
            assert!(m < 1e-3, "expected ~0, got {m}");
        }
    }

    #[test]
    fn sinusoid_peaks_at_expected_bin() {
        let n = 256;
        let sample_rate = 44100.0;
        let k = 16usize;
        let freq = k as f32 * sample_rate / n as f32;
        let samples: Vec<f32> = (0..n)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate).sin())
            .collect();
        let (magnitudes, _) = real_fft(&samples);
        let peak_bin = magnitudes
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak_bin, k);
    }

    #[test]
    fn fft_size_must_be_power_of_two() {
        let result = std::panic::catch_unwind(|| {
            let mut data = vec![Complex::new(0.0, 0.0); 3];
            fft_in_place(&mut data);
        });
        assert!(result.is_err());
    }
}
