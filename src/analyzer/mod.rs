//! Overlapped windowed FFT analyzer: accumulates incoming samples into
//! an internal buffer and emits one frequency-domain frame each time a
//! full window is available.

pub mod fft;
pub mod window;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::error::{AudiovizError, Result};
use fft::real_fft;
use window::{coefficients, WindowKind};

const ALLOWED_FFT_SIZES: [usize; 6] = [128, 256, 512, 1024, 2048, 4096];

/// One emitted frequency-domain observation.
#[derive(Debug, Clone)]
pub struct FrequencyFrame {
    pub frequencies: Vec<f32>,
    pub magnitudes: Vec<f32>,
    pub phases: Vec<f32>,
    pub sample_rate: u32,
    pub fft_size: usize,
}

pub type FrequencyCallback = Box<dyn Fn(&FrequencyFrame) + Send + Sync>;

struct Inner {
    buffer: VecDeque<f32>,
}

/// Windowed FFT analyzer. `fft_size`, `overlap`, `sample_rate`, and
/// `window` are fixed at construction; the only mutable state is the
/// sample accumulator.
pub struct Analyzer {
    sample_rate: u32,
    fft_size: usize,
    hop: usize,
    window_coeffs: Vec<f32>,
    inner: Mutex<Inner>,
    callbacks: Mutex<Vec<Arc<FrequencyCallback>>>,
}

impl Analyzer {
    pub fn new(sample_rate: u32, fft_size: usize, overlap: f32, window: WindowKind) -> Result<Self> {
        if !ALLOWED_FFT_SIZES.contains(&fft_size) {
            return Err(AudiovizError::InvalidArgument(format!(
                "fft_size {fft_size} not in {ALLOWED_FFT_SIZES:?}"
            )));
        }
        if !(0.0..1.0).contains(&overlap) {
            return Err(AudiovizError::InvalidArgument(format!(
                "overlap {overlap} not in [0, 1)"
            )));
        }
        let hop = ((fft_size as f32) * (1.0 - overlap)).floor() as usize;
        let hop = hop.max(1);

        Ok(Analyzer {
            sample_rate,
            fft_size,
            hop,
            window_coeffs: coefficients(window, fft_size),
            inner: Mutex::new(Inner { buffer: VecDeque::new() }),
            callbacks: Mutex::new(Vec::new()),
        })
    }

    pub fn on_frequency_data(&self, callback: FrequencyCallback) {
        self.callbacks.lock().unwrap().push(Arc::new(callback));
    }

    pub fn bin_to_frequency(&self, k: usize) -> f32 {
        k as f32 * self.sample_rate as f32 / self.fft_size as f32
    }

    pub fn frequency_to_bin(&self, f: f32) -> usize {
        (f * self.fft_size as f32 / self.sample_rate as f32).round() as usize
    }

    /// Accumulate `samples` and emit one frame per full window, hopping
    /// forward by `hop` samples each time. Frames are extracted from the
    /// accumulator while `inner` is locked, then the lock is released
    /// before any FFT work or callback invocation, so a callback that
    /// calls back into `process_samples`/`on_frequency_data` cannot
    /// deadlock on either lock.
    pub fn process_samples(&self, samples: &[f32]) {
        let frames = {
            let mut inner = self.inner.lock().unwrap();
            inner.buffer.extend(samples.iter().copied());

            let mut frames = Vec::new();
            while inner.buffer.len() >= self.fft_size {
                let frame: Vec<f32> = inner.buffer.iter().take(self.fft_size).copied().collect();
                frames.push(frame);
                for _ in 0..self.hop {
                    if inner.buffer.pop_front().is_none() {
                        break;
                    }
                }
            }
            frames
        };

        for frame in frames {
            let windowed: Vec<f32> = frame
                .iter()
                .zip(self.window_coeffs.iter())
                .map(|(s, w)| s * w)
                .collect();

            let (magnitudes, phases) = real_fft(&windowed);
            let frequencies: Vec<f32> = (0..magnitudes.len()).map(|k| self.bin_to_frequency(k)).collect();

            let frequency_frame = FrequencyFrame {
                frequencies,
                magnitudes,
                phases,
                sample_rate: self.sample_rate,
                fft_size: self.fft_size,
            };

            let callbacks = self.callbacks.lock().unwrap().clone();
            for cb in callbacks.iter() {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cb(&frequency_frame)));
                if result.is_err() {
                    warn!("frequency-data callback panicked; continuing");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn s4_dc_frame_matches_literal_scenario() {
        let analyzer = Analyzer::new(44100, 128, 0.0, WindowKind::Rectangular).unwrap();
        let frames: Arc<Mutex<Vec<FrequencyFrame>>> = Arc::new(Mutex::new(Vec::new()));
        let frames2 = Arc::clone(&frames);
        analyzer.on_frequency_data(Box::new(move |f| frames2.lock().unwrap().push(f.clone())));

        analyzer.process_samples(&vec![1.0; 128]);

        let frames = frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert!((frames[0].magnitudes[0] - 128.0).abs() < 1e-6);
        assert!(frames[0].magnitudes[1..64].iter().all(|&m| m.abs() < 1e-6));
    }

    #[test]
    fn hop_advances_buffer_without_duplicate_frames() {
        let analyzer = Analyzer::new(44100, 128, 0.5, WindowKind::Rectangular).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::clone(&count);
        analyzer.on_frequency_data(Box::new(move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        }));

        analyzer.process_samples(&vec![0.5; 320]);
        // 320 samples, fft_size=128, hop=64: frames at offsets 0,64,128,192 -> 4 frames, 64 left over
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn rejects_unsupported_fft_size() {
        assert!(Analyzer::new(44100, 100, 0.0, WindowKind::Rectangular).is_err());
    }

    #[test]
    fn bin_frequency_roundtrip() {
        let analyzer = Analyzer::new(44100, 1024, 0.0, WindowKind::Hanning).unwrap();
        let freq = analyzer.bin_to_frequency(32);
        assert_eq!(analyzer.frequency_to_bin(freq), 32);
    }
}
