//! Fixed-order DSP chain: gain, noise gate, compressor, AGC, limiter,
//! sensitivity. Mutated under one mutex since the chain runs from
//! whichever single thread owns the analyzer loop.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{AudiovizError, Result};

/// A sample of running level statistics, delivered to level callbacks
/// after each processed batch.
#[derive(Debug, Clone, Copy)]
pub struct LevelUpdate {
    pub peak: f32,
    pub rms: f32,
    pub timestamp_millis: u64,
}

pub type LevelCallback = Box<dyn Fn(LevelUpdate) + Send + Sync>;
pub type GainChangeCallback = Box<dyn Fn(f32) + Send + Sync>;

#[derive(Debug, Clone, Copy)]
struct AgcParams {
    enabled: bool,
    target: f32,
    attack: f32,
    release: f32,
}

#[derive(Debug, Clone, Copy)]
struct LimiterParams {
    enabled: bool,
    threshold: f32,
}

#[derive(Debug, Clone, Copy)]
struct CompressorParams {
    enabled: bool,
    ratio: f32,
    threshold: f32,
}

#[derive(Debug, Clone, Copy)]
struct GateParams {
    enabled: bool,
    threshold: f32,
}

struct Params {
    gain: f32,
    sensitivity: f32,
    agc: AgcParams,
    limiter: LimiterParams,
    compressor: CompressorParams,
    gate: GateParams,
}

impl Params {
    fn identity() -> Self {
        Params {
            gain: 1.0,
            sensitivity: 1.0,
            agc: AgcParams { enabled: false, target: 0.5, attack: 0.05, release: 0.2 },
            limiter: LimiterParams { enabled: false, threshold: 0.95 },
            compressor: CompressorParams { enabled: false, ratio: 4.0, threshold: 0.75 },
            gate: GateParams { enabled: false, threshold: 0.01 },
        }
    }
}

/// Per-batch envelope-follower state, touched only from the thread
/// driving `process`.
struct DspState {
    agc_envelope: f32,
    agc_gain: f32,
    gate_open: bool,
    gain_reductions: u64,
    clipped_samples: u64,
    processed_samples: u64,
    peak_level: f32,
    rms_level: f32,
}

impl DspState {
    fn new() -> Self {
        DspState {
            agc_envelope: 0.0,
            agc_gain: 1.0,
            gate_open: true,
            gain_reductions: 0,
            clipped_samples: 0,
            processed_samples: 0,
            peak_level: 0.0,
            rms_level: 0.0,
        }
    }
}

/// A named parameter bundle, per the preset table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    LiveInput,
    MusicFile,
    QuietEnvironment,
    LoudEnvironment,
    Disabled,
}

/// The gain -> gate -> compressor -> AGC -> limiter -> sensitivity
/// chain. Order is fixed and significant.
pub struct Controls {
    params: Mutex<Params>,
    state: Mutex<DspState>,
    level_callbacks: Mutex<Vec<LevelCallback>>,
    gain_callbacks: Mutex<Vec<GainChangeCallback>>,
}

impl Default for Controls {
    fn default() -> Self {
        Self::new()
    }
}

impl Controls {
    pub fn new() -> Self {
        Controls {
            params: Mutex::new(Params::identity()),
            state: Mutex::new(DspState::new()),
            level_callbacks: Mutex::new(Vec::new()),
            gain_callbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn set_gain(&self, gain: f32) -> Result<()> {
        if !(0.0..=10.0).contains(&gain) {
            return Err(AudiovizError::InvalidArgument(format!("gain {gain} out of [0, 10]")));
        }
        self.params.lock().unwrap().gain = gain;
        let callbacks = self.gain_callbacks.lock().unwrap();
        for cb in callbacks.iter() {
            cb(gain);
        }
        Ok(())
    }

    pub fn gain(&self) -> f32 {
        self.params.lock().unwrap().gain
    }

    pub fn set_sensitivity(&self, sensitivity: f32) -> Result<()> {
        if !(0.1..=5.0).contains(&sensitivity) {
            return Err(AudiovizError::InvalidArgument(format!(
                "sensitivity {sensitivity} out of [0.1, 5.0]"
            )));
        }
        self.params.lock().unwrap().sensitivity = sensitivity;
        Ok(())
    }

    pub fn sensitivity(&self) -> f32 {
        self.params.lock().unwrap().sensitivity
    }

    pub fn set_noise_gate(&self, enabled: bool, threshold: f32) {
        let mut params = self.params.lock().unwrap();
        params.gate.enabled = enabled;
        params.gate.threshold = threshold;
    }

    pub fn noise_gate_enabled(&self) -> bool {
        self.params.lock().unwrap().gate.enabled
    }

    pub fn set_compressor(&self, enabled: bool, ratio: f32, threshold: f32) {
        let mut params = self.params.lock().unwrap();
        params.compressor.enabled = enabled;
        params.compressor.ratio = ratio;
        params.compressor.threshold = threshold;
    }

    pub fn compressor_enabled(&self) -> bool {
        self.params.lock().unwrap().compressor.enabled
    }

    pub fn set_agc(&self, enabled: bool, target: f32, attack: f32, release: f32) {
        let mut params = self.params.lock().unwrap();
        params.agc.enabled = enabled;
        params.agc.target = target;
        params.agc.attack = attack;
        params.agc.release = release;
    }

    pub fn agc_enabled(&self) -> bool {
        self.params.lock().unwrap().agc.enabled
    }

    pub fn set_limiter(&self, enabled: bool, threshold: f32) {
        let mut params = self.params.lock().unwrap();
        params.limiter.enabled = enabled;
        params.limiter.threshold = threshold;
    }

    pub fn limiter_enabled(&self) -> bool {
        self.params.lock().unwrap().limiter.enabled
    }

    pub fn limiter_threshold(&self) -> f32 {
        self.params.lock().unwrap().limiter.threshold
    }

    pub fn on_level_update(&self, callback: LevelCallback) {
        self.level_callbacks.lock().unwrap().push(callback);
    }

    pub fn on_gain_change(&self, callback: GainChangeCallback) {
        self.gain_callbacks.lock().unwrap().push(callback);
    }

    pub fn gain_reductions(&self) -> u64 {
        self.state.lock().unwrap().gain_reductions
    }

    pub fn clipped_samples(&self) -> u64 {
        self.state.lock().unwrap().clipped_samples
    }

    pub fn processed_samples(&self) -> u64 {
        self.state.lock().unwrap().processed_samples
    }

    /// Apply the named preset, replacing every parameter.
    pub fn apply_preset(&self, preset: Preset) {
        let mut params = self.params.lock().unwrap();
        *params = match preset {
            Preset::LiveInput => Params {
                gain: 1.2,
                sensitivity: 1.5,
                agc: AgcParams { enabled: true, target: 0.7, attack: 0.05, release: 0.2 },
                limiter: LimiterParams { enabled: true, threshold: 0.9 },
                compressor: CompressorParams { enabled: true, ratio: 3.0, threshold: 0.75 },
                gate: GateParams { enabled: true, threshold: 0.005 },
            },
            Preset::MusicFile => Params {
                gain: 1.0,
                sensitivity: 1.0,
                agc: AgcParams { enabled: false, ..Params::identity().agc },
                limiter: LimiterParams { enabled: true, threshold: 0.95 },
                compressor: CompressorParams { enabled: false, ..Params::identity().compressor },
                gate: GateParams { enabled: false, ..Params::identity().gate },
            },
            Preset::QuietEnvironment => Params {
                gain: 2.0,
                sensitivity: 2.0,
                agc: AgcParams { enabled: true, target: 0.8, attack: 0.02, release: 0.5 },
                limiter: LimiterParams { enabled: true, threshold: 0.85 },
                compressor: CompressorParams { enabled: true, ratio: 6.0, threshold: 0.6 },
                gate: GateParams { enabled: true, threshold: 0.002 },
            },
            Preset::LoudEnvironment => Params {
                gain: 0.7,
                sensitivity: 0.8,
                agc: AgcParams { enabled: true, target: 0.6, attack: 0.1, release: 0.1 },
                limiter: LimiterParams { enabled: true, threshold: 0.8 },
                compressor: CompressorParams { enabled: true, ratio: 8.0, threshold: 0.5 },
                gate: GateParams { enabled: false, ..Params::identity().gate },
            },
            Preset::Disabled => Params::identity(),
        };
    }

    /// Run the full chain over `samples`, returning a new buffer of
    /// equal length. Must be called from a single thread; per-batch
    /// envelope state is not safe to interleave across callers.
    pub fn process(&self, samples: &[f32]) -> Vec<f32> {
        let params = self.params.lock().unwrap();
        let mut state = self.state.lock().unwrap();
        let mut out = samples.to_vec();

        // 1. Gain
        for s in out.iter_mut() {
            *s *= params.gain;
        }

        // 2. Noise gate
        if params.gate.enabled {
            let rms = rms_of(&out);
            if rms < params.gate.threshold {
                for s in out.iter_mut() {
                    *s *= 0.01;
                }
                state.gate_open = false;
            } else {
                state.gate_open = true;
            }
        }

        // 3. Compressor
        if params.compressor.enabled {
            let peak = peak_of(&out);
            if peak > params.compressor.threshold {
                let reduction = (peak - params.compressor.threshold) / params.compressor.ratio;
                let factor = 1.0 - reduction;
                for s in out.iter_mut() {
                    *s *= factor;
                }
                state.gain_reductions += 1;
            }
        }

        // 4. AGC
        if params.agc.enabled {
            let rms = rms_of(&out);
            let coeff = if rms > state.agc_envelope { params.agc.attack } else { params.agc.release };
            state.agc_envelope += coeff * (rms - state.agc_envelope);
            if state.agc_envelope > 0.001 {
                let desired = params.agc.target / state.agc_envelope;
                state.agc_gain += 0.1 * (desired - state.agc_gain);
                state.agc_gain = state.agc_gain.clamp(0.1, 10.0);
            }
            let agc_gain = state.agc_gain;
            for s in out.iter_mut() {
                *s *= agc_gain;
            }
        }

        // 5. Limiter
        if params.limiter.enabled {
            let peak = peak_of(&out);
            if peak > params.limiter.threshold {
                let factor = params.limiter.threshold / peak;
                for s in out.iter_mut() {
                    *s *= factor;
                }
            }
            for s in out.iter() {
                if s.abs() > 1.0 {
                    state.clipped_samples += 1;
                }
            }
        }

        // 6. Sensitivity
        for s in out.iter_mut() {
            *s *= params.sensitivity;
        }

        state.processed_samples += out.len() as u64;
        let peak = peak_of(&out);
        let rms = rms_of(&out);
        state.peak_level = state.peak_level.max(peak);
        state.rms_level += 0.1 * (rms - state.rms_level);

        let update = LevelUpdate {
            peak: state.peak_level,
            rms: state.rms_level,
            timestamp_millis: now_millis(),
        };
        drop(state);
        drop(params);

        let callbacks = self.level_callbacks.lock().unwrap();
        for cb in callbacks.iter() {
            cb(update);
        }

        out
    }
}

fn rms_of(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

fn peak_of(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s5_limiter_clamps_peak() {
        let controls = Controls::new();
        controls.set_limiter(true, 0.5);
        let out = controls.process(&[0.8, 0.9, 1.0, 0.7]);
        assert!(out.iter().all(|s| s.abs() <= 0.5 + 1e-6));
    }

    #[test]
    fn s6_preset_swap() {
        let controls = Controls::new();
        controls.apply_preset(Preset::LiveInput);
        controls.apply_preset(Preset::MusicFile);

        assert_eq!(controls.gain(), 1.0);
        assert_eq!(controls.sensitivity(), 1.0);
        assert!(!controls.agc_enabled());
        assert!(!controls.compressor_enabled());
        assert!(!controls.noise_gate_enabled());
        assert!(controls.limiter_enabled());
        assert_eq!(controls.limiter_threshold(), 0.95);
    }

    #[test]
    fn identity_chain_passes_samples_unchanged() {
        let controls = Controls::new();
        controls.apply_preset(Preset::Disabled);
        let input = vec![0.1, -0.2, 0.3, -0.4];
        let out = controls.process(&input);
        assert_eq!(out, input);
    }

    #[test]
    fn noise_gate_reduces_rms_below_threshold() {
        let controls = Controls::new();
        controls.apply_preset(Preset::Disabled);
        controls.set_noise_gate(true, 0.5);
        let input = vec![0.01, -0.01, 0.01, -0.01];
        let input_rms = rms_of(&input);
        let out = controls.process(&input);
        let output_rms = rms_of(&out);
        assert!(output_rms < input_rms);
    }

    #[test]
    fn gain_rejects_out_of_range() {
        let controls = Controls::new();
        assert!(controls.set_gain(11.0).is_err());
        assert!(controls.set_gain(5.0).is_ok());
    }

    #[test]
    fn sensitivity_rejects_out_of_range() {
        let controls = Controls::new();
        assert!(controls.set_sensitivity(0.0).is_err());
        assert!(controls.set_sensitivity(3.0).is_ok());
    }
}
