//! In-memory pipeline configuration. The core neither reads nor writes
//! any configuration file; every value here comes from CLI arguments or
//! a compiled-in default. Persistence, if any, is the downstream
//! renderer's concern.

use crate::analyzer::window::WindowKind;
use crate::audio::types::AudioFormat;
use crate::controls::Preset;
use crate::error::{AudiovizError, Result};

/// Everything the pipeline needs to construct its components.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub fft_size: usize,
    pub overlap: f32,
    pub window: WindowKind,
    pub preset: Preset,
    pub main_buffer_latency_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let format = AudioFormat::default_stereo();
        PipelineConfig {
            sample_rate: format.sample_rate,
            channels: format.channels,
            fft_size: 1024,
            overlap: 0.5,
            window: WindowKind::Hanning,
            preset: Preset::MusicFile,
            main_buffer_latency_ms: 50,
        }
    }
}

impl PipelineConfig {
    /// Validate the format portion against the allowed value sets;
    /// `fft_size`/`overlap` are validated by `Analyzer::new` itself.
    pub fn validate(&self) -> Result<()> {
        AudioFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
            sample_width_bits: 16,
        }
        .validate()?;
        Ok(())
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_channels(mut self, channels: u16) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_fft_size(mut self, fft_size: usize) -> Self {
        self.fft_size = fft_size;
        self
    }

    pub fn with_preset(mut self, preset: Preset) -> Self {
        self.preset = preset;
        self
    }
}

/// Parse a preset name from the `--preset` CLI flag.
pub fn parse_preset(name: &str) -> Result<Preset> {
    match name {
        "live_input" => Ok(Preset::LiveInput),
        "music_file" => Ok(Preset::MusicFile),
        "quiet_environment" => Ok(Preset::QuietEnvironment),
        "loud_environment" => Ok(Preset::LoudEnvironment),
        "disabled" => Ok(Preset::Disabled),
        other => Err(AudiovizError::InvalidArgument(format!("unknown preset '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn invalid_sample_rate_rejected() {
        let config = PipelineConfig::default().with_sample_rate(8000);
        assert!(config.validate().is_err());
    }

    #[test]
    fn parse_preset_rejects_unknown_name() {
        assert!(parse_preset("nonexistent").is_err());
    }

    #[test]
    fn parse_preset_accepts_every_named_preset() {
        for name in ["live_input", "music_file", "quiet_environment", "loud_environment", "disabled"] {
            assert!(parse_preset(name).is_ok());
        }
    }
}
