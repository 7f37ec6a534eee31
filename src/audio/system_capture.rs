//! System audio capture via cpal. cpal's host abstraction dispatches to
//! CoreAudio on macOS and to PulseAudio/ALSA on Linux, which is where
//! this back-end's error surface (`SourceError::NativeApi`) ultimately
//! originates.

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use tracing::{debug, info, warn};

use crate::audio::source::{AudioDataCallback, AudioSource, DeviceInfo, SourceBase, SourceStatus};
use crate::audio::types::AudioFormat;
use crate::error::{AudiovizError, Result, SourceError};

/// Input capture bound to the default (or a named) input device.
pub struct SystemCapture {
    base: Arc<SourceBase>,
    device_name: String,
    format: AudioFormat,
    stream: Mutex<Option<Stream>>,
}

impl SystemCapture {
    /// Construct a capture source. Resolves and validates the device
    /// and format eagerly so construction fails fast with
    /// `unsupported_environment` rather than lazily inside `start`.
    pub fn new(device_name: Option<String>, format: AudioFormat) -> Result<Self> {
        let format = format.validate()?;
        let host = cpal::default_host();

        let device = if let Some(name) = device_name.as_ref() {
            let mut devices = host.input_devices().map_err(|e| {
                AudiovizError::UnsupportedEnvironment(format!("failed to enumerate input devices: {e}"))
            })?;
            devices
                .find(|d| d.name().ok().as_deref() == Some(name.as_str()))
                .ok_or_else(|| AudiovizError::Source(SourceError::DeviceNotFound(name.clone())))?
        } else {
            host.default_input_device().ok_or_else(|| {
                AudiovizError::UnsupportedEnvironment("no default input device found".into())
            })?
        };

        let resolved_name = device.name().unwrap_or_else(|_| "unknown".to_string());

        // Eagerly validate that the device can serve some config; the
        // concrete config is renegotiated in `start` since cpal
        // requires the device handle at stream-build time.
        device.default_input_config().map_err(|e| {
            AudiovizError::UnsupportedEnvironment(format!("no usable input config: {e}"))
        })?;

        info!(device = %resolved_name, "resolved input device");

        Ok(SystemCapture {
            base: Arc::new(SourceBase::new()),
            device_name: resolved_name,
            format,
            stream: Mutex::new(None),
        })
    }

    fn best_config(device: &cpal::Device, format: AudioFormat) -> Result<(StreamConfig, SampleFormat)> {
        let mut supported = device.supported_input_configs().map_err(|e| {
            AudiovizError::Source(SourceError::NativeApi(format!("failed to get input configs: {e}")))
        })?;

        let preferred = supported.find(|c| {
            c.channels() == format.channels
                && c.min_sample_rate().0 <= format.sample_rate
                && c.max_sample_rate().0 >= format.sample_rate
                && c.sample_format() == SampleFormat::F32
        });

        if let Some(supported_config) = preferred {
            let sample_format = supported_config.sample_format();
            let config = supported_config
                .with_sample_rate(cpal::SampleRate(format.sample_rate))
                .config();
            return Ok((config, sample_format));
        }

        let default = device.default_input_config().map_err(|e| {
            AudiovizError::Source(SourceError::NativeApi(format!("failed to get default input config: {e}")))
        })?;
        Ok((default.config(), default.sample_format()))
    }
}

impl AudioSource for SystemCapture {
    fn start(&self) -> bool {
        if self.base.status() == SourceStatus::Running {
            return false;
        }
        self.base.set_status(SourceStatus::Starting);

        let host = cpal::default_host();
        let device = match host
            .input_devices()
            .ok()
            .and_then(|mut ds| ds.find(|d| d.name().ok().as_deref() == Some(self.device_name.as_str())))
            .or_else(|| host.default_input_device())
        {
            Some(d) => d,
            None => {
                self.base.set_error("input device vanished before start");
                return false;
            }
        };

        let (config, sample_format) = match Self::best_config(&device, self.format) {
            Ok(c) => c,
            Err(e) => {
                self.base.set_error(e.to_string());
                return false;
            }
        };

        let base = Arc::clone(&self.base);
        let channels = config.channels as usize;

        let err_base = Arc::clone(&self.base);
        let err_fn = move |err: cpal::StreamError| {
            warn!("input stream error: {err}");
            err_base.set_error(format!("input stream error: {err}"));
        };

        let stream_result = match sample_format {
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _| {
                    base.deliver(data);
                },
                err_fn,
                None,
            ),
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _| {
                    let floats: Vec<f32> = data.iter().map(|s| *s as f32 / 32768.0).collect();
                    base.deliver(&floats);
                },
                err_fn,
                None,
            ),
            SampleFormat::U16 => device.build_input_stream(
                &config,
                move |data: &[u16], _| {
                    let floats: Vec<f32> = data
                        .iter()
                        .map(|s| (*s as f32 - 32768.0) / 32768.0)
                        .collect();
                    base.deliver(&floats);
                },
                err_fn,
                None,
            ),
            other => {
                self.base
                    .set_error(format!("unsupported input sample format: {other:?}"));
                return false;
            }
        };

        let stream = match stream_result {
            Ok(s) => s,
            Err(e) => {
                self.base.set_error(format!("failed to build input stream: {e}"));
                return false;
            }
        };

        if let Err(e) = stream.play() {
            self.base.set_error(format!("failed to start input stream: {e}"));
            return false;
        }

        debug!(device = %self.device_name, channels, "input stream running");
        *self.stream.lock().unwrap() = Some(stream);
        self.base.set_status(SourceStatus::Running);
        true
    }

    fn stop(&self) -> bool {
        if matches!(self.base.status(), SourceStatus::Stopped) {
            return false;
        }
        self.base.set_status(SourceStatus::Stopping);
        if let Some(stream) = self.stream.lock().unwrap().take() {
            drop(stream);
        }
        self.base.set_status(SourceStatus::Stopped);
        true
    }

    fn pause(&self) -> bool {
        if self.base.status() != SourceStatus::Running {
            return false;
        }
        if let Some(stream) = self.stream.lock().unwrap().as_ref() {
            if stream.pause().is_err() {
                return false;
            }
        }
        self.base.set_status(SourceStatus::Paused);
        true
    }

    fn resume(&self) -> bool {
        if self.base.status() != SourceStatus::Paused {
            return false;
        }
        if let Some(stream) = self.stream.lock().unwrap().as_ref() {
            if stream.play().is_err() {
                return false;
            }
        }
        self.base.set_status(SourceStatus::Running);
        true
    }

    fn on_audio_data(&self, callback: AudioDataCallback) {
        self.base.on_audio_data(callback);
    }

    fn clear_callbacks(&self) {
        self.base.clear_callbacks();
    }

    fn device_info(&self) -> DeviceInfo {
        let mut info = DeviceInfo::new();
        info.insert("device_name".to_string(), self.device_name.clone());
        info.insert("backend".to_string(), "cpal".to_string());
        info
    }

    fn status(&self) -> SourceStatus {
        self.base.status()
    }

    fn error_message(&self) -> Option<String> {
        self.base.error_message()
    }

    fn sample_rate(&self) -> u32 {
        self.format.sample_rate
    }

    fn channels(&self) -> u16 {
        self.format.channels
    }
}

// SAFETY: `cpal::Stream` is neither `Send` nor `Sync` on every platform.
// The stream handle is only ever touched from `start`/`stop`/`pause`/
// `resume` through the mutex, never from the audio callback thread
// itself (the callback only sees `base`), so moving or sharing
// `SystemCapture` across threads is sound.
unsafe impl Send for SystemCapture {}
unsafe impl Sync for SystemCapture {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_info_reports_backend() {
        let base = Arc::new(SourceBase::new());
        let capture = SystemCapture {
            base,
            device_name: "Test Device".to_string(),
            format: AudioFormat::default_stereo(),
            stream: Mutex::new(None),
        };
        let info = capture.device_info();
        assert_eq!(info.get("backend").map(String::as_str), Some("cpal"));
        assert_eq!(info.get("device_name").map(String::as_str), Some("Test Device"));
    }

    #[test]
    fn stop_on_already_stopped_returns_false() {
        let base = Arc::new(SourceBase::new());
        let capture = SystemCapture {
            base,
            device_name: "Test Device".to_string(),
            format: AudioFormat::default_stereo(),
            stream: Mutex::new(None),
        };
        assert!(!capture.stop());
    }
}
