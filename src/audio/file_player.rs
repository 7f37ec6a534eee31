//! Decodes compressed audio files via an external decoder subprocess.
//! Two decoder families are supported behind one adapter — an
//! ffmpeg-compatible tool and a sox-compatible tool — either suffices
//! at runtime. Availability is probed with `which`, mirroring how the
//! rest of this codebase checks for optional external tools before
//! shelling out to them.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, warn};

use crate::audio::source::{AudioDataCallback, AudioSource, DeviceInfo, SourceBase, SourceStatus};
use crate::audio::types::i16_to_f32;
use crate::error::{AudiovizError, Result, SourceError};

const SUPPORTED_EXTENSIONS: [&str; 6] = ["mp3", "wav", "flac", "m4a", "aac", "ogg"];
const READ_CHUNK_FRAMES: usize = 1024;

/// One entry in the adapter chain: a command name plus the argv used to
/// build it, expressed as a function of (path, sample_rate, channels,
/// start_seconds) so both probing and decoding share one source of
/// truth.
struct DecoderAdapter {
    command: &'static str,
    build_args: fn(&Path, u32, u16, f64) -> Vec<String>,
}

const ADAPTERS: [DecoderAdapter; 2] = [
    DecoderAdapter {
        command: "ffmpeg",
        build_args: ffmpeg_args,
    },
    DecoderAdapter {
        command: "sox",
        build_args: sox_args,
    },
];

fn ffmpeg_args(path: &Path, sample_rate: u32, channels: u16, start_seconds: f64) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-ss".into(),
        format!("{start_seconds}"),
        "-i".into(),
        path.display().to_string(),
        "-f".into(),
        "s16le".into(),
        "-ar".into(),
        sample_rate.to_string(),
        "-ac".into(),
        channels.to_string(),
        "-".into(),
    ]
}

fn sox_args(path: &Path, sample_rate: u32, channels: u16, start_seconds: f64) -> Vec<String> {
    vec![
        path.display().to_string(),
        "-t".into(),
        "s16".into(),
        "-r".into(),
        sample_rate.to_string(),
        "-c".into(),
        channels.to_string(),
        "-".into(),
        "trim".into(),
        format!("{start_seconds}"),
    ]
}

fn command_available(command: &str) -> bool {
    Command::new("which")
        .arg(command)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

fn first_available_adapter() -> Option<&'static DecoderAdapter> {
    ADAPTERS.iter().find(|a| command_available(a.command))
}

/// Best-effort duration probe: tries `ffprobe` first, then `soxi`.
fn probe_duration_seconds(path: &Path) -> Option<f64> {
    if command_available("ffprobe") {
        let output = Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .output()
            .ok()?;
        if output.status.success() {
            if let Ok(text) = String::from_utf8(output.stdout) {
                if let Ok(seconds) = text.trim().parse::<f64>() {
                    return Some(seconds);
                }
            }
        }
    }
    if command_available("soxi") {
        let output = Command::new("soxi").args(["-D"]).arg(path).output().ok()?;
        if output.status.success() {
            if let Ok(text) = String::from_utf8(output.stdout) {
                if let Ok(seconds) = text.trim().parse::<f64>() {
                    return Some(seconds);
                }
            }
        }
    }
    None
}

struct ReaderState {
    stop_flag: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    child: Arc<Mutex<Option<Child>>>,
}

/// Plays a compressed audio file by decoding it through an external
/// subprocess and streaming the resulting PCM.
pub struct FilePlayer {
    base: Arc<SourceBase>,
    path: PathBuf,
    sample_rate: u32,
    channels: u16,
    duration_seconds: Option<f64>,
    position_frames: Arc<AtomicU64>,
    reader: Mutex<Option<ReaderState>>,
}

impl FilePlayer {
    /// Validate the file and probe its duration. Does not touch the
    /// decoder subprocess yet — that only happens on `start`.
    pub fn new(path: impl Into<PathBuf>, sample_rate: u32, channels: u16) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            return Err(AudiovizError::Source(SourceError::InvalidFile(format!(
                "{} does not exist",
                path.display()
            ))));
        }
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
            return Err(AudiovizError::Source(SourceError::InvalidFile(format!(
                "unsupported extension: .{ext}"
            ))));
        }
        if first_available_adapter().is_none() {
            return Err(AudiovizError::UnsupportedEnvironment(
                "no decoder available (need ffmpeg or sox)".into(),
            ));
        }

        let duration_seconds = probe_duration_seconds(&path);
        debug!(path = %path.display(), ?duration_seconds, "file player constructed");

        Ok(FilePlayer {
            base: Arc::new(SourceBase::new()),
            path,
            sample_rate,
            channels,
            duration_seconds,
            position_frames: Arc::new(AtomicU64::new(0)),
            reader: Mutex::new(None),
        })
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        self.duration_seconds
    }

    pub fn position_seconds(&self) -> f64 {
        self.position_frames.load(Ordering::Relaxed) as f64 / self.sample_rate as f64
    }

    pub fn file_path(&self) -> &Path {
        &self.path
    }

    fn spawn_decoder(&self, start_seconds: f64) -> Result<Child> {
        let adapter = first_available_adapter().ok_or_else(|| {
            AudiovizError::UnsupportedEnvironment("no decoder available (need ffmpeg or sox)".into())
        })?;
        let args = (adapter.build_args)(&self.path, self.sample_rate, self.channels, start_seconds);
        Command::new(adapter.command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| AudiovizError::Source(SourceError::Decoder(format!("failed to spawn {}: {e}", adapter.command))))
    }

    fn start_from(&self, start_seconds: f64) -> bool {
        if self.base.status() == SourceStatus::Running {
            return false;
        }
        self.base.set_status(SourceStatus::Starting);

        let mut child = match self.spawn_decoder(start_seconds) {
            Ok(c) => c,
            Err(e) => {
                self.base.set_error(e.to_string());
                return false;
            }
        };

        let mut stdout = match child.stdout.take() {
            Some(s) => s,
            None => {
                self.base.set_error("decoder produced no stdout handle");
                return false;
            }
        };

        let stop_flag = Arc::new(AtomicBool::new(false));
        let paused = Arc::new(AtomicBool::new(false));
        let child = Arc::new(Mutex::new(Some(child)));

        let base = Arc::clone(&self.base);
        let position_frames = Arc::clone(&self.position_frames);
        let channels = self.channels as usize;
        let stop_flag_thread = Arc::clone(&stop_flag);
        let paused_thread = Arc::clone(&paused);
        let child_thread = Arc::clone(&child);

        let handle = std::thread::spawn(move || {
            let bytes_per_frame = 2 * channels;
            let mut buf = vec![0u8; READ_CHUNK_FRAMES * bytes_per_frame];
            let mut stall_reads = 0u32;

            loop {
                if stop_flag_thread.load(Ordering::Relaxed) {
                    break;
                }
                if paused_thread.load(Ordering::Relaxed) {
                    std::thread::sleep(Duration::from_millis(20));
                    continue;
                }
                match stdout.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        stall_reads = 0;
                        let usable = n - (n % bytes_per_frame);
                        let frames = usable / bytes_per_frame;
                        let mut floats = Vec::with_capacity(usable / 2);
                        for chunk in buf[..usable].chunks_exact(2) {
                            floats.push(i16_to_f32(i16::from_le_bytes([chunk[0], chunk[1]])));
                        }
                        base.deliver(&floats);
                        position_frames.fetch_add(frames as u64, Ordering::Relaxed);
                    }
                    Err(e) => {
                        stall_reads += 1;
                        if stall_reads > 50 {
                            base.set_error(format!("decoder read stalled: {e}"));
                            break;
                        }
                        std::thread::sleep(Duration::from_millis(20));
                    }
                }
            }

            if let Some(mut child) = child_thread.lock().unwrap().take() {
                match child.try_wait() {
                    Ok(Some(status)) if !status.success() => {
                        base.set_error(format!("decoder exited with {status}"));
                    }
                    _ => {
                        let _ = child.kill();
                        let _ = child.wait();
                    }
                }
            }
            if base.status() == SourceStatus::Running || base.status() == SourceStatus::Stopping {
                base.set_status(SourceStatus::Stopped);
            }
        });

        *self.reader.lock().unwrap() = Some(ReaderState {
            stop_flag,
            paused,
            handle: Some(handle),
            child,
        });

        self.base.set_status(SourceStatus::Running);
        true
    }
}

impl AudioSource for FilePlayer {
    fn start(&self) -> bool {
        self.start_from(self.position_seconds())
    }

    fn stop(&self) -> bool {
        if matches!(self.base.status(), SourceStatus::Stopped) {
            return false;
        }
        self.base.set_status(SourceStatus::Stopping);

        let mut reader_guard = self.reader.lock().unwrap();
        if let Some(mut reader) = reader_guard.take() {
            reader.stop_flag.store(true, Ordering::Relaxed);
            if let Some(child) = reader.child.lock().unwrap().as_mut() {
                let _ = child.kill();
            }
            if let Some(handle) = reader.handle.take() {
                // The reader loop observes stop_flag every iteration and
                // the subprocess was just killed above, so this join
                // returns promptly without a separate watchdog timeout.
                if handle.join().is_err() {
                    warn!("file player reader thread panicked");
                }
            }
        }
        self.position_frames.store(0, Ordering::Relaxed);
        self.base.set_status(SourceStatus::Stopped);
        true
    }

    fn pause(&self) -> bool {
        if self.base.status() != SourceStatus::Running {
            return false;
        }
        if let Some(reader) = self.reader.lock().unwrap().as_ref() {
            reader.paused.store(true, Ordering::Relaxed);
            self.base.set_status(SourceStatus::Paused);
            return true;
        }
        false
    }

    fn resume(&self) -> bool {
        if self.base.status() != SourceStatus::Paused {
            return false;
        }
        if let Some(reader) = self.reader.lock().unwrap().as_ref() {
            reader.paused.store(false, Ordering::Relaxed);
            self.base.set_status(SourceStatus::Running);
            return true;
        }
        false
    }

    fn on_audio_data(&self, callback: AudioDataCallback) {
        self.base.on_audio_data(callback);
    }

    fn clear_callbacks(&self) {
        self.base.clear_callbacks();
    }

    fn device_info(&self) -> DeviceInfo {
        let mut info = DeviceInfo::new();
        info.insert("file_path".to_string(), self.path.display().to_string());
        if let Some(d) = self.duration_seconds {
            info.insert("duration_seconds".to_string(), format!("{d:.3}"));
        }
        info
    }

    fn status(&self) -> SourceStatus {
        self.base.status()
    }

    fn error_message(&self) -> Option<String> {
        self.base.error_message()
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }
}

impl FilePlayer {
    /// Re-launch the decoder positioned at `seconds`, replacing the
    /// current reader thread and subprocess.
    pub fn seek(&self, seconds: f64) -> bool {
        let was_running = self.base.status() == SourceStatus::Running;
        if was_running {
            self.stop();
        }
        self.position_frames
            .store((seconds * self.sample_rate as f64) as u64, Ordering::Relaxed);
        if was_running {
            return self.start_from(seconds);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_file() {
        let result = FilePlayer::new("/nonexistent/path/track.mp3", 44100, 2);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("track.xyz");
        std::fs::write(&path, b"not audio").unwrap();
        let result = FilePlayer::new(&path, 44100, 2);
        assert!(result.is_err());
    }

    #[test]
    fn ffmpeg_args_include_seek_and_format() {
        let args = ffmpeg_args(Path::new("/tmp/a.wav"), 44100, 2, 1.5);
        assert!(args.contains(&"s16le".to_string()));
        assert!(args.contains(&"44100".to_string()));
        assert!(args.contains(&"1.5".to_string()));
    }

    #[test]
    fn sox_args_include_trim_position() {
        let args = sox_args(Path::new("/tmp/a.wav"), 48000, 1, 2.0);
        assert!(args.contains(&"trim".to_string()));
        assert!(args.contains(&"2".to_string()) || args.contains(&"2.0".to_string()));
    }
}
