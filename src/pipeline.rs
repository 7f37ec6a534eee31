//! Wires source -> main buffer -> controls -> analyzer -> downstream
//! sink, and owns the thread that drains `main_audio` into that chain.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{info, warn};

use crate::analyzer::{Analyzer, FrequencyCallback};
use crate::audio::buffer_manager::BufferManager;
use crate::config::PipelineConfig;
use crate::controls::{Controls, LevelCallback};
use crate::error::Result;
use crate::source_manager::{ManagerHealth, SourceManager};

const MAIN_BUFFER_NAME: &str = "main_audio";
const DRAIN_CHUNK_FRAMES: usize = 1024;
const DRAIN_TIMEOUT: Duration = Duration::from_millis(200);

pub type AudioDataSinkCallback = Box<dyn Fn(&[f32]) + Send + Sync>;

/// Top-level orchestrator exposed to the external collaborator
/// (the terminal renderer). Owns every worker thread except the OS
/// audio callback threads spawned by individual sources.
pub struct Pipeline {
    buffer_manager: Arc<BufferManager>,
    source_manager: Arc<SourceManager>,
    controls: Arc<Controls>,
    analyzer: Arc<Analyzer>,
    running: Arc<AtomicBool>,
    drain_thread: Mutex<Option<JoinHandle<()>>>,
    sink: Mutex<Option<Arc<AudioDataSinkCallback>>>,
}

impl Pipeline {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let buffer_manager = Arc::new(BufferManager::new());
        let source_manager = Arc::new(SourceManager::new(
            Arc::clone(&buffer_manager),
            config.sample_rate,
            config.channels,
            Some(config.main_buffer_latency_ms),
        )?);
        let controls = Arc::new(Controls::new());
        let analyzer = Arc::new(Analyzer::new(
            config.sample_rate,
            config.fft_size,
            config.overlap,
            config.window,
        )?);

        controls.apply_preset(config.preset);

        info!(
            sample_rate = config.sample_rate,
            channels = config.channels,
            fft_size = config.fft_size,
            "pipeline constructed"
        );

        Ok(Pipeline {
            buffer_manager,
            source_manager,
            controls,
            analyzer,
            running: Arc::new(AtomicBool::new(false)),
            drain_thread: Mutex::new(None),
            sink: Mutex::new(None),
        })
    }

    pub fn buffer_manager(&self) -> &Arc<BufferManager> {
        &self.buffer_manager
    }

    pub fn source_manager(&self) -> &Arc<SourceManager> {
        &self.source_manager
    }

    pub fn controls(&self) -> &Arc<Controls> {
        &self.controls
    }

    pub fn analyzer(&self) -> &Arc<Analyzer> {
        &self.analyzer
    }

    /// Install the downstream sink invoked with post-controls samples.
    pub fn on_audio_data(&self, callback: impl Fn(&[f32]) + Send + Sync + 'static) {
        *self.sink.lock().unwrap() = Some(Arc::new(Box::new(callback)));
    }

    /// Install the downstream frequency-data sink.
    pub fn on_frequency_data(&self, callback: FrequencyCallback) {
        self.analyzer.on_frequency_data(callback);
    }

    pub fn on_level_update(&self, callback: LevelCallback) {
        self.controls.on_level_update(callback);
    }

    /// Start the drain thread and the current source, if any.
    pub fn start(&self) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            return false;
        }

        self.source_manager.start();

        let buffer_manager = Arc::clone(&self.buffer_manager);
        let controls = Arc::clone(&self.controls);
        let analyzer = Arc::clone(&self.analyzer);
        let running = Arc::clone(&self.running);
        let sink = Arc::clone(&self.sink);

        let handle = std::thread::spawn(move || {
            while running.load(Ordering::Relaxed) {
                let buffer = match buffer_manager.get(MAIN_BUFFER_NAME) {
                    Ok(b) => b,
                    Err(_) => break,
                };
                let samples = buffer.read(DRAIN_CHUNK_FRAMES, Some(DRAIN_TIMEOUT));
                if samples.is_empty() {
                    continue;
                }
                let processed = controls.process(&samples);
                if let Some(sink) = sink.lock().unwrap().as_ref() {
                    sink(&processed);
                }
                analyzer.process_samples(&processed);
            }
        });

        *self.drain_thread.lock().unwrap() = Some(handle);
        true
    }

    /// Switch which source feeds `main_audio`.
    pub fn switch(&self, source_id: &str, fade_ms: Option<u64>) -> bool {
        self.source_manager.switch_to_source(source_id, fade_ms)
    }

    pub fn pause(&self) -> bool {
        self.source_manager.pause()
    }

    pub fn resume(&self) -> bool {
        self.source_manager.resume()
    }

    pub fn health(&self) -> ManagerHealth {
        self.source_manager.health()
    }

    /// Stop the current source, join the drain thread, and tear down
    /// the main buffer. The drain thread observes `running` at every
    /// loop iteration and the buffer is closed before the join, so a
    /// blocked read wakes promptly.
    pub fn stop(&self) -> bool {
        if !self.running.swap(false, Ordering::SeqCst) {
            return false;
        }

        self.source_manager.stop();
        if let Ok(buffer) = self.buffer_manager.get(MAIN_BUFFER_NAME) {
            buffer.close();
        }

        if let Some(handle) = self.drain_thread.lock().unwrap().take() {
            if handle.join().is_err() {
                warn!("pipeline drain thread panicked during shutdown");
            }
        }

        info!("pipeline stopped");
        true
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.running.load(Ordering::Relaxed) {
            self.stop();
        }
    }
}
