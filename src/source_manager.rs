//! Registry of audio sources and the atomic switch-over coordinator
//! that moves which producer feeds the shared `main_audio` buffer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{info, warn};

use crate::audio::buffer_manager::BufferManager;
use crate::audio::source::{AudioSource, SourceStatus};
use crate::error::{AudiovizError, Result};

const SWITCH_HISTORY_CAPACITY: usize = 64;
const MAIN_BUFFER_NAME: &str = "main_audio";
const DEFAULT_LATENCY_MS: u64 = 50;

/// One entry in the bounded switch-history ring.
#[derive(Debug, Clone)]
pub struct SwitchRecord {
    pub from: Option<String>,
    pub to: String,
    pub timestamp_millis: u64,
    pub success: bool,
    pub error: Option<String>,
}

struct RegisteredSource {
    source: Arc<dyn AudioSource>,
    kind: SourceKind,
    created_at_millis: u64,
}

/// Distinguishes same-type sources so `switch_to_system_audio` /
/// `switch_to_file` can find a matching existing source to reuse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    SystemCapture { device_name: Option<String> },
    File { path: String },
}

/// Manager-level health, distinct from any individual source's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerHealth {
    Healthy,
    Unhealthy,
}

/// Owns `main_audio`, the registry of known sources, and the
/// switch-over state machine. Only one switch may be in flight at a
/// time; a concurrent request is rejected rather than queued.
pub struct SourceManager {
    buffer_manager: Arc<BufferManager>,
    sources: Mutex<HashMap<String, RegisteredSource>>,
    current: Mutex<Option<String>>,
    switching: AtomicBool,
    running: AtomicBool,
    switch_count: AtomicU64,
    history: Mutex<Vec<SwitchRecord>>,
    downstream: Mutex<Option<Arc<dyn Fn(&[f32]) + Send + Sync>>>,
    sample_rate: u32,
}

impl SourceManager {
    pub fn new(buffer_manager: Arc<BufferManager>, sample_rate: u32, channels: u16, latency_ms: Option<u64>) -> Result<Self> {
        let latency_ms = latency_ms.unwrap_or(DEFAULT_LATENCY_MS);
        let capacity = crate::audio::ring_buffer::RingBuffer::size_for_latency(latency_ms, sample_rate, channels);
        buffer_manager.create_buffer(MAIN_BUFFER_NAME, capacity, sample_rate)?;

        Ok(SourceManager {
            buffer_manager,
            sources: Mutex::new(HashMap::new()),
            current: Mutex::new(None),
            switching: AtomicBool::new(false),
            running: AtomicBool::new(false),
            switch_count: AtomicU64::new(0),
            history: Mutex::new(Vec::new()),
            downstream: Mutex::new(None),
            sample_rate,
        })
    }

    /// Register a constructed source under `id`.
    pub fn create_source(&self, id: impl Into<String>, kind: SourceKind, source: Arc<dyn AudioSource>) -> Result<String> {
        let id = id.into();
        let mut sources = self.sources.lock().unwrap();
        sources.insert(
            id.clone(),
            RegisteredSource {
                source,
                kind,
                created_at_millis: now_millis(),
            },
        );
        Ok(id)
    }

    /// Find an existing registered source matching `kind`, if any.
    fn find_matching(&self, kind: &SourceKind) -> Option<String> {
        let sources = self.sources.lock().unwrap();
        sources
            .iter()
            .find(|(_, entry)| &entry.kind == kind)
            .map(|(id, _)| id.clone())
    }

    /// Reuse a matching `SystemCapture` source or create one, then
    /// switch to it.
    pub fn switch_to_system_audio(&self, device_name: Option<String>, fade_ms: Option<u64>) -> Result<bool> {
        let kind = SourceKind::SystemCapture { device_name: device_name.clone() };
        let id = match self.find_matching(&kind) {
            Some(id) => id,
            None => {
                let format = crate::audio::types::AudioFormat::default_stereo();
                let source = crate::audio::system_capture::SystemCapture::new(device_name, format)
                    .map_err(|e| AudiovizError::SwitchFailed(e.to_string()))?;
                let id = format!("system-{}", now_millis());
                self.create_source(id.clone(), kind, Arc::new(source))?;
                id
            }
        };
        Ok(self.switch_to_source(&id, fade_ms))
    }

    /// Reuse a matching `FilePlayer` source or create one, then switch
    /// to it.
    pub fn switch_to_file(&self, path: impl Into<String>, channels: u16, fade_ms: Option<u64>) -> Result<bool> {
        let path = path.into();
        let kind = SourceKind::File { path: path.clone() };
        let id = match self.find_matching(&kind) {
            Some(id) => id,
            None => {
                let source = crate::audio::file_player::FilePlayer::new(&path, self.sample_rate, channels)?;
                let id = format!("file-{}", now_millis());
                self.create_source(id.clone(), kind, Arc::new(source))?;
                id
            }
        };
        Ok(self.switch_to_source(&id, fade_ms))
    }

    /// Atomically move `main_audio`'s feed from the current source to
    /// `id`. Rejects overlapping switches. On any step failure the
    /// manager is left pointed at whichever source is actually live:
    /// the old one if its `stop` failed, the new one if `start`
    /// succeeded.
    pub fn switch_to_source(&self, id: &str, fade_ms: Option<u64>) -> bool {
        if self.switching.swap(true, Ordering::SeqCst) {
            return false;
        }
        let result = self.do_switch(id, fade_ms);
        self.switching.store(false, Ordering::SeqCst);

        let success = result.is_ok();
        let from = self.current.lock().unwrap().clone();
        let record = SwitchRecord {
            from: if success { from } else { None },
            to: id.to_string(),
            timestamp_millis: now_millis(),
            success,
            error: result.err().map(|e| e.to_string()),
        };
        self.push_history(record);
        if success {
            self.switch_count.fetch_add(1, Ordering::SeqCst);
        }
        success
    }

    fn do_switch(&self, id: &str, fade_ms: Option<u64>) -> Result<()> {
        let sources = self.sources.lock().unwrap();
        let target = sources
            .get(id)
            .ok_or_else(|| AudiovizError::SwitchFailed(format!("no source registered as '{id}'")))?;
        let target_source = Arc::clone(&target.source);
        drop(sources);

        let current_id = self.current.lock().unwrap().clone();
        let manager_running = self.running.load(Ordering::SeqCst);

        if let Some(ms) = fade_ms {
            if ms > 0 {
                std::thread::sleep(Duration::from_millis(ms / 2));
            }
        }

        if let Some(current_id) = &current_id {
            let sources = self.sources.lock().unwrap();
            if let Some(current) = sources.get(current_id) {
                if !current.source.stop() && current.source.status() != SourceStatus::Stopped {
                    return Err(AudiovizError::SwitchFailed(format!(
                        "failed to stop current source '{current_id}'"
                    )));
                }
            }
        }

        self.buffer_manager.get(MAIN_BUFFER_NAME)?.clear();

        let buffer_manager = Arc::clone(&self.buffer_manager);
        target_source.clear_callbacks();
        target_source.on_audio_data(Box::new(move |samples| {
            if let Err(e) = buffer_manager.write(MAIN_BUFFER_NAME, samples) {
                warn!("failed writing to main_audio: {e}");
            }
        }));

        if manager_running && !target_source.start() {
            return Err(AudiovizError::SwitchFailed(format!("failed to start source '{id}'")));
        }

        *self.current.lock().unwrap() = Some(id.to_string());

        if let Some(ms) = fade_ms {
            if ms > 0 {
                std::thread::sleep(Duration::from_millis(ms / 2));
            }
        }

        info!(to = id, "source switch complete");
        Ok(())
    }

    fn push_history(&self, record: SwitchRecord) {
        let mut history = self.history.lock().unwrap();
        history.push(record);
        let len = history.len();
        if len > SWITCH_HISTORY_CAPACITY {
            history.drain(0..len - SWITCH_HISTORY_CAPACITY);
        }
    }

    pub fn history(&self) -> Vec<SwitchRecord> {
        self.history.lock().unwrap().clone()
    }

    pub fn switch_count(&self) -> u64 {
        self.switch_count.load(Ordering::SeqCst)
    }

    pub fn current(&self) -> Option<String> {
        self.current.lock().unwrap().clone()
    }

    /// Delegate to the current source. Forbidden while a switch is in
    /// flight. Tracks manager-level "running" independent of whether a
    /// current source is registered yet, so a later `switch_to_source`
    /// knows to start its target automatically.
    pub fn start(&self) -> bool {
        if self.switching.load(Ordering::SeqCst) {
            return false;
        }
        self.running.store(true, Ordering::SeqCst);
        self.with_current(|s| s.start())
    }

    pub fn stop(&self) -> bool {
        if self.switching.load(Ordering::SeqCst) {
            return false;
        }
        self.running.store(false, Ordering::SeqCst);
        self.with_current(|s| s.stop())
    }

    pub fn pause(&self) -> bool {
        if self.switching.load(Ordering::SeqCst) {
            return false;
        }
        self.with_current(|s| s.pause())
    }

    pub fn resume(&self) -> bool {
        if self.switching.load(Ordering::SeqCst) {
            return false;
        }
        self.with_current(|s| s.resume())
    }

    fn with_current(&self, f: impl FnOnce(&Arc<dyn AudioSource>) -> bool) -> bool {
        let current_id = match self.current.lock().unwrap().clone() {
            Some(id) => id,
            None => return false,
        };
        let sources = self.sources.lock().unwrap();
        match sources.get(&current_id) {
            Some(entry) => f(&entry.source),
            None => false,
        }
    }

    /// Install the downstream sink, invoked once per chunk after
    /// `main_audio` routing.
    pub fn on_audio_data(&self, callback: impl Fn(&[f32]) + Send + Sync + 'static) -> Result<()> {
        let callback: Arc<dyn Fn(&[f32]) + Send + Sync> = Arc::new(callback);
        *self.downstream.lock().unwrap() = Some(Arc::clone(&callback));
        self.buffer_manager.route(
            MAIN_BUFFER_NAME,
            Box::new(move |samples: &[f32]| callback(samples)),
        )
    }

    /// Remove a registered source. Refuses if it is the current source.
    pub fn remove_source(&self, id: &str) -> bool {
        if self.current.lock().unwrap().as_deref() == Some(id) {
            return false;
        }
        self.sources.lock().unwrap().remove(id).is_some()
    }

    /// `healthy` iff no current source is in `error`, the current
    /// source (if any) is running, and `main_audio` itself is healthy.
    pub fn health(&self) -> ManagerHealth {
        let main_healthy = self
            .buffer_manager
            .get(MAIN_BUFFER_NAME)
            .map(|b| b.stats().status == crate::audio::ring_buffer::BufferHealth::Healthy)
            .unwrap_or(false);

        let current_ok = match self.current.lock().unwrap().clone() {
            None => true,
            Some(id) => {
                let sources = self.sources.lock().unwrap();
                sources
                    .get(&id)
                    .map(|e| e.source.status() == SourceStatus::Running)
                    .unwrap_or(false)
            }
        };

        if main_healthy && current_ok {
            ManagerHealth::Healthy
        } else {
            ManagerHealth::Unhealthy
        }
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::source::{AudioDataCallback, DeviceInfo};
    use std::sync::atomic::AtomicUsize;

    struct DummySource {
        base: Arc<crate::audio::source::SourceBase>,
        id: &'static str,
        fail_start: bool,
    }

    impl DummySource {
        fn new(id: &'static str) -> Self {
            DummySource {
                base: Arc::new(crate::audio::source::SourceBase::new()),
                id,
                fail_start: false,
            }
        }

        /// Simulate a hardware/decoder start failure.
        fn failing(id: &'static str) -> Self {
            DummySource {
                base: Arc::new(crate::audio::source::SourceBase::new()),
                id,
                fail_start: true,
            }
        }

        /// Simulate an in-flight audio callback delivering a chunk.
        fn push(&self, samples: &[f32]) {
            self.base.deliver(samples);
        }
    }

    impl AudioSource for DummySource {
        fn start(&self) -> bool {
            if self.fail_start {
                self.base.set_error("simulated start failure");
                return false;
            }
            self.base.set_status(SourceStatus::Running);
            true
        }
        fn stop(&self) -> bool {
            self.base.set_status(SourceStatus::Stopped);
            true
        }
        fn pause(&self) -> bool {
            self.base.set_status(SourceStatus::Paused);
            true
        }
        fn resume(&self) -> bool {
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
            DeviceInfo::new()
        }
        fn status(&self) -> SourceStatus {
            self.base.status()
        }
        fn error_message(&self) -> Option<String> {
            self.base.error_message()
        }
        fn sample_rate(&self) -> u32 {
            44100
        }
        fn channels(&self) -> u16 {
            2
        }
    }

    fn new_manager() -> SourceManager {
        let bm = Arc::new(BufferManager::new());
        SourceManager::new(bm, 44100, 2, Some(50)).unwrap()
    }

    #[test]
    fn s7_source_switch_updates_current_and_count() {
        let mgr = new_manager();
        let a = Arc::new(DummySource::new("A"));
        let b = Arc::new(DummySource::new("B"));
        mgr.create_source("A", SourceKind::File { path: "a.wav".into() }, a).unwrap();
        mgr.create_source("B", SourceKind::File { path: "b.wav".into() }, b).unwrap();

        assert!(mgr.switch_to_source("A", None));
        assert!(mgr.switch_to_source("B", None));

        assert_eq!(mgr.current().as_deref(), Some("B"));
        assert_eq!(mgr.switch_count(), 2);
        let history = mgr.history();
        assert!(history[history.len() - 2].success);
        assert!(history[history.len() - 1].success);
    }

    #[test]
    fn switch_to_unknown_source_fails_and_is_recorded() {
        let mgr = new_manager();
        assert!(!mgr.switch_to_source("missing", None));
        let history = mgr.history();
        assert!(!history.last().unwrap().success);
    }

    #[test]
    fn remove_current_source_is_refused() {
        let mgr = new_manager();
        let a = Arc::new(DummySource::new("A"));
        mgr.create_source("A", SourceKind::File { path: "a.wav".into() }, a).unwrap();
        mgr.switch_to_source("A", None);
        assert!(!mgr.remove_source("A"));
    }

    #[test]
    fn failed_start_leaves_current_pointed_at_old_source() {
        let mgr = new_manager();
        let a = Arc::new(DummySource::new("A"));
        let b = Arc::new(DummySource::failing("B"));
        mgr.create_source("A", SourceKind::File { path: "a.wav".into() }, a).unwrap();
        mgr.create_source("B", SourceKind::File { path: "b.wav".into() }, b).unwrap();

        mgr.start();
        assert!(mgr.switch_to_source("A", None));
        assert!(!mgr.switch_to_source("B", None));

        // B's start() failed, so current must still point at A, not B.
        assert_eq!(mgr.current().as_deref(), Some("A"));
        let history = mgr.history();
        assert!(!history.last().unwrap().success);
    }

    #[test]
    fn s8_no_callback_fires_for_old_source_after_switch_returns() {
        let mgr = new_manager();
        let a = Arc::new(DummySource::new("A"));
        let b = Arc::new(DummySource::new("B"));
        mgr.create_source("A", SourceKind::File { path: "a.wav".into() }, Arc::clone(&a)).unwrap();
        mgr.create_source("B", SourceKind::File { path: "b.wav".into() }, b).unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);
        mgr.on_audio_data(move |samples| {
            hits2.fetch_add(samples.len(), Ordering::SeqCst);
        })
        .unwrap();

        mgr.start();
        assert!(mgr.switch_to_source("A", None));
        a.push(&[1.0; 4]);
        assert_eq!(hits.load(Ordering::SeqCst), 4);

        assert!(mgr.switch_to_source("B", None));
        // A was stopped as part of the switch; a late in-flight callback
        // simulating its old audio thread must not reach the downstream
        // sink once the switch has returned.
        a.push(&[1.0; 4]);
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn routing_fans_out_to_downstream_sink() {
        let mgr = new_manager();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);
        mgr.on_audio_data(move |samples| {
            hits2.fetch_add(samples.len(), Ordering::SeqCst);
        })
        .unwrap();

        mgr.buffer_manager.write("main_audio", &[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }
}
