//! Common `AudioSource` contract shared by every producer variant
//! (`SystemCapture`, `FilePlayer`): lifecycle state machine, callback
//! registry, and the base record each variant embeds.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Lifecycle state of a source. `Error` is terminal until the owner
/// calls `start` again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    Stopped,
    Starting,
    Running,
    Paused,
    Stopping,
    Error,
}

/// Free-form device metadata surfaced to callers, e.g.
/// `{"device_name": "Built-in Microphone", "backend": "coreaudio"}`.
pub type DeviceInfo = HashMap<String, String>;

/// Callback invoked with interleaved float samples in the source's
/// advertised format. Boxed and stored under a mutex so multiple
/// callbacks can be registered and removed as a batch.
pub type AudioDataCallback = Box<dyn Fn(&[f32]) + Send + Sync>;

/// Shared state every `AudioSource` implementation composes rather than
/// inherits (see design notes: no virtual base, a small base record).
pub struct SourceBase {
    pub status: Mutex<SourceStatus>,
    pub error_message: Mutex<Option<String>>,
    callbacks: Mutex<Vec<Arc<AudioDataCallback>>>,
}

impl Default for SourceBase {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceBase {
    pub fn new() -> Self {
        SourceBase {
            status: Mutex::new(SourceStatus::Stopped),
            error_message: Mutex::new(None),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn status(&self) -> SourceStatus {
        *self.status.lock().unwrap()
    }

    pub fn set_status(&self, status: SourceStatus) {
        *self.status.lock().unwrap() = status;
    }

    pub fn set_error(&self, message: impl Into<String>) {
        *self.error_message.lock().unwrap() = Some(message.into());
        self.set_status(SourceStatus::Error);
    }

    pub fn error_message(&self) -> Option<String> {
        self.error_message.lock().unwrap().clone()
    }

    pub fn on_audio_data(&self, callback: AudioDataCallback) {
        self.callbacks.lock().unwrap().push(Arc::new(callback));
    }

    pub fn clear_callbacks(&self) {
        self.callbacks.lock().unwrap().clear();
    }

    /// Deliver a chunk to every registered callback. Only fires samples
    /// while `running`, per the contract that callbacks never fire
    /// before `running` or after `stopping`. A panicking callback is
    /// caught so it cannot unwind into an OS audio callback frame.
    pub fn deliver(&self, samples: &[f32]) {
        if self.status() != SourceStatus::Running {
            return;
        }
        let callbacks = self.callbacks.lock().unwrap().clone();
        for cb in callbacks {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cb(samples)));
        }
    }
}

/// Uniform lifecycle and audio-data contract for every producer
/// variant. Implementations must never throw into an OS callback frame;
/// failures surface as a transition to `SourceStatus::Error` plus a
/// `false` return from the triggering operation.
pub trait AudioSource: Send {
    /// Start producing audio. Idempotent: calling `start` on an already
    /// running source returns `false`.
    fn start(&self) -> bool;

    /// Stop producing audio and release any OS resources.
    fn stop(&self) -> bool;

    /// Suspend delivery without releasing resources.
    fn pause(&self) -> bool;

    /// Resume a paused source.
    fn resume(&self) -> bool;

    /// Register a callback invoked with interleaved float samples.
    fn on_audio_data(&self, callback: AudioDataCallback);

    /// Remove every registered callback.
    fn clear_callbacks(&self);

    /// Free-form device metadata.
    fn device_info(&self) -> DeviceInfo;

    /// Current lifecycle state.
    fn status(&self) -> SourceStatus;

    /// Last error message, if `status() == Error`.
    fn error_message(&self) -> Option<String>;

    /// Negotiated sample rate.
    fn sample_rate(&self) -> u32;

    /// Negotiated channel count.
    fn channels(&self) -> u16;
}
