//! Error taxonomy for the audio pipeline.
//!
//! Mirrors the error classes in the design: `invalid_argument`,
//! `unsupported_environment`, `source_error`, `switch_failed`,
//! `callback_error`. Buffer overrun/underrun are accounted, not
//! propagated, so they have no variant here — see `RingBufferStats`.

use thiserror::Error;

/// Top-level error type for the audio pipeline.
#[derive(Debug, Error)]
pub enum AudiovizError {
    /// Parameter out of range; raised synchronously from a constructor or
    /// setter, with no state change.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No usable native audio system, no available decoder, or an
    /// unsupported OS; raised at source construction.
    #[error("unsupported environment: {0}")]
    UnsupportedEnvironment(String),

    /// Runtime failure inside a source.
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// A source switch was rejected or partially completed.
    #[error("switch failed: {0}")]
    SwitchFailed(String),

    /// The named buffer does not exist.
    #[error("buffer error: {0}")]
    Buffer(#[from] BufferError),

    /// IO errors from file or subprocess operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by an `AudioSource` implementation.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The requested device was not found.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// The native audio API reported an error code.
    #[error("native audio API error: {0}")]
    NativeApi(String),

    /// A decoder subprocess exited non-zero or never started.
    #[error("decoder failure: {0}")]
    Decoder(String),

    /// A read stalled past the configured deadline.
    #[error("read stalled past deadline ({0} ms)")]
    ReadStalled(u64),

    /// The file path does not exist or has an unsupported extension.
    #[error("invalid audio file: {0}")]
    InvalidFile(String),
}

/// Errors surfaced by `BufferManager` / `RingBuffer` lookups.
#[derive(Debug, Error)]
pub enum BufferError {
    /// No buffer is registered under this name.
    #[error("no buffer named '{0}'")]
    NotFound(String),

    /// A buffer with this name already exists.
    #[error("buffer '{0}' already exists")]
    AlreadyExists(String),

    /// The buffer has been shut down and refuses further writes.
    #[error("buffer '{0}' is closed")]
    Closed(String),
}

/// Result type alias using `AudiovizError`.
pub type Result<T> = std::result::Result<T, AudiovizError>;

/// Recommended recovery strategy for an error, mirroring the propagation
/// policy in the design: native/system failures are caught at the
/// boundary and translated into state transitions; only constructor
/// validation raises synchronously.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    /// Retry the triggering operation.
    Retry {
        max_attempts: u32,
        delay_ms: u64,
    },
    /// Drop the stream and await caller-initiated recovery
    /// (`switch_to_source` or `start`).
    AwaitRecovery,
    /// Fatal — the process cannot continue.
    Fatal,
}

impl AudiovizError {
    /// Recommended recovery strategy for this error.
    pub fn recovery_strategy(&self) -> RecoveryStrategy {
        match self {
            AudiovizError::Source(SourceError::ReadStalled(_)) => RecoveryStrategy::Retry {
                max_attempts: 3,
                delay_ms: 200,
            },
            AudiovizError::Source(_) => RecoveryStrategy::AwaitRecovery,
            AudiovizError::SwitchFailed(_) => RecoveryStrategy::AwaitRecovery,
            AudiovizError::UnsupportedEnvironment(_) => RecoveryStrategy::Fatal,
            AudiovizError::InvalidArgument(_) => RecoveryStrategy::Fatal,
            AudiovizError::Buffer(_) => RecoveryStrategy::AwaitRecovery,
            AudiovizError::Io(_) => RecoveryStrategy::Retry {
                max_attempts: 2,
                delay_ms: 100,
            },
        }
    }

    /// A short, stable code for logs and metrics.
    pub fn error_code(&self) -> &'static str {
        match self {
            AudiovizError::InvalidArgument(_) => "AV_ARG_001",
            AudiovizError::UnsupportedEnvironment(_) => "AV_ENV_001",
            AudiovizError::Source(e) => match e {
                SourceError::DeviceNotFound(_) => "AV_SRC_001",
                SourceError::NativeApi(_) => "AV_SRC_002",
                SourceError::Decoder(_) => "AV_SRC_003",
                SourceError::ReadStalled(_) => "AV_SRC_004",
                SourceError::InvalidFile(_) => "AV_SRC_005",
            },
            AudiovizError::SwitchFailed(_) => "AV_SWI_001",
            AudiovizError::Buffer(e) => match e {
                BufferError::NotFound(_) => "AV_BUF_001",
                BufferError::AlreadyExists(_) => "AV_BUF_002",
                BufferError::Closed(_) => "AV_BUF_003",
            },
            AudiovizError::Io(_) => "AV_IO_001",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable_strings() {
        let e = AudiovizError::Buffer(BufferError::NotFound("main_audio".into()));
        assert_eq!(e.error_code(), "AV_BUF_001");
        assert_eq!(e.to_string(), "buffer error: no buffer named 'main_audio'");
    }

    #[test]
    fn device_failure_awaits_recovery_not_retry() {
        let e = AudiovizError::Source(SourceError::NativeApi("HAL error -50".into()));
        assert_eq!(e.recovery_strategy(), RecoveryStrategy::AwaitRecovery);
    }

    #[test]
    fn invalid_argument_is_fatal_for_the_call() {
        let e = AudiovizError::InvalidArgument("gain must be in [0, 10]".into());
        assert_eq!(e.recovery_strategy(), RecoveryStrategy::Fatal);
    }
}
