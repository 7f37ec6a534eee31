//! Audio subsystem: sample types, ring buffers, the named-buffer
//! registry, and the source abstraction backends.

pub mod buffer_manager;
pub mod file_player;
pub mod ring_buffer;
pub mod source;
pub mod system_capture;
pub mod types;

pub use buffer_manager::{AggregateHealth, BufferManager, BufferedConsumer, BufferedSource, HealthSnapshot, RouteCallback};
pub use ring_buffer::{BufferHealth, RingBuffer, RingBufferStats};
pub use source::{AudioSource, DeviceInfo, SourceStatus};
pub use types::{AudioFormat, AudioFrame};
