//! Named-buffer registry with fan-out routing from producer writes to
//! consumer callbacks, plus aggregate health reporting.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::audio::ring_buffer::{BufferHealth, RingBuffer, RingBufferStats};
use crate::error::{AudiovizError, BufferError, Result};

/// A route callback invoked with a defensive copy of the samples just
/// written to a buffer. Invoked in registration order, outside the
/// buffer's own lock.
pub type RouteCallback = Box<dyn Fn(&[f32]) + Send + Sync>;

struct Entry {
    buffer: Arc<RingBuffer>,
    routes: Mutex<Vec<Arc<RouteCallback>>>,
}

/// Overall health across all managed buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

/// A timestamped snapshot of aggregate buffer health, retained for the
/// last 60 seconds by `monitor_health`.
#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub at: Instant,
    pub health: AggregateHealth,
    pub buffer_count: usize,
    pub total_overruns: u64,
    pub total_underruns: u64,
    pub mean_utilization: f32,
}

/// Registry of named ring buffers with fan-out routing.
pub struct BufferManager {
    buffers: Mutex<HashMap<String, Arc<Entry>>>,
    health_history: Mutex<Vec<HealthSnapshot>>,
}

impl Default for BufferManager {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferManager {
    pub fn new() -> Self {
        BufferManager {
            buffers: Mutex::new(HashMap::new()),
            health_history: Mutex::new(Vec::new()),
        }
    }

    /// Create a named buffer. Errors if a buffer with this name already
    /// exists.
    pub fn create_buffer(&self, name: &str, capacity: usize, sample_rate: u32) -> Result<Arc<RingBuffer>> {
        let mut buffers = self.buffers.lock().unwrap();
        if buffers.contains_key(name) {
            return Err(AudiovizError::Buffer(BufferError::AlreadyExists(name.to_string())));
        }
        let buffer = Arc::new(RingBuffer::new(name, capacity, sample_rate));
        buffers.insert(
            name.to_string(),
            Arc::new(Entry {
                buffer: Arc::clone(&buffer),
                routes: Mutex::new(Vec::new()),
            }),
        );
        debug!(buffer = name, capacity, "created buffer");
        Ok(buffer)
    }

    /// Fetch an existing buffer by name.
    pub fn get(&self, name: &str) -> Result<Arc<RingBuffer>> {
        let buffers = self.buffers.lock().unwrap();
        buffers
            .get(name)
            .map(|e| Arc::clone(&e.buffer))
            .ok_or_else(|| AudiovizError::Buffer(BufferError::NotFound(name.to_string())))
    }

    /// Remove a named buffer, closing it first.
    pub fn remove(&self, name: &str) -> Result<()> {
        let mut buffers = self.buffers.lock().unwrap();
        match buffers.remove(name) {
            Some(entry) => {
                entry.buffer.close();
                Ok(())
            }
            None => Err(AudiovizError::Buffer(BufferError::NotFound(name.to_string()))),
        }
    }

    /// Append a route callback for a named buffer.
    pub fn route(&self, name: &str, callback: RouteCallback) -> Result<()> {
        let buffers = self.buffers.lock().unwrap();
        let entry = buffers
            .get(name)
            .ok_or_else(|| AudiovizError::Buffer(BufferError::NotFound(name.to_string())))?;
        entry.routes.lock().unwrap().push(Arc::new(callback));
        Ok(())
    }

    /// Remove all route callbacks for a named buffer.
    pub fn clear_routes(&self, name: &str) -> Result<()> {
        let buffers = self.buffers.lock().unwrap();
        let entry = buffers
            .get(name)
            .ok_or_else(|| AudiovizError::Buffer(BufferError::NotFound(name.to_string())))?;
        entry.routes.lock().unwrap().clear();
        Ok(())
    }

    /// Write samples to a named buffer, then fan them out to every
    /// registered route as an independent, defensively-copied slice. A
    /// callback that panics is caught and logged; it never interrupts
    /// the write path or other consumers. Routes are invoked after the
    /// routes lock is released, so a callback may freely call back into
    /// `route`/`clear_routes`/`write` on this or any other buffer
    /// without deadlocking.
    pub fn write(&self, name: &str, samples: &[f32]) -> Result<usize> {
        let entry = {
            let buffers = self.buffers.lock().unwrap();
            Arc::clone(
                buffers
                    .get(name)
                    .ok_or_else(|| AudiovizError::Buffer(BufferError::NotFound(name.to_string())))?,
            )
        };

        let written = entry.buffer.write(samples, None)?;

        let routes = entry.routes.lock().unwrap().clone();
        for (i, callback) in routes.iter().enumerate() {
            let copy = samples.to_vec();
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback(&copy);
            }));
            if result.is_err() {
                warn!(buffer = name, route_index = i, "route callback panicked; continuing");
            }
        }

        Ok(written)
    }

    /// Per-buffer health + aggregate statistics.
    pub fn aggregate_stats(&self) -> (Vec<(String, RingBufferStats)>, AggregateHealth) {
        let buffers = self.buffers.lock().unwrap();
        let mut per_buffer = Vec::with_capacity(buffers.len());
        for (name, entry) in buffers.iter() {
            per_buffer.push((name.clone(), entry.buffer.stats()));
        }
        drop(buffers);

        let health = Self::compute_health(&per_buffer);
        (per_buffer, health)
    }

    fn compute_health(stats: &[(String, RingBufferStats)]) -> AggregateHealth {
        if stats.is_empty() {
            return AggregateHealth::Healthy;
        }
        let unhealthy = stats
            .iter()
            .filter(|(_, s)| s.status != BufferHealth::Healthy)
            .count();
        if unhealthy == 0 {
            AggregateHealth::Healthy
        } else if unhealthy * 2 < stats.len() {
            AggregateHealth::Degraded
        } else {
            AggregateHealth::Unhealthy
        }
    }

    /// Append a timestamped snapshot to the health history, trimming
    /// entries older than 60 seconds.
    pub fn monitor_health(&self) -> HealthSnapshot {
        let (per_buffer, health) = self.aggregate_stats();
        let total_overruns: u64 = per_buffer.iter().map(|(_, s)| s.overruns).sum();
        let total_underruns: u64 = per_buffer.iter().map(|(_, s)| s.underruns).sum();
        let mean_utilization = if per_buffer.is_empty() {
            0.0
        } else {
            per_buffer.iter().map(|(_, s)| s.utilization).sum::<f32>() / per_buffer.len() as f32
        };

        let snapshot = HealthSnapshot {
            at: Instant::now(),
            health,
            buffer_count: per_buffer.len(),
            total_overruns,
            total_underruns,
            mean_utilization,
        };

        let mut history = self.health_history.lock().unwrap();
        history.push(snapshot.clone());
        let cutoff = Instant::now() - Duration::from_secs(60);
        history.retain(|s| s.at >= cutoff);
        snapshot
    }
}

/// Convenience wrapper for a single producer writing to one named buffer.
pub struct BufferedSource<'a> {
    manager: &'a BufferManager,
    name: String,
}

impl<'a> BufferedSource<'a> {
    pub fn new(manager: &'a BufferManager, name: impl Into<String>) -> Self {
        BufferedSource { manager, name: name.into() }
    }

    pub fn write(&self, samples: &[f32]) -> Result<usize> {
        self.manager.write(&self.name, samples)
    }

    pub fn stats(&self) -> Result<RingBufferStats> {
        Ok(self.manager.get(&self.name)?.stats())
    }

    pub fn healthy(&self) -> Result<bool> {
        Ok(self.manager.get(&self.name)?.stats().status == BufferHealth::Healthy)
    }

    pub fn clear(&self) -> Result<()> {
        self.manager.get(&self.name)?.clear();
        Ok(())
    }
}

/// Convenience wrapper for a single consumer reading from one named
/// buffer.
pub struct BufferedConsumer<'a> {
    manager: &'a BufferManager,
    name: String,
}

impl<'a> BufferedConsumer<'a> {
    pub fn new(manager: &'a BufferManager, name: impl Into<String>) -> Self {
        BufferedConsumer { manager, name: name.into() }
    }

    pub fn read(&self, count: usize, timeout: Option<Duration>) -> Result<Vec<f32>> {
        Ok(self.manager.get(&self.name)?.read(count, timeout))
    }

    pub fn peek(&self, count: usize) -> Result<Vec<f32>> {
        Ok(self.manager.get(&self.name)?.peek(count))
    }

    pub fn route_to(&self, callback: RouteCallback) -> Result<()> {
        self.manager.route(&self.name, callback)
    }

    pub fn stats(&self) -> Result<RingBufferStats> {
        Ok(self.manager.get(&self.name)?.stats())
    }

    pub fn healthy(&self) -> Result<bool> {
        Ok(self.manager.get(&self.name)?.stats().status == BufferHealth::Healthy)
    }

    pub fn data_available(&self) -> Result<bool> {
        Ok(self.manager.get(&self.name)?.stats().size > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn create_get_remove_roundtrip() {
        let mgr = BufferManager::new();
        mgr.create_buffer("main_audio", 16, 44100).unwrap();
        assert!(mgr.get("main_audio").is_ok());
        mgr.remove("main_audio").unwrap();
        assert!(mgr.get("main_audio").is_err());
    }

    #[test]
    fn duplicate_create_errors() {
        let mgr = BufferManager::new();
        mgr.create_buffer("a", 8, 44100).unwrap();
        assert!(mgr.create_buffer("a", 8, 44100).is_err());
    }

    #[test]
    fn s9_routing_fans_out_to_every_consumer() {
        let mgr = BufferManager::new();
        mgr.create_buffer("main_audio", 64, 44100).unwrap();

        let counts: [Arc<AtomicUsize>; 3] = [
            Arc::new(AtomicUsize::new(0)),
            Arc::new(AtomicUsize::new(0)),
            Arc::new(AtomicUsize::new(0)),
        ];
        for c in &counts {
            let c = Arc::clone(c);
            mgr.route(
                "main_audio",
                Box::new(move |samples: &[f32]| {
                    c.fetch_add(samples.len(), Ordering::SeqCst);
                }),
            )
            .unwrap();
        }

        mgr.write("main_audio", &[0.0; 10]).unwrap();
        mgr.write("main_audio", &[0.0; 5]).unwrap();

        for c in &counts {
            assert_eq!(c.load(Ordering::SeqCst), 15);
        }
    }

    #[test]
    fn panicking_route_does_not_block_others() {
        let mgr = BufferManager::new();
        mgr.create_buffer("main_audio", 64, 44100).unwrap();

        mgr.route("main_audio", Box::new(|_: &[f32]| panic!("boom"))).unwrap();

        let hit = Arc::new(AtomicUsize::new(0));
        let hit2 = Arc::clone(&hit);
        mgr.route(
            "main_audio",
            Box::new(move |_: &[f32]| {
                hit2.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

        mgr.write("main_audio", &[1.0, 2.0]).unwrap();
        assert_eq!(hit.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn aggregate_health_degraded_below_half_unhealthy() {
        let mgr = BufferManager::new();
        mgr.create_buffer("a", 4, 44100).unwrap();
        mgr.create_buffer("b", 4, 44100).unwrap();
        mgr.create_buffer("c", 4, 44100).unwrap();
        // Force an overrun on exactly one of three buffers.
        mgr.get("a").unwrap().write(&[1.0; 8], None).unwrap();

        let (_, health) = mgr.aggregate_stats();
        assert_eq!(health, AggregateHealth::Degraded);
    }

    #[test]
    fn monitor_health_appends_snapshot() {
        let mgr = BufferManager::new();
        mgr.create_buffer("a", 4, 44100).unwrap();
        let snap = mgr.monitor_health();
        assert_eq!(snap.buffer_count, 1);
    }
}
