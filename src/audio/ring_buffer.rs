//! Fixed-capacity circular buffer of float samples with blocking/timeout
//! read and write, drop-oldest overrun handling, and overrun/underrun
//! accounting.
//!
//! Safe for one or more producers and one or more consumers concurrently:
//! a single mutex guards the backing storage, with two condition
//! variables (`not_empty`, `not_full`) for producers and consumers to
//! wait on. No callback is ever invoked while the mutex is held.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::{AudiovizError, BufferError, Result};

/// Buffer health, decaying back to `Healthy` once 100 ms pass without a
/// fresh overrun/underrun.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferHealth {
    Healthy,
    Overrun,
    Underrun,
    Error,
}

/// Point-in-time snapshot of buffer occupancy and counters.
#[derive(Debug, Clone, Copy)]
pub struct RingBufferStats {
    pub capacity: usize,
    pub size: usize,
    pub utilization: f32,
    pub status: BufferHealth,
    pub overruns: u64,
    pub underruns: u64,
    pub total_written: u64,
    pub total_read: u64,
    pub latency_samples: usize,
    pub latency_ms: f64,
}

struct Inner {
    data: Vec<f32>,
    capacity: usize,
    size: usize,
    read_pos: usize,
    write_pos: usize,
    total_written: u64,
    total_read: u64,
    dropped_by_overrun: u64,
    overruns: u64,
    underruns: u64,
    last_overrun: Option<Instant>,
    last_underrun: Option<Instant>,
    closed: bool,
}

impl Inner {
    fn health(&self) -> BufferHealth {
        if self.closed {
            return BufferHealth::Error;
        }
        let now = Instant::now();
        let window = Duration::from_millis(100);
        if self.last_overrun.is_some_and(|t| now.duration_since(t) < window) {
            BufferHealth::Overrun
        } else if self.last_underrun.is_some_and(|t| now.duration_since(t) < window) {
            BufferHealth::Underrun
        } else {
            BufferHealth::Healthy
        }
    }

    /// Push one sample, dropping the oldest sample on overrun.
    fn push_overwrite(&mut self, sample: f32) {
        if self.size == self.capacity {
            self.read_pos = (self.read_pos + 1) % self.capacity;
            self.size -= 1;
            self.dropped_by_overrun += 1;
            self.overruns += 1;
            self.last_overrun = Some(Instant::now());
        }
        self.data[self.write_pos] = sample;
        self.write_pos = (self.write_pos + 1) % self.capacity;
        self.size += 1;
        self.total_written += 1;
    }

    fn pop_one(&mut self) -> Option<f32> {
        if self.size == 0 {
            return None;
        }
        let sample = self.data[self.read_pos];
        self.read_pos = (self.read_pos + 1) % self.capacity;
        self.size -= 1;
        self.total_read += 1;
        Some(sample)
    }
}

/// Thread-safe, fixed-capacity ring buffer of `f32` samples.
pub struct RingBuffer {
    inner: Mutex<Inner>,
    not_empty: Condvar,
    not_full: Condvar,
    name: String,
    sample_rate: u32,
}

impl RingBuffer {
    /// Create a new ring buffer with room for `capacity` samples.
    pub fn new(name: impl Into<String>, capacity: usize, sample_rate: u32) -> Self {
        RingBuffer {
            inner: Mutex::new(Inner {
                data: vec![0.0; capacity.max(1)],
                capacity: capacity.max(1),
                size: 0,
                read_pos: 0,
                write_pos: 0,
                total_written: 0,
                total_read: 0,
                dropped_by_overrun: 0,
                overruns: 0,
                underruns: 0,
                last_overrun: None,
                last_underrun: None,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            name: name.into(),
            sample_rate,
        }
    }

    /// `ceil(latency_ms/1000 * sample_rate) * channels`, the buffer size
    /// needed to hold `latency_ms` of audio.
    pub fn size_for_latency(latency_ms: u64, sample_rate: u32, channels: u16) -> usize {
        let frames = ((latency_ms as f64 / 1000.0) * sample_rate as f64).ceil() as usize;
        frames * channels as usize
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Write up to `samples.len()` floats.
    ///
    /// Without a `timeout`, never blocks: once capacity is exhausted the
    /// buffer drops the oldest sample per incoming sample (overrun) and
    /// still accepts every input sample, returning `samples.len()`. With a
    /// `timeout`, blocks for free space up to the deadline and returns the
    /// actual count written without dropping.
    pub fn write(&self, samples: &[f32], timeout: Option<Duration>) -> Result<usize> {
        if samples.is_empty() {
            return Ok(0);
        }
        let mut guard = self.inner.lock().unwrap();
        if guard.closed {
            return Err(AudiovizError::Buffer(BufferError::Closed(self.name.clone())));
        }

        let written = match timeout {
            None => {
                for &s in samples {
                    guard.push_overwrite(s);
                }
                samples.len()
            }
            Some(deadline_dur) => {
                let deadline = Instant::now() + deadline_dur;
                let mut written = 0usize;
                for &s in samples {
                    while guard.size == guard.capacity && !guard.closed {
                        let now = Instant::now();
                        if now >= deadline {
                            break;
                        }
                        let (g, timed_out) = self
                            .not_full
                            .wait_timeout(guard, deadline - now)
                            .unwrap();
                        guard = g;
                        if timed_out.timed_out() {
                            break;
                        }
                    }
                    if guard.closed {
                        break;
                    }
                    if guard.size == guard.capacity {
                        // Deadline passed with buffer still full.
                        break;
                    }
                    guard.data[guard.write_pos] = s;
                    guard.write_pos = (guard.write_pos + 1) % guard.capacity;
                    guard.size += 1;
                    guard.total_written += 1;
                    written += 1;
                }
                written
            }
        };

        drop(guard);
        if written > 0 {
            self.not_empty.notify_all();
        }
        Ok(written)
    }

    /// Read up to `count` samples FIFO.
    ///
    /// Without a `timeout`, a short read on empty is allowed and
    /// increments `underruns`. With a `timeout`, blocks until at least
    /// one sample is available or the deadline passes.
    pub fn read(&self, count: usize, timeout: Option<Duration>) -> Vec<f32> {
        if count == 0 {
            return Vec::new();
        }
        let mut guard = self.inner.lock().unwrap();

        if let Some(timeout) = timeout {
            let deadline = Instant::now() + timeout;
            while guard.size == 0 && !guard.closed {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                let (g, timed_out) = self.not_empty.wait_timeout(guard, deadline - now).unwrap();
                guard = g;
                if timed_out.timed_out() {
                    break;
                }
            }
        }

        let mut out = Vec::with_capacity(count.min(guard.size.max(1)));
        for _ in 0..count {
            match guard.pop_one() {
                Some(s) => out.push(s),
                None => break,
            }
        }

        if out.len() < count {
            guard.underruns += 1;
            guard.last_underrun = Some(Instant::now());
        }

        drop(guard);
        if !out.is_empty() {
            self.not_full.notify_all();
        }
        out
    }

    /// Non-destructive read of up to `count` samples; never blocks.
    pub fn peek(&self, count: usize) -> Vec<f32> {
        let guard = self.inner.lock().unwrap();
        let n = count.min(guard.size);
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            out.push(guard.data[(guard.read_pos + i) % guard.capacity]);
        }
        out
    }

    /// Reset positions, size, and health to `Healthy`; wakes producers.
    pub fn clear(&self) {
        let mut guard = self.inner.lock().unwrap();
        guard.size = 0;
        guard.read_pos = 0;
        guard.write_pos = 0;
        guard.last_overrun = None;
        guard.last_underrun = None;
        drop(guard);
        self.not_full.notify_all();
    }

    /// Shut the buffer down; further writes fail with `BufferError::Closed`.
    pub fn close(&self) {
        let mut guard = self.inner.lock().unwrap();
        guard.closed = true;
        drop(guard);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn stats(&self) -> RingBufferStats {
        let guard = self.inner.lock().unwrap();
        let latency_ms = (guard.size as f64) * 1000.0 / self.sample_rate as f64;
        RingBufferStats {
            capacity: guard.capacity,
            size: guard.size,
            utilization: guard.size as f32 / guard.capacity as f32,
            status: guard.health(),
            overruns: guard.overruns,
            underruns: guard.underruns,
            total_written: guard.total_written,
            total_read: guard.total_read,
            latency_samples: guard.size,
            latency_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_ring_buffer_overrun() {
        let rb = RingBuffer::new("main", 8, 44100);
        let input: Vec<f32> = (1..=10).map(|v| v as f32).collect();
        let written = rb.write(&input, None).unwrap();
        assert_eq!(written, 10);

        let stats = rb.stats();
        assert_eq!(stats.size, 8);
        assert!(stats.overruns >= 1);

        let out = rb.read(8, None);
        assert_eq!(out, vec![3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0]);
    }

    #[test]
    fn s2_short_read_on_empty() {
        let rb = RingBuffer::new("main", 8, 44100);
        let out = rb.read(5, None);
        assert!(out.is_empty());
        assert_eq!(rb.stats().underruns, 1);
    }

    #[test]
    fn size_invariant_holds() {
        let rb = RingBuffer::new("main", 16, 44100);
        rb.write(&[1.0; 4], None).unwrap();
        let stats = rb.stats();
        assert!(stats.size <= stats.capacity);
        assert_eq!(stats.total_written, stats.total_read + stats.size as u64);
    }

    #[test]
    fn peek_is_non_destructive() {
        let rb = RingBuffer::new("main", 8, 44100);
        rb.write(&[1.0, 2.0, 3.0], None).unwrap();
        let peeked = rb.peek(2);
        assert_eq!(peeked, vec![1.0, 2.0]);
        assert_eq!(rb.stats().size, 3);
    }

    #[test]
    fn clear_resets_health_and_position() {
        let rb = RingBuffer::new("main", 4, 44100);
        rb.write(&[1.0; 8], None).unwrap();
        assert!(rb.stats().overruns > 0);
        rb.clear();
        let stats = rb.stats();
        assert_eq!(stats.size, 0);
        assert_eq!(stats.status, BufferHealth::Healthy);
    }

    #[test]
    fn closed_buffer_rejects_writes() {
        let rb = RingBuffer::new("main", 4, 44100);
        rb.close();
        let err = rb.write(&[1.0], None).unwrap_err();
        assert!(matches!(err, AudiovizError::Buffer(BufferError::Closed(_))));
    }

    #[test]
    fn blocking_write_respects_timeout_and_reports_actual_count() {
        let rb = RingBuffer::new("main", 2, 44100);
        rb.write(&[1.0, 2.0], None).unwrap();
        let written = rb.write(&[3.0, 4.0], Some(Duration::from_millis(20))).unwrap();
        // Buffer stays full; no space frees up, so nothing more is accepted.
        assert_eq!(written, 0);
    }

    #[test]
    fn blocking_read_waits_for_producer() {
        use std::sync::Arc;
        use std::thread;

        let rb = Arc::new(RingBuffer::new("main", 8, 44100));
        let producer = Arc::clone(&rb);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.write(&[1.0, 2.0, 3.0], None).unwrap();
        });

        let out = rb.read(3, Some(Duration::from_millis(500)));
        handle.join().unwrap();
        assert_eq!(out, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn size_for_latency_matches_formula() {
        // 50 ms @ 44100 Hz stereo -> ceil(0.05*44100) * 2 = 2205*2 = 4410
        assert_eq!(RingBuffer::size_for_latency(50, 44100, 2), 4410);
    }

    #[test]
    fn s10_steady_state_latency_bounded_by_target_plus_one_ms() {
        let sample_rate = 44100;
        let target_latency_ms = 50u64;
        let capacity = RingBuffer::size_for_latency(target_latency_ms, sample_rate, 1);
        let rb = RingBuffer::new("main", capacity, sample_rate);

        rb.write(&vec![0.0; capacity], None).unwrap();
        let stats = rb.stats();

        assert_eq!(stats.overruns, 0);
        assert!(stats.latency_ms <= target_latency_ms as f64 + 1.0);
    }
}
