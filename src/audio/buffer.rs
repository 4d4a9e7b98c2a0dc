//! Audio frame types and the lock-free capture pending buffer
//!
//! The capture callback runs on the real-time audio thread and must never
//! block, so frames cross to the drain task through a single-producer
//! single-consumer `ArrayQueue`.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A fixed-size block of mono f32 samples produced by the capture callback.
/// Immutable once produced; consumed exactly once by the encoder.
#[derive(Clone)]
pub struct AudioFrame {
    /// Mono samples in [-1, 1]
    pub samples: Vec<f32>,
    /// Rate the samples were captured at
    pub sample_rate: u32,
    /// Monotonic position within the capture stream
    pub sequence: u64,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32, sequence: u64) -> Self {
        Self {
            samples,
            sample_rate,
            sequence,
        }
    }

    /// Frame duration in microseconds
    pub fn duration_us(&self) -> u64 {
        (self.samples.len() as u64 * 1_000_000) / self.sample_rate as u64
    }
}

/// A decoded block of playable inbound audio. Owned by the playback queue
/// from creation until it finishes playing.
#[derive(Clone)]
pub struct DecodedSegment {
    /// Interleaved samples in [-1, 1]
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedSegment {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    /// Number of sample frames (samples per channel)
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    /// Playable duration in milliseconds
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            0
        } else {
            (self.frame_count() as u64 * 1_000) / self.sample_rate as u64
        }
    }
}

/// Lock-free buffer holding frames between capture callbacks and the
/// fixed-interval drain
pub struct PendingBuffer {
    queue: ArrayQueue<AudioFrame>,
    dropped: AtomicUsize,
}

impl PendingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            dropped: AtomicUsize::new(0),
        }
    }

    /// Push a frame; on overflow the frame is dropped and counted, never
    /// blocking the audio thread
    pub fn push(&self, frame: AudioFrame) -> bool {
        match self.queue.push(frame) {
            Ok(()) => true,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Take every pending frame, in production order, leaving the buffer
    /// empty
    pub fn drain(&self) -> Vec<AudioFrame> {
        let mut frames = Vec::with_capacity(self.queue.len());
        while let Some(frame) = self.queue.pop() {
            frames.push(frame);
        }
        frames
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Frames lost to overflow since creation
    pub fn dropped_frames(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Thread-safe handle to a pending buffer
pub type SharedPendingBuffer = Arc<PendingBuffer>;

/// Create a new shared pending buffer
pub fn create_pending_buffer(capacity: usize) -> SharedPendingBuffer {
    Arc::new(PendingBuffer::new(capacity))
}
