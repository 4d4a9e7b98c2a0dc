//! Gapless sequential playback
//!
//! The queue holds decoded segments FIFO with a single "now playing" slot.
//! The sink signals segment completion by posting an event back to the
//! session loop, which calls [`PlaybackQueue::on_segment_done`]; the next
//! segment then starts. Nothing ever plays concurrently.
//!
//! Each play carries an epoch number. Halting (mute, stop) bumps the epoch,
//! so a completion event from a halted segment is recognized as stale and
//! ignored instead of advancing the queue.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::audio::buffer::DecodedSegment;
use crate::error::DeviceError;

/// Events the sink posts to the session loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// The segment started at this epoch ran to natural completion
    SegmentDone { epoch: u64 },
    /// The segment died after `play` returned (stream build or start
    /// failure on the sink thread); the queue must advance past it
    SegmentFailed { epoch: u64 },
}

/// Abstraction over the audio output device so the queue can be exercised
/// with a recording sink in tests.
pub trait OutputSink: Send {
    /// Begin playing one segment. Must post `SegmentDone { epoch }` to
    /// `done` when the segment's samples are fully consumed, or
    /// `SegmentFailed { epoch }` if playback dies after this returns.
    /// A halt suppresses both.
    fn play(
        &mut self,
        segment: DecodedSegment,
        epoch: u64,
        done: mpsc::UnboundedSender<PlaybackEvent>,
    ) -> Result<(), DeviceError>;

    /// Stop the in-progress segment immediately, if any
    fn halt(&mut self);

    /// Release the underlying output resource
    fn release(&mut self);
}

/// cpal-backed sink; one output stream per segment on a dedicated thread
pub struct CpalSink {
    device_name: Option<String>,
    active: Option<ActivePlayback>,
}

struct ActivePlayback {
    halted: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl CpalSink {
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            active: None,
        }
    }

    fn find_device(&self) -> Result<cpal::Device, DeviceError> {
        let host = cpal::default_host();
        match self.device_name.as_deref() {
            None => host
                .default_output_device()
                .ok_or_else(|| DeviceError::NotFound("no default output device".into())),
            Some(wanted) => {
                let devices = host
                    .output_devices()
                    .map_err(|e| DeviceError::PermissionDenied(e.to_string()))?;
                for device in devices {
                    if let Ok(name) = device.name() {
                        if name == wanted {
                            return Ok(device);
                        }
                    }
                }
                Err(DeviceError::NotFound(wanted.to_string()))
            }
        }
    }
}

impl OutputSink for CpalSink {
    fn play(
        &mut self,
        segment: DecodedSegment,
        epoch: u64,
        done: mpsc::UnboundedSender<PlaybackEvent>,
    ) -> Result<(), DeviceError> {
        self.halt();

        let device = self.find_device()?;
        let halted = Arc::new(AtomicBool::new(false));
        let halted_for_loop = halted.clone();

        let handle = thread::Builder::new()
            .name("playback-sink".to_string())
            .spawn(move || {
                let config = StreamConfig {
                    channels: segment.channels,
                    sample_rate: cpal::SampleRate(segment.sample_rate),
                    buffer_size: cpal::BufferSize::Default,
                };

                let samples = segment.samples;
                let total = samples.len();
                let position = Arc::new(AtomicUsize::new(0));
                let position_for_cb = position.clone();

                let stream = device.build_output_stream(
                    &config,
                    move |out: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let start = position_for_cb.load(Ordering::Relaxed);
                        for (i, slot) in out.iter_mut().enumerate() {
                            *slot = samples.get(start + i).copied().unwrap_or(0.0);
                        }
                        position_for_cb.store(start + out.len(), Ordering::Relaxed);
                    },
                    |err| tracing::warn!(error = %err, "output stream error"),
                    None,
                );

                let stream = match stream {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to build output stream");
                        let _ = done.send(PlaybackEvent::SegmentFailed { epoch });
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    tracing::error!(error = %e, "failed to start output stream");
                    let _ = done.send(PlaybackEvent::SegmentFailed { epoch });
                    return;
                }

                while !halted_for_loop.load(Ordering::Relaxed)
                    && position.load(Ordering::Relaxed) < total
                {
                    thread::sleep(Duration::from_millis(5));
                }

                // Stream drops here; only a natural completion advances the
                // queue
                if !halted_for_loop.load(Ordering::Relaxed) {
                    let _ = done.send(PlaybackEvent::SegmentDone { epoch });
                }
            })
            .map_err(|e| DeviceError::Stream(e.to_string()))?;

        self.active = Some(ActivePlayback {
            halted,
            thread_handle: Some(handle),
        });
        Ok(())
    }

    fn halt(&mut self) {
        if let Some(mut active) = self.active.take() {
            active.halted.store(true, Ordering::SeqCst);
            if let Some(handle) = active.thread_handle.take() {
                let _ = handle.join();
            }
        }
    }

    fn release(&mut self) {
        self.halt();
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.halt();
    }
}

/// Playback statistics
#[derive(Debug, Clone, Default)]
pub struct PlaybackStats {
    pub segments_played: u64,
    pub segments_discarded: u64,
    pub segments_failed: u64,
}

/// Strictly-ordered segment queue with one active playback slot
pub struct PlaybackQueue {
    sink: Box<dyn OutputSink>,
    queue: VecDeque<DecodedSegment>,
    done_tx: mpsc::UnboundedSender<PlaybackEvent>,
    playing: bool,
    muted: bool,
    epoch: u64,
    stats: PlaybackStats,
}

impl PlaybackQueue {
    pub fn new(sink: Box<dyn OutputSink>, done_tx: mpsc::UnboundedSender<PlaybackEvent>) -> Self {
        Self {
            sink,
            queue: VecDeque::new(),
            done_tx,
            playing: false,
            muted: false,
            epoch: 0,
            stats: PlaybackStats::default(),
        }
    }

    /// Append a segment; starts it immediately when nothing is playing.
    /// While muted, segments are discarded instead of queued.
    pub fn enqueue(&mut self, segment: DecodedSegment) {
        if self.muted {
            self.stats.segments_discarded += 1;
            return;
        }
        self.queue.push_back(segment);
        if !self.playing {
            self.start_next();
        }
    }

    /// Advance past the segment that just finished. Stale epochs (from a
    /// segment halted by mute or stop) are ignored.
    pub fn on_segment_done(&mut self, epoch: u64) {
        if epoch != self.epoch || !self.playing {
            tracing::debug!(epoch, current = self.epoch, "stale playback completion");
            return;
        }
        self.stats.segments_played += 1;
        self.playing = false;
        self.start_next();
    }

    /// Advance past a segment whose stream died after `play` returned.
    /// Carries the same stale-epoch guard as [`Self::on_segment_done`].
    pub fn on_segment_failed(&mut self, epoch: u64) {
        if epoch != self.epoch || !self.playing {
            tracing::debug!(epoch, current = self.epoch, "stale playback failure");
            return;
        }
        tracing::warn!("active segment failed mid-stream, skipping");
        self.stats.segments_failed += 1;
        self.playing = false;
        self.start_next();
    }

    fn start_next(&mut self) {
        while let Some(segment) = self.queue.pop_front() {
            self.epoch += 1;
            match self.sink.play(segment, self.epoch, self.done_tx.clone()) {
                Ok(()) => {
                    self.playing = true;
                    return;
                }
                Err(e) => {
                    // Drop just this segment and try the next
                    tracing::warn!(error = %e, "segment playback failed, skipping");
                    self.stats.segments_failed += 1;
                }
            }
        }
        self.playing = false;
    }

    /// While muted, inbound segments are discarded and the queue is cleared
    /// immediately, interrupting any in-progress playback. Unmuting resumes
    /// normal behavior without replaying what was discarded.
    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        if muted {
            self.stats.segments_discarded += self.queue.len() as u64;
            self.queue.clear();
            if self.playing {
                self.epoch += 1;
                self.sink.halt();
                self.playing = false;
            }
        }
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Clear the queue, halt the active slot, release the output resource.
    /// Idempotent.
    pub fn stop(&mut self) {
        self.queue.clear();
        self.epoch += 1;
        self.sink.halt();
        self.sink.release();
        self.playing = false;
    }

    pub fn is_idle(&self) -> bool {
        !self.playing && self.queue.is_empty()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> PlaybackStats {
        self.stats.clone()
    }
}
