//! Microphone capture pipeline
//!
//! The cpal input stream lives on a dedicated thread (cpal streams are not
//! `Send`); its data callback only pushes fixed-size frames into the
//! lock-free pending buffer. A tokio interval task drains that buffer every
//! `drain_interval_ms`, concatenates the pending frames into one transport
//! chunk, and hands it to the session event queue.
//!
//! States: Idle -> Capturing -> Idle. `stop()` is idempotent and releases
//! the device and cancels the drain task on every exit path.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::audio::buffer::{create_pending_buffer, AudioFrame, SharedPendingBuffer};
use crate::codec::{encode_chunk, PcmChunk};
use crate::config::CaptureConfig;
use crate::constants::PENDING_BUFFER_CAPACITY;
use crate::error::DeviceError;

/// Events the pipeline posts to the session loop
pub enum CaptureEvent {
    /// One drain interval's worth of concatenated, wire-ready PCM
    Chunk(PcmChunk),
    /// The device died mid-session; fatal, the session must tear down
    Fatal(DeviceError),
}

/// Abstraction over the microphone resource so the pipeline can be driven
/// by a scripted source in tests. `start` acquires the device exclusively
/// and begins pushing frames into `pending`; `stop` releases it.
pub trait MicSource: Send {
    fn start(
        &mut self,
        config: &CaptureConfig,
        pending: SharedPendingBuffer,
        errors: Sender<DeviceError>,
    ) -> Result<(), DeviceError>;

    fn stop(&mut self);
}

/// cpal-backed microphone source, one stream on one dedicated thread
pub struct CpalMic {
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    sequence: Arc<AtomicU64>,
}

impl CpalMic {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    fn find_device(name: Option<&str>) -> Result<cpal::Device, DeviceError> {
        let host = cpal::default_host();
        match name {
            None => host
                .default_input_device()
                .ok_or_else(|| DeviceError::NotFound("no default input device".into())),
            Some(wanted) => {
                let devices = host
                    .input_devices()
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

impl Default for CpalMic {
    fn default() -> Self {
        Self::new()
    }
}

impl MicSource for CpalMic {
    fn start(
        &mut self,
        config: &CaptureConfig,
        pending: SharedPendingBuffer,
        errors: Sender<DeviceError>,
    ) -> Result<(), DeviceError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let device = Self::find_device(config.device.as_deref())?;
        // Probing the default config surfaces permission problems before
        // the stream thread exists
        device
            .default_input_config()
            .map_err(|e| DeviceError::PermissionDenied(e.to_string()))?;

        let stream_config = StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(config.block_size),
        };
        let sample_rate = config.sample_rate;

        self.sequence.store(0, Ordering::SeqCst);
        let running = self.running.clone();
        let running_for_loop = self.running.clone();
        let sequence = self.sequence.clone();
        let stream_errors = errors.clone();

        // The stream is built on its own thread and the build outcome is
        // reported back so start() can fail synchronously
        let (ready_tx, ready_rx) = bounded::<Result<(), DeviceError>>(1);

        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || {
                let stream = device.build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if !running.load(Ordering::Relaxed) {
                            return;
                        }
                        let seq = sequence.fetch_add(1, Ordering::Relaxed);
                        pending.push(AudioFrame::new(data.to_vec(), sample_rate, seq));
                    },
                    move |err| {
                        let _ = stream_errors.try_send(DeviceError::Lost(err.to_string()));
                    },
                    None,
                );

                match stream {
                    Ok(stream) => {
                        if let Err(e) = stream.play() {
                            let _ = ready_tx.send(Err(DeviceError::Stream(e.to_string())));
                            return;
                        }
                        let _ = ready_tx.send(Ok(()));

                        while running_for_loop.load(Ordering::Relaxed) {
                            thread::sleep(Duration::from_millis(10));
                        }
                        // Stream is dropped here, releasing the device
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(DeviceError::Stream(e.to_string())));
                    }
                }
            })
            .map_err(|e| DeviceError::Stream(e.to_string()))?;

        self.thread_handle = Some(handle);

        match ready_rx.recv_timeout(Duration::from_secs(2)) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.stop();
                Err(e)
            }
            Err(_) => {
                self.stop();
                Err(DeviceError::Stream("stream did not start in time".into()))
            }
        }
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CpalMic {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Capture statistics
#[derive(Debug, Clone, Default)]
pub struct CaptureStats {
    pub chunks_emitted: u64,
    pub frames_dropped: usize,
}

/// Owns the microphone source, the pending buffer and the drain task
pub struct CapturePipeline {
    mic: Box<dyn MicSource>,
    config: CaptureConfig,
    outbound_rate: u32,
    pending: SharedPendingBuffer,
    events: mpsc::UnboundedSender<CaptureEvent>,
    drain_task: Option<tokio::task::JoinHandle<()>>,
    chunks_emitted: Arc<AtomicU64>,
    capturing: bool,
}

impl CapturePipeline {
    pub fn new(
        mic: Box<dyn MicSource>,
        config: CaptureConfig,
        outbound_rate: u32,
        events: mpsc::UnboundedSender<CaptureEvent>,
    ) -> Self {
        Self {
            mic,
            config,
            outbound_rate,
            pending: create_pending_buffer(PENDING_BUFFER_CAPACITY),
            events,
            drain_task: None,
            chunks_emitted: Arc::new(AtomicU64::new(0)),
            capturing: false,
        }
    }

    /// Acquire the microphone and start the drain timer. Fails with a
    /// `DeviceError` if the device cannot be opened; no-op when already
    /// capturing.
    pub fn start(&mut self) -> Result<(), DeviceError> {
        if self.capturing {
            return Ok(());
        }

        let (error_tx, error_rx) = bounded::<DeviceError>(16);
        self.mic
            .start(&self.config, self.pending.clone(), error_tx)?;

        self.drain_task = Some(tokio::spawn(Self::drain_loop(
            self.pending.clone(),
            error_rx,
            self.events.clone(),
            self.config.drain_interval_ms,
            self.config.sample_rate,
            self.outbound_rate,
            self.chunks_emitted.clone(),
        )));

        self.capturing = true;
        tracing::info!(
            sample_rate = self.config.sample_rate,
            outbound_rate = self.outbound_rate,
            interval_ms = self.config.drain_interval_ms,
            "capture started"
        );
        Ok(())
    }

    async fn drain_loop(
        pending: SharedPendingBuffer,
        errors: Receiver<DeviceError>,
        events: mpsc::UnboundedSender<CaptureEvent>,
        interval_ms: u64,
        capture_rate: u32,
        outbound_rate: u32,
        chunks_emitted: Arc<AtomicU64>,
    ) {
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so every chunk covers a
        // full interval
        ticker.tick().await;

        loop {
            ticker.tick().await;

            if let Ok(err) = errors.try_recv() {
                tracing::error!(error = %err, "capture device error");
                let _ = events.send(CaptureEvent::Fatal(err));
                return;
            }

            let frames = pending.drain();
            if frames.is_empty() {
                continue;
            }

            let total: usize = frames.iter().map(|f| f.samples.len()).sum();
            let mut samples = Vec::with_capacity(total);
            for frame in &frames {
                samples.extend_from_slice(&frame.samples);
            }

            let chunk = encode_chunk(&samples, capture_rate, outbound_rate);
            chunks_emitted.fetch_add(1, Ordering::Relaxed);
            if events.send(CaptureEvent::Chunk(chunk)).is_err() {
                // Session loop is gone; nothing left to feed
                return;
            }
        }
    }

    /// Release the microphone and cancel the drain timer. Safe to call any
    /// number of times.
    pub fn stop(&mut self) {
        if let Some(task) = self.drain_task.take() {
            task.abort();
        }
        self.mic.stop();
        // Frames captured after the last drain are stale by now
        let _ = self.pending.drain();
        if self.capturing {
            tracing::info!("capture stopped");
        }
        self.capturing = false;
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            chunks_emitted: self.chunks_emitted.load(Ordering::Relaxed),
            frames_dropped: self.pending.dropped_frames(),
        }
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}
