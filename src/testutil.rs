//! Shared mocks for component and session tests: a scripted microphone, a
//! recording output sink, and an in-memory wire with a scriptable
//! connector.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::audio::buffer::{AudioFrame, DecodedSegment, SharedPendingBuffer};
use crate::audio::capture::MicSource;
use crate::audio::playback::{OutputSink, PlaybackEvent};
use crate::config::CaptureConfig;
use crate::error::{ConnectionError, DeviceError};
use crate::net::connection::{Connector, MessageSink, MessageStream};

// ── Microphone mocks ────────────────────────────────────────────────

/// Mic that deposits a fixed script of frames into the pending buffer on
/// start. Optionally reports a device loss right after starting.
pub struct ScriptedMic {
    frames: Vec<Vec<f32>>,
    fail_after_start: bool,
}

impl ScriptedMic {
    pub fn with_frames(frames: Vec<Vec<f32>>) -> Self {
        Self {
            frames,
            fail_after_start: false,
        }
    }

    pub fn failing_after_start() -> Self {
        Self {
            frames: Vec::new(),
            fail_after_start: true,
        }
    }
}

impl MicSource for ScriptedMic {
    fn start(
        &mut self,
        config: &CaptureConfig,
        pending: SharedPendingBuffer,
        errors: crossbeam_channel::Sender<DeviceError>,
    ) -> Result<(), DeviceError> {
        for (sequence, samples) in self.frames.iter().enumerate() {
            pending.push(AudioFrame::new(
                samples.clone(),
                config.sample_rate,
                sequence as u64,
            ));
        }
        if self.fail_after_start {
            let _ = errors.try_send(DeviceError::Lost("scripted device loss".into()));
        }
        Ok(())
    }

    fn stop(&mut self) {}
}

/// Mic whose acquisition is always denied
pub struct DeniedMic;

impl MicSource for DeniedMic {
    fn start(
        &mut self,
        _config: &CaptureConfig,
        _pending: SharedPendingBuffer,
        _errors: crossbeam_channel::Sender<DeviceError>,
    ) -> Result<(), DeviceError> {
        Err(DeviceError::PermissionDenied("scripted denial".into()))
    }

    fn stop(&mut self) {}
}

// ── Output sink mock ────────────────────────────────────────────────

#[derive(Default)]
pub struct SinkLog {
    /// First sample of each segment handed to `play`, in order
    pub started: Vec<f32>,
    pub halts: usize,
    pub releases: usize,
}

/// Sink that records every interaction. In auto mode each `play` posts its
/// completion immediately; in manual mode segments stay "playing" until the
/// test intervenes.
pub struct RecordingSink {
    log: Arc<Mutex<SinkLog>>,
    auto_complete: bool,
    fail_next: bool,
    die_next: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(SinkLog::default())),
            auto_complete: true,
            fail_next: false,
            die_next: false,
        }
    }

    pub fn new_manual() -> Self {
        Self {
            auto_complete: false,
            ..Self::new()
        }
    }

    pub fn failing_first() -> Self {
        Self {
            fail_next: true,
            ..Self::new()
        }
    }

    /// First `play` returns `Ok` but the segment then dies mid-stream,
    /// reported through the event channel like a real stream failure
    pub fn dying_first() -> Self {
        Self {
            die_next: true,
            ..Self::new()
        }
    }

    pub fn log(&self) -> Arc<Mutex<SinkLog>> {
        self.log.clone()
    }
}

impl OutputSink for RecordingSink {
    fn play(
        &mut self,
        segment: DecodedSegment,
        epoch: u64,
        done: mpsc::UnboundedSender<PlaybackEvent>,
    ) -> Result<(), DeviceError> {
        if self.fail_next {
            self.fail_next = false;
            return Err(DeviceError::Stream("scripted play failure".into()));
        }
        self.log
            .lock()
            .started
            .push(segment.samples.first().copied().unwrap_or(0.0));
        if self.die_next {
            self.die_next = false;
            let _ = done.send(PlaybackEvent::SegmentFailed { epoch });
        } else if self.auto_complete {
            let _ = done.send(PlaybackEvent::SegmentDone { epoch });
        }
        Ok(())
    }

    fn halt(&mut self) {
        self.log.lock().halts += 1;
    }

    fn release(&mut self) {
        self.log.lock().releases += 1;
    }
}

// ── Wire mocks ──────────────────────────────────────────────────────

#[derive(Default)]
struct WireState {
    connects: usize,
    closed_sinks: usize,
    sent: Vec<Bytes>,
    streams: Vec<mpsc::UnboundedSender<Bytes>>,
}

/// Shared in-memory transport observed by tests: counts connects and sink
/// closes, records sent payloads, and lets tests inject inbound messages or
/// drop every open stream.
#[derive(Clone, Default)]
pub struct MockWire(Arc<Mutex<WireState>>);

impl MockWire {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connects(&self) -> usize {
        self.0.lock().connects
    }

    pub fn closed_sinks(&self) -> usize {
        self.0.lock().closed_sinks
    }

    pub fn sent(&self) -> Vec<Bytes> {
        self.0.lock().sent.clone()
    }

    /// Deliver a message to every open stream (readers on non-inbound links
    /// ignore payloads, so broadcasting is harmless)
    pub fn push_inbound(&self, payload: Bytes) {
        for stream in &self.0.lock().streams {
            let _ = stream.send(payload.clone());
        }
    }

    /// Simulate the peer dropping every currently-open socket. Streams
    /// opened afterwards are unaffected.
    pub fn close_streams(&self) {
        self.0.lock().streams.clear();
    }

    fn accept(&self) -> (Box<dyn MessageSink>, Box<dyn MessageStream>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.0.lock();
        state.connects += 1;
        state.streams.push(tx);
        (
            Box::new(MockSink { wire: self.clone() }),
            Box::new(MockStream { rx }),
        )
    }
}

struct MockSink {
    wire: MockWire,
}

#[async_trait]
impl MessageSink for MockSink {
    async fn send(&mut self, payload: Bytes) -> Result<(), ConnectionError> {
        self.wire.0.lock().sent.push(payload);
        Ok(())
    }

    async fn close(&mut self) {
        self.wire.0.lock().closed_sinks += 1;
    }
}

struct MockStream {
    rx: mpsc::UnboundedReceiver<Bytes>,
}

#[async_trait]
impl MessageStream for MockStream {
    async fn next_message(&mut self) -> Option<Result<Bytes, ConnectionError>> {
        self.rx.recv().await.map(Ok)
    }
}

enum ConnectMode {
    Accepting,
    Hanging,
    Refusing,
    /// Accept the first N connects, refuse the rest
    AcceptThenRefuse(Mutex<usize>),
}

/// Scriptable connector over a [`MockWire`]
pub struct MockConnector {
    wire: MockWire,
    mode: ConnectMode,
}

impl MockConnector {
    pub fn accepting(wire: MockWire) -> Self {
        Self {
            wire,
            mode: ConnectMode::Accepting,
        }
    }

    pub fn hanging() -> Self {
        Self {
            wire: MockWire::new(),
            mode: ConnectMode::Hanging,
        }
    }

    pub fn refusing() -> Self {
        Self {
            wire: MockWire::new(),
            mode: ConnectMode::Refusing,
        }
    }

    pub fn accept_then_refuse(wire: MockWire, accepts: usize) -> Self {
        Self {
            wire,
            mode: ConnectMode::AcceptThenRefuse(Mutex::new(accepts)),
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        _url: &str,
    ) -> Result<(Box<dyn MessageSink>, Box<dyn MessageStream>), ConnectionError> {
        match &self.mode {
            ConnectMode::Accepting => Ok(self.wire.accept()),
            ConnectMode::Hanging => futures_util::future::pending().await,
            ConnectMode::Refusing => Err(ConnectionError::Refused("scripted refusal".into())),
            ConnectMode::AcceptThenRefuse(remaining) => {
                {
                    let mut remaining = remaining.lock();
                    if *remaining == 0 {
                        return Err(ConnectionError::Refused("scripted refusal".into()));
                    }
                    *remaining -= 1;
                }
                Ok(self.wire.accept())
            }
        }
    }
}
