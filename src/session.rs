//! Session controller
//!
//! Top-level state machine over `{Idle, Connecting, Active}` coordinating
//! capture, playback and the connection manager. User commands and
//! component events are all delivered through queues to one task, so state
//! is never mutated from two call sites concurrently.
//!
//! Mute semantics: inbound segments are decoded and discarded and the
//! playback queue is cleared; outbound capture and encoding continue (to
//! avoid restart latency) but drained chunks are gated before send.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::audio::capture::{CaptureEvent, CapturePipeline, CaptureStats, MicSource};
use crate::audio::playback::{OutputSink, PlaybackEvent, PlaybackQueue, PlaybackStats};
use crate::codec::decode_message;
use crate::config::{AppConfig, InboundFormat};
use crate::error::{Error, Result};
use crate::net::connection::{
    ConnectionEvent, ConnectionManager, ConnectionStats, Connector, ReconnectOutcome,
};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
}

/// What killed the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalKind {
    Device,
    ReconnectExhausted,
}

/// Notifications to the embedding host. The core never renders anything;
/// it only emits these.
#[derive(Debug, Clone)]
pub enum Notification {
    ConnectivityChanged(bool),
    CaptureActiveChanged(bool),
    Fatal { kind: FatalKind, message: String },
}

/// Point-in-time counters across every component, for periodic logging by
/// the embedding host
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub capture: CaptureStats,
    pub connection: ConnectionStats,
    pub playback: PlaybackStats,
    pub gated_chunks: u64,
    pub decode_failures: u64,
}

enum Command {
    Start(oneshot::Sender<Result<()>>),
    Stop(oneshot::Sender<()>),
    ToggleMute(oneshot::Sender<bool>),
    Stats(oneshot::Sender<SessionStats>),
}

/// Cloneable handle the host drives the session with
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl SessionHandle {
    /// Connect and begin streaming. Connect/device failures are returned
    /// here with their specific kind; the session is back to idle when
    /// this errors.
    pub async fn start(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Start(reply_tx))
            .map_err(|_| Error::Config("session task is gone".into()))?;
        reply_rx
            .await
            .map_err(|_| Error::Config("session task is gone".into()))?
    }

    /// Tear everything down. Always succeeds; ignored when already idle.
    pub async fn stop(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.commands.send(Command::Stop(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Flip the mute flag; returns the new value. Muting never tears the
    /// session down.
    pub async fn toggle_mute(&self) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.commands.send(Command::ToggleMute(reply_tx)).is_err() {
            return false;
        }
        reply_rx.await.unwrap_or(false)
    }

    /// Snapshot of the component counters
    pub async fn stats(&self) -> SessionStats {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.commands.send(Command::Stats(reply_tx)).is_err() {
            return SessionStats::default();
        }
        reply_rx.await.unwrap_or_default()
    }
}

/// The session task. Construct with [`SessionController::spawn`].
pub struct SessionController {
    state: SessionState,
    muted: bool,
    connected: bool,
    capture: CapturePipeline,
    playback: PlaybackQueue,
    connection: ConnectionManager,
    inbound_format: InboundFormat,
    notifications: mpsc::UnboundedSender<Notification>,
    commands: mpsc::UnboundedReceiver<Command>,
    capture_events: mpsc::UnboundedReceiver<CaptureEvent>,
    connection_events: mpsc::UnboundedReceiver<ConnectionEvent>,
    playback_events: mpsc::UnboundedReceiver<PlaybackEvent>,
    decode_failures: u64,
    gated_chunks: u64,
}

impl SessionController {
    /// Wire the components together and spawn the event loop. Returns the
    /// command handle and the notification stream for the host.
    pub fn spawn(
        config: AppConfig,
        mic: Box<dyn MicSource>,
        sink: Box<dyn OutputSink>,
        connector: Arc<dyn Connector>,
    ) -> (SessionHandle, mpsc::UnboundedReceiver<Notification>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let (capture_tx, capture_rx) = mpsc::unbounded_channel();
        let (conn_tx, conn_rx) = mpsc::unbounded_channel();
        let (playback_tx, playback_rx) = mpsc::unbounded_channel();

        let capture = CapturePipeline::new(
            mic,
            config.capture.clone(),
            config.transport.outbound_sample_rate,
            capture_tx,
        );
        let playback = PlaybackQueue::new(sink, playback_tx);
        let inbound_format = config.transport.inbound;
        let connection = ConnectionManager::new(connector, config.transport, conn_tx);

        let controller = Self {
            state: SessionState::Idle,
            muted: false,
            connected: false,
            capture,
            playback,
            connection,
            inbound_format,
            notifications: notify_tx,
            commands: command_rx,
            capture_events: capture_rx,
            connection_events: conn_rx,
            playback_events: playback_rx,
            decode_failures: 0,
            gated_chunks: 0,
        };
        tokio::spawn(controller.run());

        (
            SessionHandle {
                commands: command_tx,
            },
            notify_rx,
        )
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Start(reply)) => {
                        let result = self.handle_start().await;
                        let _ = reply.send(result);
                    }
                    Some(Command::Stop(ack)) => {
                        self.shutdown().await;
                        let _ = ack.send(());
                    }
                    Some(Command::ToggleMute(reply)) => {
                        self.muted = !self.muted;
                        self.playback.set_muted(self.muted);
                        tracing::info!(muted = self.muted, "mute toggled");
                        let _ = reply.send(self.muted);
                    }
                    Some(Command::Stats(reply)) => {
                        let _ = reply.send(self.stats_snapshot());
                    }
                    // Handle dropped: release everything and end the task
                    None => {
                        self.shutdown().await;
                        return;
                    }
                },
                Some(event) = self.capture_events.recv() => {
                    self.handle_capture_event(event).await;
                }
                Some(event) = self.connection_events.recv() => {
                    self.handle_connection_event(event).await;
                }
                Some(event) = self.playback_events.recv() => match event {
                    PlaybackEvent::SegmentDone { epoch } => {
                        self.playback.on_segment_done(epoch);
                    }
                    PlaybackEvent::SegmentFailed { epoch } => {
                        self.playback.on_segment_failed(epoch);
                    }
                },
            }
        }
    }

    async fn handle_start(&mut self) -> Result<()> {
        if self.state != SessionState::Idle {
            tracing::warn!(state = ?self.state, "start ignored, session already running");
            return Ok(());
        }

        self.state = SessionState::Connecting;

        if let Err(e) = self.connection.connect().await {
            self.state = SessionState::Idle;
            return Err(e.into());
        }

        if let Err(e) = self.capture.start() {
            // Sockets opened before the mic failed; close them cleanly
            self.connection.stop().await;
            self.state = SessionState::Idle;
            return Err(e.into());
        }

        self.state = SessionState::Active;
        self.set_connected(true);
        let _ = self
            .notifications
            .send(Notification::CaptureActiveChanged(true));
        tracing::info!("session active");
        Ok(())
    }

    /// Stop every component and return to idle. Used by the stop command
    /// and by fatal events; safe regardless of current state.
    async fn shutdown(&mut self) {
        let was_active = self.state == SessionState::Active;
        self.capture.stop();
        self.playback.stop();
        self.connection.stop().await;
        self.state = SessionState::Idle;
        self.muted = false;
        self.playback.set_muted(false);
        if was_active {
            let _ = self
                .notifications
                .send(Notification::CaptureActiveChanged(false));
            let stats = self.stats_snapshot();
            tracing::info!(
                chunks_emitted = stats.capture.chunks_emitted,
                frames_dropped = stats.capture.frames_dropped,
                chunks_sent = stats.connection.chunks_sent,
                chunks_dropped = stats.connection.chunks_dropped,
                segments_played = stats.playback.segments_played,
                segments_discarded = stats.playback.segments_discarded,
                gated_chunks = stats.gated_chunks,
                decode_failures = stats.decode_failures,
                "session stopped"
            );
        }
        self.set_connected(false);
    }

    fn stats_snapshot(&self) -> SessionStats {
        SessionStats {
            capture: self.capture.stats(),
            connection: self.connection.stats(),
            playback: self.playback.stats(),
            gated_chunks: self.gated_chunks,
            decode_failures: self.decode_failures,
        }
    }

    fn set_connected(&mut self, connected: bool) {
        if self.connected != connected {
            self.connected = connected;
            let _ = self
                .notifications
                .send(Notification::ConnectivityChanged(connected));
        }
    }

    async fn fatal(&mut self, kind: FatalKind, message: String) {
        self.shutdown().await;
        let _ = self.notifications.send(Notification::Fatal { kind, message });
    }

    async fn handle_capture_event(&mut self, event: CaptureEvent) {
        match event {
            CaptureEvent::Chunk(chunk) => {
                if self.state != SessionState::Active {
                    return;
                }
                if self.muted {
                    // Capture keeps running while muted; the chunk just
                    // never leaves the client
                    self.gated_chunks += 1;
                    return;
                }
                self.connection.send(chunk).await;
            }
            CaptureEvent::Fatal(e) => {
                if self.state == SessionState::Active {
                    tracing::error!(error = %e, "capture device lost");
                    self.fatal(FatalKind::Device, e.to_string()).await;
                }
            }
        }
    }

    async fn handle_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::InboundMessage(payload) => {
                if self.state != SessionState::Active {
                    return;
                }
                match decode_message(&payload, &self.inbound_format) {
                    Ok(segment) => self.playback.enqueue(segment),
                    Err(e) => {
                        // Non-fatal: drop this message, keep going
                        self.decode_failures += 1;
                        tracing::warn!(error = %e, "undecodable inbound message dropped");
                    }
                }
            }
            ConnectionEvent::LinkClosed(kind) => {
                self.set_connected(false);
                self.connection.handle_link_closed(kind).await;
            }
            ConnectionEvent::ReconnectTick => {
                match self.connection.handle_reconnect_tick().await {
                    ReconnectOutcome::Reopened => self.set_connected(true),
                    ReconnectOutcome::Exhausted => {
                        self.fatal(
                            FatalKind::ReconnectExhausted,
                            "connection lost and reconnect attempts exhausted".into(),
                        )
                        .await;
                    }
                    ReconnectOutcome::RetryScheduled | ReconnectOutcome::Ignored => {}
                }
            }
        }
    }
}
