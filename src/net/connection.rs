//! Persistent socket lifecycle
//!
//! The manager owns up to two logical links: outbound (send-only, required)
//! and inbound (receive-only, optional). Each follows the state machine
//!
//! ```text
//! Disconnected --connect--> Connecting --ok--> Open --unexpected close--> Reconnecting
//!                                                                            │  ok
//! Failed <--attempts exhausted (terminal until explicit connect())-----------┤──────> Open
//! ```
//!
//! Reconnect timing runs through the session event loop: the pending
//! backoff timer is an explicit owned slot that posts a `ReconnectTick`
//! event, and the session calls back into [`ConnectionManager::handle_reconnect_tick`].
//! That keeps the one-connect-in-flight and one-timer-in-flight invariants
//! enforced by construction, and `stop()` can always cancel the slot.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::codec::PcmChunk;
use crate::config::TransportConfig;
use crate::error::ConnectionError;

/// Per-link lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Reconnecting,
    Failed,
}

/// Which logical socket an event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Outbound,
    Inbound,
}

/// Events posted to the session loop
pub enum ConnectionEvent {
    /// A payload message arrived on the inbound link
    InboundMessage(Bytes),
    /// A link closed without `stop()` being called
    LinkClosed(LinkKind),
    /// The reconnect backoff elapsed; the session should call
    /// `handle_reconnect_tick`
    ReconnectTick,
}

/// Result of one reconnect attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectOutcome {
    /// Links are open again; the attempt counter was reset
    Reopened,
    /// The attempt failed; another tick is scheduled
    RetryScheduled,
    /// The attempt budget is spent; state is `Failed` and the session must
    /// tear down
    Exhausted,
    /// The tick arrived after `stop()`; nothing to do
    Ignored,
}

/// Send half of an open socket
#[async_trait]
pub trait MessageSink: Send {
    async fn send(&mut self, payload: Bytes) -> Result<(), ConnectionError>;
    async fn close(&mut self);
}

/// Receive half of an open socket. `None` means the peer closed.
#[async_trait]
pub trait MessageStream: Send {
    async fn next_message(&mut self) -> Option<Result<Bytes, ConnectionError>>;
}

/// Opens sockets. The connect timeout is applied by the manager, not here.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Box<dyn MessageSink>, Box<dyn MessageStream>), ConnectionError>;
}

// ── WebSocket implementation ────────────────────────────────────────

type WsInner = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open a websocket and split it into send/receive halves
pub async fn connect_ws(
    url: &str,
) -> Result<(Box<dyn MessageSink>, Box<dyn MessageStream>), ConnectionError> {
    let (ws, _response) = connect_async(url)
        .await
        .map_err(|e| ConnectionError::Refused(e.to_string()))?;
    let (sink, stream) = ws.split();
    Ok((
        Box::new(WsSink { inner: sink }),
        Box::new(WsRecv { inner: stream }),
    ))
}

/// Production connector backed by `tokio-tungstenite`
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Box<dyn MessageSink>, Box<dyn MessageStream>), ConnectionError> {
        connect_ws(url).await
    }
}

struct WsSink {
    inner: SplitSink<WsInner, Message>,
}

#[async_trait]
impl MessageSink for WsSink {
    async fn send(&mut self, payload: Bytes) -> Result<(), ConnectionError> {
        self.inner
            .send(Message::Binary(payload.to_vec()))
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.inner.send(Message::Close(None)).await;
        let _ = self.inner.close().await;
    }
}

struct WsRecv {
    inner: SplitStream<WsInner>,
}

#[async_trait]
impl MessageStream for WsRecv {
    async fn next_message(&mut self) -> Option<Result<Bytes, ConnectionError>> {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Binary(data))) => return Some(Ok(Bytes::from(data))),
                Some(Ok(Message::Close(_))) | None => return None,
                // Pings are answered by the library; text frames carry no
                // audio and are skipped
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Some(Err(ConnectionError::Transport(e.to_string()))),
            }
        }
    }
}

// ── Connection manager ──────────────────────────────────────────────

struct LinkSlot {
    kind: LinkKind,
    url: String,
    state: ConnectionState,
    sink: Option<Box<dyn MessageSink>>,
    reader: Option<JoinHandle<()>>,
}

impl LinkSlot {
    fn new(kind: LinkKind, url: String) -> Self {
        Self {
            kind,
            url,
            state: ConnectionState::Disconnected,
            sink: None,
            reader: None,
        }
    }

    async fn teardown(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(mut sink) = self.sink.take() {
            sink.close().await;
        }
    }
}

/// Transfer statistics
#[derive(Debug, Clone, Default)]
pub struct ConnectionStats {
    pub chunks_sent: u64,
    pub chunks_dropped: u64,
    pub reconnects: u64,
}

/// Owns the socket pair, its handshake, and bounded reconnection
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    config: TransportConfig,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    outbound: LinkSlot,
    inbound: Option<LinkSlot>,
    /// Explicit owned slot for the backoff timer; `stop()` clears it so a
    /// timer can never fire after teardown
    pending_reconnect: Option<JoinHandle<()>>,
    attempts: u32,
    stats: ConnectionStats,
}

impl ConnectionManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        config: TransportConfig,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self {
        let outbound = LinkSlot::new(LinkKind::Outbound, config.outbound_url.clone());
        let inbound = config
            .inbound_url
            .clone()
            .map(|url| LinkSlot::new(LinkKind::Inbound, url));
        Self {
            connector,
            config,
            events,
            outbound,
            inbound,
            pending_reconnect: None,
            attempts: 0,
            stats: ConnectionStats::default(),
        }
    }

    pub fn state(&self, kind: LinkKind) -> ConnectionState {
        match kind {
            LinkKind::Outbound => self.outbound.state,
            LinkKind::Inbound => self
                .inbound
                .as_ref()
                .map(|link| link.state)
                .unwrap_or(ConnectionState::Disconnected),
        }
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.attempts
    }

    pub fn stats(&self) -> ConnectionStats {
        self.stats.clone()
    }

    fn set_states(&mut self, state: ConnectionState) {
        self.outbound.state = state;
        if let Some(link) = self.inbound.as_mut() {
            link.state = state;
        }
    }

    async fn open_link(
        connector: &Arc<dyn Connector>,
        link: &mut LinkSlot,
        timeout: Duration,
        events: &mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Result<(), ConnectionError> {
        let connected = tokio::time::timeout(timeout, connector.connect(&link.url))
            .await
            .map_err(|_| ConnectionError::Timeout)??;

        let (sink, mut stream) = connected;
        let kind = link.kind;
        let events = events.clone();
        let reader = tokio::spawn(async move {
            loop {
                match stream.next_message().await {
                    Some(Ok(payload)) => {
                        // Only the inbound link carries audio; anything the
                        // server pushes on the outbound link is ignored
                        if kind == LinkKind::Inbound {
                            let _ = events.send(ConnectionEvent::InboundMessage(payload));
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(?kind, error = %e, "socket read error");
                        let _ = events.send(ConnectionEvent::LinkClosed(kind));
                        return;
                    }
                    None => {
                        let _ = events.send(ConnectionEvent::LinkClosed(kind));
                        return;
                    }
                }
            }
        });

        link.sink = Some(sink);
        link.reader = Some(reader);
        Ok(())
    }

    /// Open every configured link as one all-or-nothing handshake. A single
    /// link failing fails the whole call and closes whatever already
    /// opened.
    async fn open_links(&mut self) -> Result<(), ConnectionError> {
        let timeout = Duration::from_millis(self.config.connect_timeout_ms);

        Self::open_link(&self.connector, &mut self.outbound, timeout, &self.events).await?;

        if let Some(link) = self.inbound.as_mut() {
            if let Err(e) = Self::open_link(&self.connector, link, timeout, &self.events).await {
                self.outbound.teardown().await;
                return Err(e);
            }
        }

        Ok(())
    }

    /// Establish the socket pair. On success every link is `Open` and the
    /// reconnect counter is reset; on failure everything is back to
    /// `Disconnected`.
    pub async fn connect(&mut self) -> Result<(), ConnectionError> {
        self.set_states(ConnectionState::Connecting);

        match self.open_links().await {
            Ok(()) => {
                self.set_states(ConnectionState::Open);
                self.attempts = 0;
                tracing::info!(outbound = %self.outbound.url, "connected");
                Ok(())
            }
            Err(e) => {
                self.set_states(ConnectionState::Disconnected);
                tracing::warn!(error = %e, "connect failed");
                Err(e)
            }
        }
    }

    /// Transmit one chunk. Anything but an `Open` outbound link drops the
    /// chunk silently; stale audio is worse than missing audio, so nothing
    /// is ever queued or retried.
    pub async fn send(&mut self, chunk: PcmChunk) {
        if self.outbound.state != ConnectionState::Open {
            self.stats.chunks_dropped += 1;
            tracing::debug!(state = ?self.outbound.state, "outbound not open, chunk dropped");
            return;
        }
        let Some(sink) = self.outbound.sink.as_mut() else {
            self.stats.chunks_dropped += 1;
            return;
        };
        match sink.send(chunk.data).await {
            Ok(()) => self.stats.chunks_sent += 1,
            Err(e) => {
                // The reader task will observe the close and drive
                // reconnection; the chunk itself is lost by design
                self.stats.chunks_dropped += 1;
                tracing::debug!(error = %e, "send failed, chunk dropped");
            }
        }
    }

    /// React to an unexpected link close. Both links tear down together
    /// (the handshake is all-or-nothing) and the backoff timer is armed.
    /// Closes observed while not `Open` are echoes of a teardown already in
    /// progress and are ignored.
    pub async fn handle_link_closed(&mut self, kind: LinkKind) {
        if self.outbound.state != ConnectionState::Open {
            return;
        }
        tracing::warn!(?kind, "connection lost, reconnecting");

        self.outbound.teardown().await;
        if let Some(link) = self.inbound.as_mut() {
            link.teardown().await;
        }
        self.set_states(ConnectionState::Reconnecting);
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if self.pending_reconnect.is_some() {
            return;
        }
        let events = self.events.clone();
        let backoff = Duration::from_millis(self.config.reconnect_backoff_ms);
        self.pending_reconnect = Some(tokio::spawn(async move {
            tokio::time::sleep(backoff).await;
            let _ = events.send(ConnectionEvent::ReconnectTick);
        }));
    }

    /// Run one reconnect attempt. Called by the session loop when a
    /// `ReconnectTick` event arrives.
    pub async fn handle_reconnect_tick(&mut self) -> ReconnectOutcome {
        self.pending_reconnect = None;

        if self.outbound.state != ConnectionState::Reconnecting {
            return ReconnectOutcome::Ignored;
        }

        self.attempts += 1;
        self.stats.reconnects += 1;
        tracing::info!(
            attempt = self.attempts,
            max = self.config.reconnect_attempts,
            "reconnect attempt"
        );

        match self.open_links().await {
            Ok(()) => {
                self.set_states(ConnectionState::Open);
                self.attempts = 0;
                tracing::info!("reconnected");
                ReconnectOutcome::Reopened
            }
            Err(e) => {
                if self.attempts >= self.config.reconnect_attempts {
                    self.set_states(ConnectionState::Failed);
                    tracing::error!(error = %e, "reconnect attempts exhausted");
                    ReconnectOutcome::Exhausted
                } else {
                    self.set_states(ConnectionState::Reconnecting);
                    tracing::warn!(error = %e, "reconnect attempt failed");
                    self.schedule_reconnect();
                    ReconnectOutcome::RetryScheduled
                }
            }
        }
    }

    /// Deterministically close every owned socket, cancel any pending
    /// reconnect timer, and reset all counters. Safe to call repeatedly.
    pub async fn stop(&mut self) {
        if let Some(timer) = self.pending_reconnect.take() {
            timer.abort();
        }
        self.outbound.teardown().await;
        if let Some(link) = self.inbound.as_mut() {
            link.teardown().await;
        }
        self.set_states(ConnectionState::Disconnected);
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MockConnector, MockWire};
    use crate::config::InboundFormat;

    fn test_transport(inbound: bool) -> TransportConfig {
        TransportConfig {
            outbound_url: "mock://out".to_string(),
            inbound_url: inbound.then(|| "mock://in".to_string()),
            outbound_sample_rate: 16_000,
            inbound: InboundFormat::default(),
            connect_timeout_ms: 1_500,
            reconnect_attempts: 3,
            reconnect_backoff_ms: 2_000,
        }
    }

    fn chunk() -> PcmChunk {
        PcmChunk {
            data: Bytes::from_static(&[0x00, 0x40]),
            sample_rate: 16_000,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn connect_opens_both_links_and_resets_counter() {
        let wire = MockWire::new();
        let mut manager = ConnectionManager::new(
            Arc::new(MockConnector::accepting(wire.clone())),
            test_transport(true),
            mpsc::unbounded_channel().0,
        );

        manager.connect().await.unwrap();
        assert_eq!(manager.state(LinkKind::Outbound), ConnectionState::Open);
        assert_eq!(manager.state(LinkKind::Inbound), ConnectionState::Open);
        assert_eq!(manager.reconnect_attempts(), 0);
        assert_eq!(wire.connects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_timeout_is_distinct_from_refusal() {
        let (events, _rx) = mpsc::unbounded_channel();
        let mut manager = ConnectionManager::new(
            Arc::new(MockConnector::hanging()),
            test_transport(false),
            events,
        );

        let err = manager.connect().await.unwrap_err();
        assert!(matches!(err, ConnectionError::Timeout));
        assert_eq!(
            manager.state(LinkKind::Outbound),
            ConnectionState::Disconnected
        );

        let (events, _rx) = mpsc::unbounded_channel();
        let mut manager = ConnectionManager::new(
            Arc::new(MockConnector::refusing()),
            test_transport(false),
            events,
        );
        let err = manager.connect().await.unwrap_err();
        assert!(matches!(err, ConnectionError::Refused(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_failure_closes_the_opened_outbound() {
        let wire = MockWire::new();
        // Outbound opens, inbound refuses: all-or-nothing
        let connector = MockConnector::accept_then_refuse(wire.clone(), 1);
        let (events, _rx) = mpsc::unbounded_channel();
        let mut manager =
            ConnectionManager::new(Arc::new(connector), test_transport(true), events);

        assert!(manager.connect().await.is_err());
        assert_eq!(
            manager.state(LinkKind::Outbound),
            ConnectionState::Disconnected
        );
        assert_eq!(wire.closed_sinks(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn send_drops_silently_when_not_open() {
        let (events, _rx) = mpsc::unbounded_channel();
        let wire = MockWire::new();
        let mut manager = ConnectionManager::new(
            Arc::new(MockConnector::accepting(wire.clone())),
            test_transport(false),
            events,
        );

        manager.send(chunk()).await;
        assert_eq!(manager.stats().chunks_dropped, 1);
        assert_eq!(wire.sent().len(), 0);

        manager.connect().await.unwrap();
        manager.send(chunk()).await;
        assert_eq!(manager.stats().chunks_sent, 1);
        assert_eq!(wire.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn three_failed_reconnects_reach_failed_state_with_no_fourth() {
        let wire = MockWire::new();
        // First connect succeeds, every later attempt is refused
        let connector = MockConnector::accept_then_refuse(wire.clone(), 2);
        let (events, mut events_rx) = mpsc::unbounded_channel();
        let mut manager =
            ConnectionManager::new(Arc::new(connector), test_transport(true), events);

        manager.connect().await.unwrap();

        // Peer drops the inbound link unexpectedly
        wire.close_streams();
        let mut exhausted = 0;
        let mut reopened = 0;
        loop {
            match events_rx.recv().await.unwrap() {
                ConnectionEvent::LinkClosed(kind) => {
                    manager.handle_link_closed(kind).await;
                }
                ConnectionEvent::ReconnectTick => {
                    match manager.handle_reconnect_tick().await {
                        ReconnectOutcome::Exhausted => {
                            exhausted += 1;
                            break;
                        }
                        ReconnectOutcome::Reopened => reopened += 1,
                        _ => {}
                    }
                }
                ConnectionEvent::InboundMessage(_) => {}
            }
        }

        assert_eq!(exhausted, 1);
        assert_eq!(reopened, 0);
        assert_eq!(manager.reconnect_attempts(), 3);
        assert_eq!(manager.state(LinkKind::Outbound), ConnectionState::Failed);
        assert!(manager.pending_reconnect.is_none());

        // Failed is terminal: no further tick arrives
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(events_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn successful_reconnect_resets_the_counter() {
        let wire = MockWire::new();
        let connector = MockConnector::accepting(wire.clone());
        let (events, mut events_rx) = mpsc::unbounded_channel();
        let mut manager =
            ConnectionManager::new(Arc::new(connector), test_transport(false), events);

        manager.connect().await.unwrap();
        wire.close_streams();

        // LinkClosed then ReconnectTick
        match events_rx.recv().await.unwrap() {
            ConnectionEvent::LinkClosed(kind) => manager.handle_link_closed(kind).await,
            _ => panic!("expected link close"),
        }
        assert_eq!(
            manager.state(LinkKind::Outbound),
            ConnectionState::Reconnecting
        );

        match events_rx.recv().await.unwrap() {
            ConnectionEvent::ReconnectTick => {
                assert_eq!(
                    manager.handle_reconnect_tick().await,
                    ReconnectOutcome::Reopened
                );
            }
            _ => panic!("expected reconnect tick"),
        }
        assert_eq!(manager.state(LinkKind::Outbound), ConnectionState::Open);
        assert_eq!(manager.reconnect_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_pending_reconnect() {
        let wire = MockWire::new();
        let connector = MockConnector::accepting(wire.clone());
        let (events, mut events_rx) = mpsc::unbounded_channel();
        let mut manager =
            ConnectionManager::new(Arc::new(connector), test_transport(false), events);

        manager.connect().await.unwrap();
        wire.close_streams();
        match events_rx.recv().await.unwrap() {
            ConnectionEvent::LinkClosed(kind) => manager.handle_link_closed(kind).await,
            _ => panic!("expected link close"),
        }

        manager.stop().await;
        manager.stop().await; // idempotent
        assert_eq!(
            manager.state(LinkKind::Outbound),
            ConnectionState::Disconnected
        );
        assert_eq!(manager.reconnect_attempts(), 0);

        // An already-queued tick is ignored once stopped
        while let Ok(event) = events_rx.try_recv() {
            if let ConnectionEvent::ReconnectTick = event {
                assert_eq!(
                    manager.handle_reconnect_tick().await,
                    ReconnectOutcome::Ignored
                );
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_messages_reach_the_event_queue() {
        let wire = MockWire::new();
        let connector = MockConnector::accepting(wire.clone());
        let (events, mut events_rx) = mpsc::unbounded_channel();
        let mut manager =
            ConnectionManager::new(Arc::new(connector), test_transport(true), events);

        manager.connect().await.unwrap();
        wire.push_inbound(Bytes::from_static(b"\x01\x02"));

        match events_rx.recv().await.unwrap() {
            ConnectionEvent::InboundMessage(payload) => {
                assert_eq!(payload.as_ref(), b"\x01\x02");
            }
            _ => panic!("expected inbound message"),
        }
    }
}
