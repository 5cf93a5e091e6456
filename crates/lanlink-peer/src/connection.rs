use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use lanlink_frame::{Frame, FrameCodec, FrameError, MessageType};
use lanlink_transport::{PeerStream, ServiceRecord};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::PeerError;
use crate::state::{LifecycleState, StateCell};

/// Events delivered to the consumer of a [`Connection`].
#[derive(Debug)]
pub enum ConnectionEvent {
    /// The connection reached `Ready`. `peer_name` comes from the
    /// discovery record for outbound connections, or the transport's
    /// accepted identity for inbound ones.
    Ready { peer_name: Option<String> },
    /// A frame arrived. Frames are delivered in arrival order, and the
    /// next receive is armed before the consumer sees this one.
    Message(Frame),
    /// A single frame could not be sent but the stream is intact.
    Error(PeerError),
    /// The transport failed. Terminal; reported once.
    Failed(PeerError),
    /// The connection was stopped locally or closed by the peer.
    /// Terminal; reported once.
    Cancelled,
}

/// The event stream handed out when a connection is constructed.
pub type ConnectionEvents = mpsc::UnboundedReceiver<ConnectionEvent>;

enum Launch {
    Connect(SocketAddr),
    Accepted(PeerStream),
}

struct Shared {
    state: StateCell,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    cancel: CancellationToken,
}

impl Shared {
    /// Enter a terminal state and deliver its event, exactly once. Late
    /// events for an already-dead connection are dropped here.
    fn terminate(&self, to: LifecycleState, event: ConnectionEvent) {
        if self.state.terminate(to) {
            let _ = self.events.send(event);
        }
    }
}

/// One point-to-point peer connection over a reliable stream.
///
/// Construct with [`Connection::outbound`] or [`Connection::inbound`],
/// call [`Connection::start`], then watch the event receiver. No method
/// blocks: outcomes arrive as [`ConnectionEvent`]s on a background
/// task, and the consumer hands them off to whatever context owns its
/// state.
pub struct Connection {
    peer_name: Option<String>,
    shared: Arc<Shared>,
    cmd_tx: mpsc::UnboundedSender<Frame>,
    launch: Mutex<Option<(Launch, mpsc::UnboundedReceiver<Frame>)>>,
}

impl Connection {
    /// Outbound connection to a discovered peer. The peer name resolves
    /// from the discovery record.
    pub fn outbound(record: &ServiceRecord) -> (Self, ConnectionEvents) {
        Self::new(Launch::Connect(record.addr), Some(record.name.clone()))
    }

    /// Inbound connection wrapping a transport accepted by a listener.
    /// The peer name resolves from the transport's accepted identity.
    pub fn inbound(stream: PeerStream) -> (Self, ConnectionEvents) {
        Self::new(Launch::Accepted(stream), None)
    }

    fn new(launch: Launch, peer_name: Option<String>) -> (Self, ConnectionEvents) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            state: StateCell::new(),
            events: event_tx,
            cancel: CancellationToken::new(),
        });
        let connection = Self {
            peer_name,
            shared,
            cmd_tx,
            launch: Mutex::new(Some((launch, cmd_rx))),
        };
        (connection, event_rx)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.shared.state.get()
    }

    /// Peer display name known before the connection is ready (outbound
    /// connections only).
    pub fn peer_name(&self) -> Option<&str> {
        self.peer_name.as_deref()
    }

    /// Start the transport and arm the receive loop.
    ///
    /// Non-blocking: the outcome arrives as [`ConnectionEvent::Ready`]
    /// or [`ConnectionEvent::Failed`]. Starting twice is a caller
    /// error.
    pub fn start(&self) -> Result<(), PeerError> {
        let Some((launch, cmd_rx)) = self.launch.lock().ok().and_then(|mut slot| slot.take())
        else {
            return Err(PeerError::InvalidState("connection already started"));
        };
        if !self
            .shared
            .state
            .transition(LifecycleState::Setup, LifecycleState::Preparing)
        {
            if self.shared.state.get().is_terminal() {
                return Err(PeerError::Closed);
            }
            return Err(PeerError::InvalidState("connection already started"));
        }

        let shared = Arc::clone(&self.shared);
        let peer_name = self.peer_name.clone();
        tokio::spawn(drive(shared, launch, peer_name, cmd_rx));
        Ok(())
    }

    /// Enqueue one framed message.
    ///
    /// Valid only once the connection is `Ready`; earlier calls fail
    /// with [`PeerError::NotReady`] instead of being silently queued.
    /// Concurrent sends are written to the transport in call order;
    /// completion is fire-and-forget.
    pub fn send(&self, message_type: MessageType, payload: impl Into<Bytes>) -> Result<(), PeerError> {
        if self.shared.state.get() != LifecycleState::Ready {
            return Err(PeerError::NotReady);
        }
        self.cmd_tx
            .send(Frame::new(message_type, payload))
            .map_err(|_| PeerError::Closed)
    }

    /// Stop the connection.
    ///
    /// Idempotent: at most one [`ConnectionEvent::Cancelled`] is ever
    /// delivered, no matter how often this is called.
    pub fn stop(&self) {
        // A connection that never started has no driver watching the
        // token; terminate it directly.
        if self.shared.state.get() == LifecycleState::Setup {
            self.shared
                .terminate(LifecycleState::Cancelled, ConnectionEvent::Cancelled);
        }
        self.shared.cancel.cancel();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer_name", &self.peer_name)
            .field("state", &self.shared.state.get())
            .finish()
    }
}

async fn drive(
    shared: Arc<Shared>,
    launch: Launch,
    peer_name: Option<String>,
    mut cmd_rx: mpsc::UnboundedReceiver<Frame>,
) {
    let stream = match launch {
        Launch::Accepted(stream) => stream,
        Launch::Connect(addr) => {
            tokio::select! {
                _ = shared.cancel.cancelled() => {
                    shared.terminate(LifecycleState::Cancelled, ConnectionEvent::Cancelled);
                    return;
                }
                connected = lanlink_transport::connect(addr) => match connected {
                    Ok(stream) => stream,
                    Err(err) => {
                        warn!(%addr, error = %err, "connect failed");
                        shared.terminate(
                            LifecycleState::Failed,
                            ConnectionEvent::Failed(err.into()),
                        );
                        return;
                    }
                }
            }
        }
    };

    if shared.cancel.is_cancelled() {
        shared.terminate(LifecycleState::Cancelled, ConnectionEvent::Cancelled);
        return;
    }

    // Outbound names come from the discovery record; inbound from the
    // transport's accepted identity.
    let peer_name = match peer_name {
        Some(name) => Some(name),
        None => stream.peer_addr().ok().map(|addr| addr.to_string()),
    };

    if !shared
        .state
        .transition(LifecycleState::Preparing, LifecycleState::Ready)
    {
        return;
    }
    debug!(peer = peer_name.as_deref().unwrap_or("unknown"), "connection ready");
    let _ = shared.events.send(ConnectionEvent::Ready {
        peer_name: peer_name.clone(),
    });

    let (read_half, write_half) = stream.into_split();
    let mut frames_in = FramedRead::new(read_half, FrameCodec::new());
    let mut frames_out = FramedWrite::new(write_half, FrameCodec::new());
    let mut sends_open = true;

    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => {
                // Drain sends accepted before the stop so they still hit
                // the wire in call order, then close.
                while let Ok(frame) = cmd_rx.try_recv() {
                    if frames_out.send(frame).await.is_err() {
                        break;
                    }
                }
                shared.terminate(LifecycleState::Cancelled, ConnectionEvent::Cancelled);
                return;
            }
            received = frames_in.next() => match received {
                // Deliver, then loop back so the next receive is armed
                // immediately; exactly one receive is outstanding.
                Some(Ok(frame)) => {
                    let _ = shared.events.send(ConnectionEvent::Message(frame));
                }
                Some(Err(err)) => {
                    warn!(error = %err, "receive failed");
                    shared.terminate(LifecycleState::Failed, ConnectionEvent::Failed(err.into()));
                    return;
                }
                // Peer closed the stream (e.g. after a Disconnect).
                None => {
                    shared.terminate(LifecycleState::Cancelled, ConnectionEvent::Cancelled);
                    return;
                }
            },
            command = cmd_rx.recv(), if sends_open => match command {
                Some(frame) => {
                    if let Err(err) = frames_out.send(frame).await {
                        match err {
                            // Encode-side rejection: nothing reached the
                            // stream, so the connection survives.
                            FrameError::PayloadTooLarge { .. } | FrameError::LengthMismatch { .. } => {
                                let _ = shared.events.send(ConnectionEvent::Error(err.into()));
                            }
                            FrameError::Io(_) => {
                                shared.terminate(
                                    LifecycleState::Failed,
                                    ConnectionEvent::Failed(err.into()),
                                );
                                return;
                            }
                        }
                    }
                }
                None => sends_open = false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use lanlink_frame::{split_chunks, MessageHeader, Reassembler};
    use lanlink_transport::StreamListener;
    use tokio::io::AsyncWriteExt;
    use tokio::sync::mpsc::error::TryRecvError;

    use super::*;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().expect("loopback addr should parse")
    }

    async fn recv(events: &mut ConnectionEvents) -> ConnectionEvent {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("event should arrive in time")
            .expect("event channel should stay open")
    }

    async fn wait_ready(events: &mut ConnectionEvents) -> Option<String> {
        match recv(events).await {
            ConnectionEvent::Ready { peer_name } => peer_name,
            other => panic!("expected Ready, got {other:?}"),
        }
    }

    async fn connected_pair() -> (
        (Connection, ConnectionEvents),
        (Connection, ConnectionEvents),
    ) {
        let listener = StreamListener::bind(loopback())
            .await
            .expect("listener should bind");
        let addr = listener.local_addr().expect("local addr should resolve");

        let record = ServiceRecord::new("remote-peer", addr);
        let (outbound, mut outbound_events) = Connection::outbound(&record);
        outbound.start().expect("outbound start should succeed");

        let (stream, _) = listener.accept().await.expect("listener should accept");
        let (inbound, mut inbound_events) = Connection::inbound(stream);
        inbound.start().expect("inbound start should succeed");

        assert_eq!(
            wait_ready(&mut outbound_events).await.as_deref(),
            Some("remote-peer")
        );
        let inbound_name = wait_ready(&mut inbound_events).await;
        assert!(inbound_name.is_some());

        ((outbound, outbound_events), (inbound, inbound_events))
    }

    #[tokio::test]
    async fn both_sides_reach_ready() {
        let ((outbound, _), (inbound, _)) = connected_pair().await;
        assert_eq!(outbound.state(), LifecycleState::Ready);
        assert_eq!(inbound.state(), LifecycleState::Ready);
    }

    #[tokio::test]
    async fn send_before_ready_is_rejected() {
        let record = ServiceRecord::new("nobody", "127.0.0.1:1".parse().unwrap());
        let (connection, _events) = Connection::outbound(&record);

        let err = connection
            .send(MessageType::Message, Bytes::from_static(b"early"))
            .expect_err("send before start should fail");
        assert!(matches!(err, PeerError::NotReady));
        assert_eq!(connection.state(), LifecycleState::Setup);
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let listener = StreamListener::bind(loopback())
            .await
            .expect("listener should bind");
        let addr = listener.local_addr().expect("local addr should resolve");
        let record = ServiceRecord::new("remote-peer", addr);

        let (connection, _events) = Connection::outbound(&record);
        connection.start().expect("first start should succeed");
        let err = connection.start().expect_err("second start should fail");
        assert!(matches!(err, PeerError::InvalidState(_)));
    }

    #[tokio::test]
    async fn messages_delivered_in_send_order() {
        let ((sender, _sender_events), (_receiver, mut receiver_events)) = connected_pair().await;

        for payload in [&b"A"[..], b"B", b"C"] {
            sender
                .send(MessageType::Message, Bytes::copy_from_slice(payload))
                .expect("send should succeed");
        }

        for expected in [&b"A"[..], b"B", b"C"] {
            match recv(&mut receiver_events).await {
                ConnectionEvent::Message(frame) => {
                    assert_eq!(frame.message_type, MessageType::Message);
                    assert_eq!(frame.payload.as_ref(), expected);
                }
                other => panic!("expected Message, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn ping_pong() {
        let ((a, mut a_events), (b, mut b_events)) = connected_pair().await;

        a.send(MessageType::Message, Bytes::from_static(b"ping"))
            .expect("ping should send");
        match recv(&mut b_events).await {
            ConnectionEvent::Message(frame) => assert_eq!(frame.payload.as_ref(), b"ping"),
            other => panic!("expected ping, got {other:?}"),
        }

        b.send(MessageType::Message, Bytes::from_static(b"pong"))
            .expect("pong should send");
        match recv(&mut a_events).await {
            ConnectionEvent::Message(frame) => assert_eq!(frame.payload.as_ref(), b"pong"),
            other => panic!("expected pong, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_payload_delivered() {
        let ((sender, _), (_receiver, mut receiver_events)) = connected_pair().await;

        sender
            .send(MessageType::Disconnect, Bytes::new())
            .expect("empty send should succeed");

        match recv(&mut receiver_events).await {
            ConnectionEvent::Message(frame) => {
                assert_eq!(frame.message_type, MessageType::Disconnect);
                assert!(frame.payload.is_empty());
            }
            other => panic!("expected Message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_type_tag_delivered_as_invalid() {
        let listener = StreamListener::bind(loopback())
            .await
            .expect("listener should bind");
        let addr = listener.local_addr().expect("local addr should resolve");

        let raw = tokio::spawn(async move {
            let mut stream = tokio::net::TcpStream::connect(addr)
                .await
                .expect("raw client should connect");
            let mut wire = Vec::new();
            wire.extend_from_slice(&MessageHeader::new(99, 3).encode());
            wire.extend_from_slice(b"???");
            wire.extend_from_slice(&MessageHeader::new(1, 5).encode());
            wire.extend_from_slice(b"after");
            stream.write_all(&wire).await.expect("raw write should succeed");
            stream
        });

        let (stream, _) = listener.accept().await.expect("listener should accept");
        let (connection, mut events) = Connection::inbound(stream);
        connection.start().expect("start should succeed");
        wait_ready(&mut events).await;

        match recv(&mut events).await {
            ConnectionEvent::Message(frame) => {
                assert_eq!(frame.message_type, MessageType::Invalid);
                assert_eq!(frame.payload.as_ref(), b"???");
            }
            other => panic!("expected Invalid message, got {other:?}"),
        }
        // The stream survives the unknown tag.
        match recv(&mut events).await {
            ConnectionEvent::Message(frame) => {
                assert_eq!(frame.message_type, MessageType::Message);
                assert_eq!(frame.payload.as_ref(), b"after");
            }
            other => panic!("expected Message, got {other:?}"),
        }

        let _raw_stream = raw.await.expect("raw task should finish");
    }

    #[tokio::test]
    async fn stop_twice_emits_single_cancelled() {
        let ((connection, mut events), _peer) = connected_pair().await;

        connection.stop();
        connection.stop();

        match recv(&mut events).await {
            ConnectionEvent::Cancelled => {}
            other => panic!("expected Cancelled, got {other:?}"),
        }
        assert_eq!(connection.state(), LifecycleState::Cancelled);
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn peer_close_yields_cancelled() {
        let ((a, _a_events), (_b, mut b_events)) = connected_pair().await;

        a.stop();

        match recv(&mut b_events).await {
            ConnectionEvent::Cancelled => {}
            other => panic!("expected Cancelled, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn connect_failure_yields_failed() {
        let listener = StreamListener::bind(loopback())
            .await
            .expect("listener should bind");
        let addr = listener.local_addr().expect("local addr should resolve");
        drop(listener);

        let record = ServiceRecord::new("gone", addr);
        let (connection, mut events) = Connection::outbound(&record);
        connection.start().expect("start should succeed");

        match recv(&mut events).await {
            ConnectionEvent::Failed(PeerError::Transport(_)) => {}
            other => panic!("expected transport failure, got {other:?}"),
        }
        assert_eq!(connection.state(), LifecycleState::Failed);
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn send_after_stop_is_rejected() {
        let ((connection, mut events), _peer) = connected_pair().await;

        connection.stop();
        match recv(&mut events).await {
            ConnectionEvent::Cancelled => {}
            other => panic!("expected Cancelled, got {other:?}"),
        }

        let err = connection
            .send(MessageType::Message, Bytes::from_static(b"late"))
            .expect_err("send on a dead connection should fail");
        assert!(matches!(err, PeerError::NotReady));
    }

    #[tokio::test]
    async fn disconnect_then_stop_cancels_peer() {
        let ((a, _a_events), (_b, mut b_events)) = connected_pair().await;

        a.send(MessageType::Disconnect, Bytes::new())
            .expect("disconnect should send");
        a.stop();

        match recv(&mut b_events).await {
            ConnectionEvent::Message(frame) => {
                assert_eq!(frame.message_type, MessageType::Disconnect);
            }
            other => panic!("expected Disconnect message, got {other:?}"),
        }
        match recv(&mut b_events).await {
            ConnectionEvent::Cancelled => {}
            other => panic!("expected Cancelled, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn chunked_payload_reassembles_exactly() {
        let ((sender, _), (_receiver, mut receiver_events)) = connected_pair().await;

        let original = Bytes::from(
            (0..200_000usize)
                .map(|i| (i % 251) as u8)
                .collect::<Vec<u8>>(),
        );
        let chunks = split_chunks(&original, 64 * 1024);
        assert_eq!(chunks.len(), 4);

        for chunk in chunks {
            sender
                .send(MessageType::BinaryChunk, chunk)
                .expect("chunk should send");
        }

        let mut reassembler = Reassembler::new();
        while reassembler.len() < original.len() {
            match recv(&mut receiver_events).await {
                ConnectionEvent::Message(frame) => {
                    assert_eq!(frame.message_type, MessageType::BinaryChunk);
                    reassembler.push(frame.payload);
                }
                other => panic!("expected BinaryChunk, got {other:?}"),
            }
        }

        assert_eq!(reassembler.assemble(), original);
    }
}
