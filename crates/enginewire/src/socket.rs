//! ## A [`Socket`] is one client session
//!
//! It can be used to:
//! * emit text or binary data,
//! * look at the http request that opened the session,
//! * close the session.
//!
//! The session lifecycle is `Opening -> Open -> (Upgrading -> Open)* -> Closed`,
//! exposed through [`Socket::ready_state`].
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use http::request::Parts;
use smallvec::{SmallVec, smallvec};
use tokio::{
    sync::{
        Mutex,
        mpsc::{self, Receiver, error::TrySendError},
    },
    task::JoinHandle,
};

use crate::{
    config::EngineIoConfig, errors::Error, peekable::PeekableReceiver, ProtocolVersion, Sid, Str,
    TransportType,
};
use enginewire_core::{Packet, PacketBuf};

/// The reason a session was closed.
///
/// Its [`Display`](fmt::Display) output is the short reason string reported to applications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The client closed the transport or sent a close packet
    TransportClose,
    /// The client sent a second poll request while one was pending
    MultipleHttpPollingError,
    /// The client sent a malformed packet or payload
    PacketParsingError,
    /// The transport failed or the client broke the protocol
    TransportError,
    /// The client did not answer the heartbeat in time
    HeartbeatTimeout,
    /// The session was closed by the application
    ForcedClose,
    /// The server is shutting down
    ClosingServer,
}

impl DisconnectReason {
    /// The stable reason string
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::TransportClose => "transport close",
            DisconnectReason::MultipleHttpPollingError => "multiple http polling error",
            DisconnectReason::PacketParsingError => "parse error",
            DisconnectReason::TransportError => "transport error",
            DisconnectReason::HeartbeatTimeout => "ping timeout",
            DisconnectReason::ForcedClose => "forced close",
            DisconnectReason::ClosingServer => "forced server close",
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map an error to the reason used to close the session.
/// `None` means the error does not close the session.
impl From<&Error> for Option<DisconnectReason> {
    fn from(err: &Error) -> Self {
        use Error::*;
        match err {
            WsTransport(_) | Io(_) | InvalidHeartbeatDirection | PayloadTooLarge | BodyRead
            | Frame(enginewire_core::stream::FrameError::Io(_)) => {
                Some(DisconnectReason::TransportError)
            }
            Frame(_) | BadPacket(_) | PacketParse(_) => Some(DisconnectReason::PacketParsingError),
            HeartbeatTimeout => Some(DisconnectReason::HeartbeatTimeout),
            MultipleHttpPolling => Some(DisconnectReason::MultipleHttpPollingError),
            _ => None,
        }
    }
}

/// The state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    /// The session is created but the handshake is not sent yet
    Opening = 0,
    /// The session is usable
    Open = 1,
    /// A second transport is being probed
    Upgrading = 2,
    /// The session is closed, this state is terminal
    Closed = 3,
}

impl From<u8> for ReadyState {
    fn from(value: u8) -> Self {
        match value {
            0 => ReadyState::Opening,
            1 => ReadyState::Open,
            2 => ReadyState::Upgrading,
            _ => ReadyState::Closed,
        }
    }
}

/// A permit to emit packets without waiting for channel capacity.
///
/// The packets of one permit are queued together, so they are never split
/// between two polling payloads and never interleaved with other emits.
pub struct Permit<'a> {
    inner: mpsc::Permit<'a, PacketBuf>,
    protocol: ProtocolVersion,
}

impl Permit<'_> {
    fn binary(&self, data: Bytes) -> Packet {
        match self.protocol {
            ProtocolVersion::V3 => Packet::BinaryV3(data),
            ProtocolVersion::V4 => Packet::Binary(data),
        }
    }

    /// Emit a text message
    #[inline]
    pub fn emit(self, msg: Str) {
        self.inner.send(smallvec![Packet::Message(msg)]);
    }

    /// Emit a binary message
    #[inline]
    pub fn emit_binary(self, data: Bytes) {
        let packet = self.binary(data);
        self.inner.send(smallvec![packet]);
    }

    /// Emit a text message followed by binary messages
    pub fn emit_many(self, msg: Str, data: Vec<Bytes>) {
        let mut packets = SmallVec::with_capacity(data.len() + 1);
        packets.push(Packet::Message(msg));
        for d in data {
            packets.push(self.binary(d));
        }
        self.inner.send(packets);
    }
}

/// A client session
pub struct Socket<D>
where
    D: Default + Send + Sync + 'static,
{
    /// The session id
    pub id: Sid,

    /// The protocol revision negotiated with the client
    pub protocol: ProtocolVersion,

    transport: AtomicU8,
    state: AtomicU8,

    /// Packets waiting to be written to the active transport.
    /// Polling requests lock it while they are pending.
    pub(crate) internal_rx: Mutex<PeekableReceiver<PacketBuf>>,
    internal_tx: mpsc::Sender<PacketBuf>,

    /// Guard against concurrent polling POST requests
    pub(crate) post_lock: Mutex<()>,

    heartbeat_rx: Mutex<Receiver<()>>,
    heartbeat_tx: mpsc::Sender<()>,
    heartbeat_handle: std::sync::Mutex<Option<JoinHandle<()>>>,

    close_fn: Box<dyn Fn(Sid, DisconnectReason) + Send + Sync>,

    /// User data bound to the session
    pub data: D,

    /// The http request head that opened the session
    pub req_parts: Parts,

    /// False when a v3 polling client asked for base64 payloads
    pub(crate) supports_binary: bool,
}

impl<D> Socket<D>
where
    D: Default + Send + Sync + 'static,
{
    pub(crate) fn new(
        protocol: ProtocolVersion,
        transport: TransportType,
        config: &EngineIoConfig,
        req_parts: Parts,
        close_fn: Box<dyn Fn(Sid, DisconnectReason) + Send + Sync>,
        supports_binary: bool,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::channel(config.max_buffer_size);
        let (heartbeat_tx, heartbeat_rx) = mpsc::channel(1);

        Self {
            id: Sid::new(),
            protocol,
            transport: AtomicU8::new(transport as u8),
            state: AtomicU8::new(ReadyState::Opening as u8),

            internal_rx: Mutex::new(PeekableReceiver::new(internal_rx)),
            internal_tx,
            post_lock: Mutex::new(()),

            heartbeat_rx: Mutex::new(heartbeat_rx),
            heartbeat_tx,
            heartbeat_handle: std::sync::Mutex::new(None),
            close_fn,

            data: D::default(),
            req_parts,
            supports_binary,
        }
    }

    /// The current state of the session
    pub fn ready_state(&self) -> ReadyState {
        self.state.load(Ordering::Acquire).into()
    }

    fn transition(&self, from: ReadyState, to: ReadyState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Called once the handshake packet is sent
    pub(crate) fn set_open(&self) {
        self.transition(ReadyState::Opening, ReadyState::Open);
    }

    /// Enter the upgrading state. Fails if the session is not open,
    /// which covers an upgrade that is already in progress.
    pub(crate) fn start_upgrade(&self) -> bool {
        self.transition(ReadyState::Open, ReadyState::Upgrading)
    }

    pub(crate) fn cancel_upgrade(&self) {
        self.transition(ReadyState::Upgrading, ReadyState::Open);
    }

    pub(crate) fn finish_upgrade(&self, transport: TransportType) {
        self.transport.store(transport as u8, Ordering::Release);
        self.transition(ReadyState::Upgrading, ReadyState::Open);
    }

    /// Returns true only for the first call
    pub(crate) fn set_closed(&self) -> bool {
        self.state.swap(ReadyState::Closed as u8, Ordering::AcqRel) != ReadyState::Closed as u8
    }

    pub(crate) fn is_upgrading(&self) -> bool {
        self.ready_state() == ReadyState::Upgrading
    }

    /// The transport currently carrying the session
    pub fn transport_type(&self) -> TransportType {
        TransportType::try_from(self.transport.load(Ordering::Acquire))
            .unwrap_or(TransportType::Polling)
    }

    pub(crate) fn is_http(&self) -> bool {
        self.transport_type() == TransportType::Polling
    }

    /// Returns true if a packet emitted now would be written without waiting.
    ///
    /// A polling session is only writable while a poll request is pending.
    /// Stream transports are always writable.
    pub fn is_writable(&self) -> bool {
        if self.is_http() {
            self.internal_rx.try_lock().is_err()
        } else {
            !self.is_closed()
        }
    }

    /// Heartbeat packets received from the client
    pub(crate) fn on_heartbeat(&self) {
        // a full channel already holds an unconsumed heartbeat
        if let Err(TrySendError::Closed(_)) = self.heartbeat_tx.try_send(()) {
            #[cfg(feature = "tracing")]
            tracing::debug!(sid = ?self.id, "heartbeat received after heartbeat job end");
        }
    }

    pub(crate) fn abort_heartbeat(&self) {
        if let Some(handle) = self.heartbeat_handle.lock().ok().and_then(|mut h| h.take()) {
            handle.abort();
        }
    }

    pub(crate) fn send(&self, packet: Packet) -> Result<(), TrySendError<PacketBuf>> {
        #[cfg(feature = "tracing")]
        tracing::trace!(sid = ?self.id, ?packet, "sending packet");
        self.internal_tx.try_send(smallvec![packet])
    }

    pub(crate) fn spawn_heartbeat(self: Arc<Self>, interval: Duration, timeout: Duration) {
        let socket = self.clone();
        let handle = tokio::spawn(async move {
            if let Err(_e) = socket.heartbeat_job(interval, timeout).await {
                #[cfg(feature = "tracing")]
                tracing::debug!(sid = ?socket.id, "heartbeat error: {:?}", _e);
                socket.close(DisconnectReason::HeartbeatTimeout);
            }
        });
        if let Ok(mut h) = self.heartbeat_handle.lock() {
            h.replace(handle);
        }
    }

    async fn heartbeat_job(&self, interval: Duration, timeout: Duration) -> Result<(), Error> {
        let mut heartbeat_rx = self
            .heartbeat_rx
            .try_lock()
            .map_err(|_| Error::HeartbeatTimeout)?;
        match self.protocol {
            ProtocolVersion::V3 => self.heartbeat_job_v3(&mut heartbeat_rx, interval, timeout).await,
            ProtocolVersion::V4 => self.heartbeat_job_v4(&mut heartbeat_rx, interval, timeout).await,
        }
    }

    /// The server pings, the client must answer with a pong within `timeout`.
    async fn heartbeat_job_v4(
        &self,
        heartbeat_rx: &mut Receiver<()>,
        interval: Duration,
        timeout: Duration,
    ) -> Result<(), Error> {
        #[cfg(feature = "tracing")]
        tracing::debug!(sid = ?self.id, "heartbeat sender routine started");

        let mut interval_tick = tokio::time::interval(interval);
        interval_tick.tick().await;
        // Some clients send a pong first, it is consumed here
        heartbeat_rx.try_recv().ok();
        loop {
            interval_tick.tick().await;
            if self.is_upgrading() {
                #[cfg(feature = "tracing")]
                tracing::debug!(sid = ?self.id, "heartbeat paused during upgrade");
                continue;
            }

            #[cfg(feature = "tracing")]
            tracing::trace!(sid = ?self.id, "emitting ping");
            self.internal_tx
                .try_send(smallvec![Packet::Ping])
                .map_err(|_| Error::HeartbeatTimeout)?;

            tokio::time::timeout(timeout, heartbeat_rx.recv())
                .await
                .map_err(|_| Error::HeartbeatTimeout)?
                .ok_or(Error::HeartbeatTimeout)?;

            #[cfg(feature = "tracing")]
            tracing::trace!(sid = ?self.id, "pong received");
        }
    }

    /// The client pings, the server answers with a pong.
    /// No ping within `interval + timeout` closes the session.
    async fn heartbeat_job_v3(
        &self,
        heartbeat_rx: &mut Receiver<()>,
        interval: Duration,
        timeout: Duration,
    ) -> Result<(), Error> {
        #[cfg(feature = "tracing")]
        tracing::debug!(sid = ?self.id, "heartbeat receiver routine started");

        loop {
            match tokio::time::timeout(interval + timeout, heartbeat_rx.recv()).await {
                Ok(Some(())) => (),
                Err(_) if self.is_upgrading() => continue,
                _ => return Err(Error::HeartbeatTimeout),
            }

            #[cfg(feature = "tracing")]
            tracing::trace!(sid = ?self.id, "ping received, sending pong");
            self.internal_tx
                .try_send(smallvec![Packet::Pong])
                .map_err(|_| Error::HeartbeatTimeout)?;
        }
    }

    /// Reserve room in the outbound channel to emit packets atomically.
    #[inline]
    pub fn reserve(&self) -> Result<Permit<'_>, TrySendError<()>> {
        let permit = self.internal_tx.try_reserve()?;
        Ok(Permit {
            inner: permit,
            protocol: self.protocol,
        })
    }

    /// Emit a text message.
    ///
    /// Fails if the outbound buffer is full or the session is closed.
    pub fn emit(&self, msg: impl Into<Str>) -> Result<(), TrySendError<()>> {
        self.reserve()?.emit(msg.into());
        Ok(())
    }

    /// Emit a binary message.
    ///
    /// Fails if the outbound buffer is full or the session is closed.
    pub fn emit_binary(&self, data: impl Into<Bytes>) -> Result<(), TrySendError<()>> {
        self.reserve()?.emit_binary(data.into());
        Ok(())
    }

    /// Close the session. The handler is notified with `reason`.
    ///
    /// Closing twice is a no-op.
    pub fn close(&self, reason: DisconnectReason) {
        (self.close_fn)(self.id, reason);
        self.send(Packet::Close).ok();
    }

    /// Returns true once the outbound channel is closed
    pub fn is_closed(&self) -> bool {
        self.internal_tx.is_closed()
    }

    /// Wait for the outbound channel to be closed
    pub async fn closed(&self) {
        self.internal_tx.closed().await
    }
}

impl<D: Default + Send + Sync + 'static> fmt::Debug for Socket<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("sid", &self.id)
            .field("protocol", &self.protocol)
            .field("transport", &self.transport_type())
            .field("state", &self.ready_state())
            .field("req_parts", &self.req_parts)
            .finish()
    }
}

#[cfg(any(test, feature = "__test_harness"))]
#[doc(hidden)]
impl<D: Default + Send + Sync + 'static> Socket<D> {
    /// A socket that is not bound to any engine.
    /// Its outbound packets are forwarded to the returned receiver.
    pub fn new_dummy(
        sid: Sid,
        close_fn: Box<dyn Fn(Sid, DisconnectReason) + Send + Sync>,
    ) -> (Arc<Socket<D>>, mpsc::Receiver<Packet>) {
        let mut socket = Socket::new(
            ProtocolVersion::V4,
            TransportType::Websocket,
            &EngineIoConfig::default(),
            http::Request::<()>::default().into_parts().0,
            close_fn,
            true,
        );
        socket.id = sid;
        socket.set_open();
        let socket = Arc::new(socket);
        let (tx, rx) = mpsc::channel(100);
        let sock = socket.clone();
        tokio::spawn(async move {
            let mut internal_rx = sock.internal_rx.lock().await;
            while let Some(packets) = internal_rx.recv().await {
                for packet in packets {
                    if tx.send(packet).await.is_err() {
                        return;
                    }
                }
            }
        });
        (socket, rx)
    }
}
