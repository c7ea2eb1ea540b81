//! A [`Socket`] is a client connected to a namespace.
//!
//! A client has one socket per namespace it joined, all sharing the same engine connection.
//! Sockets are given to handlers through the [`SocketRef`](crate::extract::SocketRef) extractor.
//!
//! [`RemoteSocket`]s are returned by [`fetch_sockets`](crate::operators::BroadcastOperators::fetch_sockets).
//! They describe sockets that may live on another server and act on them through the adapter.
use std::{
    borrow::Cow,
    collections::HashMap,
    fmt,
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicBool, AtomicI64, Ordering},
    },
    time::Duration,
};

use enginewire::socket::{DisconnectReason as EngineDisconnectReason, Permit};
use serde::{Serialize, de::DeserializeOwned};
use socketwire_core::{
    Sid, Str, Value,
    adapter::{BroadcastOptions, CoreAdapter, RemoteSocketData, Room, RoomParam},
    packet::{Packet, PacketData},
    parser::{EncodedPacket, Parse},
    registry::{EventRegistry, ListenerId},
    value::to_args,
};
use socketwire_parser::CommonParser;
use tokio::sync::{
    mpsc::error::TrySendError,
    oneshot::{self, Receiver},
};

use crate::{
    ProtocolVersion, SocketIo, TransportType,
    ack::{AckInnerStream, AckResult, AckStream},
    adapter::{Adapter, LocalAdapter},
    client::SocketData,
    errors::{
        AdapterError, EmitWithAckError, Error, RemoteActionError, SendError, SocketError,
    },
    extensions::Extensions,
    handler::{
        AckRequest, BoxedDisconnectHandler, BoxedMessageHandler, BoxedSocketMiddleware,
        DisconnectHandler, MakeErasedHandler, MessageHandler,
    },
    ns::Namespace,
    operators::{BroadcastOperators, ConfOperators},
};

/// Event names that cannot be emitted by the server.
pub const RESERVED_EVENTS: [&str; 6] = [
    "connect",
    "connect_error",
    "disconnect",
    "disconnecting",
    "newListener",
    "removeListener",
];

const DISCONNECTING: &str = "disconnecting";
const DISCONNECT: &str = "disconnect";

/// The reason why a socket left its namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The client closed the underlying connection
    TransportClose,
    /// The client sent multiple polling requests at the same time
    MultipleHttpPollingError,
    /// The client sent a packet that could not be decoded
    PacketParsingError,
    /// The underlying connection failed
    TransportError,
    /// The client did not answer the heartbeat in time
    HeartbeatTimeout,
    /// The underlying connection was closed by the server
    ForcedClose,
    /// The server is shutting down
    ClosingServer,
    /// The client left the namespace
    ClientNSDisconnect,
    /// The server removed the socket from the namespace
    ServerNSDisconnect,
}

impl DisconnectReason {
    /// A stable name of the reason.
    pub fn as_str(&self) -> &'static str {
        use DisconnectReason::*;
        match self {
            TransportClose => "transport close",
            MultipleHttpPollingError => "multiple http polling error",
            PacketParsingError => "parse error",
            TransportError => "transport error",
            HeartbeatTimeout => "ping timeout",
            ForcedClose => "forced close",
            ClosingServer => "forced server close",
            ClientNSDisconnect => "client namespace disconnect",
            ServerNSDisconnect => "server namespace disconnect",
        }
    }

    /// Returns true if the session of the socket may be recovered after this disconnection.
    pub fn is_recoverable(&self) -> bool {
        use DisconnectReason::*;
        matches!(
            self,
            TransportClose | TransportError | HeartbeatTimeout | ForcedClose | ClosingServer
        )
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<EngineDisconnectReason> for DisconnectReason {
    fn from(reason: EngineDisconnectReason) -> Self {
        use DisconnectReason::*;
        match reason {
            EngineDisconnectReason::TransportClose => TransportClose,
            EngineDisconnectReason::MultipleHttpPollingError => MultipleHttpPollingError,
            EngineDisconnectReason::PacketParsingError => PacketParsingError,
            EngineDisconnectReason::TransportError => TransportError,
            EngineDisconnectReason::HeartbeatTimeout => HeartbeatTimeout,
            EngineDisconnectReason::ForcedClose => ForcedClose,
            EngineDisconnectReason::ClosingServer => ClosingServer,
        }
    }
}

/// Write encoded packets to a reserved slot of the engine socket.
pub(crate) trait PermitExt {
    fn send_encoded(self, data: EncodedPacket);
}

impl PermitExt for Permit<'_> {
    fn send_encoded(self, EncodedPacket { data, attachments }: EncodedPacket) {
        if attachments.is_empty() {
            self.emit(data);
        } else {
            self.emit_many(data, attachments);
        }
    }
}

pub(crate) fn check_reserved(event: &str) -> Result<(), SendError> {
    if RESERVED_EVENTS.contains(&event) {
        Err(SendError::ReservedEvent(event.to_string()))
    } else {
        Ok(())
    }
}

/// Build an event packet, refusing reserved names.
pub(crate) fn event_packet<T: ?Sized + Serialize>(
    ns: &Str,
    event: Str,
    data: &T,
) -> Result<Packet, SendError> {
    check_reserved(&event)?;
    Ok(Packet::event(ns.clone(), event, to_args(data)?))
}

/// A socket of a namespace, possibly owned by another server.
///
/// Every action goes through the adapter so it reaches the server owning the socket.
pub struct RemoteSocket<A> {
    adapter: Arc<A>,
    data: RemoteSocketData,
}

impl<A: Adapter> RemoteSocket<A> {
    pub(crate) fn new(data: RemoteSocketData, adapter: &Arc<A>) -> Self {
        Self {
            data,
            adapter: adapter.clone(),
        }
    }

    /// The socket id.
    pub fn id(&self) -> Sid {
        self.data.id
    }

    /// The description of the socket at the time it was fetched.
    pub fn data(&self) -> &RemoteSocketData {
        &self.data
    }

    /// Emit an event to the socket.
    pub async fn emit<T: ?Sized + Serialize>(
        &self,
        event: impl Into<Str>,
        data: &T,
    ) -> Result<(), RemoteActionError> {
        let packet = event_packet(&self.data.ns, event.into(), data)?;
        self.adapter.broadcast(packet, self.opts()).await?;
        Ok(())
    }

    /// Emit an event to the socket and wait for its ack.
    /// Without timeout, the ack timeout of the server is used.
    pub async fn emit_with_ack<T: ?Sized + Serialize, V: DeserializeOwned>(
        &self,
        event: impl Into<Str>,
        data: &T,
        timeout: Option<Duration>,
    ) -> Result<AckStream<V, A::AckStream>, RemoteActionError> {
        let packet = event_packet(&self.data.ns, event.into(), data)?;
        let stream = self
            .adapter
            .broadcast_with_ack(packet, self.opts(), timeout)
            .await
            .map_err(Into::<AdapterError>::into)?;
        Ok(AckStream::new(stream))
    }

    /// The current rooms of the socket.
    pub async fn rooms(&self) -> Result<Vec<Room>, A::Error> {
        self.adapter.socket_rooms(self.data.id).await
    }

    /// Add the socket to rooms.
    pub async fn join(&self, rooms: impl RoomParam) -> Result<(), A::Error> {
        self.adapter.add_sockets(self.opts(), rooms).await
    }

    /// Remove the socket from rooms.
    pub async fn leave(&self, rooms: impl RoomParam) -> Result<(), A::Error> {
        self.adapter.del_sockets(self.opts(), rooms).await
    }

    /// Disconnect the socket from its namespace.
    pub async fn disconnect(self) -> Result<(), RemoteActionError> {
        self.adapter.disconnect_socket(self.opts()).await?;
        Ok(())
    }

    #[inline(always)]
    fn opts(&self) -> BroadcastOptions {
        BroadcastOptions::new(self.data.id)
    }
}

impl<A> fmt::Debug for RemoteSocket<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteSocket")
            .field("id", &self.data.id)
            .field("server_id", &self.data.server_id)
            .field("ns", &self.data.ns)
            .field("rooms", &self.data.rooms)
            .finish()
    }
}

impl<A> Clone for RemoteSocket<A> {
    fn clone(&self) -> Self {
        Self {
            adapter: self.adapter.clone(),
            data: self.data.clone(),
        }
    }
}

/// A client connected to a namespace.
pub struct Socket<A: Adapter = LocalAdapter> {
    pub(crate) ns: Arc<Namespace<A>>,
    handlers: EventRegistry<Str, BoxedMessageHandler<A>>,
    disconnect_handlers: EventRegistry<&'static str, BoxedDisconnectHandler<A>>,
    middlewares: RwLock<Vec<BoxedSocketMiddleware>>,
    ack_message: Mutex<HashMap<i64, oneshot::Sender<AckResult<Vec<Value>>>>>,
    ack_counter: AtomicI64,
    connected: AtomicBool,
    closing: AtomicBool,
    recovered: AtomicBool,
    pid: Option<Sid>,
    auth: Value,
    /// The socket id. It is the id of the engine connection.
    pub id: Sid,
    /// Typed data attached to the socket.
    pub extensions: Extensions,
    esocket: Arc<enginewire::Socket<SocketData<A>>>,
}

impl<A: Adapter> Socket<A> {
    pub(crate) fn new(
        ns: Arc<Namespace<A>>,
        esocket: Arc<enginewire::Socket<SocketData<A>>>,
        auth: Option<Value>,
        pid: Option<Sid>,
    ) -> Self {
        Self {
            ns,
            handlers: EventRegistry::new(),
            disconnect_handlers: EventRegistry::new(),
            middlewares: RwLock::new(Vec::new()),
            ack_message: Mutex::new(HashMap::new()),
            ack_counter: AtomicI64::new(0),
            connected: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            recovered: AtomicBool::new(false),
            pid,
            auth: auth.unwrap_or_else(|| Value::Object(Default::default())),
            id: esocket.id,
            extensions: Extensions::new(),
            esocket,
        }
    }

    /// Register a handler for an event. Several handlers can listen to the same event,
    /// they are called in registration order.
    ///
    /// Returns an id to remove the handler with [`Socket::off`].
    ///
    /// ```no_run
    /// # use socketwire::{SocketIo, extract::*};
    /// # use serde_json::Value;
    /// let (_, io) = SocketIo::new_svc();
    /// io.ns("/", async |socket: SocketRef| {
    ///     socket.on("test", async |socket: SocketRef, Data(data): Data<Value>, ack: AckSender| {
    ///         ack.send(&data).ok();
    ///         socket.emit("test-back", &data).ok();
    ///     });
    /// });
    /// ```
    pub fn on<H, T>(&self, event: impl Into<Str>, handler: H) -> ListenerId
    where
        H: MessageHandler<A, T>,
        T: Send + Sync + 'static,
    {
        self.handlers
            .on(event.into(), MakeErasedHandler::new_message_boxed(handler))
    }

    /// Remove a handler registered with [`Socket::on`].
    /// Returns false if it was not registered.
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        self.handlers.off(event, id)
    }

    /// Remove every handler of an event.
    pub fn off_all(&self, event: &str) {
        self.handlers.off_all(event)
    }

    /// Register a handler called when the socket is about to leave the namespace.
    /// The socket is still in its rooms. It leaves them once every `disconnecting`
    /// handler has returned.
    pub fn on_disconnecting<C, T>(&self, callback: C) -> ListenerId
    where
        C: DisconnectHandler<A, T>,
        T: Send + Sync + 'static,
    {
        self.disconnect_handlers
            .on(DISCONNECTING, MakeErasedHandler::new_disconnect_boxed(callback))
    }

    /// Register a handler called once the socket has left the namespace.
    pub fn on_disconnect<C, T>(&self, callback: C) -> ListenerId
    where
        C: DisconnectHandler<A, T>,
        T: Send + Sync + 'static,
    {
        self.disconnect_handlers
            .on(DISCONNECT, MakeErasedHandler::new_disconnect_boxed(callback))
    }

    /// Add a middleware run for every incoming event before its handlers.
    ///
    /// It gets the event name and its arguments, which it may rewrite. If it returns
    /// an error, the event is dropped and the `error` handlers of the socket are
    /// called with the error message.
    ///
    /// ```no_run
    /// # use socketwire::{SocketIo, extract::*};
    /// let (_, io) = SocketIo::new_svc();
    /// io.ns("/", async |socket: SocketRef| {
    ///     socket.middleware(|event, _args| match event {
    ///         "admin" => Err("unauthorized".to_string()),
    ///         _ => Ok(()),
    ///     });
    ///     socket.on("error", async |Data(msg): Data<String>| println!("{msg}"));
    /// });
    /// ```
    pub fn middleware<F>(&self, middleware: F)
    where
        F: Fn(&str, &mut Vec<Value>) -> Result<(), String> + Send + Sync + 'static,
    {
        self.middlewares.write().unwrap().push(Arc::new(middleware));
    }

    /// Emit an event to the client.
    ///
    /// The data is serialized as the arguments of the event: a tuple is spread into
    /// several arguments, any other value is a single argument.
    ///
    /// # Errors
    /// * [`SendError::ReservedEvent`] if the event name is reserved.
    /// * [`SendError::Serialize`] if the data cannot be serialized.
    /// * [`SendError::Socket`] if the socket is closed or its buffer is full.
    pub fn emit<T: ?Sized + Serialize>(
        &self,
        event: impl Into<Str>,
        data: &T,
    ) -> Result<(), SendError> {
        let packet = event_packet(&self.ns.path, event.into(), data)?;
        if !self.connected() {
            return Err(SocketError::Closed.into());
        }
        let local = self.ns.adapter.get_local();
        if local.is_recovery_enabled() {
            // The packet is stored by the adapter so that a recovered session can replay it.
            let mut opts = BroadcastOptions::new(self.id);
            opts.rooms.insert(self.own_room());
            local
                .broadcast(packet, opts)
                .map_err(|mut errs| SendError::Socket(errs.pop().unwrap_or(SocketError::Closed)))
        } else {
            self.send(packet)?;
            Ok(())
        }
    }

    /// Emit an event to the client and wait for its ack.
    ///
    /// The ack is awaited with the ack timeout of the server,
    /// use [`Socket::timeout`] to choose another one.
    pub fn emit_with_ack<T: ?Sized + Serialize, V: DeserializeOwned>(
        &self,
        event: impl Into<Str>,
        data: &T,
    ) -> Result<AckStream<V>, EmitWithAckError> {
        self.emit_with_ack_timeout(event.into(), data, self.ns.ack_timeout)
    }

    pub(crate) fn emit_with_ack_timeout<T: ?Sized + Serialize, V: DeserializeOwned>(
        &self,
        event: Str,
        data: &T,
        timeout: Duration,
    ) -> Result<AckStream<V>, EmitWithAckError> {
        let packet = event_packet(&self.ns.path, event, data)?;
        if !self.connected() {
            return Err(SocketError::Closed.into());
        }
        let rx = self.send_with_ack(packet)?;
        Ok(AckStream::new(AckInnerStream::send(rx, timeout, self.id)))
    }

    /// Join rooms.
    pub fn join(&self, rooms: impl RoomParam) {
        self.ns.adapter.get_local().add_all(self.id, rooms)
    }

    /// Leave rooms.
    pub fn leave(&self, rooms: impl RoomParam) {
        self.ns.adapter.get_local().del(self.id, rooms)
    }

    /// Leave every room, including the room named after the socket id.
    pub fn leave_all(&self) {
        self.ns.adapter.get_local().del_all(self.id)
    }

    /// The rooms of the socket.
    pub fn rooms(&self) -> Vec<Room> {
        self.ns.adapter.get_local().socket_rooms(self.id)
    }

    /// Returns true while the socket is in its namespace.
    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Returns true if the socket resumed a previous session.
    pub fn recovered(&self) -> bool {
        self.recovered.load(Ordering::SeqCst)
    }

    /// The auth payload sent by the client when it joined the namespace.
    /// It is an empty object if the client sent nothing.
    pub fn auth(&self) -> &Value {
        &self.auth
    }

    /// Target the members of rooms, except this socket.
    pub fn to(&self, rooms: impl RoomParam) -> BroadcastOperators<A> {
        BroadcastOperators::from_sock(self.ns.clone(), self.id).to(rooms)
    }

    /// Target the members of rooms, including this socket if it is a member.
    pub fn within(&self, rooms: impl RoomParam) -> BroadcastOperators<A> {
        BroadcastOperators::from_sock(self.ns.clone(), self.id).within(rooms)
    }

    /// Target every socket of the namespace, except the members of rooms and this socket.
    pub fn except(&self, rooms: impl RoomParam) -> BroadcastOperators<A> {
        BroadcastOperators::from_sock(self.ns.clone(), self.id).except(rooms)
    }

    /// Only target the sockets of this server.
    pub fn local(&self) -> BroadcastOperators<A> {
        BroadcastOperators::from_sock(self.ns.clone(), self.id).local()
    }

    /// Target every socket of the namespace, except this socket.
    pub fn broadcast(&self) -> BroadcastOperators<A> {
        BroadcastOperators::from_sock(self.ns.clone(), self.id).broadcast()
    }

    /// Drop the next emit instead of failing if the socket buffer is full.
    pub fn volatile(&self) -> ConfOperators<'_, A> {
        ConfOperators::new(self).volatile()
    }

    /// Set the ack timeout of the next emit.
    pub fn timeout(&self, timeout: Duration) -> ConfOperators<'_, A> {
        ConfOperators::new(self).timeout(timeout)
    }

    /// Accepted for compatibility with the socket.io client API.
    /// The transports of this server never compress frames.
    pub fn compress(&self, compress: bool) -> ConfOperators<'_, A> {
        ConfOperators::new(self).compress(compress)
    }

    /// Remove the socket from its namespace. The client is notified and its
    /// connection stays open for the other namespaces.
    ///
    /// # Errors
    /// [`SocketError::InternalChannelFull`] if the disconnect packet cannot be buffered.
    pub fn disconnect(self: Arc<Self>) -> Result<(), SocketError> {
        if let Err(e) = self.send(Packet::disconnect(self.ns.path.clone())) {
            if e == SocketError::InternalChannelFull {
                return Err(e);
            }
        }
        self.close(DisconnectReason::ServerNSDisconnect);
        Ok(())
    }

    /// The parts of the http request that opened the connection.
    pub fn req_parts(&self) -> &http::request::Parts {
        &self.esocket.req_parts
    }

    /// The current transport of the connection.
    pub fn transport_type(&self) -> TransportType {
        self.esocket.transport_type()
    }

    /// The socket.io protocol version of the client.
    pub fn protocol(&self) -> ProtocolVersion {
        self.esocket.protocol.into()
    }

    /// The namespace path.
    pub fn ns(&self) -> &str {
        &self.ns.path
    }

    /// The server handle, set once the engine connection is established.
    pub fn get_io(&self) -> Option<&SocketIo<A>> {
        self.esocket.data.io.get()
    }

    pub(crate) fn pid(&self) -> Option<Sid> {
        self.pid
    }

    pub(crate) fn own_room(&self) -> Room {
        Cow::Owned(self.id.to_string())
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub(crate) fn set_recovered(&self, recovered: bool) {
        self.recovered.store(recovered, Ordering::SeqCst);
    }

    pub(crate) fn reserve(&self) -> Result<Permit<'_>, SocketError> {
        self.esocket.reserve().map_err(|e| match e {
            TrySendError::Full(_) => SocketError::InternalChannelFull,
            TrySendError::Closed(_) => SocketError::Closed,
        })
    }

    pub(crate) fn send(&self, packet: Packet) -> Result<(), SocketError> {
        self.send_raw(CommonParser.encode(packet))
    }

    pub(crate) fn send_raw(&self, data: EncodedPacket) -> Result<(), SocketError> {
        self.reserve()?.send_encoded(data);
        Ok(())
    }

    /// Send a packet with a new ack id and return the receiver of its ack.
    pub(crate) fn send_with_ack(
        &self,
        mut packet: Packet,
    ) -> Result<Receiver<AckResult<Vec<Value>>>, SocketError> {
        let permit = self.reserve()?;
        let ack = self.ack_counter.fetch_add(1, Ordering::SeqCst) + 1;
        packet.inner.set_ack_id(ack);
        let (tx, rx) = oneshot::channel();
        self.ack_message.lock().unwrap().insert(ack, tx);
        permit.send_encoded(CommonParser.encode(packet));
        Ok(rx)
    }

    pub(crate) fn recv(self: &Arc<Self>, packet: PacketData) -> Result<(), Error> {
        match packet {
            PacketData::Event(event, args, ack) | PacketData::BinaryEvent(event, args, ack) => {
                self.recv_event(event, args, ack);
                Ok(())
            }
            PacketData::EventAck(args, id) | PacketData::BinaryAck(args, id) => {
                self.recv_ack(args, id);
                Ok(())
            }
            PacketData::Disconnect => {
                self.clone().close(DisconnectReason::ClientNSDisconnect);
                Ok(())
            }
            _ => Err(Error::InvalidPacketType),
        }
    }

    fn recv_event(self: &Arc<Self>, event: Str, mut args: Vec<Value>, ack: Option<i64>) {
        let middlewares = self.middlewares.read().unwrap().clone();
        for middleware in middlewares {
            if let Err(msg) = middleware(&event, &mut args) {
                #[cfg(feature = "tracing")]
                tracing::debug!(sid = ?self.id, "event {event} refused by middleware: {msg}");
                for handler in self.handlers.listeners("error") {
                    handler.call(self.clone(), vec![Value::String(msg.clone())], None);
                }
                return;
            }
        }

        let ack = ack.map(AckRequest::new);
        let handlers = self.handlers.listeners(event.as_str());
        #[cfg(feature = "tracing")]
        if handlers.is_empty() {
            tracing::trace!(sid = ?self.id, "no handler for event {event}");
        }
        for handler in handlers {
            handler.call(self.clone(), args.clone(), ack.clone());
        }
    }

    /// An ack is delivered at most once, later ones with the same id are dropped.
    fn recv_ack(&self, args: Vec<Value>, id: i64) {
        if let Some(tx) = self.ack_message.lock().unwrap().remove(&id) {
            tx.send(Ok(args)).ok();
        }
    }

    /// Remove the socket from its namespace.
    ///
    /// The `disconnecting` handlers are awaited while the socket is still in its rooms,
    /// then the session is persisted if it can be recovered. The socket then leaves its
    /// rooms and the namespace before the `disconnect` handlers are called.
    pub(crate) fn close(self: Arc<Self>, reason: DisconnectReason) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(sid = ?self.id, ns = ?self.ns.path, "closing socket: {reason}");

        let disconnecting = self.disconnect_handlers.listeners(DISCONNECTING);
        let persist = self.pid.filter(|_| reason.is_recoverable());
        if disconnecting.is_empty() && persist.is_none() {
            self.finish_close(reason);
            return;
        }
        tokio::spawn(async move {
            for handler in disconnecting {
                if let Some(fut) = handler.call(self.clone(), reason) {
                    fut.await;
                }
            }
            if let Some(pid) = persist {
                self.ns.adapter.persist_session(self.id, pid).await;
            }
            self.finish_close(reason);
        });
    }

    fn finish_close(self: Arc<Self>, reason: DisconnectReason) {
        self.ns.remove_socket(self.id);
        self.set_connected(false);
        // Pending acks resolve to a closed socket error.
        self.ack_message.lock().unwrap().clear();
        for handler in self.disconnect_handlers.listeners(DISCONNECT) {
            if let Some(fut) = handler.call(self.clone(), reason) {
                tokio::spawn(fut);
            }
        }
        self.disconnect_handlers.clear();
        self.handlers.clear();
    }

    /// Close the engine connection and wait for it to be closed.
    pub(crate) async fn close_underlying_transport(&self) {
        if !self.esocket.is_closed() {
            self.esocket.close(EngineDisconnectReason::ClosingServer);
            self.esocket.closed().await;
        }
    }
}

impl<A: Adapter> fmt::Debug for Socket<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("ns", &self.ns())
            .field("id", &self.id)
            .field("connected", &self.connected())
            .field("recovered", &self.recovered())
            .field("ack_counter", &self.ack_counter)
            .finish()
    }
}

impl<A: Adapter> PartialEq for Socket<A> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

#[cfg(any(test, feature = "__test_harness"))]
impl Socket<LocalAdapter> {
    /// A connected socket backed by a dummy engine socket, for tests.
    #[doc(hidden)]
    pub fn new_dummy(sid: Sid, ns: Arc<Namespace<LocalAdapter>>) -> Socket<LocalAdapter> {
        let close_fn = Box::new(|_: Sid, _: EngineDisconnectReason| ());
        let (esocket, _rx) = enginewire::Socket::new_dummy(sid, close_fn);
        let socket = Socket::new(ns, esocket, None, None);
        socket.set_connected(true);
        socket
    }
}
