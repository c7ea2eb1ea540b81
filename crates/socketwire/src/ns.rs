use std::{
    collections::HashMap,
    sync::{Arc, RwLock, Weak},
    time::Duration,
};

use enginewire::DisconnectReason as EngineDisconnectReason;
use socketwire_core::{
    Sid, Str, Uid, Value,
    adapter::{CoreAdapter, CoreLocalAdapter, RemoteSocketData, Room, SocketEmitter},
    errors::DisconnectError,
    packet::{ConnectPacket, Packet, PacketData},
    parser::{EncodedPacket, Parse},
    registry::EventRegistry,
    value::to_value,
};
use socketwire_parser::CommonParser;

use crate::{
    ProtocolVersion, SocketError, SocketIoConfig,
    ack::AckInnerStream,
    adapter::Adapter,
    client::SocketData,
    errors::{ConnectFail, Error},
    handler::{BoxedConnectHandler, ConnectHandler, ConnectOutcome, MakeErasedHandler},
    socket::{DisconnectReason, Socket},
};

/// A handler of server side events. It gets the event arguments and may return a response.
pub(crate) type ServerSideHandler = Arc<dyn Fn(Vec<Value>) -> Option<Vec<Value>> + Send + Sync>;

/// The server side handlers, shared by every namespace of a server.
pub(crate) type ServerSideRegistry = EventRegistry<Str, ServerSideHandler>;

/// Called when the last socket of a dynamic namespace leaves it.
pub(crate) type RetireFn = Box<dyn Fn() + Send + Sync>;

/// A [`Namespace`] constructor used for dynamic namespaces.
/// It holds the handler cloned into every namespace it creates.
pub struct NamespaceCtr<A: Adapter> {
    handler: BoxedConnectHandler<A>,
}

pub struct Namespace<A: Adapter> {
    pub path: Str,
    pub(crate) adapter: Arc<A>,
    pub(crate) ack_timeout: Duration,
    handler: BoxedConnectHandler<A>,
    sockets: RwLock<HashMap<Sid, Arc<Socket<A>>>>,
    skip_middlewares_on_recovery: bool,
    retire: Option<RetireFn>,
}

impl<A: Adapter> NamespaceCtr<A> {
    pub fn new<C, T>(handler: C) -> Self
    where
        C: ConnectHandler<A, T>,
        T: Send + Sync + 'static,
    {
        Self {
            handler: MakeErasedHandler::new_ns_boxed(handler),
        }
    }

    pub fn get_new_ns(
        &self,
        path: Str,
        adapter_state: &A::State,
        config: &SocketIoConfig,
        server_side: Arc<ServerSideRegistry>,
        retire: Option<RetireFn>,
    ) -> Arc<Namespace<A>> {
        let handler = self.handler.boxed_clone();
        Namespace::new_boxed(path, handler, adapter_state, config, server_side, retire)
    }
}

impl<A: Adapter> Namespace<A> {
    pub(crate) fn new<C, T>(
        path: Str,
        handler: C,
        adapter_state: &A::State,
        config: &SocketIoConfig,
        server_side: Arc<ServerSideRegistry>,
    ) -> Arc<Self>
    where
        C: ConnectHandler<A, T>,
        T: Send + Sync + 'static,
    {
        let handler = MakeErasedHandler::new_ns_boxed(handler);
        Self::new_boxed(path, handler, adapter_state, config, server_side, None)
    }

    fn new_boxed(
        path: Str,
        handler: BoxedConnectHandler<A>,
        adapter_state: &A::State,
        config: &SocketIoConfig,
        server_side: Arc<ServerSideRegistry>,
        retire: Option<RetireFn>,
    ) -> Arc<Self> {
        let ack_timeout = config.ack_timeout;
        let uid = config.server_id;
        let recovery = config.connection_state_recovery.clone();
        Arc::new_cyclic(|ns| {
            let emitter = Emitter::new(ns.clone(), path.clone(), ack_timeout, uid, server_side);
            let mut local = CoreLocalAdapter::new(emitter);
            if let Some(recovery) = &recovery {
                local = local.with_recovery(recovery.clone());
            }
            Self {
                path,
                ack_timeout,
                handler,
                sockets: HashMap::new().into(),
                adapter: Arc::new(A::new(adapter_state, local)),
                skip_middlewares_on_recovery: recovery.is_some_and(|r| r.skip_middlewares),
                retire,
            }
        })
    }

    /// Connects a socket to the namespace.
    ///
    /// * A client presenting the private id and offset of a stored session resumes it.
    /// * The middlewares are called, unless the session was resumed and the recovery
    ///   config skips them. A refusal sends a connect_error packet to the client.
    /// * Otherwise the socket joins its own room, the connect packet is sent and
    ///   the connect handler is called.
    pub(crate) async fn connect(
        self: Arc<Self>,
        esocket: Arc<enginewire::Socket<SocketData<A>>>,
        auth: Option<Value>,
    ) -> Result<(), ConnectFail> {
        let local = self.adapter.get_local();
        let session = match auth.as_ref().and_then(session_args) {
            Some((pid, offset)) if local.is_recovery_enabled() => {
                match self.adapter.restore_session(pid, offset).await {
                    Ok(session) => session,
                    Err(_e) => {
                        #[cfg(feature = "tracing")]
                        tracing::debug!(?pid, "could not restore session: {_e}");
                        None
                    }
                }
            }
            _ => None,
        };
        let pid = match &session {
            Some(session) => Some(session.pid),
            None if local.is_recovery_enabled() => Some(Sid::new()),
            None => None,
        };

        let socket: Arc<Socket<A>> =
            Socket::new(self.clone(), esocket.clone(), auth.clone(), pid).into();

        if session.is_none() || !self.skip_middlewares_on_recovery {
            let outcome =
                crate::handler::connect::run_middlewares(self.handler.middlewares(), &socket, &auth)
                    .await;
            let (msg, close) = match outcome {
                ConnectOutcome::Continue => (None, false),
                ConnectOutcome::Reject(msg) => (Some(msg), false),
                ConnectOutcome::RejectAndClose(msg) => (Some(msg), true),
            };
            if let Some(msg) = msg {
                #[cfg(feature = "tracing")]
                tracing::trace!(ns = self.path.as_str(), ?socket.id, "emitting connect_error packet");

                if let Err(_e) = socket.send(Packet::connect_error(self.path.clone(), msg.clone())) {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("error sending connect_error packet: {:?}, closing conn", _e);
                    esocket.close(EngineDisconnectReason::PacketParsingError);
                } else if close {
                    esocket.close(EngineDisconnectReason::ForcedClose);
                }
                return Err(ConnectFail::Rejected(msg));
            }
        }

        self.sockets.write().unwrap().insert(socket.id, socket.clone());
        #[cfg(feature = "tracing")]
        tracing::trace!(?socket.id, ?self.path, "socket added to namespace");

        let previous = session.as_ref().map(|s| (s.sid, &s.rooms));
        if let Err(e) = self.join_initial_rooms(&socket, previous).await {
            self.sockets.write().unwrap().remove(&socket.id);
            return Err(e);
        }

        let payload = match ProtocolVersion::from(esocket.protocol) {
            ProtocolVersion::V5 => to_value(&ConnectPacket { sid: socket.id, pid }).ok(),
            ProtocolVersion::V4 => None,
        };
        if let Err(e) = socket.send(Packet::connect(self.path.clone(), payload)) {
            #[cfg(feature = "tracing")]
            tracing::debug!("error sending connect packet: {:?}, closing conn", e);
            self.remove_socket(socket.id);
            esocket.close(EngineDisconnectReason::PacketParsingError);
            return Err(e.into());
        }

        socket.set_connected(true);
        if let Some(session) = session {
            socket.set_recovered(true);
            #[cfg(feature = "tracing")]
            tracing::debug!(?socket.id, "session recovered, replaying {} packets", session.missed_packets.len());
            for packet in session.missed_packets {
                if let Err(_e) = socket.send(packet) {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(?socket.id, "could not replay packet: {_e}");
                }
            }
        }
        self.handler.call(socket, auth);

        Ok(())
    }

    /// Join the room named after the socket id, and the rooms of a recovered session.
    async fn join_initial_rooms(
        &self,
        socket: &Socket<A>,
        session: Option<(Sid, &Vec<Room>)>,
    ) -> Result<(), ConnectFail> {
        let mut rooms = vec![socket.own_room()];
        if let Some((old_sid, old_rooms)) = session {
            let old_room = old_sid.to_string();
            rooms.extend(
                old_rooms
                    .iter()
                    .filter(|room| room.as_ref() != old_room)
                    .cloned(),
            );
        }
        self.adapter
            .add_all(socket.id, rooms)
            .await
            .map_err(|e| ConnectFail::Adapter(e.into()))
    }

    /// Removes a socket from its rooms and from the namespace.
    pub fn remove_socket(&self, sid: Sid) {
        #[cfg(feature = "tracing")]
        tracing::trace!(?sid, ?self.path, "removing socket from namespace");

        self.adapter.get_local().del_all(sid);
        let empty = {
            let mut sockets = self.sockets.write().unwrap();
            sockets.remove(&sid);
            sockets.is_empty()
        };
        if empty {
            if let Some(retire) = &self.retire {
                retire();
            }
        }
    }

    pub fn has(&self, sid: Sid) -> bool {
        self.sockets.read().unwrap().contains_key(&sid)
    }

    pub fn is_empty(&self) -> bool {
        self.sockets.read().unwrap().is_empty()
    }

    pub fn recv(&self, sid: Sid, packet: PacketData) -> Result<(), Error> {
        match packet {
            PacketData::Connect(_) | PacketData::ConnectError(_) => Err(Error::InvalidPacketType),
            packet => self.get_socket(sid).ok_or(Error::SocketGone(sid))?.recv(packet),
        }
    }

    pub fn get_socket(&self, sid: Sid) -> Option<Arc<Socket<A>>> {
        self.sockets.read().unwrap().get(&sid).cloned()
    }

    pub fn get_sockets(&self) -> Vec<Arc<Socket<A>>> {
        self.sockets.read().unwrap().values().cloned().collect()
    }

    /// Closes the namespace:
    /// * with [`DisconnectReason::ClosingServer`], the underlying connections are closed,
    ///   which closes their sockets.
    /// * with [`DisconnectReason::ServerNSDisconnect`], the clients are notified.
    /// * the adapter is closed last.
    pub async fn close(&self, reason: DisconnectReason) {
        use futures_util::future;
        let sockets = self.get_sockets();

        #[cfg(feature = "tracing")]
        tracing::debug!(?self.path, "closing {} sockets in namespace", sockets.len());

        match reason {
            DisconnectReason::ClosingServer => {
                future::join_all(sockets.iter().map(|s| s.close_underlying_transport())).await;
            }
            DisconnectReason::ServerNSDisconnect => {
                for s in sockets {
                    if let Err(_e) = s.disconnect() {
                        #[cfg(feature = "tracing")]
                        tracing::debug!("could not notify socket: {_e}");
                    }
                }
            }
            reason => {
                for s in sockets {
                    s.close(reason);
                }
            }
        }

        let _err = self.adapter.close().await;
        #[cfg(feature = "tracing")]
        if let Err(err) = _err {
            tracing::debug!(?self.path, "could not close adapter: {err}");
        }
    }
}

/// The private id and offset sent by a client resuming a session.
fn session_args(auth: &Value) -> Option<(Sid, &str)> {
    let pid = auth.get("pid")?.as_str()?.parse().ok()?;
    let offset = auth.get("offset")?.as_str()?;
    Some((pid, offset))
}

/// A type erased view of a namespace, free of the adapter type parameter.
/// The adapter is owned by the namespace, so it refers back to it through this interface.
trait InnerEmitter: Send + Sync + 'static {
    fn get_remote_sockets(&self, sids: &[Sid], uid: Uid) -> Vec<RemoteSocketData>;
    fn get_all_sids(&self) -> Vec<Sid>;
    fn send_many(
        &self,
        sids: Vec<Sid>,
        data: EncodedPacket,
        volatile: bool,
    ) -> Result<(), Vec<SocketError>>;
    fn send_many_with_ack(
        &self,
        sids: Vec<Sid>,
        packet: Packet,
        timeout: Duration,
    ) -> (AckInnerStream, u32);
    fn disconnect_many(&self, sids: Vec<Sid>) -> Result<(), Vec<DisconnectError>>;
}

impl<A: Adapter> InnerEmitter for Namespace<A> {
    fn get_remote_sockets(&self, sids: &[Sid], uid: Uid) -> Vec<RemoteSocketData> {
        let sockets = self.sockets.read().unwrap();
        sids.iter()
            .filter_map(|sid| sockets.get(sid))
            .map(|socket| RemoteSocketData {
                id: socket.id,
                server_id: uid,
                ns: self.path.clone(),
                rooms: Vec::new(),
                auth: socket.auth().clone(),
            })
            .collect()
    }

    fn get_all_sids(&self) -> Vec<Sid> {
        self.sockets.read().unwrap().keys().copied().collect()
    }

    fn send_many(
        &self,
        sids: Vec<Sid>,
        data: EncodedPacket,
        volatile: bool,
    ) -> Result<(), Vec<SocketError>> {
        let sockets = self.sockets.read().unwrap();
        let errs: Vec<SocketError> = sids
            .iter()
            .filter_map(|sid| sockets.get(sid))
            .filter_map(|socket| socket.send_raw(data.clone()).err())
            .filter(|err| !(volatile && *err == SocketError::InternalChannelFull))
            .collect();
        if errs.is_empty() { Ok(()) } else { Err(errs) }
    }

    fn send_many_with_ack(
        &self,
        sids: Vec<Sid>,
        packet: Packet,
        timeout: Duration,
    ) -> (AckInnerStream, u32) {
        let sockets_map = self.sockets.read().unwrap();
        let sockets = sids.iter().filter_map(|sid| sockets_map.get(sid));
        AckInnerStream::broadcast(packet, sockets, timeout)
    }

    fn disconnect_many(&self, sids: Vec<Sid>) -> Result<(), Vec<DisconnectError>> {
        if sids.is_empty() {
            return Ok(());
        }
        // Closing a socket takes the write lock of the map, so the sockets are cloned out first.
        let sockets = {
            let sock_map = self.sockets.read().unwrap();
            sids.into_iter()
                .filter_map(|sid| sock_map.get(&sid))
                .cloned()
                .collect::<Vec<_>>()
        };

        let errs = sockets
            .into_iter()
            .filter_map(|socket| match socket.disconnect() {
                Err(SocketError::InternalChannelFull) => Some(DisconnectError::InternalChannelFull),
                _ => None,
            })
            .collect::<Vec<_>>();
        if errs.is_empty() { Ok(()) } else { Err(errs) }
    }
}

/// The [`SocketEmitter`] given to the adapter of a namespace.
#[doc(hidden)]
pub struct Emitter {
    ns: Weak<dyn InnerEmitter>,
    path: Str,
    ack_timeout: Duration,
    uid: Uid,
    server_side: Arc<ServerSideRegistry>,
}

impl Emitter {
    fn new<A: Adapter>(
        ns: Weak<Namespace<A>>,
        path: Str,
        ack_timeout: Duration,
        uid: Uid,
        server_side: Arc<ServerSideRegistry>,
    ) -> Self {
        Self {
            ns,
            path,
            ack_timeout,
            uid,
            server_side,
        }
    }
}

impl SocketEmitter for Emitter {
    type AckError = crate::AckError;
    type AckStream = AckInnerStream;

    fn get_all_sids(&self) -> Vec<Sid> {
        self.ns
            .upgrade()
            .map(|ns| ns.get_all_sids())
            .unwrap_or_default()
    }

    fn get_remote_sockets(&self, sids: &[Sid]) -> Vec<RemoteSocketData> {
        self.ns
            .upgrade()
            .map(|ns| ns.get_remote_sockets(sids, self.uid))
            .unwrap_or_default()
    }

    fn send_many(
        &self,
        sids: Vec<Sid>,
        data: EncodedPacket,
        volatile: bool,
    ) -> Result<(), Vec<SocketError>> {
        match self.ns.upgrade() {
            Some(ns) => ns.send_many(sids, data, volatile),
            None => Ok(()),
        }
    }

    fn send_many_with_ack(
        &self,
        sids: Vec<Sid>,
        packet: Packet,
        timeout: Option<Duration>,
    ) -> (Self::AckStream, u32) {
        self.ns
            .upgrade()
            .map(|ns| ns.send_many_with_ack(sids, packet, timeout.unwrap_or(self.ack_timeout)))
            .unwrap_or((AckInnerStream::empty(), 0))
    }

    fn disconnect_many(&self, sids: Vec<Sid>) -> Result<(), Vec<DisconnectError>> {
        match self.ns.upgrade() {
            Some(ns) => ns.disconnect_many(sids),
            None => Ok(()),
        }
    }

    /// Every handler is called, the response of the first one is returned.
    fn recv_server_side(&self, event: &str, args: Vec<Value>) -> Option<Vec<Value>> {
        let mut response = None;
        for handler in self.server_side.listeners(event) {
            let res = handler(args.clone());
            if response.is_none() {
                response = res;
            }
        }
        response
    }

    fn path(&self) -> &Str {
        &self.path
    }

    fn parser(&self) -> impl Parse {
        CommonParser
    }

    fn server_id(&self) -> Uid {
        self.uid
    }
}

#[doc(hidden)]
#[cfg(any(test, feature = "__test_harness"))]
impl Namespace<crate::adapter::LocalAdapter> {
    pub fn new_dummy<const S: usize>(sockets: [Sid; S]) -> Arc<Self> {
        let ns = Namespace::new(
            "/".into(),
            async || (),
            &(),
            &SocketIoConfig::default(),
            Default::default(),
        );
        for sid in sockets {
            ns.sockets
                .write()
                .unwrap()
                .insert(sid, Socket::new_dummy(sid, ns.clone()).into());
            ns.adapter.get_local().add_all(sid, sid);
        }
        ns
    }

    pub fn clean_dummy_sockets(&self) {
        self.sockets.write().unwrap().clear();
    }
}

impl<A: Adapter> std::fmt::Debug for Namespace<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace")
            .field("path", &self.path)
            .field("sockets", &self.sockets)
            .finish()
    }
}

#[cfg(feature = "tracing")]
impl<A: Adapter> Drop for Namespace<A> {
    fn drop(&mut self) {
        tracing::debug!("dropping namespace {}", self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::LocalAdapter;

    #[tokio::test]
    async fn broadcast_reaches_room_members() {
        let sids = [Sid::new(), Sid::new(), Sid::new()];
        let ns = Namespace::<LocalAdapter>::new_dummy(sids);
        ns.get_socket(sids[0]).unwrap().join("room");
        ns.get_socket(sids[1]).unwrap().join("room");

        let mut targets = ns.adapter.get_local().sockets(&{
            let mut opts = socketwire_core::adapter::BroadcastOptions::new(sids[0]);
            opts.rooms.insert("room".into());
            opts
        });
        targets.sort();
        let mut expected = vec![sids[0], sids[1]];
        expected.sort();
        assert_eq!(targets, expected);
    }

    #[tokio::test]
    async fn remote_sockets_describe_local_ones() {
        let sid = Sid::new();
        let ns = Namespace::<LocalAdapter>::new_dummy([sid]);
        let sockets = ns.adapter.get_local().emitter().get_remote_sockets(&[sid, Sid::new()]);
        assert_eq!(sockets.len(), 1);
        assert_eq!(sockets[0].id, sid);
        assert_eq!(sockets[0].ns, "/");
    }

    #[tokio::test]
    async fn disconnect_many_removes_sockets() {
        let sids = [Sid::new(), Sid::new()];
        let ns = Namespace::<LocalAdapter>::new_dummy(sids);
        ns.adapter.get_local().emitter().disconnect_many(vec![sids[0]]).unwrap();
        assert!(!ns.has(sids[0]));
        assert!(ns.has(sids[1]));
        assert!(ns.adapter.get_local().socket_rooms(sids[0]).is_empty());
    }

    #[test]
    fn session_args_need_pid_and_offset() {
        let pid = Sid::new();
        let auth = Value::from_data(&serde_json::json!({ "pid": pid.to_string(), "offset": "12" }))
            .unwrap();
        assert_eq!(session_args(&auth), Some((pid, "12")));
        let auth = Value::from_data(&serde_json::json!({ "pid": pid.to_string() })).unwrap();
        assert_eq!(session_args(&auth), None);
    }
}
