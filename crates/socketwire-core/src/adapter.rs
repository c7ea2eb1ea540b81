//! The adapter contract and the in-memory [`CoreLocalAdapter`].
//!
//! An adapter owns the room membership index of a namespace and fans broadcasts out
//! to the matching sockets. Cluster adapters wrap the local one and forward
//! the same operations to the other servers.
use std::{
    borrow::Cow,
    collections::{HashMap, HashSet},
    error::Error as StdError,
    future::{self, Future},
    sync::{Arc, RwLock},
    time::Duration,
};

use futures_core::Stream;
use serde::{Deserialize, Serialize};

use crate::{
    Sid, Str, Uid, Value,
    errors::{AdapterError, DisconnectError, ServerSideEmitError, SocketError},
    packet::Packet,
    parser::{EncodedPacket, Parse},
    registry::{EventRegistry, ListenerId},
};

mod recovery;
pub mod remote_packet;

pub use recovery::{RecoveryConfig, Session};
use recovery::Recovery;

/// A room identifier
pub type Room = Cow<'static, str>;

/// Flags modifying the behavior of a broadcast.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub enum BroadcastFlags {
    /// Only target the sockets of this server
    Local = 0x01,
    /// Target every matching socket except the sender
    Broadcast = 0x02,
    /// The packet may be dropped if a socket can't accept it right away
    Volatile = 0x04,
}

/// The target of a broadcast.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BroadcastOptions {
    flags: u8,
    /// The rooms to broadcast to. Empty means every socket.
    pub rooms: HashSet<Room>,
    /// The rooms whose sockets are excluded.
    pub except: HashSet<Room>,
    /// The socket id of the sender.
    pub sid: Option<Sid>,
}

impl BroadcastOptions {
    /// Options for a broadcast sent by a socket.
    pub fn new(sid: Sid) -> Self {
        Self {
            sid: Some(sid),
            ..Default::default()
        }
    }
    /// Set a flag.
    pub fn add_flag(&mut self, flag: BroadcastFlags) {
        self.flags |= flag as u8;
    }
    /// Check if a flag is set.
    pub fn has_flag(&self, flag: BroadcastFlags) -> bool {
        self.flags & flag as u8 == flag as u8
    }
    /// Returns true if a packet sent with these options targets only the sender.
    pub fn is_single_target(&self) -> bool {
        self.rooms.is_empty() && !self.has_flag(BroadcastFlags::Broadcast) && self.sid.is_some()
    }
}

/// Types that can be used as one or several rooms.
///
/// Implemented for strings, [`Sid`], vectors and arrays of strings.
pub trait RoomParam: Send + 'static {
    /// The iterator over the rooms
    type IntoIter: Iterator<Item = Room>;

    /// Convert `self` into rooms.
    fn into_room_iter(self) -> Self::IntoIter;
}

macro_rules! impl_room_param_one {
    ($($ty:ty => $conv:expr),*) => {
        $(
            impl RoomParam for $ty {
                type IntoIter = std::iter::Once<Room>;
                #[inline]
                fn into_room_iter(self) -> Self::IntoIter {
                    std::iter::once($conv(self))
                }
            }
        )*
    };
}
impl_room_param_one!(
    Room => std::convert::identity,
    String => Cow::Owned,
    &'static str => Cow::Borrowed,
    Sid => |sid: Sid| Cow::Owned(sid.to_string())
);

impl RoomParam for Vec<Room> {
    type IntoIter = std::vec::IntoIter<Room>;
    #[inline]
    fn into_room_iter(self) -> Self::IntoIter {
        self.into_iter()
    }
}
impl RoomParam for Vec<String> {
    type IntoIter = std::iter::Map<std::vec::IntoIter<String>, fn(String) -> Room>;
    #[inline]
    fn into_room_iter(self) -> Self::IntoIter {
        self.into_iter().map(Cow::Owned)
    }
}
impl RoomParam for Vec<&'static str> {
    type IntoIter = std::iter::Map<std::vec::IntoIter<&'static str>, fn(&'static str) -> Room>;
    #[inline]
    fn into_room_iter(self) -> Self::IntoIter {
        self.into_iter().map(Cow::Borrowed)
    }
}
impl<const N: usize> RoomParam for [&'static str; N] {
    type IntoIter = std::iter::Map<std::array::IntoIter<&'static str, N>, fn(&'static str) -> Room>;
    #[inline]
    fn into_room_iter(self) -> Self::IntoIter {
        self.into_iter().map(Cow::Borrowed)
    }
}
impl<const N: usize> RoomParam for [String; N] {
    type IntoIter = std::iter::Map<std::array::IntoIter<String, N>, fn(String) -> Room>;
    #[inline]
    fn into_room_iter(self) -> Self::IntoIter {
        self.into_iter().map(Cow::Owned)
    }
}

/// The description of a socket that may live on another server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSocketData {
    /// The socket id
    pub id: Sid,
    /// The id of the server owning the socket
    pub server_id: Uid,
    /// The namespace path
    pub ns: Str,
    /// The rooms of the socket
    pub rooms: Vec<Room>,
    /// The auth payload sent by the client when connecting
    pub auth: Value,
}

/// A change in the room index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    /// A room got its first member
    Create(Room),
    /// A room lost its last member
    Delete(Room),
    /// A socket joined a room
    Join(Room, Sid),
    /// A socket left a room
    Leave(Room, Sid),
}

/// The kind of a [`RoomEvent`], used to subscribe to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomEventKind {
    /// See [`RoomEvent::Create`]
    Create,
    /// See [`RoomEvent::Delete`]
    Delete,
    /// See [`RoomEvent::Join`]
    Join,
    /// See [`RoomEvent::Leave`]
    Leave,
}

impl RoomEvent {
    /// The kind of the event
    pub fn kind(&self) -> RoomEventKind {
        match self {
            RoomEvent::Create(_) => RoomEventKind::Create,
            RoomEvent::Delete(_) => RoomEventKind::Delete,
            RoomEvent::Join(..) => RoomEventKind::Join,
            RoomEvent::Leave(..) => RoomEventKind::Leave,
        }
    }
}

/// A room event listener
pub type RoomEventHandler = Arc<dyn Fn(&RoomEvent) + Send + Sync>;

/// The item yielded by ack streams: the socket id and its ack arguments.
pub type AckStreamItem<E> = (Sid, Result<Vec<Value>, E>);

/// The interface between an adapter and the namespace owning it.
///
/// It is implemented by the server so that adapters do not depend on it.
pub trait SocketEmitter: Send + Sync + 'static {
    /// The error of a single socket acknowledgement.
    type AckError: StdError + Send + 'static;
    /// A stream yielding the acks of several sockets.
    type AckStream: Stream<Item = AckStreamItem<Self::AckError>> + Send + 'static;

    /// Get the ids of all the sockets of the namespace.
    fn get_all_sids(&self) -> Vec<Sid>;
    /// Describe the given local sockets. Unknown ids are skipped.
    fn get_remote_sockets(&self, sids: &[Sid]) -> Vec<RemoteSocketData>;
    /// Write an encoded packet to the given sockets.
    fn send_many(
        &self,
        sids: Vec<Sid>,
        data: EncodedPacket,
        volatile: bool,
    ) -> Result<(), Vec<SocketError>>;
    /// Send a packet to the given sockets, each with its own ack id.
    /// Returns the ack stream and the number of sockets the packet was sent to.
    fn send_many_with_ack(
        &self,
        sids: Vec<Sid>,
        packet: Packet,
        timeout: Option<Duration>,
    ) -> (Self::AckStream, u32);
    /// Disconnect the given sockets.
    fn disconnect_many(&self, sids: Vec<Sid>) -> Result<(), Vec<DisconnectError>>;
    /// Call the local server side handler of an event.
    /// Returns its response, or `None` if no handler is registered.
    fn recv_server_side(&self, event: &str, args: Vec<Value>) -> Option<Vec<Value>>;
    /// The namespace path.
    fn path(&self) -> &Str;
    /// The parser of the server.
    fn parser(&self) -> impl Parse;
    /// The id of this server.
    fn server_id(&self) -> Uid;
}

/// An adapter manages the rooms of a namespace and its broadcasts.
///
/// Every operation has a default implementation using the local adapter returned by
/// [`CoreAdapter::get_local`]. Cluster adapters override them to reach the other servers.
pub trait CoreAdapter<E: SocketEmitter>: Sized + Send + Sync + 'static {
    /// The error of the adapter.
    type Error: StdError + Into<AdapterError> + Send + 'static;
    /// State shared by the adapters of every namespace, a connection for example.
    type State: Send + Sync + 'static;
    /// The ack stream returned by [`CoreAdapter::broadcast_with_ack`].
    type AckStream: Stream<Item = AckStreamItem<E::AckError>> + Send + 'static;

    /// Create the adapter of a namespace.
    fn new(state: &Self::State, local: CoreLocalAdapter<E>) -> Self;

    /// Start the adapter.
    fn init(&self) -> impl Future<Output = Result<(), Self::Error>> + Send {
        future::ready(Ok(()))
    }

    /// Close the adapter.
    fn close(&self) -> impl Future<Output = Result<(), Self::Error>> + Send {
        self.get_local().close();
        future::ready(Ok(()))
    }

    /// The number of servers.
    fn server_count(&self) -> impl Future<Output = Result<u16, Self::Error>> + Send {
        future::ready(Ok(1))
    }

    /// Add a socket to rooms.
    fn add_all(
        &self,
        sid: Sid,
        rooms: impl RoomParam,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        self.get_local().add_all(sid, rooms);
        future::ready(Ok(()))
    }

    /// Remove a socket from rooms.
    fn del(
        &self,
        sid: Sid,
        rooms: impl RoomParam,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        self.get_local().del(sid, rooms);
        future::ready(Ok(()))
    }

    /// Remove a socket from all its rooms.
    fn del_all(&self, sid: Sid) -> impl Future<Output = Result<(), Self::Error>> + Send {
        self.get_local().del_all(sid);
        future::ready(Ok(()))
    }

    /// Broadcast a packet to the sockets matching the options.
    fn broadcast(
        &self,
        packet: Packet,
        opts: BroadcastOptions,
    ) -> impl Future<Output = Result<(), BroadcastError>> + Send {
        future::ready(self.get_local().broadcast(packet, opts).map_err(Into::into))
    }

    /// Broadcast a packet and collect the acks of every targeted socket.
    fn broadcast_with_ack(
        &self,
        packet: Packet,
        opts: BroadcastOptions,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<Self::AckStream, Self::Error>> + Send;

    /// The ids of the sockets matching the options.
    fn sockets(
        &self,
        opts: BroadcastOptions,
    ) -> impl Future<Output = Result<Vec<Sid>, Self::Error>> + Send {
        future::ready(Ok(self.get_local().sockets(&opts)))
    }

    /// Describe the sockets matching the options.
    fn fetch_sockets(
        &self,
        opts: BroadcastOptions,
    ) -> impl Future<Output = Result<Vec<RemoteSocketData>, Self::Error>> + Send {
        future::ready(Ok(self.get_local().fetch_sockets(&opts)))
    }

    /// The rooms of a socket.
    fn socket_rooms(&self, sid: Sid) -> impl Future<Output = Result<Vec<Room>, Self::Error>> + Send {
        future::ready(Ok(self.get_local().socket_rooms(sid)))
    }

    /// Add the sockets matching the options to rooms.
    fn add_sockets(
        &self,
        opts: BroadcastOptions,
        rooms: impl RoomParam,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        self.get_local().add_sockets(&opts, rooms);
        future::ready(Ok(()))
    }

    /// Remove the sockets matching the options from rooms.
    fn del_sockets(
        &self,
        opts: BroadcastOptions,
        rooms: impl RoomParam,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        self.get_local().del_sockets(&opts, rooms);
        future::ready(Ok(()))
    }

    /// Disconnect the sockets matching the options.
    fn disconnect_socket(
        &self,
        opts: BroadcastOptions,
    ) -> impl Future<Output = Result<(), BroadcastError>> + Send {
        future::ready(self.get_local().disconnect_socket(&opts).map_err(Into::into))
    }

    /// Every room with at least one member.
    fn rooms(&self, opts: BroadcastOptions) -> impl Future<Output = Result<Vec<Room>, Self::Error>> + Send {
        future::ready(Ok(self.get_local().rooms(&opts)))
    }

    /// Emit an event to the server side handlers of the other servers.
    /// A single server has no peer, so this is a no-op.
    fn server_side_emit(
        &self,
        _event: Str,
        _args: Vec<Value>,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        future::ready(Ok(()))
    }

    /// Emit an event to the server side handlers of the other servers and
    /// collect one response per server.
    fn server_side_emit_with_ack(
        &self,
        _event: Str,
        _args: Vec<Value>,
        _timeout: Option<Duration>,
    ) -> impl Future<Output = Result<Vec<Vec<Value>>, ServerSideEmitError>> + Send {
        future::ready(Ok(Vec::new()))
    }

    /// Store the state of a disconnected socket so it can be recovered.
    fn persist_session(&self, sid: Sid, pid: Sid) -> impl Future<Output = ()> + Send {
        self.get_local().persist_session(sid, pid);
        future::ready(())
    }

    /// Recover a session and the packets it missed.
    fn restore_session(
        &self,
        pid: Sid,
        offset: &str,
    ) -> impl Future<Output = Result<Option<Session>, Self::Error>> + Send {
        future::ready(Ok(self.get_local().restore_session(pid, offset)))
    }

    /// The local adapter, used by the default implementations.
    fn get_local(&self) -> &CoreLocalAdapter<E>;
}

/// Error of a broadcast: the writes that failed, or an adapter error.
#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    /// Some sockets could not be written to
    #[error("sending error: {0:?}")]
    Socket(Vec<SocketError>),
    /// Some sockets could not be disconnected
    #[error("disconnect error: {0:?}")]
    Disconnect(Vec<DisconnectError>),
    /// The adapter failed to reach the other servers
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),
}
impl From<Vec<SocketError>> for BroadcastError {
    fn from(errs: Vec<SocketError>) -> Self {
        BroadcastError::Socket(errs)
    }
}
impl From<Vec<DisconnectError>> for BroadcastError {
    fn from(errs: Vec<DisconnectError>) -> Self {
        BroadcastError::Disconnect(errs)
    }
}

#[derive(Default)]
struct RoomIndex {
    rooms: HashMap<Room, HashSet<Sid>>,
    sids: HashMap<Sid, HashSet<Room>>,
}

impl RoomIndex {
    fn join(&mut self, sid: Sid, room: Room, events: &mut Vec<RoomEvent>) {
        if !self.sids.entry(sid).or_default().insert(room.clone()) {
            return;
        }
        let members = self.rooms.entry(room.clone()).or_default();
        if members.is_empty() {
            events.push(RoomEvent::Create(room.clone()));
        }
        members.insert(sid);
        events.push(RoomEvent::Join(room, sid));
    }

    fn leave(&mut self, sid: Sid, room: &Room, events: &mut Vec<RoomEvent>) {
        if let Some(rooms) = self.sids.get_mut(&sid) {
            rooms.remove(room);
            if rooms.is_empty() {
                self.sids.remove(&sid);
            }
        }
        let Some(members) = self.rooms.get_mut(room) else {
            return;
        };
        if !members.remove(&sid) {
            return;
        }
        events.push(RoomEvent::Leave(room.clone(), sid));
        if members.is_empty() {
            self.rooms.remove(room);
            events.push(RoomEvent::Delete(room.clone()));
        }
    }
}

/// The in-memory adapter: a bidirectional room index and a local broadcaster.
pub struct CoreLocalAdapter<E> {
    index: RwLock<RoomIndex>,
    room_events: EventRegistry<RoomEventKind, RoomEventHandler>,
    recovery: Option<Recovery>,
    emitter: E,
}

impl<E: SocketEmitter> CoreLocalAdapter<E> {
    /// Create a local adapter for a namespace.
    pub fn new(emitter: E) -> Self {
        Self {
            index: RwLock::new(RoomIndex::default()),
            room_events: EventRegistry::new(),
            recovery: None,
            emitter,
        }
    }

    /// Enable connection state recovery.
    pub fn with_recovery(mut self, config: RecoveryConfig) -> Self {
        self.recovery = Some(Recovery::new(config));
        self
    }

    /// Returns true if connection state recovery is enabled.
    pub fn is_recovery_enabled(&self) -> bool {
        self.recovery.is_some()
    }

    /// Clear the room index.
    pub fn close(&self) {
        #[cfg(feature = "tracing")]
        tracing::debug!(ns = ?self.path(), "closing local adapter");
        let mut index = self.index.write().unwrap();
        index.rooms.clear();
        index.sids.clear();
    }

    /// Subscribe to a kind of room event.
    pub fn on_room_event(
        &self,
        kind: RoomEventKind,
        handler: impl Fn(&RoomEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.room_events.on(kind, Arc::new(handler))
    }

    /// Unsubscribe from a room event.
    pub fn off_room_event(&self, kind: RoomEventKind, id: ListenerId) -> bool {
        self.room_events.off(&kind, id)
    }

    fn emit_room_events(&self, events: Vec<RoomEvent>) {
        for event in events {
            for handler in self.room_events.listeners(&event.kind()) {
                handler(&event);
            }
        }
    }

    /// Add a socket to rooms.
    pub fn add_all(&self, sid: Sid, rooms: impl RoomParam) {
        let mut events = Vec::new();
        {
            let mut index = self.index.write().unwrap();
            for room in rooms.into_room_iter() {
                index.join(sid, room, &mut events);
            }
        }
        self.emit_room_events(events);
    }

    /// Remove a socket from rooms.
    pub fn del(&self, sid: Sid, rooms: impl RoomParam) {
        let mut events = Vec::new();
        {
            let mut index = self.index.write().unwrap();
            for room in rooms.into_room_iter() {
                index.leave(sid, &room, &mut events);
            }
        }
        self.emit_room_events(events);
    }

    /// Remove a socket from all its rooms.
    pub fn del_all(&self, sid: Sid) {
        let mut events = Vec::new();
        {
            let mut index = self.index.write().unwrap();
            let rooms = index.sids.remove(&sid).unwrap_or_default();
            for room in rooms {
                index.leave(sid, &room, &mut events);
            }
        }
        self.emit_room_events(events);
    }

    /// Broadcast a packet to the sockets matching the options.
    /// The packet is encoded once for all the recipients.
    pub fn broadcast(
        &self,
        mut packet: Packet,
        opts: BroadcastOptions,
    ) -> Result<(), Vec<SocketError>> {
        if let Some(recovery) = &self.recovery {
            recovery.persist_packet(&mut packet, &opts);
        }
        let sids = self.apply_opts(&opts);

        #[cfg(feature = "tracing")]
        tracing::debug!("broadcasting packet to {} sockets", sids.len());

        if sids.is_empty() {
            return Ok(());
        }
        let data = self.emitter.parser().encode(packet);
        self.emitter
            .send_many(sids, data, opts.has_flag(BroadcastFlags::Volatile))
    }

    /// Broadcast a packet and return the stream of acks with the number of targeted sockets.
    pub fn broadcast_with_ack(
        &self,
        packet: Packet,
        opts: BroadcastOptions,
        timeout: Option<Duration>,
    ) -> (E::AckStream, u32) {
        let sids = self.apply_opts(&opts);
        #[cfg(feature = "tracing")]
        tracing::debug!("broadcasting packet with ack to {} sockets", sids.len());
        self.emitter.send_many_with_ack(sids, packet, timeout)
    }

    /// The ids of the sockets matching the options.
    pub fn sockets(&self, opts: &BroadcastOptions) -> Vec<Sid> {
        self.apply_opts(opts)
    }

    /// Describe the sockets matching the options.
    pub fn fetch_sockets(&self, opts: &BroadcastOptions) -> Vec<RemoteSocketData> {
        let sids = self.apply_opts(opts);
        let mut sockets = self.emitter.get_remote_sockets(&sids);
        let index = self.index.read().unwrap();
        for socket in &mut sockets {
            socket.rooms = index
                .sids
                .get(&socket.id)
                .map(|rooms| rooms.iter().cloned().collect())
                .unwrap_or_default();
        }
        sockets
    }

    /// The rooms of a socket.
    pub fn socket_rooms(&self, sid: Sid) -> Vec<Room> {
        let index = self.index.read().unwrap();
        index
            .sids
            .get(&sid)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Add the sockets matching the options to rooms.
    pub fn add_sockets(&self, opts: &BroadcastOptions, rooms: impl RoomParam) {
        let rooms: Vec<Room> = rooms.into_room_iter().collect();
        for sid in self.apply_opts(opts) {
            self.add_all(sid, rooms.clone());
        }
    }

    /// Remove the sockets matching the options from rooms.
    pub fn del_sockets(&self, opts: &BroadcastOptions, rooms: impl RoomParam) {
        let rooms: Vec<Room> = rooms.into_room_iter().collect();
        for sid in self.apply_opts(opts) {
            self.del(sid, rooms.clone());
        }
    }

    /// Disconnect the sockets matching the options.
    pub fn disconnect_socket(&self, opts: &BroadcastOptions) -> Result<(), Vec<DisconnectError>> {
        let sids = self.apply_opts(opts);
        self.emitter.disconnect_many(sids)
    }

    /// The rooms with at least one member. If the options target some rooms,
    /// only the rooms of the matching sockets are returned.
    pub fn rooms(&self, opts: &BroadcastOptions) -> Vec<Room> {
        if opts.rooms.is_empty() && opts.except.is_empty() {
            return self.index.read().unwrap().rooms.keys().cloned().collect();
        }
        let sids = self.apply_opts(opts);
        let index = self.index.read().unwrap();
        let rooms: HashSet<&Room> = sids
            .iter()
            .filter_map(|sid| index.sids.get(sid))
            .flatten()
            .collect();
        rooms.into_iter().cloned().collect()
    }

    /// Store the rooms of a disconnected socket for a later recovery.
    /// Does nothing if recovery is disabled.
    pub fn persist_session(&self, sid: Sid, pid: Sid) {
        if let Some(recovery) = &self.recovery {
            recovery.persist_session(sid, pid, self.socket_rooms(sid));
        }
    }

    /// Recover a session from its private id and the offset of the last packet it received.
    pub fn restore_session(&self, pid: Sid, offset: &str) -> Option<Session> {
        self.recovery.as_ref()?.restore_session(pid, offset)
    }

    /// The namespace path.
    pub fn path(&self) -> &Str {
        self.emitter.path()
    }

    /// The id of this server.
    pub fn server_id(&self) -> Uid {
        self.emitter.server_id()
    }

    /// The namespace interface.
    pub fn emitter(&self) -> &E {
        &self.emitter
    }
}

impl<E: SocketEmitter> CoreLocalAdapter<E> {
    /// The sockets targeted by the options:
    /// * the members of `rooms`, or every socket if the broadcast flag is set and `rooms` is empty,
    /// * minus the members of `except`,
    /// * minus the sender for broadcasts.
    ///
    /// Without rooms nor broadcast flag, only the sender is targeted, if it lives on this server.
    fn apply_opts(&self, opts: &BroadcastOptions) -> Vec<Sid> {
        let is_broadcast = opts.has_flag(BroadcastFlags::Broadcast);
        let index = self.index.read().unwrap();
        let except: HashSet<Sid> = opts
            .except
            .iter()
            .filter_map(|room| index.rooms.get(room))
            .flatten()
            .copied()
            .collect();
        let keep = |id: &Sid| !except.contains(id) && !(is_broadcast && opts.sid == Some(*id));

        if !opts.rooms.is_empty() {
            let targets: HashSet<Sid> = opts
                .rooms
                .iter()
                .filter_map(|room| index.rooms.get(room))
                .flatten()
                .copied()
                .filter(keep)
                .collect();
            targets.into_iter().collect()
        } else if is_broadcast {
            drop(index);
            self.emitter
                .get_all_sids()
                .into_iter()
                .filter(|id| keep(id))
                .collect()
        } else if let Some(id) = opts.sid {
            // Requests forwarded by other servers may name a socket this server does not own.
            drop(index);
            if self.emitter.get_all_sids().contains(&id) {
                vec![id]
            } else {
                Vec::new()
            }
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        pin::Pin,
        sync::Mutex,
        task::{Context, Poll},
    };

    use super::*;
    use crate::{packet::PacketData, parser::test::ENCODE_CALLS};

    macro_rules! hash_set {
        {$($v: expr),* $(,)?} => {
            std::collections::HashSet::from([$($v,)*])
        };
    }

    #[derive(Default)]
    struct StubSockets {
        sockets: Vec<Sid>,
        path: Str,
        sent: Mutex<Vec<(Vec<Sid>, EncodedPacket, bool)>>,
        disconnected: Mutex<Vec<Sid>>,
    }

    struct StubAckStream;
    impl Stream for StubAckStream {
        type Item = AckStreamItem<SocketError>;
        fn poll_next(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            Poll::Ready(None)
        }
    }

    impl SocketEmitter for StubSockets {
        type AckError = SocketError;
        type AckStream = StubAckStream;

        fn get_all_sids(&self) -> Vec<Sid> {
            self.sockets.clone()
        }
        fn get_remote_sockets(&self, sids: &[Sid]) -> Vec<RemoteSocketData> {
            sids.iter()
                .map(|id| RemoteSocketData {
                    id: *id,
                    server_id: Uid::ZERO,
                    ns: self.path.clone(),
                    rooms: vec![],
                    auth: Value::Null,
                })
                .collect()
        }
        fn send_many(
            &self,
            sids: Vec<Sid>,
            data: EncodedPacket,
            volatile: bool,
        ) -> Result<(), Vec<SocketError>> {
            self.sent.lock().unwrap().push((sids, data, volatile));
            Ok(())
        }
        fn send_many_with_ack(
            &self,
            sids: Vec<Sid>,
            _: Packet,
            _: Option<Duration>,
        ) -> (Self::AckStream, u32) {
            (StubAckStream, sids.len() as u32)
        }
        fn disconnect_many(&self, sids: Vec<Sid>) -> Result<(), Vec<DisconnectError>> {
            self.disconnected.lock().unwrap().extend(sids);
            Ok(())
        }
        fn recv_server_side(&self, _: &str, _: Vec<Value>) -> Option<Vec<Value>> {
            None
        }
        fn path(&self) -> &Str {
            &self.path
        }
        fn parser(&self) -> impl Parse {
            crate::parser::test::StubParser
        }
        fn server_id(&self) -> Uid {
            Uid::ZERO
        }
    }

    fn create_adapter<const S: usize>(sockets: [Sid; S]) -> CoreLocalAdapter<StubSockets> {
        CoreLocalAdapter::new(StubSockets {
            sockets: sockets.to_vec(),
            path: Str::from("/"),
            ..Default::default()
        })
    }

    fn sorted(mut sids: Vec<Sid>) -> Vec<Sid> {
        sids.sort();
        sids
    }

    #[test]
    fn index_stays_bidirectional() {
        let socket = Sid::new();
        let adapter = create_adapter([socket]);
        adapter.add_all(socket, ["room1", "room2"]);
        assert_eq!(sorted_rooms(adapter.socket_rooms(socket)), ["room1", "room2"]);

        adapter.del(socket, "room1");
        assert_eq!(adapter.socket_rooms(socket), ["room2"]);
        assert_eq!(adapter.rooms(&BroadcastOptions::default()), ["room2"]);

        adapter.del_all(socket);
        assert!(adapter.socket_rooms(socket).is_empty());
        assert!(adapter.rooms(&BroadcastOptions::default()).is_empty());
        let index = adapter.index.read().unwrap();
        assert!(index.rooms.is_empty() && index.sids.is_empty());
    }

    fn sorted_rooms(mut rooms: Vec<Room>) -> Vec<Room> {
        rooms.sort();
        rooms
    }

    #[test]
    fn room_events_fire_on_transitions_only() {
        let (s1, s2) = (Sid::new(), Sid::new());
        let adapter = create_adapter([s1, s2]);
        let events = Arc::new(Mutex::new(Vec::new()));
        for kind in [
            RoomEventKind::Create,
            RoomEventKind::Delete,
            RoomEventKind::Join,
            RoomEventKind::Leave,
        ] {
            let events = events.clone();
            adapter.on_room_event(kind, move |e| events.lock().unwrap().push(e.clone()));
        }

        adapter.add_all(s1, "r");
        adapter.add_all(s1, "r");
        adapter.add_all(s2, "r");
        adapter.del(s1, "r");
        adapter.del(s1, "r");
        adapter.del_all(s2);

        let r = || Room::Borrowed("r");
        assert_eq!(
            *events.lock().unwrap(),
            [
                RoomEvent::Create(r()),
                RoomEvent::Join(r(), s1),
                RoomEvent::Join(r(), s2),
                RoomEvent::Leave(r(), s1),
                RoomEvent::Leave(r(), s2),
                RoomEvent::Delete(r()),
            ]
        );
    }

    #[test]
    fn room_event_listener_can_be_removed() {
        let s1 = Sid::new();
        let adapter = create_adapter([s1]);
        let count = Arc::new(Mutex::new(0));
        let c = count.clone();
        let id = adapter.on_room_event(RoomEventKind::Join, move |_| *c.lock().unwrap() += 1);
        adapter.add_all(s1, "a");
        assert!(adapter.off_room_event(RoomEventKind::Join, id));
        adapter.add_all(s1, "b");
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn add_and_del_sockets() {
        let socket = Sid::new();
        let adapter = create_adapter([socket]);
        adapter.add_all(socket, ["room1"]);

        let mut opts = BroadcastOptions::new(socket);
        opts.rooms = hash_set!["room1".into()];
        adapter.add_sockets(&opts, "room2");
        assert_eq!(sorted_rooms(adapter.socket_rooms(socket)), ["room1", "room2"]);

        adapter.del_sockets(&opts, "room2");
        assert_eq!(adapter.socket_rooms(socket), ["room1"]);
    }

    #[test]
    fn fan_out_with_overlapping_rooms() {
        let (s0, s1, s2, s3) = (Sid::new(), Sid::new(), Sid::new(), Sid::new());
        let adapter = create_adapter([s0, s1, s2, s3]);
        adapter.add_all(s0, ["a", "b"]);
        adapter.add_all(s1, ["a"]);
        adapter.add_all(s2, ["a", "c"]);
        adapter.add_all(s3, ["b", "c"]);

        let mut opts = BroadcastOptions::default();
        opts.rooms = hash_set!["a".into(), "b".into()];
        opts.except = hash_set!["c".into()];
        assert_eq!(sorted(adapter.sockets(&opts)), sorted(vec![s0, s1]));

        opts.except.clear();
        assert_eq!(
            sorted(adapter.sockets(&opts)),
            sorted(vec![s0, s1, s2, s3])
        );
    }

    #[test]
    fn apply_opts_sender_rules() {
        let (s0, s1, s2) = (Sid::new(), Sid::new(), Sid::new());
        let adapter = create_adapter([s0, s1, s2]);
        adapter.add_all(s0, ["room1", "room2"]);
        adapter.add_all(s1, ["room1", "room3"]);
        adapter.add_all(s2, ["room1", "room2", "room3"]);

        let mut opts = BroadcastOptions::new(s2);
        opts.rooms = hash_set!["room1".into()];
        opts.except = hash_set!["room2".into()];
        assert_eq!(adapter.sockets(&opts), [s1]);

        let mut opts = BroadcastOptions::new(s2);
        opts.add_flag(BroadcastFlags::Broadcast);
        assert_eq!(sorted(adapter.sockets(&opts)), sorted(vec![s0, s1]));

        opts.except = hash_set!["room2".into()];
        assert_eq!(adapter.sockets(&opts), [s1]);

        let opts = BroadcastOptions::new(s2);
        assert!(opts.is_single_target());
        assert_eq!(adapter.sockets(&opts), [s2]);
        assert!(adapter.sockets(&BroadcastOptions::new(Sid::new())).is_empty());

        assert!(adapter.sockets(&BroadcastOptions::default()).is_empty());
    }

    #[test]
    fn broadcast_encodes_once() {
        let sids: Vec<Sid> = (0..10).map(|_| Sid::new()).collect();
        let adapter = create_adapter::<0>([]);
        for sid in &sids {
            adapter.add_all(*sid, "room");
        }
        ENCODE_CALLS.with(|c| c.set(0));

        let mut opts = BroadcastOptions::default();
        opts.rooms = hash_set!["room".into()];
        opts.add_flag(BroadcastFlags::Volatile);
        adapter
            .broadcast(Packet::event("/", "ev", vec![Value::from(1)]), opts)
            .unwrap();

        assert_eq!(ENCODE_CALLS.with(|c| c.get()), 1);
        let sent = adapter.emitter.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sorted(sent[0].0.clone()), sorted(sids));
        assert!(sent[0].2);
    }

    #[test]
    fn fetch_sockets_with_rooms() {
        let (s0, s1) = (Sid::new(), Sid::new());
        let adapter = create_adapter([s0, s1]);
        adapter.add_all(s0, ["a", "b"]);
        adapter.add_all(s1, ["b"]);

        let mut opts = BroadcastOptions::default();
        opts.rooms = hash_set!["a".into()];
        let sockets = adapter.fetch_sockets(&opts);
        assert_eq!(sockets.len(), 1);
        assert_eq!(sockets[0].id, s0);
        assert_eq!(sorted_rooms(sockets[0].rooms.clone()), ["a", "b"]);
        assert_eq!(sorted_rooms(adapter.rooms(&opts)), ["a", "b"]);
    }

    #[test]
    fn disconnect_matching_sockets() {
        let (s0, s1) = (Sid::new(), Sid::new());
        let adapter = create_adapter([s0, s1]);
        adapter.add_all(s1, "kick");
        let mut opts = BroadcastOptions::default();
        opts.rooms = hash_set!["kick".into()];
        adapter.disconnect_socket(&opts).unwrap();
        assert_eq!(*adapter.emitter.disconnected.lock().unwrap(), [s1]);
    }

    #[test]
    fn recovery_replays_missed_packets() {
        let (s0, s1) = (Sid::new(), Sid::new());
        let adapter = create_adapter([s0, s1]).with_recovery(RecoveryConfig::default());
        adapter.add_all(s0, ["a"]);
        adapter.add_all(s1, ["b"]);

        let to = |room: &'static str| {
            let mut opts = BroadcastOptions::default();
            opts.rooms = hash_set![room.into()];
            opts
        };
        adapter
            .broadcast(Packet::event("/", "first", vec![]), to("a"))
            .unwrap();
        let sent = adapter.emitter.sent.lock().unwrap().pop().unwrap();
        assert!(sent.1.data.contains("\"0\""), "offset is the last arg");

        let pid = Sid::new();
        adapter.persist_session(s0, pid);
        adapter.del_all(s0);

        adapter
            .broadcast(Packet::event("/", "missed", vec![]), to("a"))
            .unwrap();
        adapter
            .broadcast(Packet::event("/", "other", vec![]), to("b"))
            .unwrap();
        let mut volatile = to("a");
        volatile.add_flag(BroadcastFlags::Volatile);
        adapter
            .broadcast(Packet::event("/", "volatile", vec![]), volatile)
            .unwrap();

        let session = adapter.restore_session(pid, "0").unwrap();
        assert_eq!(session.sid, s0);
        assert_eq!(session.rooms, ["a"]);
        assert_eq!(session.missed_packets.len(), 1);
        assert!(matches!(
            &session.missed_packets[0].inner,
            PacketData::Event(e, args, None) if e == "missed" && args == &[Value::from("1")]
        ));

        assert!(adapter.restore_session(pid, "0").is_none(), "a session is restored once");
    }

    #[test]
    fn recovery_disabled() {
        let s0 = Sid::new();
        let adapter = create_adapter([s0]);
        adapter.persist_session(s0, Sid::new());
        adapter
            .broadcast(Packet::event("/", "ev", vec![]), BroadcastOptions::new(s0))
            .unwrap();
        let sent = adapter.emitter.sent.lock().unwrap().pop().unwrap();
        assert!(!sent.1.data.contains("\"0\""));
    }
}
