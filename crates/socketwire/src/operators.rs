//! Operators select the sockets a packet is sent to and configure the emit.
//!
//! They use the builder pattern to chain operators:
//! * [`ConfOperators`]: configure an emit to a single socket.
//! * [`BroadcastOperators`]: select sockets with rooms and flags, then act on them.
//!
//! ```no_run
//! # use socketwire::{SocketIo, extract::*};
//! # use std::time::Duration;
//! let (_, io) = SocketIo::new_svc();
//! io.ns("/", async |socket: SocketRef| {
//!     socket.join("room1");
//!     // Every socket of room1 and room2 except this one and the members of room3.
//!     socket.to(["room1", "room2"]).except("room3").emit("hello", &"world").await.ok();
//!     // This socket with a shorter ack timeout.
//!     let ack = socket
//!         .timeout(Duration::from_secs(1))
//!         .emit_with_ack::<_, String>("ping", &())
//!         .unwrap()
//!         .await;
//! });
//! ```
use std::{sync::Arc, time::Duration};

use serde::{Serialize, de::DeserializeOwned};
use socketwire_core::{
    Sid, Str, Value,
    adapter::{BroadcastFlags, BroadcastOptions, CoreAdapter, Room, RoomParam},
    value::to_args,
};

use crate::{
    ack::AckStream,
    adapter::{Adapter, LocalAdapter},
    errors::{
        AdapterError, BroadcastError, EmitWithAckError, SendError, ServerSideError, SocketError,
    },
    extract::SocketRef,
    ns::Namespace,
    socket::{RemoteSocket, Socket, event_packet},
};

/// Chainable operators to configure an emit to a single socket.
pub struct ConfOperators<'a, A: Adapter = LocalAdapter> {
    timeout: Option<Duration>,
    volatile: bool,
    socket: &'a Socket<A>,
}

/// Chainable operators to select sockets and configure the emit.
pub struct BroadcastOperators<A: Adapter = LocalAdapter> {
    timeout: Option<Duration>,
    ns: Arc<Namespace<A>>,
    opts: BroadcastOptions,
}

impl<A: Adapter> From<ConfOperators<'_, A>> for BroadcastOperators<A> {
    fn from(conf: ConfOperators<'_, A>) -> Self {
        let mut op = BroadcastOperators::from_sock(conf.socket.ns.clone(), conf.socket.id);
        op.timeout = conf.timeout;
        if conf.volatile {
            op.opts.add_flag(BroadcastFlags::Volatile);
        }
        op
    }
}

impl<'a, A: Adapter> ConfOperators<'a, A> {
    pub(crate) fn new(sender: &'a Socket<A>) -> Self {
        Self {
            timeout: None,
            volatile: false,
            socket: sender,
        }
    }

    /// Target the members of rooms, except the sender.
    pub fn to(self, rooms: impl RoomParam) -> BroadcastOperators<A> {
        BroadcastOperators::from(self).to(rooms)
    }

    /// Target the members of rooms, including the sender if it is a member.
    pub fn within(self, rooms: impl RoomParam) -> BroadcastOperators<A> {
        BroadcastOperators::from(self).within(rooms)
    }

    /// Target every socket except the members of rooms and the sender.
    pub fn except(self, rooms: impl RoomParam) -> BroadcastOperators<A> {
        BroadcastOperators::from(self).except(rooms)
    }

    /// Only target the sockets of this server.
    pub fn local(self) -> BroadcastOperators<A> {
        BroadcastOperators::from(self).local()
    }

    /// Target every socket except the sender.
    pub fn broadcast(self) -> BroadcastOperators<A> {
        BroadcastOperators::from(self).broadcast()
    }

    /// Set the ack timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Drop the packet instead of failing if the socket buffer is full.
    pub fn volatile(mut self) -> Self {
        self.volatile = true;
        self
    }

    /// Frames are never compressed, the flag is ignored.
    pub fn compress(self, _compress: bool) -> Self {
        self
    }

    /// Emit an event to the socket.
    ///
    /// See [`Socket::emit`] for the errors.
    pub fn emit<T: ?Sized + Serialize>(
        self,
        event: impl Into<Str>,
        data: &T,
    ) -> Result<(), SendError> {
        if !self.volatile {
            return self.socket.emit(event, data);
        }
        let packet = event_packet(&self.socket.ns.path, event.into(), data)?;
        if !self.socket.connected() {
            return Err(SocketError::Closed.into());
        }
        match self.socket.send(packet) {
            Err(SocketError::InternalChannelFull) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(sid = ?self.socket.id, "volatile packet dropped");
                Ok(())
            }
            res => Ok(res?),
        }
    }

    /// Emit an event to the socket and wait for its ack.
    pub fn emit_with_ack<T: ?Sized + Serialize, V: DeserializeOwned>(
        self,
        event: impl Into<Str>,
        data: &T,
    ) -> Result<AckStream<V>, EmitWithAckError> {
        let timeout = self.timeout.unwrap_or(self.socket.ns.ack_timeout);
        self.socket.emit_with_ack_timeout(event.into(), data, timeout)
    }
}

impl<A: Adapter> BroadcastOperators<A> {
    /// Operators targeting every socket of a namespace.
    pub(crate) fn new(ns: Arc<Namespace<A>>) -> Self {
        let mut opts = BroadcastOptions::default();
        opts.add_flag(BroadcastFlags::Broadcast);
        Self {
            timeout: None,
            ns,
            opts,
        }
    }

    /// Operators sent by a socket. They target only the sender until rooms or
    /// the broadcast flag are set.
    pub(crate) fn from_sock(ns: Arc<Namespace<A>>, sid: Sid) -> Self {
        Self {
            timeout: None,
            ns,
            opts: BroadcastOptions::new(sid),
        }
    }

    /// Target the members of rooms, except the sender.
    pub fn to(mut self, rooms: impl RoomParam) -> Self {
        self.opts.rooms.extend(rooms.into_room_iter());
        self.broadcast()
    }

    /// Target the members of rooms, including the sender if it is a member.
    pub fn within(mut self, rooms: impl RoomParam) -> Self {
        self.opts.rooms.extend(rooms.into_room_iter());
        self
    }

    /// Exclude the members of rooms, and the sender.
    pub fn except(mut self, rooms: impl RoomParam) -> Self {
        self.opts.except.extend(rooms.into_room_iter());
        self.broadcast()
    }

    /// Only target the sockets of this server.
    pub fn local(mut self) -> Self {
        self.opts.add_flag(BroadcastFlags::Local);
        self
    }

    /// Exclude the sender.
    pub fn broadcast(mut self) -> Self {
        self.opts.add_flag(BroadcastFlags::Broadcast);
        self
    }

    /// Drop the packet for the sockets whose buffer is full instead of failing.
    pub fn volatile(mut self) -> Self {
        self.opts.add_flag(BroadcastFlags::Volatile);
        self
    }

    /// Set the ack timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Frames are never compressed, the flag is ignored.
    pub fn compress(self, _compress: bool) -> Self {
        self
    }

    /// Emit an event to the selected sockets.
    ///
    /// # Errors
    /// * [`SendError::ReservedEvent`] if the event name is reserved.
    /// * [`SendError::Serialize`] if the data cannot be serialized.
    /// * [`SendError::Broadcast`] if some sockets could not be reached.
    pub async fn emit<T: ?Sized + Serialize>(
        self,
        event: impl Into<Str>,
        data: &T,
    ) -> Result<(), SendError> {
        let packet = event_packet(&self.ns.path, event.into(), data)?;
        if let Err(e) = self.ns.adapter.broadcast(packet, self.opts).await {
            #[cfg(feature = "tracing")]
            tracing::debug!("broadcast error: {e}");
            return Err(e.into());
        }
        Ok(())
    }

    /// Emit an event to the selected sockets and stream their acks.
    pub async fn emit_with_ack<T: ?Sized + Serialize, V: DeserializeOwned>(
        self,
        event: impl Into<Str>,
        data: &T,
    ) -> Result<AckStream<V, A::AckStream>, EmitWithAckError> {
        let packet = event_packet(&self.ns.path, event.into(), data)?;
        let stream = self
            .ns
            .adapter
            .broadcast_with_ack(packet, self.opts, self.timeout)
            .await
            .map_err(Into::<AdapterError>::into)?;
        Ok(AckStream::new(stream))
    }

    /// The selected sockets of this server.
    pub fn sockets(self) -> Vec<SocketRef<A>> {
        self.ns
            .adapter
            .get_local()
            .sockets(&self.opts)
            .into_iter()
            .filter_map(|sid| self.ns.get_socket(sid))
            .map(SocketRef::from)
            .collect()
    }

    /// The selected sockets of every server.
    pub async fn fetch_sockets(self) -> Result<Vec<RemoteSocket<A>>, A::Error> {
        let sockets = self.ns.adapter.fetch_sockets(self.opts).await?;
        Ok(sockets
            .into_iter()
            .map(|data| RemoteSocket::new(data, &self.ns.adapter))
            .collect())
    }

    /// Disconnect the selected sockets.
    pub async fn disconnect(self) -> Result<(), BroadcastError> {
        self.ns.adapter.disconnect_socket(self.opts).await
    }

    /// Add the selected sockets to rooms.
    pub async fn join(self, rooms: impl RoomParam) -> Result<(), A::Error> {
        self.ns.adapter.add_sockets(self.opts, rooms).await
    }

    /// Remove the selected sockets from rooms.
    pub async fn leave(self, rooms: impl RoomParam) -> Result<(), A::Error> {
        self.ns.adapter.del_sockets(self.opts, rooms).await
    }

    /// The rooms of the selected sockets, or every room if no room is selected.
    pub async fn rooms(self) -> Result<Vec<Room>, A::Error> {
        self.ns.adapter.rooms(self.opts).await
    }

    /// Get a socket of this server by its id.
    pub fn get_socket(&self, sid: Sid) -> Option<SocketRef<A>> {
        self.ns.get_socket(sid).map(SocketRef::from)
    }

    /// Emit an event to the server side handlers of the other servers.
    pub async fn server_side_emit<T: ?Sized + Serialize>(
        &self,
        event: impl Into<Str>,
        data: &T,
    ) -> Result<(), ServerSideError> {
        let args = to_args(data)?;
        self.ns
            .adapter
            .server_side_emit(event.into(), args)
            .await
            .map_err(|e| ServerSideError::from(Into::<AdapterError>::into(e)))
    }

    /// Emit an event to the server side handlers of the other servers and collect
    /// the response of every server. Decode them with [`from_args`](socketwire_core::value::from_args).
    ///
    /// # Errors
    /// [`ServerSideEmitError::Timeout`](crate::errors::ServerSideEmitError::Timeout) holds
    /// the responses received in time if some servers did not answer.
    pub async fn server_side_emit_with_ack<T: ?Sized + Serialize>(
        &self,
        event: impl Into<Str>,
        data: &T,
    ) -> Result<Vec<Vec<Value>>, ServerSideError> {
        let args = to_args(data)?;
        Ok(self
            .ns
            .adapter
            .server_side_emit_with_ack(event.into(), args, self.timeout)
            .await?)
    }

    /// The number of servers sharing the namespace.
    pub async fn server_count(&self) -> Result<u16, A::Error> {
        self.ns.adapter.server_count().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn from_sock_targets_rooms() {
        let sids = [Sid::new(), Sid::new(), Sid::new()];
        let ns = Namespace::<LocalAdapter>::new_dummy(sids);
        for sid in &sids[..2] {
            ns.get_socket(*sid).unwrap().join("room");
        }

        let to = BroadcastOperators::from_sock(ns.clone(), sids[0]).to("room");
        assert_eq!(
            to.sockets().into_iter().map(|s| s.id).collect::<Vec<_>>(),
            [sids[1]]
        );

        let within = BroadcastOperators::from_sock(ns.clone(), sids[0]).within("room");
        assert_eq!(within.sockets().len(), 2);

        let except = BroadcastOperators::from_sock(ns.clone(), sids[2]).except("room");
        assert!(except.sockets().is_empty());

        let all = BroadcastOperators::new(ns).except("room");
        assert_eq!(
            all.sockets().into_iter().map(|s| s.id).collect::<Vec<_>>(),
            [sids[2]]
        );
    }

    #[tokio::test]
    async fn reserved_broadcast_is_refused() {
        let ns = Namespace::<LocalAdapter>::new_dummy([Sid::new()]);
        let res = BroadcastOperators::new(ns).emit("connect", &()).await;
        assert!(matches!(res, Err(SendError::ReservedEvent(_))));
    }

    #[tokio::test]
    async fn rooms_of_namespace() {
        let sids = [Sid::new(), Sid::new()];
        let ns = Namespace::<LocalAdapter>::new_dummy(sids);
        BroadcastOperators::new(ns.clone()).join("all").await.unwrap();
        let rooms = BroadcastOperators::new(ns.clone()).within("all").rooms().await.unwrap();
        assert_eq!(rooms.len(), 3);
        BroadcastOperators::new(ns.clone()).leave("all").await.unwrap();
        assert!(ns.adapter.get_local().sockets(&{
            let mut opts = BroadcastOptions::default();
            opts.rooms.insert("all".into());
            opts
        }).is_empty());
    }
}
