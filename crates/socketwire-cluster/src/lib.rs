#![warn(
    clippy::all,
    clippy::todo,
    clippy::empty_enum,
    clippy::mem_forget,
    clippy::unused_self,
    clippy::filter_map_next,
    clippy::needless_continue,
    clippy::needless_borrow,
    clippy::match_wildcard_for_single_variants,
    clippy::if_let_mutex,
    clippy::await_holding_lock,
    clippy::imprecise_flops,
    clippy::suboptimal_flops,
    clippy::lossy_float_literal,
    clippy::rest_pat_in_fully_bound_structs,
    clippy::fn_params_excessive_bools,
    clippy::exit,
    clippy::inefficient_to_string,
    clippy::linkedlist,
    clippy::macro_use_imports,
    clippy::option_option,
    clippy::verbose_file_reads,
    clippy::unnested_or_patterns,
    rust_2018_idioms,
    future_incompatible,
    nonstandard_style,
    missing_docs
)]
//! A cluster adapter for socketwire.
//!
//! Several socketwire servers using this adapter share their rooms and broadcasts:
//! an event emitted on one server reaches the matching sockets of every server.
//! The servers talk through a [`Driver`](drivers::Driver), a pub/sub backend with an
//! attachment store. The [`MemoryDriver`](drivers::MemoryDriver) connects servers
//! living in the same process.
//!
//! ```
//! use socketwire::{SocketIo, adapter::Emitter, extract::SocketRef};
//! use socketwire_cluster::{ClusterAdapter, ClusterAdapterCtr, drivers::MemoryDriver};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let driver = MemoryDriver::new();
//! let (_svc, io) = SocketIo::builder()
//!     .with_adapter::<ClusterAdapter<Emitter, MemoryDriver>>(ClusterAdapterCtr::new(driver))
//!     .build_svc();
//! io.ns("/", async |socket: SocketRef<ClusterAdapter<Emitter, MemoryDriver>>| {
//!     socket.join("lobby");
//! });
//! # }
//! ```
//!
//! ## Protocol
//! Each namespace has a request channel, `{prefix}#{namespace}#`, shared by every server,
//! and one response channel per server, `{prefix}#{namespace}#{server id}#`.
//! Every message carries the id of its sender and servers ignore their own messages.
//!
//! * A server announces itself with an initial heartbeat, the others answer with a heartbeat.
//!   Heartbeats are then sent periodically and a server not heard from within the
//!   heartbeat timeout is forgotten. A closing server announces it.
//! * Broadcasts, room changes and disconnections are published and applied by every server.
//! * Requests expecting answers (socket fetches, server side emits with ack, broadcasts
//!   with ack) wait for the servers known when the request was sent, until the
//!   request timeout.
//! * Messages with binary data or bigger than the attachment threshold are stored
//!   with the driver and only a pointer to them is published.
use std::{
    borrow::Cow,
    collections::{HashMap, HashSet},
    fmt, future,
    sync::{Arc, Mutex},
    time::Duration,
};

use drivers::{Driver, MessageStream};
use frame::{AttachmentRef, Frame, FrameError};
use futures_util::StreamExt;
use socketwire_core::{
    Sid, Str, Uid, Value,
    adapter::{
        BroadcastError, BroadcastFlags, BroadcastOptions, CoreAdapter, CoreLocalAdapter,
        RemoteSocketData, Room, RoomParam, SocketEmitter,
        remote_packet::{ClusterMessage, MessageData},
    },
    errors::{AdapterError, ServerSideEmitError},
    packet::Packet,
};
use stream::{ResponseStream, Responses};
use tokio::{task::JoinHandle, time::Instant};

pub use stream::AckStream;

pub mod drivers;
mod frame;
mod stream;

/// The number of responses buffered for a single request.
const RESPONSE_BUFFER: usize = 255;

/// Any error that may happen when using the adapter.
#[derive(thiserror::Error)]
pub enum Error<D: Driver> {
    /// Driver error
    #[error("driver error: {0}")]
    Driver(D::Error),
    /// Message encoding error
    #[error("packet encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    /// Message decoding error
    #[error("frame error: {0}")]
    Decode(#[from] FrameError),
    /// A published attachment could not be found
    #[error("attachment {0} not found")]
    MissingAttachment(u64),
}

impl<D: Driver> Error<D> {
    fn from_driver(err: D::Error) -> Self {
        Self::Driver(err)
    }
}

impl<D: Driver> fmt::Debug for Error<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Driver(err) => write!(f, "Driver error: {err:?}"),
            Self::Encode(err) => write!(f, "Encode error: {err:?}"),
            Self::Decode(err) => write!(f, "Decode error: {err:?}"),
            Self::MissingAttachment(id) => write!(f, "Missing attachment: {id}"),
        }
    }
}

impl<D: Driver> From<Error<D>> for AdapterError {
    fn from(err: Error<D>) -> Self {
        AdapterError::from(Box::new(err) as Box<dyn std::error::Error + Send + Sync>)
    }
}

/// The configuration of the [`ClusterAdapter`].
#[derive(Debug, Clone)]
pub struct ClusterAdapterConfig {
    /// How long to wait for the answers of the other servers. Default is 5 seconds.
    pub request_timeout: Duration,
    /// The period of the heartbeats. Default is 5 seconds.
    pub heartbeat_interval: Duration,
    /// A server not heard from within this duration is considered gone. Default is 10 seconds.
    pub heartbeat_timeout: Duration,
    /// The prefix of the channel names. Default is "socket.io".
    pub channel_prefix: Cow<'static, str>,
    /// Messages bigger than this, in bytes, are published as attachments.
    /// Default is 8000, the maximum `NOTIFY` payload of PostgreSQL.
    pub attachment_threshold: usize,
}

impl ClusterAdapterConfig {
    /// Create a new config with the default values.
    pub fn new() -> Self {
        Self::default()
    }
    /// Set the request timeout. Default is 5 seconds.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
    /// Set the heartbeat interval. Default is 5 seconds.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }
    /// Set the heartbeat timeout. Default is 10 seconds.
    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }
    /// Set the prefix of the channel names. Default is "socket.io".
    pub fn with_channel_prefix(mut self, prefix: impl Into<Cow<'static, str>>) -> Self {
        self.channel_prefix = prefix.into();
        self
    }
    /// Set the attachment threshold in bytes. Default is 8000.
    pub fn with_attachment_threshold(mut self, threshold: usize) -> Self {
        self.attachment_threshold = threshold;
        self
    }
}

impl Default for ClusterAdapterConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(10),
            channel_prefix: Cow::Borrowed("socket.io"),
            attachment_threshold: 8000,
        }
    }
}

/// The adapter constructor, given to [`SocketIoBuilder::with_adapter`].
/// Each namespace gets its own adapter, sharing the driver of the constructor.
///
/// [`SocketIoBuilder::with_adapter`]: https://docs.rs/socketwire/latest/socketwire/struct.SocketIoBuilder.html#method.with_adapter
#[derive(Debug, Clone)]
pub struct ClusterAdapterCtr<D> {
    driver: D,
    config: ClusterAdapterConfig,
}

impl<D: Driver> ClusterAdapterCtr<D> {
    /// Create a constructor with the default config.
    pub fn new(driver: D) -> Self {
        Self::new_with_config(driver, ClusterAdapterConfig::default())
    }
    /// Create a constructor with a custom config.
    pub fn new_with_config(driver: D, config: ClusterAdapterConfig) -> Self {
        Self { driver, config }
    }
}

/// The cluster adapter.
///
/// It is generic over the [`Driver`] used to reach the other servers and over the
/// [`SocketEmitter`] of the local server.
pub struct ClusterAdapter<E, D> {
    inner: Arc<Inner<E, D>>,
}

struct Inner<E, D> {
    driver: D,
    config: ClusterAdapterConfig,
    uid: Uid,
    local: CoreLocalAdapter<E>,
    /// The other servers with the last time they were heard from.
    nodes: Mutex<HashMap<Uid, Instant>>,
    responses: Responses,
    req_chan: String,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<E, D> fmt::Debug for ClusterAdapter<E, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterAdapter")
            .field("uid", &self.inner.uid)
            .field("req_chan", &self.inner.req_chan)
            .field("config", &self.inner.config)
            .finish()
    }
}

impl<E: SocketEmitter, D: Driver> Inner<E, D> {
    fn res_chan(&self, uid: Uid) -> String {
        format!("{}{}#", self.req_chan, uid)
    }

    /// The servers currently alive, pruning the expired ones.
    fn alive_nodes(&self) -> usize {
        let threshold = self.config.heartbeat_timeout;
        let mut nodes = self.nodes.lock().unwrap();
        nodes.retain(|_, seen| seen.elapsed() < threshold);
        nodes.len()
    }

    /// A local operation targets only this server: it is flagged as local or it
    /// targets a single socket of this server.
    fn is_local_op(&self, opts: &BroadcastOptions) -> bool {
        opts.has_flag(BroadcastFlags::Local)
            || (opts.is_single_target() && !self.local.sockets(opts).is_empty())
    }

    async fn publish(&self, chan: &str, data: MessageData) -> Result<(), Error<D>> {
        tracing::trace!(?chan, kind = ?data.message_type(), "publishing message");
        let has_binary = data.has_binary();
        let msg = ClusterMessage {
            uid: self.uid,
            nsp: self.local.path().clone(),
            data,
        };
        let mut payload = frame::encode_message(&msg)?;
        if has_binary || payload.len() > self.config.attachment_threshold {
            let id = self
                .driver
                .store_attachment(payload)
                .await
                .map_err(Error::from_driver)?;
            payload = frame::encode_ref(AttachmentRef { uid: self.uid, id })?;
        }
        self.driver
            .publish(chan, payload)
            .await
            .map_err(Error::from_driver)
    }

    async fn publish_req(&self, data: MessageData) -> Result<(), Error<D>> {
        self.publish(&self.req_chan, data).await
    }

    /// Publish a request and return the stream of its responses.
    async fn request(&self, req_id: Sid, data: MessageData) -> Result<ResponseStream, Error<D>> {
        let stream = ResponseStream::register(&self.responses, req_id, RESPONSE_BUFFER);
        self.publish_req(data).await?;
        Ok(stream)
    }

    /// Answer the server that sent a request, from a background task.
    fn respond(self: &Arc<Self>, origin: Uid, data: MessageData) {
        let this = self.clone();
        tokio::spawn(async move {
            let chan = this.res_chan(origin);
            if let Err(e) = this.publish(&chan, data).await {
                tracing::warn!(uid = ?this.uid, ns = ?this.local.path(), "could not respond: {e}");
            }
        });
    }

    /// Decode a received frame, fetching its attachment if needed.
    /// Returns `None` for the messages sent by this server.
    async fn decode(&self, data: &[u8]) -> Result<Option<ClusterMessage>, Error<D>> {
        let msg = match frame::decode(data)? {
            Frame::Inline(msg) => msg,
            Frame::Attachment(attachment) if attachment.uid == self.uid => return Ok(None),
            Frame::Attachment(attachment) => {
                let data = self
                    .driver
                    .fetch_attachment(attachment.id)
                    .await
                    .map_err(Error::from_driver)?
                    .ok_or(Error::MissingAttachment(attachment.id))?;
                match frame::decode(&data)? {
                    Frame::Inline(msg) => msg,
                    Frame::Attachment(_) => return Err(FrameError::UnknownTag(1).into()),
                }
            }
        };
        Ok((msg.uid != self.uid).then_some(msg))
    }

    async fn listen(self: Arc<Self>, requests: MessageStream, responses: MessageStream) {
        let mut stream = futures_util::stream::select(requests, responses);
        while let Some(item) = stream.next().await {
            match self.decode(&item).await {
                Ok(Some(msg)) => self.recv(msg),
                Ok(None) => (),
                Err(e) => {
                    tracing::warn!(uid = ?self.uid, ns = ?self.local.path(), "cannot read message: {e}");
                }
            }
        }
    }

    fn recv(self: &Arc<Self>, msg: ClusterMessage) {
        tracing::trace!(?msg, "incoming message");
        let origin = msg.uid;
        if let Some(req_id) = msg.data.response_id() {
            self.recv_response(req_id, msg.data);
            return;
        }
        match msg.data {
            MessageData::InitialHeartbeat => {
                self.recv_heartbeat(origin);
                tracing::debug!(?origin, "new server, saying hello");
                let this = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = this.publish_req(MessageData::Heartbeat).await {
                        tracing::warn!("could not answer initial heartbeat: {e}");
                    }
                });
            }
            MessageData::Heartbeat => self.recv_heartbeat(origin),
            MessageData::AdapterClose => {
                tracing::debug!(?origin, "server closed");
                self.nodes.lock().unwrap().remove(&origin);
            }
            MessageData::Broadcast {
                opts,
                packet,
                request_id: None,
            } => {
                if let Err(e) = self.local.broadcast(packet, opts) {
                    tracing::warn!(uid = ?self.uid, "remote broadcast: {e:?}");
                }
            }
            MessageData::Broadcast {
                opts,
                packet,
                request_id: Some(req_id),
            } => self.recv_broadcast_with_ack(origin, req_id, packet, opts),
            MessageData::SocketsJoin { opts, rooms } => self.local.add_sockets(&opts, rooms),
            MessageData::SocketsLeave { opts, rooms } => self.local.del_sockets(&opts, rooms),
            MessageData::DisconnectSockets { opts } => {
                if let Err(e) = self.local.disconnect_socket(&opts) {
                    tracing::warn!(uid = ?self.uid, "remote disconnect: {e:?}");
                }
            }
            MessageData::FetchSockets { opts, request_id } => {
                let sockets = self.local.fetch_sockets(&opts);
                let data = MessageData::FetchSocketsResponse {
                    request_id,
                    sockets,
                };
                self.respond(origin, data);
            }
            MessageData::ServerSideEmit {
                request_id,
                event,
                args,
            } => {
                let response = self.local.emitter().recv_server_side(&event, args);
                if let (Some(request_id), Some(response)) = (request_id, response) {
                    let data = MessageData::ServerSideEmitResponse {
                        request_id,
                        response,
                    };
                    self.respond(origin, data);
                }
            }
            // Responses are routed above.
            MessageData::FetchSocketsResponse { .. }
            | MessageData::ServerSideEmitResponse { .. }
            | MessageData::BroadcastClientCount { .. }
            | MessageData::BroadcastAck { .. } => (),
        }
    }

    fn recv_heartbeat(&self, origin: Uid) {
        self.nodes.lock().unwrap().insert(origin, Instant::now());
    }

    fn recv_response(&self, req_id: Sid, data: MessageData) {
        let tx = self.responses.lock().unwrap().get(&req_id).cloned();
        match tx {
            Some(tx) => {
                if tx.try_send(data).is_err() {
                    tracing::warn!(?req_id, "response buffer full, dropping response");
                }
            }
            None => tracing::trace!(?req_id, "ignoring response of an unknown request"),
        }
    }

    /// Send the packet to the local sockets, then the number of sockets reached
    /// and each of their acks to the requesting server.
    fn recv_broadcast_with_ack(
        self: &Arc<Self>,
        origin: Uid,
        request_id: Sid,
        packet: Packet,
        opts: BroadcastOptions,
    ) {
        let (stream, client_count) = self.local.broadcast_with_ack(packet, opts, None);
        let this = self.clone();
        tokio::spawn(async move {
            let chan = this.res_chan(origin);
            let count = MessageData::BroadcastClientCount {
                request_id,
                client_count,
            };
            if let Err(e) = this.publish(&chan, count).await {
                tracing::warn!(uid = ?this.uid, "could not send broadcast client count: {e}");
                return;
            }
            let mut stream = std::pin::pin!(stream);
            while let Some((sid, res)) = stream.next().await {
                // Failed acks are not forwarded, the requester stops waiting at its timeout.
                let Ok(response) = res else { continue };
                let ack = MessageData::BroadcastAck {
                    request_id,
                    sid,
                    response,
                };
                if let Err(e) = this.publish(&chan, ack).await {
                    tracing::warn!(uid = ?this.uid, "could not forward broadcast ack: {e}");
                    return;
                }
            }
        });
    }

    async fn heartbeat_job(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.heartbeat_interval);
        interval.tick().await; // the first tick completes immediately
        loop {
            interval.tick().await;
            if let Err(e) = self.publish_req(MessageData::Heartbeat).await {
                tracing::warn!(uid = ?self.uid, "could not send heartbeat: {e}");
            }
        }
    }

    /// Publish a request and collect one answer per known server, until the timeout.
    async fn collect_responses<T>(
        &self,
        req_id: Sid,
        data: MessageData,
        timeout: Duration,
        map: impl Fn(MessageData) -> Option<T>,
    ) -> Result<(Vec<T>, usize), Error<D>> {
        let expected = self.alive_nodes();
        if expected == 0 {
            return Ok((Vec::new(), 0));
        }
        let stream = self.request(req_id, data).await?;
        let responses = stream
            .filter_map(|data| future::ready(map(data)))
            .take(expected)
            .take_until(tokio::time::sleep(timeout))
            .collect()
            .await;
        Ok((responses, expected))
    }

    async fn fetch_remote_sockets(
        &self,
        opts: &BroadcastOptions,
    ) -> Result<Vec<RemoteSocketData>, Error<D>> {
        let request_id = Sid::new();
        let data = MessageData::FetchSockets {
            opts: opts.clone(),
            request_id,
        };
        let (responses, _) = self
            .collect_responses(request_id, data, self.config.request_timeout, |data| {
                match data {
                    MessageData::FetchSocketsResponse { sockets, .. } => Some(sockets),
                    _ => None,
                }
            })
            .await?;
        Ok(responses.into_iter().flatten().collect())
    }
}

impl<E: SocketEmitter, D: Driver> CoreAdapter<E> for ClusterAdapter<E, D> {
    type Error = Error<D>;
    type State = ClusterAdapterCtr<D>;
    type AckStream = AckStream<E::AckStream>;

    fn new(state: &Self::State, local: CoreLocalAdapter<E>) -> Self {
        let req_chan = format!("{}#{}#", state.config.channel_prefix, local.path());
        let inner = Inner {
            driver: state.driver.clone(),
            config: state.config.clone(),
            uid: local.server_id(),
            local,
            nodes: Mutex::new(HashMap::new()),
            responses: Responses::default(),
            req_chan,
            tasks: Mutex::new(Vec::new()),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    async fn init(&self) -> Result<(), Self::Error> {
        let inner = &self.inner;
        let requests = inner
            .driver
            .subscribe(inner.req_chan.clone())
            .await
            .map_err(Error::from_driver)?;
        let responses = inner
            .driver
            .subscribe(inner.res_chan(inner.uid))
            .await
            .map_err(Error::from_driver)?;

        let listener = tokio::spawn(inner.clone().listen(requests, responses));
        let heartbeat = tokio::spawn(inner.clone().heartbeat_job());
        inner.tasks.lock().unwrap().extend([listener, heartbeat]);

        tracing::debug!(uid = ?inner.uid, ns = ?inner.local.path(), "joining the cluster");
        inner.publish_req(MessageData::InitialHeartbeat).await
    }

    async fn close(&self) -> Result<(), Self::Error> {
        let inner = &self.inner;
        for task in inner.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        inner.local.close();
        inner.publish_req(MessageData::AdapterClose).await?;
        inner
            .driver
            .unsubscribe(&inner.req_chan)
            .await
            .map_err(Error::from_driver)?;
        inner
            .driver
            .unsubscribe(&inner.res_chan(inner.uid))
            .await
            .map_err(Error::from_driver)
    }

    /// The number of servers, this one included, that sent a heartbeat recently.
    async fn server_count(&self) -> Result<u16, Self::Error> {
        let count = self.inner.alive_nodes() + 1;
        Ok(u16::try_from(count).unwrap_or(u16::MAX))
    }

    async fn broadcast(&self, packet: Packet, opts: BroadcastOptions) -> Result<(), BroadcastError> {
        if !self.inner.is_local_op(&opts) {
            let data = MessageData::Broadcast {
                opts: opts.clone(),
                packet: packet.clone(),
                request_id: None,
            };
            self.inner
                .publish_req(data)
                .await
                .map_err(AdapterError::from)?;
        }
        self.inner.local.broadcast(packet, opts)?;
        Ok(())
    }

    /// Broadcast a packet to every server and merge the acks of their sockets.
    ///
    /// ```text
    /// +---+                      +---+                      +---+
    /// | A |                      | B |                      | C |
    /// +---+                      +---+                      +---+
    ///   |---Broadcast(req_id)----->|                          |
    ///   |---Broadcast(req_id)------------------------------->|
    ///   |<--BroadcastClientCount(2)|                          |
    ///   |<--BroadcastClientCount(1)---------------------------|
    ///   |<--BroadcastAck-----------|                          |
    ///   |<--BroadcastAck--------------------------------------|
    ///   |<--BroadcastAck-----------|                          |
    /// ```
    async fn broadcast_with_ack(
        &self,
        packet: Packet,
        opts: BroadcastOptions,
        timeout: Option<Duration>,
    ) -> Result<Self::AckStream, Self::Error> {
        let inner = &self.inner;
        if inner.is_local_op(&opts) {
            let (local, _) = inner.local.broadcast_with_ack(packet, opts, timeout);
            return Ok(AckStream::new_local(local));
        }
        let server_count = inner.alive_nodes();
        let request_id = Sid::new();
        let data = MessageData::Broadcast {
            opts: opts.clone(),
            packet: packet.clone(),
            request_id: Some(request_id),
        };
        let remote = inner.request(request_id, data).await?;
        let (local, _) = inner.local.broadcast_with_ack(packet, opts, timeout);
        let timeout = timeout.unwrap_or(inner.config.request_timeout);
        Ok(AckStream::new(local, remote, timeout, server_count))
    }

    async fn socket_rooms(&self, sid: Sid) -> Result<Vec<Room>, Self::Error> {
        let opts = BroadcastOptions::new(sid);
        if self.inner.is_local_op(&opts) {
            return Ok(self.inner.local.socket_rooms(sid));
        }
        let sockets = self.inner.fetch_remote_sockets(&opts).await?;
        Ok(sockets
            .into_iter()
            .find(|socket| socket.id == sid)
            .map(|socket| socket.rooms)
            .unwrap_or_default())
    }

    async fn add_sockets(
        &self,
        opts: BroadcastOptions,
        rooms: impl RoomParam,
    ) -> Result<(), Self::Error> {
        let rooms: Vec<Room> = rooms.into_room_iter().collect();
        if !self.inner.is_local_op(&opts) {
            let data = MessageData::SocketsJoin {
                opts: opts.clone(),
                rooms: rooms.clone(),
            };
            self.inner.publish_req(data).await?;
        }
        self.inner.local.add_sockets(&opts, rooms);
        Ok(())
    }

    async fn del_sockets(
        &self,
        opts: BroadcastOptions,
        rooms: impl RoomParam,
    ) -> Result<(), Self::Error> {
        let rooms: Vec<Room> = rooms.into_room_iter().collect();
        if !self.inner.is_local_op(&opts) {
            let data = MessageData::SocketsLeave {
                opts: opts.clone(),
                rooms: rooms.clone(),
            };
            self.inner.publish_req(data).await?;
        }
        self.inner.local.del_sockets(&opts, rooms);
        Ok(())
    }

    async fn disconnect_socket(&self, opts: BroadcastOptions) -> Result<(), BroadcastError> {
        if !self.inner.is_local_op(&opts) {
            let data = MessageData::DisconnectSockets { opts: opts.clone() };
            self.inner
                .publish_req(data)
                .await
                .map_err(AdapterError::from)?;
        }
        self.inner
            .local
            .disconnect_socket(&opts)
            .map_err(BroadcastError::Disconnect)
    }

    async fn fetch_sockets(
        &self,
        opts: BroadcastOptions,
    ) -> Result<Vec<RemoteSocketData>, Self::Error> {
        let mut sockets = self.inner.local.fetch_sockets(&opts);
        if !self.inner.is_local_op(&opts) {
            sockets.extend(self.inner.fetch_remote_sockets(&opts).await?);
        }
        Ok(sockets)
    }

    /// The rooms of the matching sockets of every server.
    async fn rooms(&self, opts: BroadcastOptions) -> Result<Vec<Room>, Self::Error> {
        let mut rooms: HashSet<Room> = self.inner.local.rooms(&opts).into_iter().collect();
        if !self.inner.is_local_op(&opts) {
            let sockets = self.inner.fetch_remote_sockets(&opts).await?;
            rooms.extend(sockets.into_iter().flat_map(|socket| socket.rooms));
        }
        Ok(rooms.into_iter().collect())
    }

    async fn server_side_emit(&self, event: Str, args: Vec<Value>) -> Result<(), Self::Error> {
        let data = MessageData::ServerSideEmit {
            request_id: None,
            event,
            args,
        };
        self.inner.publish_req(data).await
    }

    async fn server_side_emit_with_ack(
        &self,
        event: Str,
        args: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Vec<Vec<Value>>, ServerSideEmitError> {
        let inner = &self.inner;
        let request_id = Sid::new();
        let data = MessageData::ServerSideEmit {
            request_id: Some(request_id),
            event,
            args,
        };
        let timeout = timeout.unwrap_or(inner.config.request_timeout);
        let (responses, expected) = inner
            .collect_responses(request_id, data, timeout, |data| match data {
                MessageData::ServerSideEmitResponse { response, .. } => Some(response),
                _ => None,
            })
            .await
            .map_err(AdapterError::from)?;
        if responses.len() < expected {
            Err(ServerSideEmitError::Timeout {
                responses,
                expected,
            })
        } else {
            Ok(responses)
        }
    }

    fn get_local(&self) -> &CoreLocalAdapter<E> {
        &self.inner.local
    }
}
