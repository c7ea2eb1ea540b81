use std::{borrow::Cow, fmt, sync::Arc, time::Duration};

use enginewire::{
    TransportType,
    config::{EngineIoConfig, EngineIoConfigBuilder},
    service::NotFoundService,
};
use http::request::Parts;
use serde::{Serialize, de::DeserializeOwned};
use socketwire_core::{
    Sid, Str, Uid, Value,
    adapter::{RecoveryConfig, Room, RoomParam},
    registry::ListenerId,
    value::{from_args, to_args},
};

use crate::{
    ack::AckStream,
    adapter::{Adapter, LocalAdapter},
    client::Client,
    errors::{BroadcastError, EmitWithAckError, NsInsertError, SendError, ServerSideError},
    extract::SocketRef,
    handler::ConnectHandler,
    layer::SocketIoLayer,
    operators::BroadcastOperators,
    service::SocketIoService,
    socket::RemoteSocket,
};

/// Configuration of the server and of its engine.
#[derive(Debug, Clone)]
pub struct SocketIoConfig {
    /// The engine config.
    pub engine_config: EngineIoConfig,

    /// How long the server waits for an ack before the ack fails with a timeout.
    ///
    /// Defaults to 5 seconds.
    pub ack_timeout: Duration,

    /// How long a client may stay connected without joining a namespace.
    ///
    /// Defaults to 45 seconds.
    pub connect_timeout: Duration,

    /// The id of this server, shared by all its namespaces.
    pub server_id: Uid,

    /// Recover the rooms and the missed packets of clients that reconnect
    /// after a temporary disconnection. Disabled by default.
    pub connection_state_recovery: Option<RecoveryConfig>,

    /// Remove a child of a dynamic namespace once its last socket leaves.
    ///
    /// Defaults to false.
    pub cleanup_empty_dynamic_namespaces: bool,
}

impl Default for SocketIoConfig {
    fn default() -> Self {
        Self {
            engine_config: EngineIoConfig {
                req_path: "/socket.io".into(),
                ..Default::default()
            },
            ack_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(45),
            server_id: Uid::new(),
            connection_state_recovery: None,
            cleanup_empty_dynamic_namespaces: false,
        }
    }
}

/// Builds a [`SocketIo`] handle together with a tower [`Layer`](tower_layer::Layer)
/// or [`Service`](tower_service::Service).
pub struct SocketIoBuilder<A: Adapter = LocalAdapter> {
    config: SocketIoConfig,
    engine_config_builder: EngineIoConfigBuilder,
    adapter_state: A::State,
}

impl SocketIoBuilder<LocalAdapter> {
    /// A builder with the default config.
    pub fn new() -> Self {
        Self {
            engine_config_builder: EngineIoConfigBuilder::new().req_path("/socket.io"),
            config: SocketIoConfig::default(),
            adapter_state: (),
        }
    }
}

impl<A: Adapter> SocketIoBuilder<A> {
    /// The path to listen for requests on.
    ///
    /// Defaults to "/socket.io".
    #[inline]
    pub fn req_path(mut self, req_path: impl Into<Cow<'static, str>>) -> Self {
        self.engine_config_builder = self.engine_config_builder.req_path(req_path);
        self
    }

    /// The interval at which the server pings the client.
    ///
    /// Defaults to 25 seconds.
    #[inline]
    pub fn ping_interval(mut self, ping_interval: Duration) -> Self {
        self.engine_config_builder = self.engine_config_builder.ping_interval(ping_interval);
        self
    }

    /// How long the server waits for a pong before closing the connection.
    ///
    /// Defaults to 20 seconds.
    #[inline]
    pub fn ping_timeout(mut self, ping_timeout: Duration) -> Self {
        self.engine_config_builder = self.engine_config_builder.ping_timeout(ping_timeout);
        self
    }

    /// The number of packets buffered per connection. When the buffer is full,
    /// emitting fails with [`SocketError::InternalChannelFull`](crate::SocketError::InternalChannelFull).
    ///
    /// Defaults to 128 packets.
    #[inline]
    pub fn max_buffer_size(mut self, max_buffer_size: usize) -> Self {
        self.engine_config_builder = self.engine_config_builder.max_buffer_size(max_buffer_size);
        self
    }

    /// The maximum size of a payload in bytes.
    ///
    /// Defaults to 100 kb.
    #[inline]
    pub fn max_payload(mut self, max_payload: u64) -> Self {
        self.engine_config_builder = self.engine_config_builder.max_payload(max_payload);
        self
    }

    /// The size of the read buffer of the websocket transport.
    ///
    /// Defaults to 4KiB.
    #[inline]
    pub fn ws_read_buffer_size(mut self, ws_read_buffer_size: usize) -> Self {
        self.engine_config_builder = self
            .engine_config_builder
            .ws_read_buffer_size(ws_read_buffer_size);
        self
    }

    /// The allowed transports.
    ///
    /// Defaults to every transport.
    #[inline]
    pub fn transports<const N: usize>(mut self, transports: [TransportType; N]) -> Self {
        self.engine_config_builder = self.engine_config_builder.transports(transports);
        self
    }

    /// Whether polling connections may upgrade.
    ///
    /// Defaults to true.
    #[inline]
    pub fn allow_upgrades(mut self, allow_upgrades: bool) -> Self {
        self.engine_config_builder = self.engine_config_builder.allow_upgrades(allow_upgrades);
        self
    }

    /// How long an upgrade may take.
    ///
    /// Defaults to 10 seconds.
    #[inline]
    pub fn upgrade_timeout(mut self, upgrade_timeout: Duration) -> Self {
        self.engine_config_builder = self.engine_config_builder.upgrade_timeout(upgrade_timeout);
        self
    }

    /// Check every http request before it reaches the engine.
    /// A rejected request is answered with a 400 `Forbidden` error.
    #[inline]
    pub fn request_middleware<M>(mut self, middleware: M) -> Self
    where
        M: Fn(&Parts) -> Result<(), Cow<'static, str>> + Send + Sync + 'static,
    {
        self.engine_config_builder = self.engine_config_builder.request_middleware(middleware);
        self
    }

    /// How long the server waits for an ack.
    ///
    /// Defaults to 5 seconds.
    #[inline]
    pub fn ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.config.ack_timeout = ack_timeout;
        self
    }

    /// How long a client may stay connected without joining a namespace.
    ///
    /// Defaults to 45 seconds.
    #[inline]
    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.config.connect_timeout = connect_timeout;
        self
    }

    /// Enable connection state recovery.
    #[inline]
    pub fn with_connection_state_recovery(mut self, config: RecoveryConfig) -> Self {
        self.config.connection_state_recovery = Some(config);
        self
    }

    /// Remove the children of dynamic namespaces when they become empty.
    #[inline]
    pub fn cleanup_empty_dynamic_namespaces(mut self, cleanup: bool) -> Self {
        self.config.cleanup_empty_dynamic_namespaces = cleanup;
        self
    }

    /// Use a config created beforehand. Engine options set on the builder still apply.
    #[inline]
    pub fn with_config(mut self, config: SocketIoConfig) -> Self {
        self.config = config;
        self
    }

    /// Use another [`Adapter`].
    pub fn with_adapter<B: Adapter>(self, adapter_state: B::State) -> SocketIoBuilder<B> {
        SocketIoBuilder {
            config: self.config,
            engine_config_builder: self.engine_config_builder,
            adapter_state,
        }
    }

    /// Build a [`SocketIoLayer`] and its [`SocketIo`] handle.
    pub fn build_layer(mut self) -> (SocketIoLayer<A>, SocketIo<A>) {
        self.config.engine_config = self.engine_config_builder.build();
        let (layer, client) = SocketIoLayer::from_config(self.config, self.adapter_state);
        (layer, SocketIo(client))
    }

    /// Build a standalone [`SocketIoService`] that answers 404 to any other request.
    pub fn build_svc(mut self) -> (SocketIoService<NotFoundService, A>, SocketIo<A>) {
        self.config.engine_config = self.engine_config_builder.build();
        let (svc, client) =
            SocketIoService::with_config_inner(NotFoundService, self.config, self.adapter_state);
        (svc, SocketIo(client))
    }

    /// Build a [`SocketIoService`] that forwards any other request to `svc`.
    pub fn build_with_inner_svc<S: Clone>(
        mut self,
        svc: S,
    ) -> (SocketIoService<S, A>, SocketIo<A>) {
        self.config.engine_config = self.engine_config_builder.build();
        let (svc, client) = SocketIoService::with_config_inner(svc, self.config, self.adapter_state);
        (svc, SocketIo(client))
    }
}

impl Default for SocketIoBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The server handle. It is cheap to clone and can be moved anywhere.
///
/// It is also an extractor for every [`handler`](crate::handler).
pub struct SocketIo<A: Adapter = LocalAdapter>(Arc<Client<A>>);

impl SocketIo<LocalAdapter> {
    /// A [`SocketIoBuilder`] with the default config.
    #[inline(always)]
    pub fn builder() -> SocketIoBuilder {
        SocketIoBuilder::new()
    }

    /// A standalone service with the default config.
    #[inline(always)]
    pub fn new_svc() -> (SocketIoService<NotFoundService>, SocketIo) {
        Self::builder().build_svc()
    }

    /// A service wrapping `svc` with the default config.
    #[inline(always)]
    pub fn new_inner_svc<S: Clone>(svc: S) -> (SocketIoService<S>, SocketIo) {
        Self::builder().build_with_inner_svc(svc)
    }

    /// A layer with the default config.
    #[inline(always)]
    pub fn new_layer() -> (SocketIoLayer, SocketIo) {
        Self::builder().build_layer()
    }
}

impl<A: Adapter> SocketIo<A> {
    /// The config of the server.
    #[inline]
    pub fn config(&self) -> &SocketIoConfig {
        &self.0.config
    }

    /// Register the connect handler of a namespace. A namespace registered twice
    /// replaces the previous one, whose sockets are disconnected.
    ///
    /// ```
    /// # use socketwire::{SocketIo, extract::*};
    /// # use serde::Deserialize;
    /// #[derive(Deserialize)]
    /// struct Auth {
    ///     token: String,
    /// }
    /// let (_, io) = SocketIo::new_svc();
    /// io.ns("/", async |socket: SocketRef, Data(auth): Data<Auth>| {
    ///     if auth.token.is_empty() {
    ///         socket.disconnect().ok();
    ///         return;
    ///     }
    ///     socket.on("hello", async |socket: SocketRef, Data::<String>(name), ack: AckSender| {
    ///         ack.send(&format!("hello {name}")).ok();
    ///         socket.broadcast().emit("joined", &name).await.ok();
    ///     });
    /// });
    /// ```
    pub fn ns<C, T>(&self, path: impl Into<Str>, callback: C)
    where
        C: ConnectHandler<A, T>,
        T: Send + Sync + 'static,
    {
        self.0.add_ns(path.into(), callback)
    }

    /// Register the connect handler of a dynamic namespace. Parameters of the path use the
    /// `{name}` syntax and a child namespace is created for every path that matches.
    /// Static namespaces take precedence.
    ///
    /// # Errors
    /// If the pattern is invalid or conflicts with another one.
    ///
    /// ```
    /// # use socketwire::{SocketIo, extract::SocketRef};
    /// let (_, io) = SocketIo::new_svc();
    /// io.dyn_ns("/board/{id}", async |socket: SocketRef| {
    ///     println!("joined {}", socket.ns());
    /// }).unwrap();
    /// ```
    #[inline]
    pub fn dyn_ns<C, T>(&self, path: impl Into<String>, callback: C) -> Result<(), NsInsertError>
    where
        C: ConnectHandler<A, T>,
        T: Send + Sync + 'static,
    {
        self.0.add_dyn_ns(path.into(), callback)
    }

    /// Delete a namespace. Its sockets are disconnected.
    #[inline]
    pub fn delete_ns(&self, path: impl AsRef<str>) {
        self.0.delete_ns(path.as_ref());
    }

    /// Close every connection and every namespace. The disconnect handlers are
    /// called with [`DisconnectReason::ClosingServer`](crate::socket::DisconnectReason::ClosingServer).
    #[inline]
    pub async fn close(&self) {
        self.0.close().await;
    }

    /// Operators for every namespace.
    pub fn nsps(&self) -> Vec<BroadcastOperators<A>> {
        self.0
            .namespaces()
            .into_iter()
            .map(BroadcastOperators::new)
            .collect()
    }

    /// Operators on a namespace. Children of dynamic namespaces can be selected
    /// once they exist.
    #[inline]
    pub fn of(&self, path: impl AsRef<str>) -> Option<BroadcastOperators<A>> {
        self.get_op(path.as_ref())
    }

    /// Alias for `io.of("/").unwrap().to(rooms)`.
    ///
    /// # Panics
    /// If the "/" namespace is not registered. This applies to every alias below.
    #[inline]
    pub fn to(&self, rooms: impl RoomParam) -> BroadcastOperators<A> {
        self.get_default_op().to(rooms)
    }

    /// Alias for `io.of("/").unwrap().within(rooms)`.
    #[inline]
    pub fn within(&self, rooms: impl RoomParam) -> BroadcastOperators<A> {
        self.get_default_op().within(rooms)
    }

    /// Alias for `io.of("/").unwrap().except(rooms)`.
    #[inline]
    pub fn except(&self, rooms: impl RoomParam) -> BroadcastOperators<A> {
        self.get_default_op().except(rooms)
    }

    /// Alias for `io.of("/").unwrap().local()`.
    #[inline]
    pub fn local(&self) -> BroadcastOperators<A> {
        self.get_default_op().local()
    }

    /// Alias for `io.of("/").unwrap().timeout(timeout)`.
    #[inline]
    pub fn timeout(&self, timeout: Duration) -> BroadcastOperators<A> {
        self.get_default_op().timeout(timeout)
    }

    /// Alias for `io.of("/").unwrap().broadcast()`.
    #[inline]
    pub fn broadcast(&self) -> BroadcastOperators<A> {
        self.get_default_op()
    }

    /// Alias for `io.of("/").unwrap().emit(event, data)`.
    #[inline]
    pub async fn emit<T: ?Sized + Serialize>(
        &self,
        event: impl Into<Str>,
        data: &T,
    ) -> Result<(), SendError> {
        self.get_default_op().emit(event, data).await
    }

    /// Alias for `io.of("/").unwrap().emit_with_ack(event, data)`.
    #[inline]
    pub async fn emit_with_ack<T: ?Sized + Serialize, V: DeserializeOwned>(
        &self,
        event: impl Into<Str>,
        data: &T,
    ) -> Result<AckStream<V, A::AckStream>, EmitWithAckError> {
        self.get_default_op().emit_with_ack(event, data).await
    }

    /// Alias for `io.of("/").unwrap().sockets()`.
    #[inline]
    pub fn sockets(&self) -> Vec<SocketRef<A>> {
        self.get_default_op().sockets()
    }

    /// Alias for `io.of("/").unwrap().fetch_sockets()`.
    #[inline]
    pub async fn fetch_sockets(&self) -> Result<Vec<RemoteSocket<A>>, A::Error> {
        self.get_default_op().fetch_sockets().await
    }

    /// Alias for `io.of("/").unwrap().disconnect()`.
    #[inline]
    pub async fn disconnect(&self) -> Result<(), BroadcastError> {
        self.get_default_op().disconnect().await
    }

    /// Alias for `io.of("/").unwrap().join(rooms)`.
    #[inline]
    pub async fn join(&self, rooms: impl RoomParam) -> Result<(), A::Error> {
        self.get_default_op().join(rooms).await
    }

    /// Alias for `io.of("/").unwrap().leave(rooms)`.
    #[inline]
    pub async fn leave(&self, rooms: impl RoomParam) -> Result<(), A::Error> {
        self.get_default_op().leave(rooms).await
    }

    /// Alias for `io.of("/").unwrap().rooms()`.
    #[inline]
    pub async fn rooms(&self) -> Result<Vec<Room>, A::Error> {
        self.get_default_op().rooms().await
    }

    /// Alias for `io.of("/").unwrap().get_socket(sid)`.
    #[inline]
    pub fn get_socket(&self, sid: Sid) -> Option<SocketRef<A>> {
        self.get_default_op().get_socket(sid)
    }

    /// Handle the events that other servers send with
    /// [`server_side_emit`](Self::server_side_emit). The value returned by the handler
    /// is the response of this server to [`server_side_emit_with_ack`](Self::server_side_emit_with_ack).
    /// Events whose data cannot be deserialized as `T` are not answered.
    ///
    /// ```
    /// # use socketwire::SocketIo;
    /// let (_, io) = SocketIo::new_svc();
    /// io.on_server_side("load", |(): ()| std::process::id());
    /// ```
    pub fn on_server_side<T, R, F>(&self, event: impl Into<Str>, handler: F) -> ListenerId
    where
        T: DeserializeOwned,
        R: Serialize,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        let handler = move |args: Vec<Value>| -> Option<Vec<Value>> {
            let data = match from_args::<T>(args) {
                Ok(data) => data,
                Err(_e) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("cannot deserialize server side event: {_e}");
                    return None;
                }
            };
            to_args(&handler(data)).ok()
        };
        self.0.server_side.on(event.into(), Arc::new(handler))
    }

    /// Remove a server side handler.
    pub fn off_server_side(&self, event: &str, id: ListenerId) -> bool {
        self.0.server_side.off(event, id)
    }

    /// Alias for `io.of("/").unwrap().server_side_emit(event, data)`.
    #[inline]
    pub async fn server_side_emit<T: ?Sized + Serialize>(
        &self,
        event: impl Into<Str>,
        data: &T,
    ) -> Result<(), ServerSideError> {
        self.get_default_op().server_side_emit(event, data).await
    }

    /// Alias for `io.of("/").unwrap().server_side_emit_with_ack(event, data)`.
    #[inline]
    pub async fn server_side_emit_with_ack<T: ?Sized + Serialize>(
        &self,
        event: impl Into<Str>,
        data: &T,
    ) -> Result<Vec<Vec<Value>>, ServerSideError> {
        self.get_default_op()
            .server_side_emit_with_ack(event, data)
            .await
    }

    #[inline(always)]
    fn get_op(&self, path: &str) -> Option<BroadcastOperators<A>> {
        self.0.get_ns(path).map(BroadcastOperators::new)
    }

    /// # Panics
    /// If the "/" namespace is not registered.
    #[inline(always)]
    fn get_default_op(&self) -> BroadcastOperators<A> {
        self.get_op("/").expect("default namespace not found")
    }
}

impl<A: Adapter> fmt::Debug for SocketIo<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketIo").field("client", &self.0).finish()
    }
}
impl<A: Adapter> Clone for SocketIo<A> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}
impl<A: Adapter> From<Arc<Client<A>>> for SocketIo<A> {
    fn from(client: Arc<Client<A>>) -> Self {
        SocketIo(client)
    }
}

#[doc(hidden)]
#[cfg(any(test, feature = "__test_harness"))]
impl<A: Adapter> SocketIo<A> {
    /// Connect a fake client to a namespace. The returned channels are the
    /// engine packets sent by the client and the ones received by it.
    pub async fn new_dummy_sock(
        &self,
        ns: &'static str,
        auth: impl serde::Serialize,
    ) -> (
        tokio::sync::mpsc::Sender<enginewire::Packet>,
        tokio::sync::mpsc::Receiver<enginewire::Packet>,
    ) {
        self.0.clone().new_dummy_sock(ns, auth).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_default_op() {
        let (_, io) = SocketIo::new_svc();
        io.ns("/", async || {});
        let _ = io.get_default_op();
    }

    #[test]
    #[should_panic(expected = "default namespace not found")]
    fn get_default_op_panic() {
        let (_, io) = SocketIo::new_svc();
        let _ = io.get_default_op();
    }

    #[test]
    fn get_op() {
        let (_, io) = SocketIo::new_svc();
        io.ns("/test", async || {});
        assert!(io.of("/test").is_some());
        assert!(io.of("/test2").is_none());
        assert_eq!(io.nsps().len(), 1);
        io.delete_ns("/test");
        assert!(io.of("/test").is_none());
    }

    #[test]
    fn builder_config() {
        let (_, io) = SocketIo::builder()
            .req_path("/ws")
            .ack_timeout(Duration::from_secs(1))
            .connect_timeout(Duration::from_secs(2))
            .cleanup_empty_dynamic_namespaces(true)
            .with_connection_state_recovery(RecoveryConfig::default())
            .build_svc();
        let config = io.config();
        assert_eq!(config.engine_config.req_path, "/ws");
        assert_eq!(config.ack_timeout, Duration::from_secs(1));
        assert_eq!(config.connect_timeout, Duration::from_secs(2));
        assert!(config.cleanup_empty_dynamic_namespaces);
        assert!(config.connection_state_recovery.is_some());
    }

    #[test]
    fn default_config() {
        let config = SocketIoConfig::default();
        assert_eq!(config.engine_config.req_path, "/socket.io");
        assert_eq!(config.ack_timeout, Duration::from_secs(5));
        assert_eq!(config.connect_timeout, Duration::from_secs(45));
        assert!(config.connection_state_recovery.is_none());
    }

    #[test]
    fn server_side_handlers() {
        let (_, io) = SocketIo::new_svc();
        let id = io.on_server_side("add", |(a, b): (i64, i64)| a + b);
        let handler = io.0.server_side.first("add").unwrap();
        let res = handler(vec![Value::from(1), Value::from(2)]).unwrap();
        assert_eq!(res, vec![Value::from(3)]);
        assert!(handler(vec![Value::from("nan")]).is_none());

        assert!(io.off_server_side("add", id));
        assert!(io.0.server_side.first("add").is_none());
    }

    #[tokio::test]
    async fn get_socket_by_sid() {
        let (_, io) = SocketIo::new_svc();
        io.ns("/", async || {});
        let (_tx, _rx) = io.new_dummy_sock("/", ()).await;
        let sid = io.sockets()[0].id;
        assert!(io.get_socket(sid).is_some());
        assert!(io.get_socket(Sid::new()).is_none());
    }
}
