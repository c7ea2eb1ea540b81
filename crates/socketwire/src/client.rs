use std::{
    collections::HashMap,
    fmt,
    future::Future,
    sync::{Arc, Mutex, OnceLock, RwLock},
};

use bytes::Bytes;
use enginewire::{
    Str,
    handler::EngineIoHandler,
    socket::{DisconnectReason as EIoDisconnectReason, Socket as EIoSocket},
};
use futures_util::FutureExt;
use matchit::{Match, Router};
use socketwire_core::{
    Sid, Value,
    adapter::CoreAdapter,
    packet::{Packet, PacketData},
    parser::{Parse, ParseError, ParserState},
    registry::EventRegistry,
};
use socketwire_parser::CommonParser;
use tokio::sync::oneshot;

use crate::{
    ProtocolVersion, SocketIo, SocketIoConfig,
    adapter::Adapter,
    errors::Error,
    handler::ConnectHandler,
    ns::{Namespace, NamespaceCtr, RetireFn, ServerSideRegistry},
    socket::{DisconnectReason, PermitExt},
};

pub struct Client<A: Adapter> {
    pub(crate) config: SocketIoConfig,
    nsps: RwLock<HashMap<Str, Arc<Namespace<A>>>>,
    router: RwLock<Router<NamespaceCtr<A>>>,
    pub(crate) server_side: Arc<ServerSideRegistry>,
    adapter_state: A::State,
}

impl<A: Adapter> Client<A> {
    pub fn new(config: SocketIoConfig, adapter_state: A::State) -> Self {
        Self {
            config,
            nsps: RwLock::new(HashMap::new()),
            router: RwLock::new(Router::new()),
            server_side: Arc::new(EventRegistry::new()),
            adapter_state,
        }
    }

    /// Called when a socket asks to join a namespace.
    /// Unknown paths are matched against the dynamic namespaces, which creates
    /// the namespace on the first match.
    fn sock_connect(
        self: &Arc<Self>,
        auth: Option<Value>,
        ns_path: &str,
        esocket: &Arc<EIoSocket<SocketData<A>>>,
    ) {
        #[cfg(feature = "tracing")]
        tracing::debug!("auth: {:?}", auth);
        let protocol: ProtocolVersion = esocket.protocol.into();
        let connect = move |ns: Arc<Namespace<A>>, esocket: Arc<EIoSocket<SocketData<A>>>| async move {
            if ns.connect(esocket.clone(), auth).await.is_ok() {
                // cancel the connect timeout task
                if let Some(tx) = esocket.data.connect_recv_tx.lock().unwrap().take() {
                    tx.send(()).ok();
                }
            }
        };

        if let Some(ns) = self.get_ns(ns_path) {
            tokio::spawn(connect(ns, esocket.clone()));
        } else if let Some(ns) = self.get_or_create_dyn_ns(ns_path) {
            tokio::spawn(connect(ns, esocket.clone()));
        } else if protocol == ProtocolVersion::V4 && ns_path == "/" {
            #[cfg(feature = "tracing")]
            tracing::error!(
                "the root namespace \"/\" must be defined before any connection for protocol V4 (legacy)!"
            );
            esocket.close(EIoDisconnectReason::TransportClose);
        } else {
            let packet = Packet::connect_error(Str::from(ns_path.to_string()), "Invalid namespace");
            match esocket.reserve() {
                Ok(permit) => permit.send_encoded(CommonParser.encode(packet)),
                Err(_e) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!("error while sending invalid namespace packet: {}", _e);
                }
            }
        }
    }

    fn get_or_create_dyn_ns(self: &Arc<Self>, path: &str) -> Option<Arc<Namespace<A>>> {
        let router = self.router.read().unwrap();
        let Match { value: ctr, .. } = router.at(path).ok()?;
        let path = Str::from(path.to_string());
        let retire = self
            .config
            .cleanup_empty_dynamic_namespaces
            .then(|| self.retire_fn(path.clone()));

        let ns = {
            let mut nsps = self.nsps.write().unwrap();
            if let Some(ns) = nsps.get(&path) {
                return Some(ns.clone());
            }
            #[cfg(feature = "tracing")]
            tracing::debug!("creating dynamic namespace {path}");
            let ns = ctr.get_new_ns(
                path.clone(),
                &self.adapter_state,
                &self.config,
                self.server_side.clone(),
                retire,
            );
            nsps.insert(path, ns.clone());
            ns
        };
        init_adapter(ns.adapter.clone());
        Some(ns)
    }

    /// The hook removing a dynamic namespace once its last socket left.
    fn retire_fn(self: &Arc<Self>, path: Str) -> RetireFn {
        let client = Arc::downgrade(self);
        Box::new(move || {
            if let Some(client) = client.upgrade() {
                client.retire_ns(&path);
            }
        })
    }

    fn retire_ns(&self, path: &str) {
        let ns = {
            let mut nsps = self.nsps.write().unwrap();
            match nsps.get(path) {
                Some(ns) if ns.is_empty() => nsps.remove(path),
                _ => None,
            }
        };
        if let Some(ns) = ns {
            #[cfg(feature = "tracing")]
            tracing::debug!("removing empty dynamic namespace {path}");
            tokio::spawn(async move {
                if let Err(_e) = ns.adapter.close().await {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("could not close adapter: {_e}");
                }
            });
        }
    }

    /// Propagate a packet to its target namespace.
    /// Packets for namespaces the client did not join are dropped.
    fn sock_propagate_packet(&self, packet: Packet, sid: Sid) -> Result<(), Error> {
        if let Some(ns) = self.get_ns(&packet.ns) {
            ns.recv(sid, packet.inner)
        } else {
            #[cfg(feature = "tracing")]
            tracing::debug!(?sid, "invalid namespace requested: {}", packet.ns);
            Ok(())
        }
    }

    /// Spawn a task closing the connection if it does not join a namespace
    /// within [`SocketIoConfig::connect_timeout`].
    fn spawn_connect_timeout_task(&self, socket: Arc<EIoSocket<SocketData<A>>>) {
        #[cfg(feature = "tracing")]
        tracing::debug!("spawning connect timeout task");
        let (tx, rx) = oneshot::channel();
        socket.data.connect_recv_tx.lock().unwrap().replace(tx);

        let timeout = self.config.connect_timeout;
        tokio::spawn(async move {
            if tokio::time::timeout(timeout, rx).await.is_err() {
                #[cfg(feature = "tracing")]
                tracing::debug!("connect timeout for socket {}", socket.id);
                socket.close(EIoDisconnectReason::TransportClose);
            }
        });
    }

    /// Adds a namespace. Its adapter is initialized in the background.
    pub fn add_ns<C, T>(&self, path: Str, callback: C)
    where
        C: ConnectHandler<A, T>,
        T: Send + Sync + 'static,
    {
        #[cfg(feature = "tracing")]
        tracing::debug!("adding namespace {}", path);

        let ns = Namespace::new(
            path.clone(),
            callback,
            &self.adapter_state,
            &self.config,
            self.server_side.clone(),
        );
        let adapter = ns.adapter.clone();
        let old = self.nsps.write().unwrap().insert(path, ns);
        if let Some(old) = old {
            run_or_spawn(async move { old.close(DisconnectReason::ServerNSDisconnect).await });
        }
        init_adapter(adapter);
    }

    pub fn add_dyn_ns<C, T>(&self, path: String, callback: C) -> Result<(), matchit::InsertError>
    where
        C: ConnectHandler<A, T>,
        T: Send + Sync + 'static,
    {
        #[cfg(feature = "tracing")]
        tracing::debug!("adding dynamic namespace {}", &path);

        let ns = NamespaceCtr::new(callback);
        self.router.write().unwrap().insert(path, ns)
    }

    /// Deletes a namespace and disconnects its sockets.
    pub fn delete_ns(&self, path: &str) {
        #[cfg(feature = "tracing")]
        tracing::debug!("deleting namespace {}", path);
        let ns = self.nsps.write().unwrap().remove(path);
        if let Some(ns) = ns {
            run_or_spawn(async move { ns.close(DisconnectReason::ServerNSDisconnect).await });
        }
    }

    pub fn get_ns(&self, path: &str) -> Option<Arc<Namespace<A>>> {
        self.nsps.read().unwrap().get(path).cloned()
    }

    pub(crate) fn namespaces(&self) -> Vec<Arc<Namespace<A>>> {
        self.nsps.read().unwrap().values().cloned().collect()
    }

    /// Closes all engine connections and all namespaces.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub(crate) async fn close(&self) {
        #[cfg(feature = "tracing")]
        tracing::debug!("closing all namespaces");
        let ns = { std::mem::take(&mut *self.nsps.write().unwrap()) };
        futures_util::future::join_all(
            ns.values()
                .map(|ns| ns.close(DisconnectReason::ClosingServer)),
        )
        .await;
        #[cfg(feature = "tracing")]
        tracing::debug!("all namespaces closed");
    }

    /// Dispatch a decoded packet. Connect packets create a socket in their namespace.
    fn dispatch(self: &Arc<Self>, packet: Packet, socket: &Arc<EIoSocket<SocketData<A>>>) {
        #[cfg(feature = "tracing")]
        tracing::trace!("packet: {:?}", packet);
        let res: Result<(), Error> = match packet.inner {
            PacketData::Connect(auth) => {
                self.sock_connect(auth, &packet.ns, socket);
                Ok(())
            }
            _ => self.sock_propagate_packet(packet, socket.id),
        };
        if let Err(ref err) = res {
            #[cfg(feature = "tracing")]
            tracing::debug!("error while processing packet to socket {}: {}", socket.id, err);
            if let Some(reason) = err.into() {
                socket.close(reason);
            }
        }
    }

    fn on_parse_error(socket: &EIoSocket<SocketData<A>>, _err: ParseError) {
        #[cfg(feature = "tracing")]
        tracing::debug!("socket deserialization error: {}", _err);
        socket.data.parser_state.reset();
        socket.close(EIoDisconnectReason::PacketParsingError);
    }
}

/// Initialize the adapter of a namespace.
fn init_adapter<A: Adapter>(adapter: Arc<A>) {
    run_or_spawn(async move {
        if let Err(_e) = adapter.init().await {
            #[cfg(feature = "tracing")]
            tracing::error!("could not initialize adapter: {_e}");
        }
    });
}

/// Poll a future once in place and spawn it if it is not ready.
/// The local adapter never waits, so namespaces using it are ready right away,
/// even outside of a runtime.
fn run_or_spawn(fut: impl Future<Output = ()> + Send + 'static) {
    let mut fut = Box::pin(fut);
    if (&mut fut).now_or_never().is_none() {
        tokio::spawn(fut);
    }
}

pub struct SocketData<A: Adapter> {
    pub parser_state: ParserState,
    /// Notifies the connect timeout task that the client joined a namespace
    pub connect_recv_tx: Mutex<Option<oneshot::Sender<()>>>,

    /// The server handle, reachable from any socket of the connection
    pub io: OnceLock<SocketIo<A>>,
}

impl<A: Adapter> Default for SocketData<A> {
    fn default() -> Self {
        Self {
            parser_state: ParserState::default(),
            connect_recv_tx: Mutex::new(None),
            io: OnceLock::new(),
        }
    }
}

impl<A: Adapter> fmt::Debug for SocketData<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketData")
            .field("parser_state", &self.parser_state)
            .field("connect_recv_tx", &self.connect_recv_tx)
            .finish()
    }
}

impl<A: Adapter> EngineIoHandler for Client<A> {
    type Data = SocketData<A>;

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, socket), fields(sid = socket.id.to_string())))]
    fn on_connect(self: Arc<Self>, socket: Arc<EIoSocket<SocketData<A>>>) {
        socket.data.io.set(SocketIo::from(self.clone())).ok();

        #[cfg(feature = "tracing")]
        tracing::debug!("eio socket connect");

        // Legacy clients are implicitly connected to the main namespace.
        match ProtocolVersion::from(socket.protocol) {
            ProtocolVersion::V4 => {
                #[cfg(feature = "tracing")]
                tracing::debug!("connecting to default namespace for v4");
                self.sock_connect(None, "/", &socket);
            }
            ProtocolVersion::V5 => self.spawn_connect_timeout_task(socket),
        }
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, socket), fields(sid = socket.id.to_string())))]
    fn on_disconnect(&self, socket: Arc<EIoSocket<SocketData<A>>>, reason: EIoDisconnectReason) {
        #[cfg(feature = "tracing")]
        tracing::debug!("eio socket disconnected");
        socket.data.parser_state.reset();
        let socks: Vec<_> = self
            .nsps
            .read()
            .unwrap()
            .values()
            .filter_map(|ns| ns.get_socket(socket.id))
            .collect();

        let _cnt = socks.into_iter().map(|s| s.close(reason.into())).count();

        #[cfg(feature = "tracing")]
        tracing::debug!("disconnect handle spawned for {_cnt} namespaces");
    }

    fn on_message(self: &Arc<Self>, msg: Str, socket: Arc<EIoSocket<SocketData<A>>>) {
        #[cfg(feature = "tracing")]
        tracing::debug!("received message: {:?}", msg);
        match CommonParser.decode_str(&socket.data.parser_state, msg) {
            Ok(packet) => self.dispatch(packet, &socket),
            Err(ParseError::NeedsMoreBinaryData) => (),
            Err(e) => Self::on_parse_error(&socket, e),
        }
    }

    /// A binary payload completes the pending binary packet. The packet is
    /// dispatched once all its attachments are received.
    fn on_binary(self: &Arc<Self>, data: Bytes, socket: Arc<EIoSocket<SocketData<A>>>) {
        #[cfg(feature = "tracing")]
        tracing::debug!("received binary: {:?}", &data);
        match CommonParser.decode_bin(&socket.data.parser_state, data) {
            Ok(packet) => self.dispatch(packet, &socket),
            Err(ParseError::NeedsMoreBinaryData) => (),
            Err(e) => Self::on_parse_error(&socket, e),
        }
    }
}

impl<A: Adapter> fmt::Debug for Client<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("nsps", &self.nsps)
            .finish()
    }
}

#[doc(hidden)]
#[cfg(any(test, feature = "__test_harness"))]
impl<A: Adapter> Client<A> {
    /// Connect a dummy client to a namespace.
    ///
    /// Returns a sender of packets to the server and a receiver of the packets sent to the client.
    /// Sending [`enginewire::Packet::Close`] closes the connection.
    pub async fn new_dummy_sock(
        self: Arc<Self>,
        ns: &'static str,
        auth: impl serde::Serialize,
    ) -> (
        tokio::sync::mpsc::Sender<enginewire::Packet>,
        tokio::sync::mpsc::Receiver<enginewire::Packet>,
    ) {
        use std::sync::{
            Weak,
            atomic::{AtomicBool, Ordering},
        };

        let buffer_size = self.config.engine_config.max_buffer_size;
        let slot: Arc<OnceLock<Weak<EIoSocket<SocketData<A>>>>> = Arc::new(OnceLock::new());
        let close_fn = {
            let slot = slot.clone();
            let client = self.clone();
            let closed = AtomicBool::new(false);
            Box::new(move |_: Sid, reason: EIoDisconnectReason| {
                if closed.swap(true, Ordering::SeqCst) {
                    return;
                }
                if let Some(esock) = slot.get().and_then(Weak::upgrade) {
                    client.on_disconnect(esock, reason);
                }
            })
        };
        let (esock, rx) = EIoSocket::<SocketData<A>>::new_dummy(Sid::new(), close_fn);
        slot.set(Arc::downgrade(&esock)).ok();
        esock.data.io.set(SocketIo::from(self.clone())).ok();

        let (tx1, mut rx1) = tokio::sync::mpsc::channel(buffer_size);
        tokio::spawn({
            let esock = esock.clone();
            let client = self.clone();
            async move {
                while let Some(packet) = rx1.recv().await {
                    match packet {
                        enginewire::Packet::Message(msg) => client.on_message(msg, esock.clone()),
                        enginewire::Packet::Binary(bin) | enginewire::Packet::BinaryV3(bin) => {
                            client.on_binary(bin, esock.clone())
                        }
                        enginewire::Packet::Close => {
                            esock.close(EIoDisconnectReason::TransportClose);
                            return;
                        }
                        _ => {}
                    }
                }
            }
        });

        let auth = socketwire_core::value::to_value(&auth)
            .ok()
            .filter(|v| !v.is_null());
        let encoded = CommonParser.encode(Packet::connect(ns, auth));
        self.on_message(encoded.data, esock.clone());

        // wait for the socket to be connected to the namespace
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        (tx1, rx)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tokio::sync::mpsc;

    use crate::adapter::LocalAdapter;
    const CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(50);

    fn create_client() -> Arc<super::Client<LocalAdapter>> {
        let config = crate::SocketIoConfig {
            connect_timeout: CONNECT_TIMEOUT,
            ..Default::default()
        };
        let client = Arc::new(Client::new(config, ()));
        client.add_ns("/".into(), async || ());
        client
    }

    #[tokio::test]
    async fn get_ns() {
        let client = create_client();
        assert!(client.get_ns("/").is_some());
        assert!(client.get_ns("/admin").is_none());
    }

    #[tokio::test]
    async fn io_should_always_be_set() {
        let client = create_client();
        let close_fn = Box::new(move |_, _| {});
        let (sock, _rx) = EIoSocket::new_dummy(Sid::new(), close_fn);
        client.on_connect(sock.clone());
        assert!(sock.data.io.get().is_some());
    }

    #[tokio::test]
    async fn connect_timeout_fail() {
        let client = create_client();
        let (close_tx, mut close_rx) = mpsc::channel(1);
        let close_fn = Box::new(move |_, reason| close_tx.try_send(reason).unwrap());
        let (sock, _rx) = EIoSocket::new_dummy(Sid::new(), close_fn);
        client.on_connect(sock.clone());
        let res = tokio::time::timeout(CONNECT_TIMEOUT * 2, close_rx.recv())
            .await
            .unwrap();
        assert_eq!(res, Some(EIoDisconnectReason::TransportClose));
    }

    #[tokio::test]
    async fn connect_timeout() {
        let client = create_client();
        let (close_tx, mut close_rx) = mpsc::channel(1);
        let close_fn = Box::new(move |_, reason| close_tx.try_send(reason).unwrap());
        let (sock, _rx) = EIoSocket::new_dummy(Sid::new(), close_fn);
        client.clone().on_connect(sock.clone());
        client.on_message("0".into(), sock.clone());
        tokio::time::timeout(CONNECT_TIMEOUT * 2, close_rx.recv())
            .await
            .unwrap_err();
    }

    #[tokio::test]
    async fn invalid_namespace() {
        let client = create_client();
        let (_tx, mut rx) = client.clone().new_dummy_sock("/unknown", ()).await;
        let packet = rx.recv().await.unwrap();
        assert_eq!(
            packet,
            enginewire::Packet::Message("4/unknown,{\"message\":\"Invalid namespace\"}".into())
        );
    }

    #[tokio::test]
    async fn dynamic_namespace_is_created_once() {
        let client = create_client();
        client
            .add_dyn_ns("/room/{id}".to_string(), async || ())
            .unwrap();
        let (_tx1, _rx1) = client.clone().new_dummy_sock("/room/1", ()).await;
        let (_tx2, _rx2) = client.clone().new_dummy_sock("/room/1", ()).await;
        let ns = client.get_ns("/room/1").unwrap();
        assert_eq!(ns.get_sockets().len(), 2);
        assert!(client.get_ns("/room/2").is_none());
    }

    #[tokio::test]
    async fn empty_dynamic_namespace_is_removed() {
        let config = crate::SocketIoConfig {
            cleanup_empty_dynamic_namespaces: true,
            ..Default::default()
        };
        let client = Arc::new(Client::<LocalAdapter>::new(config, ()));
        client
            .add_dyn_ns("/room/{id}".to_string(), async || ())
            .unwrap();
        let (tx, _rx) = client.clone().new_dummy_sock("/room/1", ()).await;
        assert!(client.get_ns("/room/1").is_some());
        tx.send(enginewire::Packet::Close).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(client.get_ns("/room/1").is_none());
    }
}
