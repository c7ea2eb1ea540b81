use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use http::request::Parts;

use crate::{
    ProtocolVersion, Sid, TransportType,
    config::EngineIoConfig,
    handler::EngineIoHandler,
    socket::{DisconnectReason, Socket},
};

type SocketMap<T> = RwLock<HashMap<Sid, Arc<T>>>;

/// The state of the server: its config, its handler and the registry of live sessions.
pub struct EngineIo<H: EngineIoHandler> {
    sockets: SocketMap<Socket<H::Data>>,

    /// The handler called for each session event
    pub handler: Arc<H>,

    /// The server config
    pub config: EngineIoConfig,
}

impl<H: EngineIoHandler> EngineIo<H> {
    /// Create a new server state with a [`EngineIoHandler`] and a [`EngineIoConfig`]
    pub fn new(handler: Arc<H>, config: EngineIoConfig) -> Self {
        Self {
            sockets: RwLock::new(HashMap::new()),
            config,
            handler,
        }
    }

    /// Create a session, register it and notify the handler.
    pub(crate) fn create_session(
        self: &Arc<Self>,
        protocol: ProtocolVersion,
        transport: TransportType,
        req: Parts,
        supports_binary: bool,
    ) -> Arc<Socket<H::Data>> {
        let engine = self.clone();
        let close_fn = Box::new(move |sid, reason| engine.close_session(sid, reason));

        let socket = Arc::new(Socket::new(
            protocol,
            transport,
            &self.config,
            req,
            close_fn,
            supports_binary,
        ));
        self.sockets
            .write()
            .unwrap()
            .insert(socket.id, socket.clone());

        #[cfg(feature = "tracing")]
        tracing::debug!(sid = ?socket.id, ?transport, ?protocol, "session created");

        self.handler.clone().on_connect(socket.clone());
        socket
    }

    /// Get a session by its id.
    /// The socket ref is cloned so the registry lock is not held.
    pub fn get_socket(&self, sid: Sid) -> Option<Arc<Socket<H::Data>>> {
        self.sockets.read().unwrap().get(&sid).cloned()
    }

    /// The number of live sessions
    pub fn sessions_count(&self) -> usize {
        self.sockets.read().unwrap().len()
    }

    /// Close a session: unregister it, stop its heartbeat and notify the handler.
    ///
    /// This is the only way a session leaves the registry.
    /// Only the first call for a given sid has an effect.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub fn close_session(&self, sid: Sid, reason: DisconnectReason) {
        let Some(socket) = self.sockets.write().unwrap().remove(&sid) else {
            #[cfg(feature = "tracing")]
            tracing::debug!("session already closed");
            return;
        };
        socket.set_closed();

        // Polling sessions only lock the channel while a request is pending
        socket.internal_rx.try_lock().map(|mut rx| rx.close()).ok();
        socket.abort_heartbeat();
        self.handler.on_disconnect(socket, reason);

        #[cfg(feature = "tracing")]
        tracing::debug!(remaining = self.sessions_count(), "session closed");
    }

    /// Close every session with [`DisconnectReason::ClosingServer`]
    pub fn close_all(&self) {
        let sockets: Vec<_> = self.sockets.read().unwrap().values().cloned().collect();
        for socket in sockets {
            socket.close(DisconnectReason::ClosingServer);
        }
    }
}

impl<H: EngineIoHandler> std::fmt::Debug for EngineIo<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineIo")
            .field("sessions", &self.sessions_count())
            .field("handler", &self.handler)
            .finish()
    }
}
