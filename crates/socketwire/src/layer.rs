//! A tower [`Layer`] serving the namespaces of a [`SocketIo`] handle in front of
//! another service.
//!
//! ```
//! # use socketwire::{SocketIo, extract::{Data, SocketRef}};
//! # use tower_layer::Layer;
//! # use enginewire::service::NotFoundService;
//! let (layer, io) = SocketIo::builder().req_path("/rt").build_layer();
//! io.ns("/chat", async |socket: SocketRef| {
//!     socket.on("say", async |socket: SocketRef, Data::<String>(text)| {
//!         socket.broadcast().emit("said", &text).await.ok();
//!     });
//! });
//! let svc = layer.layer(NotFoundService);
//! ```
//!
//! [`SocketIo`]: crate::SocketIo
use std::sync::Arc;

use tower_layer::Layer;

use crate::{
    SocketIoConfig,
    adapter::{Adapter, LocalAdapter},
    client::Client,
    service::SocketIoService,
};

/// A tower [`Layer`] wrapping services in a [`SocketIoService`].
/// Every service it creates shares the same namespaces.
pub struct SocketIoLayer<A: Adapter = LocalAdapter> {
    client: Arc<Client<A>>,
}

impl<A: Adapter> Clone for SocketIoLayer<A> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
        }
    }
}

impl<A: Adapter> SocketIoLayer<A> {
    pub(crate) fn from_config(
        config: SocketIoConfig,
        adapter_state: A::State,
    ) -> (Self, Arc<Client<A>>) {
        let client = Arc::new(Client::new(config, adapter_state));
        let layer = Self {
            client: client.clone(),
        };
        (layer, client)
    }
}

impl<S: Clone, A: Adapter> Layer<S> for SocketIoLayer<A> {
    type Service = SocketIoService<S, A>;

    fn layer(&self, inner: S) -> Self::Service {
        SocketIoService::with_client(inner, self.client.clone())
    }
}
