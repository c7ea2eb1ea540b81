//! A tower [`Layer`] answering engine requests on a path and passing every
//! other request to the wrapped service.
//!
//! ```
//! # use bytes::Bytes;
//! # use enginewire::{
//! #     DisconnectReason, Socket, Str, config::EngineIoConfig, handler::EngineIoHandler,
//! #     layer::EngineIoLayer, service::NotFoundService,
//! # };
//! # use std::sync::Arc;
//! # use tower_layer::Layer;
//! /// Sends every text message back to its sender.
//! #[derive(Debug)]
//! struct Echo;
//!
//! impl EngineIoHandler for Echo {
//!     type Data = ();
//!     fn on_connect(self: Arc<Self>, _: Arc<Socket<()>>) {}
//!     fn on_disconnect(&self, _: Arc<Socket<()>>, _: DisconnectReason) {}
//!     fn on_message(self: &Arc<Self>, msg: Str, socket: Arc<Socket<()>>) {
//!         socket.emit(msg).ok();
//!     }
//!     fn on_binary(self: &Arc<Self>, _: Bytes, _: Arc<Socket<()>>) {}
//! }
//!
//! let config = EngineIoConfig::builder().req_path("/echo").build();
//! let layer = EngineIoLayer::from_config(Arc::new(Echo), config);
//! // requests outside of "/echo" get a 404 from the inner service
//! let svc = layer.layer(NotFoundService);
//! ```
use std::sync::Arc;

use tower_layer::Layer;

use crate::{config::EngineIoConfig, handler::EngineIoHandler, service::EngineIoService};

/// A tower [`Layer`] for the engine service
#[derive(Debug, Clone)]
pub struct EngineIoLayer<H: EngineIoHandler> {
    config: EngineIoConfig,
    handler: Arc<H>,
}

impl<H: EngineIoHandler> EngineIoLayer<H> {
    /// Create a new [`EngineIoLayer`] with a default [`EngineIoConfig`]
    pub fn new(handler: Arc<H>) -> Self {
        Self {
            config: EngineIoConfig::default(),
            handler,
        }
    }

    /// Create a new [`EngineIoLayer`] with a custom [`EngineIoConfig`]
    pub fn from_config(handler: Arc<H>, config: EngineIoConfig) -> Self {
        Self { config, handler }
    }
}

impl<S: Clone, H: EngineIoHandler> Layer<S> for EngineIoLayer<H> {
    type Service = EngineIoService<H, S>;

    fn layer(&self, inner: S) -> Self::Service {
        EngineIoService::with_config_inner(inner, self.handler.clone(), self.config.clone())
    }
}
