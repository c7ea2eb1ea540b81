//! A tower [`Service`](tower_service::Service) serving the engine and the namespaces.
//!
//! With a raw `hyper` server:
//! ```no_run
//! # use socketwire::SocketIo;
//! # use hyper::server::conn::http1;
//! # use hyper_util::service::TowerToHyperService;
//! # use tokio::net::TcpListener;
//! #[tokio::main]
//! async fn main() {
//!     let (svc, io) = SocketIo::new_svc();
//!     io.ns("/", async || {});
//!
//!     let listener = TcpListener::bind("127.0.0.1:3000").await.unwrap();
//!     loop {
//!         let (stream, _) = listener.accept().await.unwrap();
//!         let svc = TowerToHyperService::new(svc.clone());
//!         tokio::spawn(async move {
//!             http1::Builder::new()
//!                 .serve_connection(hyper_util::rt::TokioIo::new(stream), svc)
//!                 .with_upgrades()
//!                 .await
//!                 .ok();
//!         });
//!     }
//! }
//! ```
use std::{
    sync::Arc,
    task::{Context, Poll},
};

use enginewire::service::{EngineIoService, MakeEngineIoService};
use http::{Request, Response};
use http_body::Body;
use tower_service::Service;

use crate::{
    SocketIoConfig,
    adapter::{Adapter, LocalAdapter},
    client::Client,
};

/// Serves the requests on the configured path and forwards the others to the inner service.
pub struct SocketIoService<S: Clone, A: Adapter = LocalAdapter> {
    engine_svc: EngineIoService<Client<A>, S>,
}

impl<S, ReqBody, ResBody, A> Service<Request<ReqBody>> for SocketIoService<S, A>
where
    ReqBody: Body + Send + Unpin + 'static,
    ReqBody::Data: Send,
    ReqBody::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    ResBody: Body + Send + 'static,
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone,
    A: Adapter,
{
    type Response = <EngineIoService<Client<A>, S> as Service<Request<ReqBody>>>::Response;
    type Error = <EngineIoService<Client<A>, S> as Service<Request<ReqBody>>>::Error;
    type Future = <EngineIoService<Client<A>, S> as Service<Request<ReqBody>>>::Future;

    #[inline(always)]
    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.engine_svc.poll_ready(cx)
    }
    #[inline(always)]
    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        self.engine_svc.call(req)
    }
}

impl<A: Adapter, S: Clone> SocketIoService<S, A> {
    /// A `MakeService` handing out clones of this service.
    #[inline(always)]
    pub fn into_make_service(self) -> MakeEngineIoService<Client<A>, S> {
        self.engine_svc.into_make_service()
    }

    pub(crate) fn with_config_inner(
        inner: S,
        config: SocketIoConfig,
        adapter_state: A::State,
    ) -> (Self, Arc<Client<A>>) {
        let client = Arc::new(Client::new(config, adapter_state));
        (Self::with_client(inner, client.clone()), client)
    }

    pub(crate) fn with_client(inner: S, client: Arc<Client<A>>) -> Self {
        let engine_config = client.config.engine_config.clone();
        let svc = EngineIoService::with_config_inner(inner, client, engine_config);
        Self { engine_svc: svc }
    }
}

impl<A: Adapter, S: Clone> Clone for SocketIoService<S, A> {
    fn clone(&self) -> Self {
        Self {
            engine_svc: self.engine_svc.clone(),
        }
    }
}

impl<A: Adapter, S: Clone> std::fmt::Debug for SocketIoService<S, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketIoService")
            .field("engine_svc", &self.engine_svc)
            .finish()
    }
}
