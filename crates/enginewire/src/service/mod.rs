//! ## A tower [`Service`] serving the engine requests
//!
//! Requests under [`EngineIoConfig::req_path`] are handled by the engine,
//! other requests are forwarded to the inner service.
//! By default the inner service is a [`NotFoundService`], so the [`EngineIoService`]
//! can be used standalone.

use std::{
    convert::Infallible,
    future::{Future, Ready},
    sync::Arc,
    task::{Context, Poll},
};

use bytes::Bytes;
use http::{Method, Request, Response, StatusCode, request::Parts};
use http_body::Body;
use http_body_util::Empty;
use tokio::io::{AsyncRead, AsyncWrite};
use tower_service::Service;

use crate::{
    ProtocolVersion, Sid, TransportType,
    body::ResponseBody,
    config::EngineIoConfig,
    engine::EngineIo,
    errors::Error,
    handler::EngineIoHandler,
    transport::{polling, webtransport, ws},
};

mod futures;
mod parser;

pub use self::futures::ResponseFuture;
use self::parser::RequestInfo;

/// A [`Service`] that handles engine requests as a middleware.
pub struct EngineIoService<H: EngineIoHandler, S = NotFoundService> {
    inner: S,
    engine: Arc<EngineIo<H>>,
}

impl<H: EngineIoHandler> EngineIoService<H, NotFoundService> {
    /// Create a new [`EngineIoService`] with a [`NotFoundService`] as the inner service.
    pub fn new(handler: Arc<H>) -> Self {
        EngineIoService::with_config(handler, EngineIoConfig::default())
    }

    /// Create a new [`EngineIoService`] with a custom config
    pub fn with_config(handler: Arc<H>, config: EngineIoConfig) -> Self {
        EngineIoService::with_config_inner(NotFoundService, handler, config)
    }
}

impl<S: Clone, H: EngineIoHandler> EngineIoService<H, S> {
    /// Create a new [`EngineIoService`] with a custom inner service.
    pub fn with_inner(inner: S, handler: Arc<H>) -> Self {
        EngineIoService::with_config_inner(inner, handler, EngineIoConfig::default())
    }

    /// Create a new [`EngineIoService`] with a custom inner service and a custom config.
    pub fn with_config_inner(inner: S, handler: Arc<H>, config: EngineIoConfig) -> Self {
        EngineIoService {
            inner,
            engine: Arc::new(EngineIo::new(handler, config)),
        }
    }

    /// Convert this [`EngineIoService`] into a [`MakeEngineIoService`].
    /// This is useful when serving it without layers.
    pub fn into_make_service(self) -> MakeEngineIoService<H, S> {
        MakeEngineIoService::new(self)
    }
}

impl<S, H: EngineIoHandler> EngineIoService<H, S> {
    /// The engine config
    pub fn config(&self) -> &EngineIoConfig {
        &self.engine.config
    }

    /// The number of open sessions
    pub fn sessions_count(&self) -> usize {
        self.engine.sessions_count()
    }

    /// Close every session, e.g. when the server shuts down
    pub fn close_all(&self) {
        self.engine.close_all();
    }

    /// Run a websocket connection over an already upgraded stream.
    ///
    /// This is the entry point for servers doing the websocket upgrade themselves.
    /// A `sid` means the connection upgrades an existing polling session.
    pub fn ws_init<R>(
        &self,
        conn: R,
        protocol: ProtocolVersion,
        sid: Option<Sid>,
        req_parts: Parts,
    ) -> impl Future<Output = Result<(), Error>> + 'static
    where
        R: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let engine = self.engine.clone();
        async move {
            if let Some(sid) = sid {
                ws::check_upgrade(&engine, sid)?;
            }
            ws::on_init(engine, conn, protocol, sid, req_parts).await
        }
    }

    /// Run a webtransport session over a bidirectional stream.
    ///
    /// Fails if the transport is disabled.
    pub fn webtransport_init<R>(
        &self,
        conn: R,
        req_parts: Parts,
    ) -> impl Future<Output = Result<(), Error>> + 'static
    where
        R: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let engine = self.engine.clone();
        async move {
            if !engine.config.allowed_transport(TransportType::WebTransport) {
                return Err(Error::UnknownTransport);
            }
            webtransport::on_init(engine, conn, req_parts).await
        }
    }

    /// Dispatch a request to the matching transport
    fn dispatch_req<F, ReqBody, ResBody>(&self, req: Request<ReqBody>) -> ResponseFuture<F, ResBody>
    where
        ReqBody: Body + Send + Unpin + 'static,
        ReqBody::Data: Send,
        ReqBody::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
        ResBody: Send + 'static,
    {
        let engine = self.engine.clone();
        let (parts, body) = req.into_parts();
        if let Err(msg) = engine.config.request_middlewares.run(&parts) {
            #[cfg(feature = "tracing")]
            tracing::debug!("request rejected by middleware: {msg}");
            return ResponseFuture::ready(Err(Error::Forbidden(msg)));
        }

        let req = Request::from_parts(parts, body);
        let info = match RequestInfo::parse(&req, &engine.config) {
            Ok(info) => info,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("error parsing request: {:?}", e);
                return ResponseFuture::ready(Err(e));
            }
        };
        let (parts, body) = req.into_parts();

        match info {
            RequestInfo {
                protocol,
                sid: None,
                transport: TransportType::Polling,
                method: Method::GET,
                b64,
            } => ResponseFuture::ready(polling::open_req(engine, protocol, parts, !b64)),
            RequestInfo {
                protocol,
                sid: Some(sid),
                transport: TransportType::Polling,
                method: Method::GET,
                ..
            } => ResponseFuture::async_response(Box::pin(polling::polling_req(
                engine, protocol, sid,
            ))),
            RequestInfo {
                protocol,
                sid: Some(sid),
                transport: TransportType::Polling,
                method: Method::POST,
                ..
            } => {
                let req = Request::from_parts(parts, body);
                ResponseFuture::async_response(Box::pin(polling::post_req(
                    engine, protocol, sid, req,
                )))
            }
            RequestInfo {
                protocol,
                sid,
                transport: TransportType::Websocket,
                method: Method::GET,
                ..
            } => {
                let req = Request::from_parts(parts, body);
                ResponseFuture::ready(ws::new_req(engine, protocol, sid, req))
            }
            _info => {
                #[cfg(feature = "tracing")]
                tracing::debug!("invalid request: {:?}", _info);
                ResponseFuture::empty_response(StatusCode::BAD_REQUEST)
            }
        }
    }
}

/// The service implementation for [`EngineIoService`].
impl<ReqBody, ResBody, S, H> Service<Request<ReqBody>> for EngineIoService<H, S>
where
    ResBody: Body + Send + 'static,
    ReqBody: Body + Send + Unpin + 'static,
    ReqBody::Data: Send,
    ReqBody::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    H: EngineIoHandler,
{
    type Response = Response<ResponseBody<ResBody>>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future, ResBody>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        if req.uri().path().starts_with(&*self.engine.config.req_path) {
            self.dispatch_req(req)
        } else {
            ResponseFuture::new(self.inner.call(req))
        }
    }
}

impl<S: Clone, H: EngineIoHandler> Clone for EngineIoService<H, S> {
    fn clone(&self) -> Self {
        EngineIoService {
            inner: self.inner.clone(),
            engine: self.engine.clone(),
        }
    }
}

impl<H: EngineIoHandler, S> std::fmt::Debug for EngineIoService<H, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineIoService")
            .field("engine", &self.engine)
            .finish()
    }
}

/// A MakeService that always returns a clone of the [`EngineIoService`] it was created with.
pub struct MakeEngineIoService<H: EngineIoHandler, S> {
    svc: EngineIoService<H, S>,
}

impl<H: EngineIoHandler, S> MakeEngineIoService<H, S> {
    /// Create a new [`MakeEngineIoService`] from an [`EngineIoService`].
    pub fn new(svc: EngineIoService<H, S>) -> Self {
        MakeEngineIoService { svc }
    }
}

impl<H: EngineIoHandler, S: Clone, T> Service<T> for MakeEngineIoService<H, S> {
    type Response = EngineIoService<H, S>;
    type Error = Infallible;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: T) -> Self::Future {
        std::future::ready(Ok(self.svc.clone()))
    }
}

/// A [`Service`] that always answers 404.
#[derive(Debug, Clone)]
pub struct NotFoundService;

impl<ReqBody> Service<Request<ReqBody>> for NotFoundService
where
    ReqBody: Body + Send + 'static,
{
    type Response = Response<ResponseBody<Empty<Bytes>>>;
    type Error = Infallible;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _: Request<ReqBody>) -> Self::Future {
        let mut res = Response::new(ResponseBody::empty_response());
        *res.status_mut() = StatusCode::NOT_FOUND;
        std::future::ready(Ok(res))
    }
}
