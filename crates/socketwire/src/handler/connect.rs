//! [`ConnectHandler`] and [`ConnectMiddleware`], called when a socket joins a namespace.
//!
//! Handlers are async closures or functions whose arguments implement [`FromConnectParts`].
//!
//! # Middlewares
//! A connect handler can be wrapped with middlewares through [`ConnectHandler::with`].
//! They run before the socket is added to the namespace, in the order they were added,
//! and each one decides of a [`ConnectOutcome`]:
//! * [`ConnectOutcome::Continue`] runs the next middleware, then connects the socket.
//! * [`ConnectOutcome::Reject`] sends a connect error to the client and keeps the connection.
//! * [`ConnectOutcome::RejectAndClose`] sends a connect error and closes the connection.
//!
//! Middlewares may also return a `Result<(), E>` where `E: Display`, an error being a rejection.
//!
//! ```no_run
//! # use socketwire::{SocketIo, extract::*, handler::{ConnectHandler, ConnectOutcome}};
//! async fn handler(s: SocketRef) {
//!     println!("socket connected on / with id: {}", s.id);
//! }
//!
//! async fn auth(Data(token): Data<String>) -> Result<(), String> {
//!     if token == "secret" { Ok(()) } else { Err("invalid token".into()) }
//! }
//!
//! async fn banned(s: SocketRef) -> ConnectOutcome {
//!     match s.req_parts().uri.query() {
//!         Some(q) if q.contains("banned") => ConnectOutcome::RejectAndClose("banned".into()),
//!         _ => ConnectOutcome::Continue,
//!     }
//! }
//!
//! let (_, io) = SocketIo::new_svc();
//! io.ns("/", handler.with(banned).with(auth));
//! ```
use std::{fmt::Display, future::Future, pin::Pin, sync::Arc};

use socketwire_core::Value;

use super::MakeErasedHandler;
use crate::{adapter::Adapter, socket::Socket};

/// A type erased [`ConnectHandler`].
pub(crate) type BoxedConnectHandler<A> = Box<dyn ErasedConnectHandler<A>>;
/// A type erased [`ConnectMiddleware`].
pub(crate) type BoxedConnectMiddleware<A> = Arc<dyn ErasedConnectMiddleware<A>>;

type OutcomeFut<'a> = Pin<Box<dyn Future<Output = ConnectOutcome> + Send + 'a>>;

pub(crate) trait ErasedConnectHandler<A: Adapter>: Send + Sync + 'static {
    fn call(&self, s: Arc<Socket<A>>, auth: Option<Value>);
    fn middlewares(&self) -> &[BoxedConnectMiddleware<A>];
    fn boxed_clone(&self) -> BoxedConnectHandler<A>;
}

pub(crate) trait ErasedConnectMiddleware<A: Adapter>: Send + Sync + 'static {
    fn call<'a>(&'a self, s: Arc<Socket<A>>, auth: &'a Option<Value>) -> OutcomeFut<'a>;
}

/// The decision of a connect middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Go on with the next middleware
    Continue,
    /// Refuse the connection with a message. The client may try another namespace.
    Reject(String),
    /// Refuse the connection with a message and close the underlying connection.
    RejectAndClose(String),
}

/// Conversion of the return value of a middleware into a [`ConnectOutcome`].
pub trait IntoConnectOutcome {
    /// Convert `self` into an outcome.
    fn into_outcome(self) -> ConnectOutcome;
}

impl IntoConnectOutcome for ConnectOutcome {
    fn into_outcome(self) -> ConnectOutcome {
        self
    }
}

impl<E: Display> IntoConnectOutcome for Result<(), E> {
    fn into_outcome(self) -> ConnectOutcome {
        match self {
            Ok(()) => ConnectOutcome::Continue,
            Err(e) => ConnectOutcome::Reject(e.to_string()),
        }
    }
}

/// Extract a handler argument from the connect event.
/// If the extraction fails the handler is not called.
///
/// See the [`extract`](crate::extract) module for the available extractors.
#[diagnostic::on_unimplemented(
    note = "Function argument is not a valid connect extractor",
    label = "Invalid extractor"
)]
pub trait FromConnectParts<A: Adapter>: Sized {
    /// The error returned by the extractor
    type Error: std::error::Error + Send + 'static;

    /// Extract the argument from the socket and its auth payload.
    fn from_connect_parts(s: &Arc<Socket<A>>, auth: &Option<Value>) -> Result<Self, Self::Error>;
}

/// A handler of the connect event.
///
/// It is implemented for async closures and functions with up to 12 arguments
/// implementing [`FromConnectParts`].
#[diagnostic::on_unimplemented(
    note = "This function is not a ConnectHandler. Check that:
* It is a clonable async `FnOnce` that returns nothing.
* All its arguments are valid connect extractors.",
    label = "Invalid ConnectHandler"
)]
pub trait ConnectHandler<A: Adapter, T>: Sized + Clone + Send + Sync + 'static {
    /// Call the handler.
    fn call(&self, s: Arc<Socket<A>>, auth: Option<Value>);

    /// Add a middleware, called after the ones already added.
    fn with<M, T1>(self, middleware: M) -> impl ConnectHandler<A, T>
    where
        M: ConnectMiddleware<A, T1>,
        T: Send + Sync + 'static,
        T1: Send + Sync + 'static,
    {
        LayeredConnectHandler {
            handler: self,
            middlewares: vec![MakeErasedHandler::new_middleware_boxed(middleware)],
            _marker: std::marker::PhantomData,
        }
    }

    #[doc(hidden)]
    fn middlewares(&self) -> &[BoxedConnectMiddleware<A>] {
        &[]
    }
}

/// A middleware of the connect event.
///
/// It is implemented for async closures and functions with up to 12 arguments
/// implementing [`FromConnectParts`] and returning an [`IntoConnectOutcome`].
#[diagnostic::on_unimplemented(
    note = "This function is not a ConnectMiddleware. Check that:
* It is a clonable async `FnOnce` that returns a `ConnectOutcome` or a `Result<(), impl Display>`.
* All its arguments are valid connect extractors.",
    label = "Invalid ConnectMiddleware"
)]
pub trait ConnectMiddleware<A: Adapter, T>: Sized + Clone + Send + Sync + 'static {
    /// Run the middleware.
    fn call<'a>(
        &'a self,
        s: Arc<Socket<A>>,
        auth: &'a Option<Value>,
    ) -> impl Future<Output = ConnectOutcome> + Send + 'a;
}

/// A [`ConnectHandler`] with an ordered list of middlewares.
struct LayeredConnectHandler<A: Adapter, H, T> {
    handler: H,
    middlewares: Vec<BoxedConnectMiddleware<A>>,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<A: Adapter, H: Clone, T> Clone for LayeredConnectHandler<A, H, T> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
            middlewares: self.middlewares.clone(),
            _marker: std::marker::PhantomData,
        }
    }
}

#[diagnostic::do_not_recommend]
impl<A, H, T> ConnectHandler<A, T> for LayeredConnectHandler<A, H, T>
where
    A: Adapter,
    H: ConnectHandler<A, T>,
    T: Send + Sync + 'static,
{
    fn call(&self, s: Arc<Socket<A>>, auth: Option<Value>) {
        self.handler.call(s, auth);
    }

    fn with<M, T1>(mut self, middleware: M) -> impl ConnectHandler<A, T>
    where
        M: ConnectMiddleware<A, T1>,
        T1: Send + Sync + 'static,
    {
        self.middlewares
            .push(MakeErasedHandler::new_middleware_boxed(middleware));
        self
    }

    fn middlewares(&self) -> &[BoxedConnectMiddleware<A>] {
        &self.middlewares
    }
}

impl<A: Adapter, T, H> MakeErasedHandler<H, A, T>
where
    H: ConnectHandler<A, T>,
    T: Send + Sync + 'static,
{
    pub fn new_ns_boxed(inner: H) -> BoxedConnectHandler<A> {
        Box::new(MakeErasedHandler::new(inner))
    }
}

impl<A: Adapter, T, H> ErasedConnectHandler<A> for MakeErasedHandler<H, A, T>
where
    H: ConnectHandler<A, T>,
    T: Send + Sync + 'static,
{
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip(self, s, auth), fields(id = ?s.id)))]
    fn call(&self, s: Arc<Socket<A>>, auth: Option<Value>) {
        self.handler.call(s, auth);
    }

    fn middlewares(&self) -> &[BoxedConnectMiddleware<A>] {
        self.handler.middlewares()
    }

    fn boxed_clone(&self) -> BoxedConnectHandler<A> {
        Box::new(self.clone())
    }
}

impl<A: Adapter, T, M> MakeErasedHandler<M, A, T>
where
    M: ConnectMiddleware<A, T>,
    T: Send + Sync + 'static,
{
    pub fn new_middleware_boxed(inner: M) -> BoxedConnectMiddleware<A> {
        Arc::new(MakeErasedHandler::new(inner))
    }
}

impl<A: Adapter, T, M> ErasedConnectMiddleware<A> for MakeErasedHandler<M, A, T>
where
    M: ConnectMiddleware<A, T>,
    T: Send + Sync + 'static,
{
    fn call<'a>(&'a self, s: Arc<Socket<A>>, auth: &'a Option<Value>) -> OutcomeFut<'a> {
        Box::pin(self.handler.call(s, auth))
    }
}

/// Run the middlewares in order until one of them does not continue.
pub(crate) async fn run_middlewares<A: Adapter>(
    middlewares: &[BoxedConnectMiddleware<A>],
    s: &Arc<Socket<A>>,
    auth: &Option<Value>,
) -> ConnectOutcome {
    for middleware in middlewares {
        match middleware.call(s.clone(), auth).await {
            ConnectOutcome::Continue => continue,
            outcome => return outcome,
        }
    }
    ConnectOutcome::Continue
}

macro_rules! impl_handler_async {
    (
        [$($ty:ident),*]
    ) => {
        #[allow(non_snake_case, unused)]
        #[diagnostic::do_not_recommend]
        impl<A, F, Fut, $($ty,)*> ConnectHandler<A, ($($ty,)*)> for F
        where
            F: FnOnce($($ty,)*) -> Fut + Send + Sync + Clone + 'static,
            Fut: Future<Output = ()> + Send + 'static,
            A: Adapter,
            $( $ty: FromConnectParts<A> + Send, )*
        {
            fn call(&self, s: Arc<Socket<A>>, auth: Option<Value>) {
                $(
                    let $ty = match $ty::from_connect_parts(&s, &auth) {
                        Ok(v) => v,
                        Err(_e) => {
                            #[cfg(feature = "tracing")]
                            tracing::error!("error while extracting data: {}", _e);
                            return;
                        },
                    };
                )*

                let fut = (self.clone())($($ty,)*);
                tokio::spawn(fut);
            }
        }

        #[allow(non_snake_case, unused)]
        #[diagnostic::do_not_recommend]
        impl<A, F, Fut, R, $($ty,)*> ConnectMiddleware<A, ($($ty,)*)> for F
        where
            F: FnOnce($($ty,)*) -> Fut + Send + Sync + Clone + 'static,
            Fut: Future<Output = R> + Send + 'static,
            R: IntoConnectOutcome + Send + 'static,
            A: Adapter,
            $( $ty: FromConnectParts<A> + Send + 'static, )*
        {
            fn call<'a>(
                &'a self,
                s: Arc<Socket<A>>,
                auth: &'a Option<Value>,
            ) -> impl Future<Output = ConnectOutcome> + Send + 'a {
                let args: Result<($($ty,)*), String> = (|| {
                    Ok(($(
                        <$ty as FromConnectParts<A>>::from_connect_parts(&s, auth)
                            .map_err(|e| e.to_string())?,
                    )*))
                })();
                async move {
                    match args {
                        Ok(($($ty,)*)) => (self.clone())($($ty,)*).await.into_outcome(),
                        Err(e) => {
                            #[cfg(feature = "tracing")]
                            tracing::debug!("error while extracting middleware data: {}", e);
                            ConnectOutcome::Reject(e)
                        }
                    }
                }
            }
        }
    };
}

super::all_the_tuples!(impl_handler_async);
