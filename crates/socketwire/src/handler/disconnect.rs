//! [`DisconnectHandler`], called when a socket leaves its namespace.
//!
//! Two events are available on a socket:
//! * `disconnecting`, through [`Socket::on_disconnecting`]: called while the socket is
//!   still in its rooms. The socket is removed once every `disconnecting` handler is done.
//! * `disconnect`, through [`Socket::on_disconnect`]: called once the socket has left the
//!   namespace.
//!
//! ```no_run
//! # use socketwire::{SocketIo, extract::*, socket::DisconnectReason};
//! async fn on_disconnect(s: SocketRef, reason: DisconnectReason) {
//!     println!("socket {} left {}: {reason}", s.id, s.ns());
//! }
//!
//! let (_, io) = SocketIo::new_svc();
//! io.ns("/", async |s: SocketRef| {
//!     s.on_disconnecting(async |s: SocketRef| {
//!         println!("leaving rooms {:?}", s.rooms());
//!     });
//!     s.on_disconnect(on_disconnect);
//! });
//! ```
use std::{future::Future, pin::Pin, sync::Arc};

use super::MakeErasedHandler;
use crate::{
    adapter::Adapter,
    socket::{DisconnectReason, Socket},
};

/// The future of a disconnect handler.
pub type DisconnectFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A type erased [`DisconnectHandler`].
pub(crate) type BoxedDisconnectHandler<A> = Arc<dyn ErasedDisconnectHandler<A>>;

pub(crate) trait ErasedDisconnectHandler<A: Adapter>: Send + Sync + 'static {
    fn call(&self, s: Arc<Socket<A>>, reason: DisconnectReason) -> Option<DisconnectFuture>;
}

impl<A: Adapter, T, H> MakeErasedHandler<H, A, T>
where
    H: DisconnectHandler<A, T>,
    T: Send + Sync + 'static,
{
    pub fn new_disconnect_boxed(inner: H) -> BoxedDisconnectHandler<A> {
        Arc::new(MakeErasedHandler::new(inner))
    }
}

impl<A: Adapter, T, H> ErasedDisconnectHandler<A> for MakeErasedHandler<H, A, T>
where
    H: DisconnectHandler<A, T>,
    T: Send + Sync + 'static,
{
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip(self, s), fields(id = ?s.id)))]
    #[inline(always)]
    fn call(&self, s: Arc<Socket<A>>, reason: DisconnectReason) -> Option<DisconnectFuture> {
        self.handler.call(s, reason)
    }
}

/// Extract a handler argument from the disconnect event.
/// If the extraction fails the handler is not called.
///
/// See the [`extract`](crate::extract) module for the available extractors.
#[diagnostic::on_unimplemented(
    note = "Function argument is not a valid disconnect extractor",
    label = "Invalid extractor"
)]
pub trait FromDisconnectParts<A: Adapter>: Sized {
    /// The error returned by the extractor
    type Error: std::error::Error + Send + 'static;

    /// Extract the argument from the socket and the disconnect reason.
    fn from_disconnect_parts(
        s: &Arc<Socket<A>>,
        reason: DisconnectReason,
    ) -> Result<Self, Self::Error>;
}

/// A handler of the `disconnecting` and `disconnect` events.
///
/// It is implemented for async closures and functions with up to 12 arguments
/// implementing [`FromDisconnectParts`].
#[diagnostic::on_unimplemented(
    note = "This function is not a DisconnectHandler. Check that:
* It is a clonable async `FnOnce` that returns nothing.
* All its arguments are valid disconnect extractors.",
    label = "Invalid DisconnectHandler"
)]
pub trait DisconnectHandler<A: Adapter, T>: Send + Sync + 'static {
    /// Extract the arguments and build the handler future.
    /// Returns `None` if an extractor failed.
    fn call(&self, s: Arc<Socket<A>>, reason: DisconnectReason) -> Option<DisconnectFuture>;
}

macro_rules! impl_handler_async {
    (
        [$($ty:ident),*]
    ) => {
        #[allow(non_snake_case, unused)]
        #[diagnostic::do_not_recommend]
        impl<A, F, Fut, $($ty,)*> DisconnectHandler<A, ($($ty,)*)> for F
        where
            F: FnOnce($($ty,)*) -> Fut + Send + Sync + Clone + 'static,
            Fut: Future<Output = ()> + Send + 'static,
            A: Adapter,
            $( $ty: FromDisconnectParts<A> + Send, )*
        {
            fn call(&self, s: Arc<Socket<A>>, reason: DisconnectReason) -> Option<DisconnectFuture> {
                $(
                    let $ty = match $ty::from_disconnect_parts(&s, reason) {
                        Ok(v) => v,
                        Err(_e) => {
                            #[cfg(feature = "tracing")]
                            tracing::error!("error while extracting data: {}", _e);
                            return None;
                        },
                    };
                )*

                Some(Box::pin((self.clone())($($ty,)*)))
            }
        }
    };
}

super::all_the_tuples!(impl_handler_async);
