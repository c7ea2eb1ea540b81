//! [`MessageHandler`], called for every event received by a socket.
//!
//! Handlers are async closures or functions whose arguments implement [`FromMessageParts`].
//! Several handlers can listen to the same event. They each receive a copy of the arguments,
//! and they share the ack of the event: the first [`AckSender`](crate::extract::AckSender)
//! used answers the client, the others are no-ops.
//!
//! ```no_run
//! # use socketwire::{SocketIo, extract::*};
//! # use serde::Deserialize;
//! #[derive(Debug, Deserialize)]
//! struct Move {
//!     x: i32,
//!     y: i32,
//! }
//!
//! async fn on_move(s: SocketRef, Data(m): Data<Move>, ack: AckSender) {
//!     s.broadcast().emit("move", &(m.x, m.y)).await.ok();
//!     ack.send(&"ok").ok();
//! }
//!
//! let (_, io) = SocketIo::new_svc();
//! io.ns("/", async |s: SocketRef| {
//!     s.on("move", on_move);
//! });
//! ```
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use futures_core::Future;
use socketwire_core::Value;

use super::MakeErasedHandler;
use crate::{adapter::Adapter, socket::Socket};

/// A type erased [`MessageHandler`].
pub(crate) type BoxedMessageHandler<A> = Arc<dyn ErasedMessageHandler<A>>;

/// A socket middleware. It sees the event name and may rewrite the arguments.
/// An error stops the dispatch and is emitted to the `error` listeners of the socket.
pub(crate) type BoxedSocketMiddleware =
    Arc<dyn Fn(&str, &mut Vec<Value>) -> Result<(), String> + Send + Sync>;

pub(crate) trait ErasedMessageHandler<A: Adapter>: Send + Sync + 'static {
    fn call(&self, s: Arc<Socket<A>>, args: Vec<Value>, ack: Option<AckRequest>);
}

/// The ack requested by the client for an incoming event.
///
/// It is shared by every handler of the event, so the ack is sent at most once.
#[derive(Debug, Clone)]
pub struct AckRequest {
    id: i64,
    sent: Arc<AtomicBool>,
}

impl AckRequest {
    pub(crate) fn new(id: i64) -> Self {
        Self {
            id,
            sent: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The ack id chosen by the client.
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Returns true the first time it is called, false afterwards.
    pub(crate) fn claim(&self) -> bool {
        !self.sent.swap(true, Ordering::AcqRel)
    }

    /// Returns true if the ack was already sent.
    pub fn is_sent(&self) -> bool {
        self.sent.load(Ordering::Acquire)
    }
}

/// Extract a handler argument from an incoming event.
/// If the extraction fails the handler is not called.
///
/// See the [`extract`](crate::extract) module for the available extractors.
#[diagnostic::on_unimplemented(
    note = "Function argument is not a valid message extractor",
    label = "Invalid extractor"
)]
pub trait FromMessageParts<A: Adapter>: Sized {
    /// The error returned by the extractor
    type Error: std::error::Error + Send + 'static;

    /// Extract the argument from the socket, the event arguments and the ack request.
    fn from_message_parts(
        s: &Arc<Socket<A>>,
        args: &mut Vec<Value>,
        ack: &Option<AckRequest>,
    ) -> Result<Self, Self::Error>;
}

/// A handler of an event.
///
/// It is implemented for async closures and functions with up to 12 arguments
/// implementing [`FromMessageParts`].
#[diagnostic::on_unimplemented(
    note = "This function is not a MessageHandler. Check that:
* It is a clonable async `FnOnce` that returns nothing.
* All its arguments are valid message extractors.",
    label = "Invalid MessageHandler"
)]
pub trait MessageHandler<A: Adapter, T>: Clone + Send + Sync + 'static {
    /// Call the handler.
    fn call(&self, s: Arc<Socket<A>>, args: Vec<Value>, ack: Option<AckRequest>);
}

impl<A: Adapter, T, H> MakeErasedHandler<H, A, T>
where
    H: MessageHandler<A, T>,
    T: Send + Sync + 'static,
{
    pub fn new_message_boxed(inner: H) -> BoxedMessageHandler<A> {
        Arc::new(MakeErasedHandler::new(inner))
    }
}

impl<A: Adapter, T, H> ErasedMessageHandler<A> for MakeErasedHandler<H, A, T>
where
    H: MessageHandler<A, T>,
    T: Send + Sync + 'static,
{
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all, fields(id = ?s.id)))]
    #[inline(always)]
    fn call(&self, s: Arc<Socket<A>>, args: Vec<Value>, ack: Option<AckRequest>) {
        self.handler.call(s, args, ack);
    }
}

macro_rules! impl_handler_async {
    (
        [$($ty:ident),*]
    ) => {
        #[allow(non_snake_case, unused)]
        #[diagnostic::do_not_recommend]
        impl<A, F, Fut, $($ty,)*> MessageHandler<A, ($($ty,)*)> for F
        where
            F: FnOnce($($ty,)*) -> Fut + Send + Sync + Clone + 'static,
            Fut: Future<Output = ()> + Send + 'static,
            A: Adapter,
            $( $ty: FromMessageParts<A> + Send, )*
        {
            fn call(&self, s: Arc<Socket<A>>, mut args: Vec<Value>, ack: Option<AckRequest>) {
                $(
                    let $ty = match $ty::from_message_parts(&s, &mut args, &ack) {
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
    };
}

super::all_the_tuples!(impl_handler_async);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_request_is_claimed_once() {
        let ack = AckRequest::new(12);
        let other = ack.clone();
        assert_eq!(ack.id(), 12);
        assert!(!other.is_sent());
        assert!(ack.claim());
        assert!(!other.claim());
        assert!(other.is_sent());
    }
}
