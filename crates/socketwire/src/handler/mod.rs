//! Handlers of the connect, message and disconnect events.
//!
//! Handlers are async functions or closures whose arguments are extractors,
//! see the [`extract`](crate::extract) module.
pub mod connect;
pub mod disconnect;
pub mod message;

pub(crate) use connect::{BoxedConnectHandler, BoxedConnectMiddleware};
pub use connect::{
    ConnectHandler, ConnectMiddleware, ConnectOutcome, FromConnectParts, IntoConnectOutcome,
};
pub(crate) use disconnect::BoxedDisconnectHandler;
pub use disconnect::{DisconnectFuture, DisconnectHandler, FromDisconnectParts};
pub(crate) use message::{BoxedMessageHandler, BoxedSocketMiddleware};
pub use message::{AckRequest, FromMessageParts, MessageHandler};

/// Erases the argument types of a handler so that it can be stored.
pub(crate) struct MakeErasedHandler<H, A, T> {
    handler: H,
    _marker: std::marker::PhantomData<fn() -> (A, T)>,
}

impl<H, A, T> MakeErasedHandler<H, A, T> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<H: Clone, A, T> Clone for MakeErasedHandler<H, A, T> {
    fn clone(&self) -> Self {
        Self::new(self.handler.clone())
    }
}

#[rustfmt::skip]
macro_rules! all_the_tuples {
    ($name:ident) => {
        $name!([]);
        $name!([T1]);
        $name!([T1, T2]);
        $name!([T1, T2, T3]);
        $name!([T1, T2, T3, T4]);
        $name!([T1, T2, T3, T4, T5]);
        $name!([T1, T2, T3, T4, T5, T6]);
        $name!([T1, T2, T3, T4, T5, T6, T7]);
        $name!([T1, T2, T3, T4, T5, T6, T7, T8]);
        $name!([T1, T2, T3, T4, T5, T6, T7, T8, T9]);
        $name!([T1, T2, T3, T4, T5, T6, T7, T8, T9, T10]);
        $name!([T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11]);
        $name!([T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11, T12]);
    };
}
pub(crate) use all_the_tuples;
